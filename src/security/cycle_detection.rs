//! Containment checks for moves and drops.
//!
//! A folder cannot be moved into itself or below itself. Paths are compared
//! after [`resolve_path`], so two spellings of the same directory through a
//! symlink compare equal, and a destination that a plan has not created yet
//! still resolves.

use super::resolve_path;
use std::fs;
use std::path::{Path, PathBuf};

/// Links followed before a chain counts as a loop (POSIX SYMLOOP_MAX)
const MAX_LINK_HOPS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CycleError {
    #[error("Cannot move {0:?} into itself")]
    SelfDrop(PathBuf),
    #[error("Cannot move {moved:?} into {target:?}, which is inside it")]
    IntoDescendant { moved: PathBuf, target: PathBuf },
    #[error("Drop target {0:?} is part of the selection")]
    TargetSelected(PathBuf),
    #[error("Too many levels of symbolic links at {path:?} ({hops} hops)")]
    LinkLoop { path: PathBuf, hops: usize },
}

/// Where a move target sits relative to the item being moved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Elsewhere: the move is safe
    Outside,
    /// The item itself
    Same,
    /// Strictly below the item
    Inside,
}

/// Classify `target` against `source`. Comparison is by component, so
/// `/a/bc` is outside `/a/b`.
pub fn placement(source: &Path, target: &Path) -> Placement {
    let source = resolve_path(source);
    let target = resolve_path(target);

    if target == source {
        Placement::Same
    } else if target.starts_with(&source) {
        Placement::Inside
    } else {
        Placement::Outside
    }
}

pub fn would_create_cycle(source: &Path, target: &Path) -> bool {
    placement(source, target) != Placement::Outside
}

/// [`would_create_cycle`] with the reason attached
pub fn check_cycle(source: &Path, target: &Path) -> Result<(), CycleError> {
    match placement(source, target) {
        Placement::Outside => Ok(()),
        Placement::Same => Err(CycleError::SelfDrop(resolve_path(source))),
        Placement::Inside => Err(CycleError::IntoDescendant {
            moved: resolve_path(source),
            target: resolve_path(target),
        }),
    }
}

/// Walk the link chain starting at `path` and fail once it runs longer
/// than [`MAX_LINK_HOPS`]. Dangling links and plain files end the walk.
pub fn check_symlink_loop(path: &Path) -> Result<(), CycleError> {
    let mut current = path.to_path_buf();

    for _ in 0..MAX_LINK_HOPS {
        let is_link = fs::symlink_metadata(&current)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            return Ok(());
        }
        let Ok(link) = fs::read_link(&current) else {
            return Ok(());
        };
        // An absolute link replaces the base entirely
        current = match current.parent() {
            Some(parent) => parent.join(link),
            None => link,
        };
    }

    Err(CycleError::LinkLoop {
        path: path.to_path_buf(),
        hops: MAX_LINK_HOPS,
    })
}

/// Check a drop of `sources` onto `target`: no link loops, the target is
/// not itself part of a multi-item selection, and no source would land
/// inside itself.
pub fn check_drop(sources: &[PathBuf], target: &Path) -> Result<(), CycleError> {
    check_symlink_loop(target)?;
    sources.iter().try_for_each(|s| check_symlink_loop(s))?;

    if sources.len() > 1 {
        let resolved_target = resolve_path(target);
        if sources.iter().any(|s| resolve_path(s) == resolved_target) {
            return Err(CycleError::TargetSelected(resolved_target));
        }
    }

    sources.iter().try_for_each(|s| check_cycle(s, target))
}
