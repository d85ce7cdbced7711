//! Filesystem primitives behind every journaled operation
//!
//! All functions here are blocking and are meant to run on
//! `tokio::task::spawn_blocking`. Errors are plain strings because they are
//! written verbatim into the journal.
//!
//! Primitives are idempotent where the outcome can be recognized on disk, so
//! an operation interrupted by a crash can be replayed on resume.

#[cfg(any(
    target_os = "windows",
    all(
        unix,
        not(target_os = "macos"),
        not(target_os = "ios"),
        not(target_os = "android")
    )
))]
use crate::security::resolve_path;
use crate::security::PathValidator;
use crate::wal::entry::WALOperationType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Policy for handling destination conflicts during execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Return error (default behavior)
    #[default]
    Fail,
    /// Skip the operation and continue execution
    Skip,
    /// Generate unique name (_1, _2, etc.) and proceed
    AutoRename,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(ConflictPolicy::Fail),
            "skip" => Ok(ConflictPolicy::Skip),
            "auto_rename" | "autorename" | "rename" => Ok(ConflictPolicy::AutoRename),
            other => Err(format!("Unknown conflict policy: {}", other)),
        }
    }
}

/// Where trashed items go
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrashStrategy {
    /// The platform trash (Finder Trash, freedesktop trash, Recycle Bin)
    #[default]
    System,
    /// An app-private holding directory; rollback moves items back exactly
    Quarantine(PathBuf),
}

/// Outcome of a single operation execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Operation completed at the planned location
    Completed,
    /// Operation completed, but the result lives at another path
    CompletedAt(PathBuf),
    /// Operation was not performed (includes reason)
    Skipped(String),
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Generate a unique path by appending a counter suffix
pub fn generate_unique_path(original: &Path) -> PathBuf {
    let parent = original.parent().unwrap_or(Path::new("."));
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let ext = original
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1;
    loop {
        let candidate = parent.join(format!("{}_{}{}", stem, counter, ext));
        if !exists(&candidate) {
            return candidate;
        }
        counter += 1;
        if counter > 1000 {
            // Safety limit - use UUID suffix
            return parent.join(format!("{}_{}{}", stem, uuid::Uuid::new_v4(), ext));
        }
    }
}

/// Resolve a destination conflict according to `policy`.
///
/// Returns the path to write to, or the skip reason.
fn resolve_conflict(destination: &Path, policy: ConflictPolicy) -> Result<Result<PathBuf, String>, String> {
    if !exists(destination) {
        return Ok(Ok(destination.to_path_buf()));
    }
    match policy {
        ConflictPolicy::Fail => Err(format!(
            "Destination already exists: {}",
            destination.display()
        )),
        ConflictPolicy::Skip => Ok(Err(format!(
            "Destination exists: {}",
            destination.display()
        ))),
        ConflictPolicy::AutoRename => Ok(Ok(generate_unique_path(destination))),
    }
}

/// Destination for an operation whose renamed target may already be
/// journaled. A reserved path is used as is and must still be free.
fn resolve_target(
    planned: &Path,
    reserved: Option<&Path>,
    policy: ConflictPolicy,
) -> Result<Result<PathBuf, String>, String> {
    match reserved {
        Some(path) if exists(path) => Err(format!(
            "Reserved destination is occupied: {}",
            path.display()
        )),
        Some(path) => Ok(Ok(path.to_path_buf())),
        None => resolve_conflict(planned, policy),
    }
}

/// Pick the renamed destination up front when `AutoRename` has to step
/// around an existing item, so it can be journaled before anything moves.
///
/// Returns `None` when the operation will land at its planned path.
pub fn reserve_destination(operation: &WALOperationType, policy: ConflictPolicy) -> Option<PathBuf> {
    if policy != ConflictPolicy::AutoRename {
        return None;
    }
    let (source, planned) = match operation {
        WALOperationType::Move {
            source,
            destination,
        }
        | WALOperationType::Copy {
            source,
            destination,
        } => (source.as_path(), destination.clone()),
        WALOperationType::Rename { path, new_name } => (path.as_path(), path.parent()?.join(new_name)),
        _ => return None,
    };

    (exists(source) && exists(&planned)).then(|| generate_unique_path(&planned))
}

fn outcome_for(planned: &Path, actual: PathBuf) -> OperationOutcome {
    if actual == planned {
        OperationOutcome::Completed
    } else {
        OperationOutcome::CompletedAt(actual)
    }
}

/// Execute a single journaled operation
///
/// `reserved` is the destination journaled by [`reserve_destination`] for a
/// Move, Rename or Copy. A replay trusts that path instead of the planned
/// one, so an item that already existed there is never mistaken for ours.
pub fn apply_operation(
    operation_id: &str,
    operation: &WALOperationType,
    policy: ConflictPolicy,
    trash: &TrashStrategy,
    reserved: Option<&Path>,
) -> Result<OperationOutcome, String> {
    match operation {
        WALOperationType::CreateFolder { path } => {
            if path.is_dir() {
                return Ok(OperationOutcome::Completed);
            }
            if exists(path) {
                return Err(format!("A file is in the way of folder {}", path.display()));
            }
            fs::create_dir_all(path)
                .map_err(|e| format!("Failed to create folder {}: {}", path.display(), e))?;
            Ok(OperationOutcome::Completed)
        }

        WALOperationType::Move {
            source,
            destination,
        } => {
            if !exists(source) {
                let landed = reserved.unwrap_or(destination.as_path());
                if exists(landed) {
                    // Source gone but destination present: applied before a crash
                    return Ok(outcome_for(destination, landed.to_path_buf()));
                }
                return Err(format!("Source not found: {}", source.display()));
            }

            if PathValidator::is_protected_path(source) {
                return Err(format!("Cannot move protected path: {}", source.display()));
            }

            let target = match resolve_target(destination, reserved, policy)? {
                Ok(target) => target,
                Err(reason) => return Ok(OperationOutcome::Skipped(reason)),
            };
            perform_move(source, &target)?;
            Ok(outcome_for(destination, target))
        }

        WALOperationType::Rename { path, new_name } => {
            let parent = path
                .parent()
                .ok_or_else(|| format!("Cannot determine parent of {}", path.display()))?;
            let new_path = parent.join(new_name);

            if !exists(path) {
                let landed = reserved.map(Path::to_path_buf).unwrap_or_else(|| new_path.clone());
                if exists(&landed) {
                    return Ok(outcome_for(&new_path, landed));
                }
                return Err(format!("Path not found: {}", path.display()));
            }

            if PathValidator::is_protected_path(path) {
                return Err(format!("Cannot rename protected path: {}", path.display()));
            }

            let target = match resolve_target(&new_path, reserved, policy)? {
                Ok(target) => target,
                Err(reason) => return Ok(OperationOutcome::Skipped(reason)),
            };
            fs::rename(path, &target).map_err(|e| {
                format!("Failed to rename {} to {}: {}", path.display(), target.display(), e)
            })?;
            Ok(outcome_for(&new_path, target))
        }

        WALOperationType::Copy {
            source,
            destination,
        } => {
            if let Some(landed) = reserved.filter(|p| exists(p)) {
                // The reserved name was free when journaled, so this is our copy
                return Ok(OperationOutcome::CompletedAt(landed.to_path_buf()));
            }
            if !exists(source) {
                return Err(format!("Source not found: {}", source.display()));
            }

            let target = match resolve_target(destination, reserved, policy)? {
                Ok(target) => target,
                Err(reason) => return Ok(OperationOutcome::Skipped(reason)),
            };
            perform_copy(source, &target)?;
            Ok(outcome_for(destination, target))
        }

        WALOperationType::Trash { path } => send_to_trash(operation_id, path, trash),

        WALOperationType::DeleteFolder { path } => {
            if !exists(path) {
                return Ok(OperationOutcome::Completed);
            }
            if !path.is_dir() {
                return Ok(OperationOutcome::Skipped(format!(
                    "Not a folder, left in place: {}",
                    path.display()
                )));
            }
            if PathValidator::is_protected_path(path) {
                return Err(format!("Cannot delete protected path: {}", path.display()));
            }

            let is_empty = fs::read_dir(path)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !is_empty {
                return Ok(OperationOutcome::Skipped(format!(
                    "Folder not empty, left in place: {}",
                    path.display()
                )));
            }

            fs::remove_dir(path)
                .map_err(|e| format!("Failed to delete folder {}: {}", path.display(), e))?;
            Ok(OperationOutcome::Completed)
        }

        WALOperationType::DeleteCopy { path } => {
            if !exists(path) {
                return Ok(OperationOutcome::Completed);
            }
            if PathValidator::is_protected_path(path) {
                return Err(format!("Cannot delete protected path: {}", path.display()));
            }

            let meta = fs::symlink_metadata(path)
                .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
            if meta.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            }
            .map_err(|e| format!("Failed to delete copy {}: {}", path.display(), e))?;
            Ok(OperationOutcome::Completed)
        }

        WALOperationType::Restore { path, from } => restore_from_trash(path, from.as_deref()),
    }
}

/// Helper function to perform a move operation
///
/// Same-volume moves are a single rename. Across volumes the item is copied
/// and then the source removed, which is not atomic.
pub fn perform_move(source: &Path, destination: &Path) -> Result<(), String> {
    ensure_parent(destination)?;

    if fs::rename(source, destination).is_err() {
        let meta = fs::symlink_metadata(source)
            .map_err(|e| format!("Failed to read {}: {}", source.display(), e))?;
        if meta.is_dir() {
            copy_dir_all(source, destination)?;
            fs::remove_dir_all(source).map_err(|e| format!("Failed to remove source: {}", e))?;
        } else {
            copy_file(source, destination)?;
            fs::remove_file(source).map_err(|e| format!("Failed to remove source: {}", e))?;
        }
    }
    Ok(())
}

/// Helper function to perform a copy operation
pub fn perform_copy(source: &Path, destination: &Path) -> Result<(), String> {
    ensure_parent(destination)?;

    if source.is_dir() {
        copy_dir_all(source, destination)
    } else {
        copy_file(source, destination)
    }
}

fn ensure_parent(destination: &Path) -> Result<(), String> {
    if let Some(parent) = destination.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create destination directory: {}", e))?;
        }
    }
    Ok(())
}

fn copy_file(source: &Path, destination: &Path) -> Result<(), String> {
    let meta = fs::symlink_metadata(source)
        .map_err(|e| format!("Failed to read {}: {}", source.display(), e))?;

    #[cfg(unix)]
    if meta.is_symlink() {
        let link = fs::read_link(source).map_err(|e| format!("Failed to read link: {}", e))?;
        return std::os::unix::fs::symlink(link, destination)
            .map_err(|e| format!("Failed to copy link: {}", e));
    }
    #[cfg(not(unix))]
    let _ = meta;

    fs::copy(source, destination)
        .map(|_| ())
        .map_err(|e| format!("Failed to copy: {}", e))
}

/// Copy a directory tree, preserving symlinks as links
fn copy_dir_all(src: &Path, dst: &Path) -> Result<(), String> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| format!("Failed to read directory: {}", e))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| format!("Failed to compute relative path: {}", e))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| format!("Failed to create directory: {}", e))?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Quarantine location for an operation's item
fn quarantine_path(dir: &Path, operation_id: &str, path: &Path) -> PathBuf {
    let slot: String = operation_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "item".into());
    dir.join(slot).join(name)
}

fn send_to_trash(
    operation_id: &str,
    path: &Path,
    strategy: &TrashStrategy,
) -> Result<OperationOutcome, String> {
    let quarantined = match strategy {
        TrashStrategy::Quarantine(dir) => Some(quarantine_path(dir, operation_id, path)),
        TrashStrategy::System => None,
    };

    if !exists(path) {
        // Already gone: trashed before a crash
        return Ok(match quarantined {
            Some(q) if exists(&q) => OperationOutcome::CompletedAt(q),
            _ => OperationOutcome::Completed,
        });
    }

    if PathValidator::is_protected_path(path) {
        return Err(format!("Cannot trash protected path: {}", path.display()));
    }

    match quarantined {
        Some(q) => {
            if exists(&q) {
                return Err(format!("Quarantine slot already used: {}", q.display()));
            }
            perform_move(path, &q)?;
            Ok(OperationOutcome::CompletedAt(q))
        }
        None => {
            trash::delete(path)
                .map_err(|e| format!("Failed to move {} to trash: {}", path.display(), e))?;
            Ok(OperationOutcome::Completed)
        }
    }
}

fn restore_from_trash(path: &Path, from: Option<&Path>) -> Result<OperationOutcome, String> {
    match from {
        Some(quarantined) => {
            if !exists(quarantined) {
                if exists(path) {
                    return Ok(OperationOutcome::Completed);
                }
                return Err(format!(
                    "Quarantined item missing: {}",
                    quarantined.display()
                ));
            }
            if exists(path) {
                return Err(format!("Cannot restore, path is occupied: {}", path.display()));
            }
            perform_move(quarantined, path)?;
            // Drop the now-empty per-operation slot
            if let Some(slot) = quarantined.parent() {
                let _ = fs::remove_dir(slot);
            }
            Ok(OperationOutcome::Completed)
        }
        None => {
            if exists(path) {
                return Ok(OperationOutcome::Completed);
            }
            restore_from_system_trash(path)
        }
    }
}

#[cfg(any(
    target_os = "windows",
    all(
        unix,
        not(target_os = "macos"),
        not(target_os = "ios"),
        not(target_os = "android")
    )
))]
fn restore_from_system_trash(path: &Path) -> Result<OperationOutcome, String> {
    let wanted = [path.to_path_buf(), resolve_path(path)];
    let items = trash::os_limited::list().map_err(|e| format!("Failed to list trash: {}", e))?;

    let latest = items
        .into_iter()
        .filter(|item| wanted.contains(&item.original_path()))
        .max_by_key(|item| item.time_deleted);

    match latest {
        Some(item) => {
            trash::os_limited::restore_all([item])
                .map_err(|e| format!("Failed to restore {} from trash: {}", path.display(), e))?;
            Ok(OperationOutcome::Completed)
        }
        None => Ok(OperationOutcome::Skipped(format!(
            "Item not found in trash: {}",
            path.display()
        ))),
    }
}

#[cfg(not(any(
    target_os = "windows",
    all(
        unix,
        not(target_os = "macos"),
        not(target_os = "ios"),
        not(target_os = "android")
    )
)))]
fn restore_from_system_trash(path: &Path) -> Result<OperationOutcome, String> {
    Ok(OperationOutcome::Skipped(format!(
        "Restoring from the system trash is not supported on this platform; restore {} manually",
        path.display()
    )))
}

/// Whether an operation's effect is visible on disk.
///
/// Used for entries found `executing` after a crash, where the journal
/// cannot say whether the primitive ran.
pub fn appears_applied(operation: &WALOperationType, final_path: Option<&Path>) -> bool {
    match operation {
        WALOperationType::CreateFolder { path } => path.is_dir(),
        WALOperationType::Move {
            source,
            destination,
        } => !exists(source) && exists(final_path.unwrap_or(destination.as_path())),
        WALOperationType::Rename { path, new_name } => {
            let renamed = path.parent().map(|p| p.join(new_name));
            let target = final_path.map(Path::to_path_buf).or(renamed);
            !exists(path) && target.is_some_and(|t| exists(&t))
        }
        WALOperationType::Copy { destination, .. } => {
            exists(final_path.unwrap_or(destination.as_path()))
        }
        WALOperationType::Trash { path } => !exists(path),
        WALOperationType::DeleteFolder { .. }
        | WALOperationType::DeleteCopy { .. }
        | WALOperationType::Restore { .. } => false,
    }
}

/// Remove directories left empty by vacated paths, walking up toward
/// `root`.
///
/// `root` itself and protected paths are never removed. Returns how many
/// directories were deleted.
pub fn cleanup_empty_directories(vacated: &[PathBuf], root: &Path) -> usize {
    let mut deleted_count = 0;
    let mut candidates: Vec<PathBuf> = vacated
        .iter()
        .filter_map(|p| p.parent().map(Path::to_path_buf))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    // Deepest first so children go before their parents
    candidates.sort_by_key(|p| std::cmp::Reverse(p.components().count()));

    for start in candidates {
        let mut current = start;
        while current != root && current.starts_with(root) {
            if PathValidator::is_protected_path(&current) {
                tracing::debug!(path = %current.display(), "Skipping protected empty directory");
                break;
            }

            let is_empty = fs::read_dir(&current)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !is_empty {
                break;
            }

            match fs::remove_dir(&current) {
                Ok(()) => {
                    tracing::debug!(path = %current.display(), "Deleted empty directory");
                    deleted_count += 1;
                }
                Err(e) => {
                    tracing::debug!(
                        path = %current.display(),
                        error = %e,
                        "Could not delete directory"
                    );
                    break;
                }
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }
    }

    deleted_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn run(operation: &WALOperationType) -> Result<OperationOutcome, String> {
        apply_operation("op", operation, ConflictPolicy::Fail, &TrashStrategy::System, None)
    }

    #[test]
    fn test_create_folder_is_idempotent() {
        let dir = tempdir().unwrap();
        let op = WALOperationType::CreateFolder {
            path: dir.path().join("a/b"),
        };

        assert_eq!(run(&op).unwrap(), OperationOutcome::Completed);
        assert_eq!(run(&op).unwrap(), OperationOutcome::Completed);
        assert!(dir.path().join("a/b").is_dir());
    }

    #[test]
    fn test_move_creates_parent_and_replays() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.txt");
        let dest = dir.path().join("sub/dest.txt");
        fs::write(&source, "content").unwrap();

        let op = WALOperationType::Move {
            source: source.clone(),
            destination: dest.clone(),
        };

        assert_eq!(run(&op).unwrap(), OperationOutcome::Completed);
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "content");

        // Replaying after a crash recognizes the finished move
        assert_eq!(run(&op).unwrap(), OperationOutcome::Completed);
    }

    #[test]
    fn test_move_missing_source_fails() {
        let dir = tempdir().unwrap();
        let op = WALOperationType::Move {
            source: dir.path().join("nope"),
            destination: dir.path().join("dest"),
        };
        assert!(run(&op).unwrap_err().contains("Source not found"));
    }

    #[test]
    fn test_conflict_policies() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("report.pdf");
        fs::write(&dest, "existing").unwrap();

        let make = |name: &str| {
            let source = dir.path().join(name);
            fs::create_dir_all(&source).unwrap();
            let file = source.join("report.pdf");
            fs::write(&file, name).unwrap();
            WALOperationType::Move {
                source: file,
                destination: dest.clone(),
            }
        };

        let fail = apply_operation("1", &make("a"), ConflictPolicy::Fail, &TrashStrategy::System, None);
        assert!(fail.unwrap_err().contains("already exists"));

        let skip = apply_operation("2", &make("b"), ConflictPolicy::Skip, &TrashStrategy::System, None);
        assert!(matches!(skip, Ok(OperationOutcome::Skipped(_))));

        let renamed = apply_operation(
            "3",
            &make("c"),
            ConflictPolicy::AutoRename,
            &TrashStrategy::System,
            None,
        );
        assert_eq!(
            renamed.unwrap(),
            OperationOutcome::CompletedAt(dir.path().join("report_1.pdf"))
        );
        assert_eq!(fs::read_to_string(dir.path().join("report_1.pdf")).unwrap(), "c");
        assert_eq!(fs::read_to_string(&dest).unwrap(), "existing");
    }

    #[test]
    fn test_reserved_destination_replay_ignores_existing_item() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("inbox/a.txt");
        let dest = dir.path().join("a.txt");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, "ours").unwrap();
        fs::write(&dest, "theirs").unwrap();

        let op = WALOperationType::Move {
            source: source.clone(),
            destination: dest.clone(),
        };
        let reserved = reserve_destination(&op, ConflictPolicy::AutoRename).unwrap();
        assert_eq!(reserved, dir.path().join("a_1.txt"));
        assert_eq!(reserve_destination(&op, ConflictPolicy::Fail), None);

        // The move lands, then the process dies before the outcome is journaled
        fs::rename(&source, &reserved).unwrap();

        let replay = apply_operation(
            "op",
            &op,
            ConflictPolicy::AutoRename,
            &TrashStrategy::System,
            Some(&reserved),
        );
        assert_eq!(replay.unwrap(), OperationOutcome::CompletedAt(reserved.clone()));

        // Undoing the replayed move brings back our file, not the other one
        run(&op.inverse(Some(&reserved)).unwrap()).unwrap();
        assert_eq!(fs::read_to_string(&source).unwrap(), "ours");
        assert_eq!(fs::read_to_string(&dest).unwrap(), "theirs");
    }

    #[test]
    fn test_occupied_reservation_fails() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("inbox/a.txt");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, "ours").unwrap();
        let reserved = dir.path().join("a_1.txt");
        fs::write(&reserved, "someone else").unwrap();

        let op = WALOperationType::Move {
            source: source.clone(),
            destination: dir.path().join("a.txt"),
        };
        let result = apply_operation(
            "op",
            &op,
            ConflictPolicy::AutoRename,
            &TrashStrategy::System,
            Some(&reserved),
        );
        assert!(result.unwrap_err().contains("occupied"));
        assert!(source.exists());
    }

    #[test]
    fn test_rename_and_inverse() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("draft.txt");
        fs::write(&original, "x").unwrap();

        let op = WALOperationType::Rename {
            path: original.clone(),
            new_name: "final.txt".to_string(),
        };
        run(&op).unwrap();
        assert!(dir.path().join("final.txt").exists());

        run(&op.inverse(None).unwrap()).unwrap();
        assert!(original.exists());
        assert!(!dir.path().join("final.txt").exists());
    }

    #[test]
    fn test_copy_directory_and_delete_copy() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("photos");
        fs::create_dir_all(source.join("2024")).unwrap();
        fs::write(source.join("2024/a.jpg"), "jpg").unwrap();
        let dest = dir.path().join("backup/photos");

        let op = WALOperationType::Copy {
            source: source.clone(),
            destination: dest.clone(),
        };
        run(&op).unwrap();
        assert_eq!(fs::read_to_string(dest.join("2024/a.jpg")).unwrap(), "jpg");
        assert!(source.join("2024/a.jpg").exists());

        run(&op.inverse(None).unwrap()).unwrap();
        assert!(!dest.exists());
        assert!(source.exists());
    }

    #[test]
    fn test_delete_folder_only_when_empty() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("Invoices");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("keep.pdf"), "x").unwrap();

        let op = WALOperationType::DeleteFolder {
            path: folder.clone(),
        };
        assert!(matches!(run(&op).unwrap(), OperationOutcome::Skipped(_)));
        assert!(folder.exists());

        fs::remove_file(folder.join("keep.pdf")).unwrap();
        assert_eq!(run(&op).unwrap(), OperationOutcome::Completed);
        assert!(!folder.exists());
    }

    #[test]
    fn test_quarantine_trash_and_restore() {
        let dir = tempdir().unwrap();
        let quarantine = TrashStrategy::Quarantine(dir.path().join(".quarantine"));
        let file = dir.path().join("old.log");
        fs::write(&file, "log").unwrap();

        let op = WALOperationType::Trash { path: file.clone() };
        let outcome = apply_operation("op:7", &op, ConflictPolicy::Fail, &quarantine, None).unwrap();
        let OperationOutcome::CompletedAt(held) = outcome else {
            panic!("expected quarantine location");
        };
        assert!(!file.exists());
        assert_eq!(held, dir.path().join(".quarantine/op_7/old.log"));

        let undo = op.inverse(Some(&held)).unwrap();
        assert_eq!(
            apply_operation("op:7:undo", &undo, ConflictPolicy::Fail, &quarantine, None).unwrap(),
            OperationOutcome::Completed
        );
        assert_eq!(fs::read_to_string(&file).unwrap(), "log");
        assert!(!dir.path().join(".quarantine/op_7").exists());
    }

    #[test]
    fn test_appears_applied() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.txt");
        let dest = dir.path().join("b.txt");
        fs::write(&source, "x").unwrap();

        let op = WALOperationType::Move {
            source: source.clone(),
            destination: dest.clone(),
        };
        assert!(!appears_applied(&op, None));

        fs::rename(&source, &dest).unwrap();
        assert!(appears_applied(&op, None));
    }

    #[test]
    fn test_cleanup_empty_directories_after_moves() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("inbox/2024")).unwrap();
        fs::create_dir_all(root.join("created")).unwrap();
        fs::create_dir_all(root.join("busy")).unwrap();
        fs::write(root.join("busy/other.txt"), "x").unwrap();

        let vacated = vec![
            root.join("inbox/2024/a.pdf"),
            root.join("busy/b.pdf"),
            root.join("c.pdf"),
        ];
        let removed = cleanup_empty_directories(&vacated, root);

        assert_eq!(removed, 2);
        assert!(root.exists());
        assert!(!root.join("inbox").exists());
        assert!(root.join("busy/other.txt").exists());
        // Empty folders nothing was moved out of are left alone
        assert!(root.join("created").exists());
    }

    #[test]
    fn test_generate_unique_path() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("photo.jpg");
        fs::write(&original, "x").unwrap();
        fs::write(dir.path().join("photo_1.jpg"), "x").unwrap();

        assert_eq!(generate_unique_path(&original), dir.path().join("photo_2.jpg"));
    }

    #[test]
    fn test_conflict_policy_from_str() {
        assert_eq!("skip".parse::<ConflictPolicy>(), Ok(ConflictPolicy::Skip));
        assert_eq!("AUTO_RENAME".parse::<ConflictPolicy>(), Ok(ConflictPolicy::AutoRename));
        assert!("sometimes".parse::<ConflictPolicy>().is_err());
    }
}
