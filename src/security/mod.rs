pub mod cycle_detection;
pub mod validation;

use once_cell::sync::Lazy;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

pub use cycle_detection::{
    check_cycle, check_drop, check_symlink_loop, placement, would_create_cycle, CycleError,
    Placement,
};
pub use validation::{validate, validate_plan, ValidationError};

/// System locations that may never be moved, renamed or trashed, along
/// with their direct children. Because `/` is listed, every top-level
/// directory is protected itself (`/tmp`, `/home`), though not what is
/// below it.
///
/// `/private/var` and `/private/etc` are where macOS canonicalizes `/var`
/// and `/etc`.
const PROTECTED_ROOTS: &[&str] = &[
    "/",
    "/System",
    "/usr",
    "/bin",
    "/sbin",
    "/Library",
    "/Applications",
    "/private",
    "/private/var",
    "/private/etc",
    "/var",
    "/etc",
    "/boot",
    "/dev",
    "/proc",
    "/sys",
    "C:\\Windows",
    "C:\\Program Files",
    "C:\\Program Files (x86)",
];

static PROTECTED_PATHS: Lazy<Vec<PathBuf>> =
    Lazy::new(|| PROTECTED_ROOTS.iter().map(PathBuf::from).collect());

/// Security validator for path operations
pub struct PathValidator;

impl PathValidator {
    /// Whether `path` is off limits: a protected root, a direct child of
    /// one, or the home directory itself. Nothing inside home is protected.
    pub fn is_protected_path(path: &Path) -> bool {
        let resolved = resolve_path(path);

        if let Some(home) = dirs::home_dir().map(|h| resolve_path(&h)) {
            if resolved == home {
                return true;
            }
            if resolved.starts_with(&home) {
                return false;
            }
        }

        // The spelling the caller used counts as well as the resolved one
        let lexical = Self::normalize_path(path).unwrap_or_else(|_| path.to_path_buf());
        [resolved, lexical].iter().any(|candidate| {
            PROTECTED_PATHS
                .iter()
                .any(|root| candidate == root || candidate.parent() == Some(root.as_path()))
        })
    }

    /// Check whether `path` lies within `root` (or is `root` itself).
    ///
    /// Both sides are lexically normalized, so `root/a/../../x` escapes.
    pub fn is_within(path: &Path, root: &Path) -> bool {
        match (Self::normalize_path(path), Self::normalize_path(root)) {
            (Ok(path), Ok(root)) => path.starts_with(root),
            _ => false,
        }
    }

    /// Normalize a path by resolving . and .. components without requiring
    /// the path to exist.
    pub fn normalize_path(path: &Path) -> Result<PathBuf, String> {
        let mut normalized = PathBuf::new();

        for component in path.components() {
            match component {
                Component::ParentDir => {
                    // Pop the last component, but not past root
                    let at_root = normalized.parent().is_none();
                    if at_root || !normalized.pop() {
                        return Err(format!(
                            "Path traversal: too many parent references in {}",
                            path.display()
                        ));
                    }
                }
                Component::CurDir => {}
                Component::Normal(name) => {
                    normalized.push(name);
                }
                Component::RootDir => {
                    normalized.push(Component::RootDir);
                }
                Component::Prefix(prefix) => {
                    normalized.push(prefix.as_os_str());
                }
            }
        }

        Ok(normalized)
    }

    /// Check if a path is a symlink
    ///
    /// Uses `symlink_metadata` to check without following the link.
    pub fn is_symlink(path: &Path) -> bool {
        match std::fs::symlink_metadata(path) {
            Ok(meta) => meta.is_symlink(),
            Err(_) => false,
        }
    }
}

/// Resolve a path for comparison purposes.
///
/// The longest existing ancestor is canonicalized (resolving symlinks) and
/// the remaining components are appended after lexical normalization, so the
/// result is defined even for paths that do not exist yet.
pub fn resolve_path(path: &Path) -> PathBuf {
    let normalized = PathValidator::normalize_path(path).unwrap_or_else(|_| path.to_path_buf());

    if let Ok(canonical) = normalized.canonicalize() {
        return canonical;
    }

    let mut tail: Vec<OsString> = Vec::new();
    let mut current = normalized.as_path();
    while let Some(parent) = current.parent() {
        if let Some(name) = current.file_name() {
            tail.push(name.to_os_string());
        }
        if let Ok(mut resolved) = parent.canonicalize() {
            for name in tail.iter().rev() {
                resolved.push(name);
            }
            return resolved;
        }
        current = parent;
    }

    normalized
}
