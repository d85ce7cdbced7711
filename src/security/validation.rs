//! Pre-flight validation for moves and whole plans.
//!
//! Nothing in this module mutates the filesystem. A rejected batch is
//! rejected as a whole; the first failing check wins.

use super::cycle_detection::{self, CycleError};
use super::PathValidator;
use crate::plan::{OperationKind, Plan, PlanError, PlanOperation};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Structured validation error, serialized with a `type` tag for the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationError {
    /// Cannot move a directory into itself
    #[error("Cannot move a folder into itself: {path}")]
    CycleSelf { path: String },
    /// Cannot move a directory into its own descendant
    #[error("Cannot move {moved} into its own subfolder {target}")]
    CycleDescendant {
        #[serde(rename = "source")]
        moved: String,
        target: String,
    },
    /// Cannot move items into another selected item (multi-select)
    #[error("Cannot move items into one of the selected items: {target}")]
    TargetSelected { target: String },
    /// File/folder already exists at destination
    #[error("An item named '{name}' already exists in {destination}")]
    NameCollision { name: String, destination: String },
    #[error("Permission denied for {path}: {message}")]
    PermissionDenied { path: String, message: String },
    #[error("Not found: {path}")]
    SourceNotFound { path: String },
    #[error("Not a directory: {path}")]
    TargetNotDirectory { path: String },
    #[error("Protected path cannot be modified: {path}")]
    ProtectedPath { path: String },
    #[error("{message}")]
    IoError { message: String },
    #[error("Operation '{operation_id}' is missing required field '{field}'")]
    MissingField {
        #[serde(rename = "operationId")]
        operation_id: String,
        field: String,
    },
    #[error("Operation '{operation_id}' has an invalid name: {name}")]
    InvalidName {
        #[serde(rename = "operationId")]
        operation_id: String,
        name: String,
    },
    #[error("Duplicate operation id: {operation_id}")]
    DuplicateOperation {
        #[serde(rename = "operationId")]
        operation_id: String,
    },
    #[error("Operation '{operation_id}' touches {path}, outside the target folder")]
    OutsideTarget {
        #[serde(rename = "operationId")]
        operation_id: String,
        path: String,
    },
}

fn display(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

impl From<CycleError> for ValidationError {
    fn from(err: CycleError) -> Self {
        match err {
            CycleError::SelfDrop(p) => ValidationError::CycleSelf { path: display(&p) },
            CycleError::IntoDescendant { moved, target } => ValidationError::CycleDescendant {
                moved: display(&moved),
                target: display(&target),
            },
            CycleError::TargetSelected(p) => ValidationError::TargetSelected { target: display(&p) },
            err @ CycleError::LinkLoop { .. } => ValidationError::IoError {
                message: err.to_string(),
            },
        }
    }
}

impl From<PlanError> for ValidationError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::MissingField {
                operation_id, field, ..
            } => ValidationError::MissingField {
                operation_id,
                field: field.to_string(),
            },
            PlanError::DuplicateOperation { id } => {
                ValidationError::DuplicateOperation { operation_id: id }
            }
            PlanError::InvalidName { operation_id, name } => {
                ValidationError::InvalidName { operation_id, name }
            }
            PlanError::Parse(message) => ValidationError::IoError { message },
        }
    }
}

impl From<ValidationError> for String {
    fn from(err: ValidationError) -> Self {
        err.to_string()
    }
}

/// Map a metadata failure for `path` to a validation error
fn metadata_error(path: &Path, err: io::Error) -> ValidationError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => ValidationError::PermissionDenied {
            path: display(path),
            message: err.to_string(),
        },
        io::ErrorKind::NotFound => ValidationError::SourceNotFound { path: display(path) },
        _ => ValidationError::IoError {
            message: format!("Failed to read {}: {}", path.display(), err),
        },
    }
}

/// Target must exist and be a directory
fn check_target_directory(target: &Path) -> Result<(), ValidationError> {
    let meta = fs::metadata(target).map_err(|e| metadata_error(target, e))?;
    if !meta.is_dir() {
        return Err(ValidationError::TargetNotDirectory { path: display(target) });
    }
    Ok(())
}

/// Validate moving `sources` into the directory `target`.
///
/// Checks, in order, short-circuiting on the first failure:
/// 1. Target exists and is a directory
/// 2. No cycles (self, descendant, target among the selection)
/// 3. Each source exists
/// 4. No source is a protected path
/// 5. No name collision at the destination or among the sources
pub fn validate(sources: &[PathBuf], target: &Path) -> Result<(), ValidationError> {
    check_target_directory(target)?;

    cycle_detection::check_drop(sources, target)?;

    let mut names = HashSet::new();
    for source in sources {
        fs::symlink_metadata(source).map_err(|e| metadata_error(source, e))?;

        if PathValidator::is_protected_path(source) {
            return Err(ValidationError::ProtectedPath { path: display(source) });
        }

        let name = source.file_name().ok_or_else(|| ValidationError::IoError {
            message: format!("Invalid source path: {}", source.display()),
        })?;
        let collides = fs::symlink_metadata(target.join(name)).is_ok();
        if collides || !names.insert(name.to_os_string()) {
            return Err(ValidationError::NameCollision {
                name: name.to_string_lossy().to_string(),
                destination: display(target),
            });
        }
    }

    Ok(())
}

/// Validate a whole plan before it is committed.
///
/// Structural checks first, then scope (every path inside the target
/// folder), then a forward simulation where each operation is checked
/// against the state left behind by the operations before it.
pub fn validate_plan(plan: &Plan) -> Result<(), ValidationError> {
    plan.check_structure()?;
    check_target_directory(&plan.target_folder)?;

    for op in &plan.operations {
        for path in op.touched_paths() {
            if !PathValidator::is_within(&path, &plan.target_folder) {
                return Err(ValidationError::OutsideTarget {
                    operation_id: op.id.clone(),
                    path: display(&path),
                });
            }
        }
    }

    let mut simulation = PlanSimulation::new(&plan.target_folder);
    for op in &plan.operations {
        simulation.apply(op)?;
    }

    tracing::debug!(
        plan_id = %plan.id,
        operations = plan.operations.len(),
        "Plan passed validation"
    );

    Ok(())
}

/// What the simulation knows about a path the plan has touched
#[derive(Debug, Clone)]
enum SimNode {
    Absent,
    Present {
        is_dir: bool,
        /// Disk path whose content now lives here; `None` for new folders
        origin: Option<PathBuf>,
    },
}

/// Overlay of plan effects on top of the real disk state
struct PlanSimulation {
    target: PathBuf,
    overlay: BTreeMap<PathBuf, SimNode>,
}

fn key(path: &Path) -> PathBuf {
    PathValidator::normalize_path(path).unwrap_or_else(|_| path.to_path_buf())
}

fn disk_state(path: &Path) -> Result<Option<bool>, ValidationError> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(Some(meta.is_dir() || (meta.is_symlink() && path.is_dir()))),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Err(metadata_error(path, e)),
        Err(_) => Ok(None),
    }
}

fn collision(path: &Path) -> ValidationError {
    ValidationError::NameCollision {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        destination: path.parent().map(display).unwrap_or_default(),
    }
}

impl PlanSimulation {
    fn new(target: &Path) -> Self {
        Self {
            target: key(target),
            overlay: BTreeMap::new(),
        }
    }

    /// Nearest overlay entry at or above `key`, with the entry's own path
    fn nearest(&self, key: &Path) -> Option<(PathBuf, &SimNode)> {
        let mut current = Some(key);
        while let Some(candidate) = current {
            if let Some(node) = self.overlay.get(candidate) {
                return Some((candidate.to_path_buf(), node));
            }
            current = candidate.parent();
        }
        None
    }

    /// Disk path backing `key` after the simulated operations, if any
    fn origin_of(&self, key: &Path) -> Option<PathBuf> {
        match self.nearest(key) {
            None => Some(key.to_path_buf()),
            Some((_, SimNode::Absent)) => None,
            Some((at, SimNode::Present { origin, .. })) => {
                let origin = origin.as_ref()?;
                let rest = key.strip_prefix(&at).ok()?;
                Some(if rest.as_os_str().is_empty() {
                    origin.clone()
                } else {
                    origin.join(rest)
                })
            }
        }
    }

    /// `Some(is_dir)` when the path exists in the simulated state
    fn lookup(&self, path: &Path) -> Result<Option<bool>, ValidationError> {
        let key = key(path);
        match self.nearest(&key) {
            None => disk_state(&key),
            Some((_, SimNode::Absent)) => Ok(None),
            Some((at, SimNode::Present { is_dir, .. })) if at == key => Ok(Some(*is_dir)),
            Some(_) => match self.origin_of(&key) {
                Some(origin) => disk_state(&origin),
                None => Ok(None),
            },
        }
    }

    fn clear_below(&mut self, key: &Path) {
        self.overlay.retain(|p, _| p == key || !p.starts_with(key));
    }

    fn vacate(&mut self, path: &Path) {
        let key = key(path);
        self.clear_below(&key);
        self.overlay.insert(key, SimNode::Absent);
    }

    /// Record `to` as holding the content of `from`; a move also vacates `from`
    fn relocate(&mut self, from: &Path, to: &Path, is_dir: bool, vacate_source: bool) {
        let from_key = key(from);
        let to_key = key(to);
        let origin = self.origin_of(&from_key);

        let carried: Vec<(PathBuf, SimNode)> = self
            .overlay
            .iter()
            .filter(|(p, _)| **p != from_key && p.starts_with(&from_key))
            .filter_map(|(p, node)| {
                p.strip_prefix(&from_key)
                    .ok()
                    .map(|rest| (to_key.join(rest), node.clone()))
            })
            .collect();

        if vacate_source {
            self.vacate(&from_key);
        }
        self.clear_below(&to_key);
        self.overlay.insert(to_key, SimNode::Present { is_dir, origin });
        self.overlay.extend(carried);
    }

    fn require_existing(&self, path: &Path) -> Result<bool, ValidationError> {
        self.lookup(path)?
            .ok_or_else(|| ValidationError::SourceNotFound { path: display(path) })
    }

    fn require_unprotected(&self, path: &Path) -> Result<(), ValidationError> {
        if PathValidator::is_protected_path(path) || key(path) == self.target {
            return Err(ValidationError::ProtectedPath { path: display(path) });
        }
        Ok(())
    }

    /// The nearest existing ancestor of a new path must be a directory
    fn require_directory_parent(&self, path: &Path) -> Result<(), ValidationError> {
        let mut current = path.parent();
        while let Some(parent) = current {
            match self.lookup(parent)? {
                Some(true) => return Ok(()),
                Some(false) => {
                    return Err(ValidationError::TargetNotDirectory { path: display(parent) })
                }
                None => current = parent.parent(),
            }
        }
        Ok(())
    }

    fn require_free(&self, path: &Path) -> Result<(), ValidationError> {
        if self.lookup(path)?.is_some() {
            return Err(collision(path));
        }
        self.require_directory_parent(path)
    }

    fn apply(&mut self, op: &PlanOperation) -> Result<(), ValidationError> {
        let missing = |field: &str| ValidationError::MissingField {
            operation_id: op.id.clone(),
            field: field.to_string(),
        };

        match op.kind {
            OperationKind::CreateFolder => {
                let path = op.path.as_deref().ok_or_else(|| missing("path"))?;
                match self.lookup(path)? {
                    // Already there; creating it again is a no-op
                    Some(true) => {}
                    Some(false) => return Err(collision(path)),
                    None => {
                        self.require_directory_parent(path)?;
                        self.overlay.insert(
                            key(path),
                            SimNode::Present {
                                is_dir: true,
                                origin: None,
                            },
                        );
                    }
                }
            }
            OperationKind::Move | OperationKind::Copy => {
                let source = op.source.as_deref().ok_or_else(|| missing("source"))?;
                let destination = op
                    .destination
                    .as_deref()
                    .ok_or_else(|| missing("destination"))?;

                let is_dir = self.require_existing(source)?;
                let is_move = op.kind == OperationKind::Move;
                if is_move {
                    self.require_unprotected(source)?;
                }
                cycle_detection::check_cycle(source, destination)?;
                self.require_free(destination)?;
                self.relocate(source, destination, is_dir, is_move);
            }
            OperationKind::Rename => {
                let source = op.rename_target().ok_or_else(|| missing("source"))?;
                let renamed = op.produced_path().ok_or_else(|| missing("newName"))?;

                let is_dir = self.require_existing(source)?;
                self.require_unprotected(source)?;
                self.require_free(&renamed)?;
                self.relocate(source, &renamed, is_dir, true);
            }
            OperationKind::Trash => {
                let path = op.path.as_deref().ok_or_else(|| missing("path"))?;
                self.require_existing(path)?;
                self.require_unprotected(path)?;
                self.vacate(path);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> TempDir {
        let temp = TempDir::new().unwrap();
        let base = temp.path();
        fs::create_dir_all(base.join("a/b/c")).unwrap();
        fs::create_dir_all(base.join("d")).unwrap();
        fs::write(base.join("inv1.pdf"), b"invoice").unwrap();
        fs::write(base.join("notes.txt"), b"notes").unwrap();
        fs::write(base.join("d/notes.txt"), b"other notes").unwrap();
        temp
    }

    #[test]
    fn test_validate_self_drop() {
        let temp = setup();
        let a = temp.path().join("a");
        let result = validate(&[a.clone()], &a);
        assert!(matches!(result, Err(ValidationError::CycleSelf { .. })));
    }

    #[test]
    fn test_validate_descendant_drop() {
        let temp = setup();
        let a = temp.path().join("a");
        let result = validate(&[a], &temp.path().join("a/b/c"));
        assert!(matches!(result, Err(ValidationError::CycleDescendant { .. })));
    }

    #[test]
    fn test_validate_target_selected() {
        let temp = setup();
        let a = temp.path().join("a");
        let d = temp.path().join("d");
        let result = validate(&[a, d.clone()], &d);
        assert!(matches!(result, Err(ValidationError::TargetSelected { .. })));
    }

    #[test]
    fn test_validate_missing_and_file_target() {
        let temp = setup();
        let a = temp.path().join("a");

        let missing = validate(&[a.clone()], &temp.path().join("nope"));
        assert!(matches!(missing, Err(ValidationError::SourceNotFound { .. })));

        let file = validate(&[a], &temp.path().join("inv1.pdf"));
        assert!(matches!(file, Err(ValidationError::TargetNotDirectory { .. })));
    }

    #[test]
    fn test_validate_missing_source() {
        let temp = setup();
        let result = validate(&[temp.path().join("ghost.txt")], &temp.path().join("d"));
        assert!(matches!(result, Err(ValidationError::SourceNotFound { .. })));
    }

    #[test]
    fn test_validate_collision_at_target() {
        let temp = setup();
        let result = validate(&[temp.path().join("notes.txt")], &temp.path().join("d"));
        assert_eq!(
            result,
            Err(ValidationError::NameCollision {
                name: "notes.txt".to_string(),
                destination: display(&temp.path().join("d")),
            })
        );
    }

    #[test]
    fn test_validate_duplicate_basenames() {
        let temp = setup();
        fs::create_dir(temp.path().join("e")).unwrap();
        let result = validate(
            &[temp.path().join("notes.txt"), temp.path().join("d/notes.txt")],
            &temp.path().join("e"),
        );
        assert!(matches!(result, Err(ValidationError::NameCollision { .. })));
    }

    #[test]
    fn test_validate_ok() {
        let temp = setup();
        let result = validate(
            &[temp.path().join("inv1.pdf"), temp.path().join("a")],
            &temp.path().join("d"),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_error_serializes_with_type_tag() {
        let err = ValidationError::CycleSelf {
            path: "/x".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "CYCLE_SELF");
        assert_eq!(json["path"], "/x");
    }

    #[test]
    fn test_plan_create_then_move_into_it() {
        let temp = setup();
        let base = temp.path();
        let plan = Plan::new("p", "invoices", base)
            .with_operation(PlanOperation::create_folder("1", base.join("Invoices")))
            .with_operation(PlanOperation::move_item(
                "2",
                base.join("inv1.pdf"),
                base.join("Invoices/inv1.pdf"),
            ));

        assert!(validate_plan(&plan).is_ok());
        // Validation never touches disk
        assert!(!base.join("Invoices").exists());
    }

    #[test]
    fn test_plan_outside_target() {
        let temp = setup();
        let base = temp.path();
        let plan = Plan::new("p", "", base.join("a")).with_operation(PlanOperation::move_item(
            "1",
            base.join("inv1.pdf"),
            base.join("a/inv1.pdf"),
        ));
        assert!(matches!(
            validate_plan(&plan),
            Err(ValidationError::OutsideTarget { .. })
        ));
    }

    #[test]
    fn test_plan_traversal_is_outside_target() {
        let temp = setup();
        let base = temp.path();
        let plan = Plan::new("p", "", base.join("a"))
            .with_operation(PlanOperation::create_folder("1", base.join("a/../escaped")));
        assert!(matches!(
            validate_plan(&plan),
            Err(ValidationError::OutsideTarget { .. })
        ));
    }

    #[test]
    fn test_plan_structural_errors() {
        let temp = setup();
        let base = temp.path();
        let dup = Plan::new("p", "", base)
            .with_operation(PlanOperation::create_folder("1", base.join("x")))
            .with_operation(PlanOperation::create_folder("1", base.join("y")));
        assert!(matches!(
            validate_plan(&dup),
            Err(ValidationError::DuplicateOperation { .. })
        ));

        let mut op = PlanOperation::move_item("1", base.join("inv1.pdf"), base.join("d/inv1.pdf"));
        op.source = None;
        let missing = Plan::new("p", "", base).with_operation(op);
        assert!(matches!(
            validate_plan(&missing),
            Err(ValidationError::MissingField { .. })
        ));
    }

    #[test]
    fn test_plan_move_into_own_subfolder() {
        let temp = setup();
        let base = temp.path();
        let plan = Plan::new("p", "", base).with_operation(PlanOperation::move_item(
            "1",
            base.join("a"),
            base.join("a/b/a"),
        ));
        assert!(matches!(
            validate_plan(&plan),
            Err(ValidationError::CycleDescendant { .. })
        ));
    }

    #[test]
    fn test_plan_second_move_to_same_destination_collides() {
        let temp = setup();
        let base = temp.path();
        let plan = Plan::new("p", "", base)
            .with_operation(PlanOperation::move_item(
                "1",
                base.join("notes.txt"),
                base.join("a/notes.txt"),
            ))
            .with_operation(PlanOperation::move_item(
                "2",
                base.join("d/notes.txt"),
                base.join("a/notes.txt"),
            ));
        assert!(matches!(
            validate_plan(&plan),
            Err(ValidationError::NameCollision { .. })
        ));
    }

    #[test]
    fn test_plan_moved_away_source_is_free() {
        let temp = setup();
        let base = temp.path();
        let plan = Plan::new("p", "", base)
            .with_operation(PlanOperation::move_item(
                "1",
                base.join("notes.txt"),
                base.join("a/notes.txt"),
            ))
            .with_operation(PlanOperation::move_item(
                "2",
                base.join("d/notes.txt"),
                base.join("notes.txt"),
            ));
        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn test_plan_trashed_item_cannot_be_moved() {
        let temp = setup();
        let base = temp.path();
        let plan = Plan::new("p", "", base)
            .with_operation(PlanOperation::trash("1", base.join("a")))
            .with_operation(PlanOperation::move_item(
                "2",
                base.join("a/b"),
                base.join("d/b"),
            ));
        assert!(matches!(
            validate_plan(&plan),
            Err(ValidationError::SourceNotFound { .. })
        ));
    }

    #[test]
    fn test_plan_children_follow_moved_directory() {
        let temp = setup();
        let base = temp.path();
        let plan = Plan::new("p", "", base)
            .with_operation(PlanOperation::move_item("1", base.join("a"), base.join("d/a")))
            .with_operation(PlanOperation::rename("2", base.join("d/a/b"), "renamed"));
        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn test_plan_cannot_trash_target_folder() {
        let temp = setup();
        let base = temp.path();
        let plan = Plan::new("p", "", base).with_operation(PlanOperation::trash("1", base));
        assert!(matches!(
            validate_plan(&plan),
            Err(ValidationError::ProtectedPath { .. })
        ));
    }
}
