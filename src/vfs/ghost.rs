//! Ghost projection
//!
//! Projects a plan onto a real directory listing to show what the listing
//! will look like once the plan runs: which entries leave, which appear and
//! how a moved item's old and new locations pair up. The projection is a
//! pure function of its inputs and is recomputed on every call.

use super::listing::FileEntry;
use crate::plan::{OperationKind, Plan};
use crate::security::PathValidator;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// How a ghost entry relates to the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GhostKind {
    /// Untouched by the plan
    Normal,
    /// Will be moved or renamed away
    Source,
    /// Will appear as the result of a move, rename or copy
    Destination,
    /// Folder the plan creates
    Creating,
    /// Will be sent to the trash
    Deleting,
    /// The operation behind this ghost already ran
    Completed,
}

/// A display-only preview entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GhostEntry {
    pub path: PathBuf,
    pub name: String,
    pub is_directory: bool,
    pub kind: GhostKind,
    /// The paired location: destination for a source, source for a destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// Not on disk yet
    pub is_virtual: bool,
}

impl GhostEntry {
    fn real(entry: &FileEntry) -> Self {
        Self {
            path: entry.path.clone(),
            name: entry.name.clone(),
            is_directory: entry.is_directory,
            kind: GhostKind::Normal,
            linked_path: None,
            operation_id: None,
            is_virtual: false,
        }
    }

    fn virtual_entry(
        path: PathBuf,
        is_directory: bool,
        kind: GhostKind,
        linked_path: Option<PathBuf>,
        operation_id: &str,
    ) -> Self {
        Self {
            name: file_name(&path),
            path,
            is_directory,
            kind,
            linked_path,
            operation_id: Some(operation_id.to_string()),
            is_virtual: true,
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Whether each path is a directory: real entries first, then what the
/// plan creates, in plan order.
pub(crate) fn directory_hints(plan: &Plan, entries: &[FileEntry]) -> HashMap<PathBuf, bool> {
    let mut hints: HashMap<PathBuf, bool> = entries
        .iter()
        .map(|e| (e.path.clone(), e.is_directory))
        .collect();

    for op in &plan.operations {
        match op.kind {
            OperationKind::CreateFolder => {
                if let Some(path) = &op.path {
                    hints.insert(path.clone(), true);
                }
            }
            OperationKind::Move | OperationKind::Rename | OperationKind::Copy => {
                let is_dir = op
                    .read_path()
                    .and_then(|source| hints.get(&source).copied())
                    .unwrap_or(false);
                if let Some(produced) = op.produced_path() {
                    hints.insert(produced, is_dir);
                }
            }
            OperationKind::Trash => {}
        }
    }

    hints
}

/// Project `plan` onto a listing of `current_directory`.
///
/// Real entries come first, in input order, followed by virtual entries in
/// operation order. Virtual entries outside `current_directory` are
/// dropped. Neither input is modified.
pub fn project(plan: &Plan, real_entries: &[FileEntry], current_directory: &Path) -> Vec<GhostEntry> {
    let hints = directory_hints(plan, real_entries);

    // First operation that takes each real path away
    let mut leaving: HashMap<&Path, (GhostKind, Option<PathBuf>, &str)> = HashMap::new();
    for op in &plan.operations {
        let Some(vacated) = op.vacated_path() else {
            continue;
        };
        let Some(entry) = real_entries.iter().find(|e| e.path == vacated) else {
            continue;
        };
        let marking = match op.kind {
            OperationKind::Trash => (GhostKind::Deleting, None, op.id.as_str()),
            _ => (GhostKind::Source, op.produced_path(), op.id.as_str()),
        };
        leaving.entry(entry.path.as_path()).or_insert(marking);
    }

    let mut ghosts: Vec<GhostEntry> = real_entries
        .iter()
        .map(|entry| {
            let mut ghost = GhostEntry::real(entry);
            if let Some((kind, linked, op_id)) = leaving.get(entry.path.as_path()) {
                ghost.kind = *kind;
                ghost.linked_path = linked.clone();
                ghost.operation_id = Some(op_id.to_string());
            }
            ghost
        })
        .collect();

    for op in &plan.operations {
        let ghost = match op.kind {
            OperationKind::CreateFolder => op.path.clone().map(|path| {
                GhostEntry::virtual_entry(path, true, GhostKind::Creating, None, &op.id)
            }),
            OperationKind::Move | OperationKind::Rename | OperationKind::Copy => {
                op.produced_path().map(|produced| {
                    let is_dir = hints.get(&produced).copied().unwrap_or(false);
                    GhostEntry::virtual_entry(
                        produced,
                        is_dir,
                        GhostKind::Destination,
                        op.read_path(),
                        &op.id,
                    )
                })
            }
            OperationKind::Trash => None,
        };

        if let Some(ghost) = ghost {
            if PathValidator::is_within(&ghost.path, current_directory) {
                ghosts.push(ghost);
            }
        }
    }

    ghosts
}

/// Like [`project`], with the ghosts of already completed operations
/// marked `completed`.
pub fn project_with_progress(
    plan: &Plan,
    real_entries: &[FileEntry],
    current_directory: &Path,
    completed_ids: &[String],
) -> Vec<GhostEntry> {
    let completed: HashSet<&str> = completed_ids.iter().map(String::as_str).collect();

    project(plan, real_entries, current_directory)
        .into_iter()
        .map(|mut ghost| {
            if ghost
                .operation_id
                .as_deref()
                .is_some_and(|id| completed.contains(id))
            {
                ghost.kind = GhostKind::Completed;
            }
            ghost
        })
        .collect()
}

/// Ghosts that are direct children of `directory`
pub fn visible_in<'a>(ghosts: &'a [GhostEntry], directory: &Path) -> Vec<&'a GhostEntry> {
    ghosts
        .iter()
        .filter(|g| g.path.parent() == Some(directory))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanOperation;

    fn entry(path: &str, is_directory: bool) -> FileEntry {
        let path = PathBuf::from(path);
        FileEntry {
            name: file_name(&path),
            path,
            is_directory,
            is_symlink: false,
            size: 0,
            modified_at: None,
            extension: None,
            mime_type: None,
            is_hidden: false,
        }
    }

    fn invoice_plan() -> Plan {
        Plan::new("plan-1", "File invoices", "/Docs")
            .with_operation(PlanOperation::create_folder("1", "/Docs/Invoices"))
            .with_operation(PlanOperation::move_item(
                "2",
                "/Docs/inv1.pdf",
                "/Docs/Invoices/inv1.pdf",
            ))
    }

    fn kinds(ghosts: &[GhostEntry]) -> Vec<(&str, GhostKind)> {
        ghosts
            .iter()
            .map(|g| (g.path.to_str().unwrap(), g.kind))
            .collect()
    }

    #[test]
    fn test_invoice_example() {
        let entries = vec![entry("/Docs/inv1.pdf", false), entry("/Docs/notes.txt", false)];

        let ghosts = project(&invoice_plan(), &entries, Path::new("/Docs"));

        assert_eq!(
            kinds(&ghosts),
            vec![
                ("/Docs/inv1.pdf", GhostKind::Source),
                ("/Docs/notes.txt", GhostKind::Normal),
                ("/Docs/Invoices", GhostKind::Creating),
                ("/Docs/Invoices/inv1.pdf", GhostKind::Destination),
            ]
        );
        assert_eq!(
            ghosts[0].linked_path,
            Some(PathBuf::from("/Docs/Invoices/inv1.pdf"))
        );
        assert_eq!(ghosts[3].linked_path, Some(PathBuf::from("/Docs/inv1.pdf")));
        assert!(ghosts[2].is_virtual && ghosts[2].is_directory);
        assert!(!ghosts[1].is_virtual);
    }

    #[test]
    fn test_projection_is_pure_and_idempotent() {
        let entries = vec![entry("/Docs/inv1.pdf", false)];
        let before = entries.clone();
        let plan = invoice_plan();

        let first = project(&plan, &entries, Path::new("/Docs"));
        let second = project(&plan, &entries, Path::new("/Docs"));

        assert_eq!(first, second);
        assert_eq!(entries, before);
    }

    #[test]
    fn test_trash_copy_and_rename() {
        let entries = vec![
            entry("/Docs/old.log", false),
            entry("/Docs/photos", true),
            entry("/Docs/draft.txt", false),
        ];
        let plan = Plan::new("p", "Tidy", "/Docs")
            .with_operation(PlanOperation::trash("t", "/Docs/old.log"))
            .with_operation(PlanOperation::copy("c", "/Docs/photos", "/Docs/backup"))
            .with_operation(PlanOperation::rename("r", "/Docs/draft.txt", "final.txt"));

        let ghosts = project(&plan, &entries, Path::new("/Docs"));

        assert_eq!(
            kinds(&ghosts),
            vec![
                ("/Docs/old.log", GhostKind::Deleting),
                ("/Docs/photos", GhostKind::Normal),
                ("/Docs/draft.txt", GhostKind::Source),
                ("/Docs/backup", GhostKind::Destination),
                ("/Docs/final.txt", GhostKind::Destination),
            ]
        );
        // Copy destinations inherit the source's type and link back to it
        assert!(ghosts[3].is_directory);
        assert_eq!(ghosts[3].linked_path, Some(PathBuf::from("/Docs/photos")));
    }

    #[test]
    fn test_progress_marks_completed_operations() {
        let entries = vec![entry("/Docs/inv1.pdf", false)];

        let ghosts = project_with_progress(
            &invoice_plan(),
            &entries,
            Path::new("/Docs"),
            &["1".to_string()],
        );

        assert_eq!(
            kinds(&ghosts),
            vec![
                ("/Docs/inv1.pdf", GhostKind::Source),
                ("/Docs/Invoices", GhostKind::Completed),
                ("/Docs/Invoices/inv1.pdf", GhostKind::Destination),
            ]
        );
    }

    #[test]
    fn test_visible_in_direct_children() {
        let entries = vec![entry("/Docs/inv1.pdf", false)];
        let ghosts = project(&invoice_plan(), &entries, Path::new("/Docs"));

        let top: Vec<&str> = visible_in(&ghosts, Path::new("/Docs"))
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        assert_eq!(top, vec!["inv1.pdf", "Invoices"]);

        let inside = visible_in(&ghosts, Path::new("/Docs/Invoices"));
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].kind, GhostKind::Destination);
    }

    #[test]
    fn test_virtual_entries_outside_directory_dropped() {
        let plan = Plan::new("p", "Elsewhere", "/")
            .with_operation(PlanOperation::create_folder("1", "/Other/New"));

        let ghosts = project(&plan, &[], Path::new("/Docs"));
        assert!(ghosts.is_empty());
    }
}
