//! Two-column diff tree
//!
//! `current` shows the directory as it is, with the entries the plan takes
//! away marked; `proposed` shows it as it will be once the plan runs. Each
//! level is sorted directories first, then by case-insensitive name.

use super::ghost::directory_hints;
use super::listing::FileEntry;
use crate::plan::{OperationKind, Plan};
use crate::security::PathValidator;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Added,
    Removed,
    Moved,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffNode {
    pub name: String,
    pub path: PathBuf,
    pub is_directory: bool,
    pub status: DiffStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DiffNode>,
}

impl DiffNode {
    /// Find a node by path anywhere below this one (inclusive)
    pub fn find(&self, path: &Path) -> Option<&DiffNode> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(path))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffTree {
    pub root: PathBuf,
    pub current: Vec<DiffNode>,
    pub proposed: Vec<DiffNode>,
}

impl DiffTree {
    /// Find a node in the current column
    pub fn find_current(&self, path: &Path) -> Option<&DiffNode> {
        self.current.iter().find_map(|n| n.find(path))
    }

    /// Find a node in the proposed column
    pub fn find_proposed(&self, path: &Path) -> Option<&DiffNode> {
        self.proposed.iter().find_map(|n| n.find(path))
    }
}

/// Path -> (is_directory, status) for one column
type Column = BTreeMap<PathBuf, (bool, DiffStatus)>;

/// Nested builder keyed by path component
#[derive(Default)]
struct Level {
    node: Option<(bool, DiffStatus)>,
    children: BTreeMap<String, Level>,
}

impl Level {
    fn insert(&mut self, components: &[String], info: (bool, DiffStatus)) {
        match components.split_first() {
            None => self.node = Some(info),
            Some((first, rest)) => self
                .children
                .entry(first.clone())
                .or_default()
                .insert(rest, info),
        }
    }

    fn into_nodes(self, parent: &Path, synthesized: DiffStatus, existing: &Column) -> Vec<DiffNode> {
        let mut nodes: Vec<DiffNode> = self
            .children
            .into_iter()
            .map(|(name, level)| {
                let path = parent.join(&name);
                let has_children = !level.children.is_empty();
                let (is_dir, status) = level.node.unwrap_or_else(|| {
                    // Intermediate folder nobody listed: new unless it exists today
                    if existing.contains_key(&path) {
                        (true, DiffStatus::Unchanged)
                    } else {
                        (true, synthesized)
                    }
                });
                let children = level.into_nodes(&path, synthesized, existing);
                DiffNode {
                    name,
                    path,
                    is_directory: is_dir || has_children,
                    status,
                    children,
                }
            })
            .collect();

        nodes.sort_by(|a, b| {
            b.is_directory
                .cmp(&a.is_directory)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.name.cmp(&b.name))
        });
        nodes
    }
}

fn build(column: &Column, root: &Path, synthesized: DiffStatus, existing: &Column) -> Vec<DiffNode> {
    let mut top = Level::default();
    for (path, info) in column {
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        if !components.is_empty() {
            top.insert(&components, *info);
        }
    }
    top.into_nodes(root, synthesized, existing)
}

fn remove_subtree(column: &mut Column, path: &Path) {
    column.retain(|p, _| !p.starts_with(path));
}

/// Build the current/proposed diff of `plan` over a listing of
/// `current_directory`. Only paths below `current_directory` appear.
pub fn diff_tree(plan: &Plan, real_entries: &[FileEntry], current_directory: &Path) -> DiffTree {
    let hints = directory_hints(plan, real_entries);
    let is_dir = |path: &Path| hints.get(path).copied().unwrap_or(false);
    let inside = |path: &Path| PathValidator::is_within(path, current_directory);

    let mut current: Column = real_entries
        .iter()
        .filter(|e| inside(&e.path))
        .map(|e| (e.path.clone(), (e.is_directory, DiffStatus::Unchanged)))
        .collect();
    let mut proposed = current.clone();

    // Paths produced by earlier operations; moving a created folder keeps
    // it `added`
    let mut produced_by_plan: HashMap<PathBuf, DiffStatus> = HashMap::new();

    for op in &plan.operations {
        match op.kind {
            OperationKind::CreateFolder => {
                if let Some(path) = op.path.as_ref().filter(|p| inside(p)) {
                    proposed
                        .entry(path.clone())
                        .or_insert((true, DiffStatus::Added));
                    produced_by_plan.insert(path.clone(), DiffStatus::Added);
                }
            }
            OperationKind::Move | OperationKind::Rename => {
                let (Some(source), Some(destination)) = (op.vacated_path(), op.produced_path())
                else {
                    continue;
                };
                let earlier = produced_by_plan.remove(&source);
                let status = match earlier {
                    Some(DiffStatus::Added) => DiffStatus::Added,
                    _ => DiffStatus::Moved,
                };
                let source_is_dir = is_dir(&source);

                // Only items that exist today show up in the current column
                if earlier.is_none() && inside(&source) {
                    current.insert(source.clone(), (source_is_dir, DiffStatus::Moved));
                }
                remove_subtree(&mut proposed, &source);

                if inside(&destination) {
                    proposed.insert(destination.clone(), (source_is_dir, status));
                }
                produced_by_plan.insert(destination, status);
            }
            OperationKind::Copy => {
                let Some(destination) = op.produced_path() else {
                    continue;
                };
                if inside(&destination) {
                    proposed.insert(destination.clone(), (is_dir(&destination), DiffStatus::Added));
                }
                produced_by_plan.insert(destination, DiffStatus::Added);
            }
            OperationKind::Trash => {
                let Some(path) = op.path.as_ref() else {
                    continue;
                };
                if produced_by_plan.remove(path).is_none() && inside(path) {
                    current.insert(path.clone(), (is_dir(path), DiffStatus::Removed));
                }
                remove_subtree(&mut proposed, path);
            }
        }
    }

    DiffTree {
        root: current_directory.to_path_buf(),
        proposed: build(&proposed, current_directory, DiffStatus::Added, &current),
        current: build(&current, current_directory, DiffStatus::Unchanged, &current),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanOperation;

    fn entry(path: &str, is_directory: bool) -> FileEntry {
        let path = PathBuf::from(path);
        FileEntry {
            name: path.file_name().unwrap().to_string_lossy().to_string(),
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

    fn names(nodes: &[DiffNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn test_invoice_diff() {
        let entries = vec![entry("/Docs/inv1.pdf", false), entry("/Docs/notes.txt", false)];
        let plan = Plan::new("plan-1", "File invoices", "/Docs")
            .with_operation(PlanOperation::create_folder("1", "/Docs/Invoices"))
            .with_operation(PlanOperation::move_item(
                "2",
                "/Docs/inv1.pdf",
                "/Docs/Invoices/inv1.pdf",
            ));

        let diff = diff_tree(&plan, &entries, Path::new("/Docs"));

        assert_eq!(names(&diff.current), vec!["inv1.pdf", "notes.txt"]);
        assert_eq!(
            diff.find_current(Path::new("/Docs/inv1.pdf")).unwrap().status,
            DiffStatus::Moved
        );

        // Directories first
        assert_eq!(names(&diff.proposed), vec!["Invoices", "notes.txt"]);
        let invoices = &diff.proposed[0];
        assert_eq!(invoices.status, DiffStatus::Added);
        assert_eq!(invoices.children.len(), 1);
        assert_eq!(invoices.children[0].status, DiffStatus::Moved);
        assert_eq!(diff.proposed[1].status, DiffStatus::Unchanged);
    }

    #[test]
    fn test_trash_and_copy() {
        let entries = vec![entry("/Docs/old.log", false), entry("/Docs/photos", true)];
        let plan = Plan::new("p", "Tidy", "/Docs")
            .with_operation(PlanOperation::trash("t", "/Docs/old.log"))
            .with_operation(PlanOperation::copy("c", "/Docs/photos", "/Docs/Backup/photos"));

        let diff = diff_tree(&plan, &entries, Path::new("/Docs"));

        assert_eq!(
            diff.find_current(Path::new("/Docs/old.log")).unwrap().status,
            DiffStatus::Removed
        );
        assert!(diff.find_proposed(Path::new("/Docs/old.log")).is_none());

        // Synthesized parent of the copy is new, the copy keeps its type
        let backup = diff.find_proposed(Path::new("/Docs/Backup")).unwrap();
        assert_eq!(backup.status, DiffStatus::Added);
        let copy = diff.find_proposed(Path::new("/Docs/Backup/photos")).unwrap();
        assert!(copy.is_directory);
        assert_eq!(copy.status, DiffStatus::Added);
        assert_eq!(
            diff.find_proposed(Path::new("/Docs/photos")).unwrap().status,
            DiffStatus::Unchanged
        );
    }

    #[test]
    fn test_sorting_is_case_insensitive() {
        let entries = vec![
            entry("/D/beta.txt", false),
            entry("/D/Alpha.txt", false),
            entry("/D/zoo", true),
        ];
        let diff = diff_tree(&Plan::new("p", "", "/D"), &entries, Path::new("/D"));

        assert_eq!(names(&diff.current), vec!["zoo", "Alpha.txt", "beta.txt"]);
        assert_eq!(diff.current, diff.proposed);
    }

    #[test]
    fn test_diff_is_idempotent() {
        let entries = vec![entry("/Docs/a.txt", false)];
        let plan = Plan::new("p", "Rename", "/Docs")
            .with_operation(PlanOperation::rename("r", "/Docs/a.txt", "b.txt"));

        let first = diff_tree(&plan, &entries, Path::new("/Docs"));
        let second = diff_tree(&plan, &entries, Path::new("/Docs"));

        assert_eq!(first, second);
        assert_eq!(names(&first.proposed), vec!["b.txt"]);
        assert_eq!(first.proposed[0].status, DiffStatus::Moved);
    }
}
