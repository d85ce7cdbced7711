//! State Validation Module
//!
//! Captures the state of a plan's source paths when the plan is shown for
//! review and checks it again right before commit. A source deleted in the
//! meantime, or a plan that no longer hashes the same, blocks the commit;
//! modifications are reported as warnings.
//!
//! # Usage
//!
//! ```rust,ignore
//! let snapshot = StateSnapshot::of_plan(&plan);
//! // ... user reviews the preview ...
//! let check = snapshot.validate(&plan);
//! if check.is_blocking() {
//!     // refuse to commit
//! }
//! ```

use crate::plan::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// State of one path at capture time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathState {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl PathState {
    fn read(path: &Path) -> Self {
        match fs::symlink_metadata(path) {
            Ok(meta) => Self {
                exists: true,
                modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
                size: (!meta.is_dir()).then(|| meta.len()),
            },
            Err(_) => Self {
                exists: false,
                modified_at: None,
                size: None,
            },
        }
    }
}

/// Snapshot of the filesystem state a plan was reviewed against
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Hash of the plan that was reviewed
    pub plan_hash: String,
    pub paths: BTreeMap<PathBuf, PathState>,
    pub captured_at: DateTime<Utc>,
}

/// Type of state conflict detected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StateConflict {
    /// The plan being committed is not the one that was reviewed
    PlanChanged { reviewed: String, committed: String },
    /// Source was deleted since review
    Deleted { path: PathBuf },
    /// Source appeared since review (it was missing and is now present)
    Added { path: PathBuf },
    /// Source was modified since review
    Modified {
        path: PathBuf,
        old_modified_at: Option<DateTime<Utc>>,
        new_modified_at: Option<DateTime<Utc>>,
    },
    /// Source size changed
    SizeChanged {
        path: PathBuf,
        old_size: u64,
        new_size: u64,
    },
}

impl StateConflict {
    /// Get a human-readable description of the conflict
    pub fn description(&self) -> String {
        match self {
            StateConflict::PlanChanged { .. } => "Plan changed after review".to_string(),
            StateConflict::Deleted { path } => format!("File deleted: {}", path.display()),
            StateConflict::Added { path } => format!("New file appeared: {}", path.display()),
            StateConflict::Modified { path, .. } => format!("File modified: {}", path.display()),
            StateConflict::SizeChanged {
                path,
                old_size,
                new_size,
            } => format!(
                "File size changed: {} ({} -> {} bytes)",
                path.display(),
                old_size,
                new_size
            ),
        }
    }

    /// Whether this conflict blocks the commit
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            StateConflict::Deleted { .. } | StateConflict::PlanChanged { .. }
        )
    }
}

/// Result of state validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCheck {
    pub conflicts: Vec<StateConflict>,
    pub paths_checked: usize,
    /// Conflicts that would make operations fail
    pub critical_count: usize,
    /// Conflicts that may give unexpected results
    pub warning_count: usize,
}

impl StateCheck {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn is_blocking(&self) -> bool {
        self.critical_count > 0
    }

    /// Descriptions of the critical conflicts
    pub fn critical_descriptions(&self) -> Vec<String> {
        self.conflicts
            .iter()
            .filter(|c| c.is_critical())
            .map(StateConflict::description)
            .collect()
    }
}

impl StateSnapshot {
    /// Capture the state of every path the plan reads from
    pub fn of_plan(plan: &Plan) -> Self {
        let paths = plan
            .source_paths()
            .into_iter()
            .map(|path| {
                let state = PathState::read(&path);
                (path, state)
            })
            .collect();

        Self {
            plan_hash: plan.compute_hash(),
            paths,
            captured_at: Utc::now(),
        }
    }

    /// Get the number of paths in this snapshot
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Compare the current filesystem (and plan) against this snapshot
    pub fn validate(&self, plan: &Plan) -> StateCheck {
        let mut conflicts = Vec::new();

        let committed = plan.compute_hash();
        if committed != self.plan_hash {
            conflicts.push(StateConflict::PlanChanged {
                reviewed: self.plan_hash.clone(),
                committed,
            });
        }

        for (path, old) in &self.paths {
            let new = PathState::read(path);

            match (old.exists, new.exists) {
                (true, false) => {
                    conflicts.push(StateConflict::Deleted { path: path.clone() });
                    continue;
                }
                (false, true) => {
                    conflicts.push(StateConflict::Added { path: path.clone() });
                    continue;
                }
                (false, false) => continue,
                (true, true) => {}
            }

            if new.modified_at > old.modified_at {
                conflicts.push(StateConflict::Modified {
                    path: path.clone(),
                    old_modified_at: old.modified_at,
                    new_modified_at: new.modified_at,
                });
                continue;
            }

            // Size can change without an mtime bump on some network filesystems
            if let (Some(old_size), Some(new_size)) = (old.size, new.size) {
                if old_size != new_size {
                    conflicts.push(StateConflict::SizeChanged {
                        path: path.clone(),
                        old_size,
                        new_size,
                    });
                }
            }
        }

        let critical_count = conflicts.iter().filter(|c| c.is_critical()).count();
        let check = StateCheck {
            warning_count: conflicts.len() - critical_count,
            critical_count,
            paths_checked: self.paths.len(),
            conflicts,
        };

        if !check.is_clean() {
            tracing::warn!(
                plan_id = %plan.id,
                critical = check.critical_count,
                warnings = check.warning_count,
                "Filesystem changed since review"
            );
        }

        check
    }
}
