//! WAL entry types and structures
//!
//! Defines the core types for WAL entries including operation types,
//! status tracking, and the journal structure for organizing entries.

use crate::plan::{OperationKind, Plan, PlanError, PlanOperation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Status of a WAL entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WALStatus {
    /// Operation has been logged but not yet started
    #[default]
    Pending,
    /// Operation is currently executing
    Executing,
    /// Operation completed successfully
    Completed,
    /// Operation failed with an error
    Failed,
    /// Operation was not performed (conflict policy, rollback of unstarted work)
    Skipped,
}

impl WALStatus {
    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Statuses only move forward. Retrying is `Failed -> Executing`, and an
    /// entry found `Executing` after a crash may be re-entered.
    pub fn can_transition_to(self, next: WALStatus) -> bool {
        use WALStatus::*;
        matches!(
            (self, next),
            (Pending, Executing)
                | (Pending, Skipped)
                | (Executing, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Executing, Skipped)
                | (Failed, Executing)
        )
    }

    /// Completed and skipped entries never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, WALStatus::Completed | WALStatus::Skipped)
    }
}

/// Aggregate status of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Running,
    /// Found `running` at startup, or stopped at a level boundary
    Interrupted,
    Complete,
    Failed,
    RolledBack,
}

/// Type of filesystem operation logged in the WAL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WALOperationType {
    /// Create a new folder
    CreateFolder { path: PathBuf },
    /// Move a file or folder from source to destination
    Move {
        source: PathBuf,
        destination: PathBuf,
    },
    /// Rename a file or folder
    #[serde(rename_all = "camelCase")]
    Rename { path: PathBuf, new_name: String },
    /// Send a file or folder to the trash
    Trash { path: PathBuf },
    /// Copy a file or folder from source to destination
    Copy {
        source: PathBuf,
        destination: PathBuf,
    },
    /// Remove a folder, only if it is empty (undo of `CreateFolder`)
    DeleteFolder { path: PathBuf },
    /// Remove a copied file or folder (undo of `Copy`)
    DeleteCopy { path: PathBuf },
    /// Bring a trashed item back (undo of `Trash`).
    /// `from` is the quarantine location, `None` for the system trash.
    Restore {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<PathBuf>,
    },
}

impl WALOperationType {
    /// Convert a plan operation into its journaled form
    pub fn from_plan_operation(op: &PlanOperation) -> Result<Self, PlanError> {
        op.check_fields()?;

        let missing = |field: &'static str| PlanError::MissingField {
            operation_id: op.id.clone(),
            kind: op.kind.as_str(),
            field,
        };

        Ok(match op.kind {
            OperationKind::CreateFolder => WALOperationType::CreateFolder {
                path: op.path.clone().ok_or_else(|| missing("path"))?,
            },
            OperationKind::Move => WALOperationType::Move {
                source: op.source.clone().ok_or_else(|| missing("source"))?,
                destination: op.destination.clone().ok_or_else(|| missing("destination"))?,
            },
            OperationKind::Copy => WALOperationType::Copy {
                source: op.source.clone().ok_or_else(|| missing("source"))?,
                destination: op.destination.clone().ok_or_else(|| missing("destination"))?,
            },
            OperationKind::Rename => WALOperationType::Rename {
                path: op
                    .rename_target()
                    .map(Path::to_path_buf)
                    .ok_or_else(|| missing("source"))?,
                new_name: op.new_name.clone().ok_or_else(|| missing("newName"))?,
            },
            OperationKind::Trash => WALOperationType::Trash {
                path: op.path.clone().ok_or_else(|| missing("path"))?,
            },
        })
    }

    /// Whether this operation was generated to undo another one
    pub fn is_inverse(&self) -> bool {
        matches!(
            self,
            WALOperationType::DeleteFolder { .. }
                | WALOperationType::DeleteCopy { .. }
                | WALOperationType::Restore { .. }
        )
    }

    /// Path this operation brings into existence (before any conflict rename)
    pub fn produced_path(&self) -> Option<PathBuf> {
        match self {
            WALOperationType::CreateFolder { path } => Some(path.clone()),
            WALOperationType::Move { destination, .. } | WALOperationType::Copy { destination, .. } => {
                Some(destination.clone())
            }
            WALOperationType::Rename { path, new_name } => path.parent().map(|p| p.join(new_name)),
            WALOperationType::Restore { path, .. } => Some(path.clone()),
            WALOperationType::Trash { .. }
            | WALOperationType::DeleteFolder { .. }
            | WALOperationType::DeleteCopy { .. } => None,
        }
    }

    /// Generate the inverse (undo) operation.
    ///
    /// `final_path` is where the operation actually put its result: the
    /// auto-renamed destination, or the quarantine location for a trash.
    ///
    /// # Returns
    /// * `Ok(WALOperationType)` - The inverse operation
    /// * `Err(String)` - Error if inverse cannot be computed
    pub fn inverse(&self, final_path: Option<&Path>) -> Result<WALOperationType, String> {
        match self {
            WALOperationType::CreateFolder { path } => {
                Ok(WALOperationType::DeleteFolder { path: path.clone() })
            }
            WALOperationType::Move {
                source,
                destination,
            } => Ok(WALOperationType::Move {
                source: final_path.map(Path::to_path_buf).unwrap_or_else(|| destination.clone()),
                destination: source.clone(),
            }),
            WALOperationType::Rename { path, new_name } => {
                let old_name = path
                    .file_name()
                    .ok_or_else(|| {
                        format!("Cannot compute inverse: path has no filename: {}", path.display())
                    })?
                    .to_string_lossy()
                    .to_string();
                let parent = path.parent().ok_or_else(|| {
                    format!("Cannot compute inverse: path has no parent: {}", path.display())
                })?;
                let renamed = final_path
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| parent.join(new_name));
                Ok(WALOperationType::Rename {
                    path: renamed,
                    new_name: old_name,
                })
            }
            WALOperationType::Trash { path } => Ok(WALOperationType::Restore {
                path: path.clone(),
                from: final_path.map(Path::to_path_buf),
            }),
            WALOperationType::Copy { destination, .. } => Ok(WALOperationType::DeleteCopy {
                path: final_path.map(Path::to_path_buf).unwrap_or_else(|| destination.clone()),
            }),
            WALOperationType::DeleteFolder { .. }
            | WALOperationType::DeleteCopy { .. }
            | WALOperationType::Restore { .. } => Err(format!(
                "Cannot compute inverse of an undo operation: {}",
                self.description()
            )),
        }
    }

    /// Get a human-readable description of this operation
    pub fn description(&self) -> String {
        match self {
            WALOperationType::CreateFolder { path } => {
                format!("Create folder: {}", path.display())
            }
            WALOperationType::Move {
                source,
                destination,
            } => {
                format!("Move {} -> {}", source.display(), destination.display())
            }
            WALOperationType::Rename { path, new_name } => {
                format!("Rename {} to {}", path.display(), new_name)
            }
            WALOperationType::Trash { path } => format!("Move to trash: {}", path.display()),
            WALOperationType::Copy {
                source,
                destination,
            } => {
                format!("Copy {} -> {}", source.display(), destination.display())
            }
            WALOperationType::DeleteFolder { path } => {
                format!("Delete folder: {}", path.display())
            }
            WALOperationType::DeleteCopy { path } => format!("Delete copy: {}", path.display()),
            WALOperationType::Restore { path, .. } => {
                format!("Restore from trash: {}", path.display())
            }
        }
    }
}

/// A single entry in the Write-Ahead Log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WALEntry {
    /// Plan operation id (`<id>:undo` for rollback entries)
    pub operation_id: String,
    /// Sequence number within the journal (plan order)
    pub sequence: u32,
    /// Execution level computed by the DAG
    pub level: usize,
    /// Operation ids that must complete first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// The operation to perform
    pub operation: WALOperationType,
    /// Current status of this entry
    pub status: WALStatus,
    /// When this entry was created
    pub created_at: DateTime<Utc>,
    /// Last time this entry was updated
    pub updated_at: DateTime<Utc>,
    /// Error message if the operation failed or was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Where the result actually landed, when it differs from the plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_path: Option<PathBuf>,
    /// Operation id this entry undoes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverses: Option<String>,
}

impl WALEntry {
    /// Create a new pending WAL entry
    pub fn new(
        operation_id: impl Into<String>,
        operation: WALOperationType,
        sequence: u32,
        level: usize,
        depends_on: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            operation_id: operation_id.into(),
            sequence,
            level,
            depends_on,
            operation,
            status: WALStatus::Pending,
            created_at: now,
            updated_at: now,
            error: None,
            final_path: None,
            reverses: None,
        }
    }

    /// Build the pending undo entry for this (applied) entry
    pub fn inverse_entry(&self, sequence: u32, level: usize) -> Result<WALEntry, String> {
        let operation = self.operation.inverse(self.final_path.as_deref())?;
        let mut entry = WALEntry::new(
            format!("{}:undo", self.operation_id),
            operation,
            sequence,
            level,
            Vec::new(),
        );
        entry.reverses = Some(self.operation_id.clone());
        Ok(entry)
    }

    /// Apply a status transition, rejecting anything non-monotonic
    pub fn transition(&mut self, status: WALStatus, error: Option<String>) -> Result<(), WALStatus> {
        if !self.status.can_transition_to(status) {
            return Err(self.status);
        }
        self.status = status;
        self.error = match status {
            WALStatus::Executing | WALStatus::Completed => None,
            _ => error,
        };
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Check if this entry still has work to do
    pub fn is_pending(&self) -> bool {
        matches!(
            self.status,
            WALStatus::Pending | WALStatus::Executing | WALStatus::Failed
        )
    }

    pub fn description(&self) -> String {
        self.operation.description()
    }
}

/// Counts of entries by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: usize,
    pub executing: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// A collection of WAL entries for a single job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WALJournal {
    /// Unique identifier for this job
    pub job_id: String,
    /// Plan this job executes
    pub plan_id: String,
    #[serde(default)]
    pub description: String,
    /// The target folder being organized
    pub target_folder: PathBuf,
    /// Content hash of the committed plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_hash: Option<String>,
    /// When this journal was started
    pub started_at: DateTime<Utc>,
    /// Aggregate job status
    #[serde(default)]
    pub status: JobStatus,
    /// All entries in this journal
    pub entries: Vec<WALEntry>,
    /// Schema version for forward compatibility
    pub version: u32,
}

impl WALJournal {
    /// Current schema version
    pub const CURRENT_VERSION: u32 = 2;

    /// Create a new empty journal
    pub fn new(job_id: String, plan_id: String, target_folder: PathBuf) -> Self {
        Self {
            job_id,
            plan_id,
            description: String::new(),
            target_folder,
            plan_hash: None,
            started_at: Utc::now(),
            status: JobStatus::Running,
            entries: Vec::new(),
            version: Self::CURRENT_VERSION,
        }
    }

    /// Create a journal with every plan operation recorded as pending.
    ///
    /// `levels` and `depends_on` come from the execution DAG.
    pub fn from_plan(
        job_id: String,
        plan: &Plan,
        levels: &[Vec<String>],
        depends_on: &HashMap<String, Vec<String>>,
    ) -> Result<Self, PlanError> {
        let level_of: HashMap<&str, usize> = levels
            .iter()
            .enumerate()
            .flat_map(|(level, ids)| ids.iter().map(move |id| (id.as_str(), level)))
            .collect();

        let mut journal = Self::new(job_id, plan.id.clone(), plan.target_folder.clone());
        journal.description = plan.description.clone();
        journal.plan_hash = Some(plan.compute_hash());

        for (sequence, op) in plan.operations.iter().enumerate() {
            let operation = WALOperationType::from_plan_operation(op)?;
            journal.entries.push(WALEntry::new(
                op.id.clone(),
                operation,
                sequence as u32,
                level_of.get(op.id.as_str()).copied().unwrap_or(0),
                depends_on.get(&op.id).cloned().unwrap_or_default(),
            ));
        }

        Ok(journal)
    }

    /// Add an entry to this journal
    pub fn add_entry(&mut self, entry: WALEntry) {
        self.entries.push(entry);
    }

    /// Next free sequence number
    pub fn next_sequence(&self) -> u32 {
        self.entries
            .iter()
            .map(|e| e.sequence + 1)
            .max()
            .unwrap_or(0)
    }

    /// Find an entry by its operation id
    pub fn get_entry(&self, operation_id: &str) -> Option<&WALEntry> {
        self.entries.iter().find(|e| e.operation_id == operation_id)
    }

    /// Find an entry by its operation id (mutable)
    pub fn get_entry_mut(&mut self, operation_id: &str) -> Option<&mut WALEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.operation_id == operation_id)
    }

    /// Entries of the original plan (not rollback entries)
    pub fn forward_entries(&self) -> impl Iterator<Item = &WALEntry> {
        self.entries.iter().filter(|e| e.reverses.is_none())
    }

    /// Get all entries with work left (pending, executing or failed)
    pub fn pending_entries(&self) -> Vec<&WALEntry> {
        self.forward_entries().filter(|e| e.is_pending()).collect()
    }

    /// Get all completed entries
    pub fn completed_entries(&self) -> Vec<&WALEntry> {
        self.forward_entries()
            .filter(|e| e.status == WALStatus::Completed)
            .collect()
    }

    /// Get all failed entries
    pub fn failed_entries(&self) -> Vec<&WALEntry> {
        self.forward_entries()
            .filter(|e| e.status == WALStatus::Failed)
            .collect()
    }

    /// Operation ids already completed, for the progress overlay
    pub fn completed_ids(&self) -> Vec<String> {
        self.completed_entries()
            .into_iter()
            .map(|e| e.operation_id.clone())
            .collect()
    }

    /// Check if every forward entry reached a terminal status
    pub fn is_complete(&self) -> bool {
        self.forward_entries().all(|e| e.status.is_terminal())
    }

    /// Check if any entry has failed
    pub fn has_failures(&self) -> bool {
        self.forward_entries().any(|e| e.status == WALStatus::Failed)
    }

    /// Count of forward entries by status
    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.forward_entries() {
            match entry.status {
                WALStatus::Pending => counts.pending += 1,
                WALStatus::Executing => counts.executing += 1,
                WALStatus::Completed => counts.completed += 1,
                WALStatus::Failed => counts.failed += 1,
                WALStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}
