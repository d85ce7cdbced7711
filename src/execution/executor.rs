//! Execution Engine
//!
//! Executes journaled operations level by level using the DAG. Operations
//! at the same level run in parallel on tokio tasks, bounded by a semaphore;
//! the filesystem work itself runs on blocking threads.
//!
//! Every operation is written to the WAL as pending before the first one
//! starts, marked executing before its primitive runs and marked with its
//! terminal status right after.

use super::dag::{DAGError, ExecutionDAG};
use super::fsops::{self, ConflictPolicy, OperationOutcome, TrashStrategy};
use crate::events::{self, ProgressEvent};
use crate::plan::Plan;
use crate::wal::entry::{JobStatus, WALEntry, WALStatus};
use crate::wal::journal::{WALError, WALManager};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};

/// Errors that stop a job from starting or from being finalized.
/// Per-operation failures are not errors; they land in the WAL and in
/// `ExecutionResult::errors`.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Cannot order plan operations: {0}")]
    Dag(#[from] DAGError),
    #[error(transparent)]
    Wal(#[from] WALError),
}

impl From<ExecutionError> for String {
    fn from(err: ExecutionError) -> Self {
        err.to_string()
    }
}

/// Configuration for execution behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    /// Upper bound on operations running at once
    pub max_workers: usize,
    /// How to handle "destination already exists" conflicts
    pub conflict_policy: ConflictPolicy,
    pub trash_strategy: TrashStrategy,
    /// Move the journal to `archive/` once the job completes
    pub archive_on_complete: bool,
    /// Remove folders left empty by moves after a successful job
    pub cleanup_empty_dirs: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get().max(1),
            conflict_policy: ConflictPolicy::default(),
            trash_strategy: TrashStrategy::default(),
            archive_on_complete: true,
            cleanup_empty_dirs: false,
        }
    }
}

/// Result of executing a job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub job_id: String,
    /// Number of operations completed successfully
    pub completed_count: usize,
    /// Number of operations that failed
    pub failed_count: usize,
    /// Number of operations that were skipped (e.g., destination exists with skip policy)
    pub skipped_count: usize,
    /// Error messages from failed operations
    pub errors: Vec<String>,
    /// Reasons for skipped operations
    pub skipped: Vec<String>,
    /// Whether all operations completed successfully (no failures)
    pub success: bool,
    /// Stopped at a level boundary by a cancel request
    pub cancelled: bool,
}

/// Terminal outcome of one entry
#[derive(Debug, Clone)]
enum EntryOutcome {
    Completed(Option<PathBuf>),
    Skipped(String),
    Failed(String),
}

/// Totals across the levels of one run
#[derive(Debug, Clone, Default)]
pub(crate) struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub skipped_reasons: Vec<String>,
    pub cancelled: bool,
}

impl RunSummary {
    fn absorb(&mut self, operation_id: &str, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Completed(_) => self.completed += 1,
            EntryOutcome::Skipped(reason) => {
                self.skipped += 1;
                self.skipped_reasons.push(reason);
            }
            EntryOutcome::Failed(error) => {
                self.failed += 1;
                self.errors.push(format!("{}: {}", operation_id, error));
            }
        }
    }
}

/// Execution engine for journaled operations
pub struct ExecutionEngine {
    wal: Arc<WALManager>,
    options: ExecutionOptions,
    cancel: Arc<AtomicBool>,
    events: Option<broadcast::Sender<ProgressEvent>>,
}

impl ExecutionEngine {
    /// Create a new execution engine
    pub fn new(wal: Arc<WALManager>, options: ExecutionOptions) -> Self {
        Self {
            wal,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
            events: None,
        }
    }

    /// Publish progress on `sender`
    pub fn with_events(mut self, sender: broadcast::Sender<ProgressEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn wal(&self) -> &Arc<WALManager> {
        &self.wal
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Handle that stops execution at the next level boundary when set
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Request cancellation. The running level finishes first.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Clear a cancel request left over from an earlier run
    pub(crate) fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        events::emit(self.events.as_ref(), event);
    }

    /// Execute a validated plan as a new journaled job
    ///
    /// This method:
    /// 1. Builds the DAG and its levels
    /// 2. Writes every operation to the WAL as pending
    /// 3. Executes each level in parallel, levels in order
    /// 4. Stops after a level that had a failure
    pub async fn execute(&self, plan: &Plan) -> Result<ExecutionResult, ExecutionError> {
        self.reset_cancel();

        let dag = ExecutionDAG::from_plan(plan)?;
        let levels = dag.levels();

        tracing::info!(
            plan_id = %plan.id,
            operations = dag.len(),
            levels = dag.level_count(),
            "Built execution DAG"
        );

        let job_id = self.wal.begin(plan, &levels, &dag.dependency_map())?;
        let journal = self
            .wal
            .load_journal(&job_id)?
            .ok_or_else(|| WALError::NotFound(format!("Journal not found: {}", job_id)))?;

        let grouped = group_by_levels(journal.entries, &levels);
        let summary = self
            .run_levels(&job_id, grouped, self.options.conflict_policy, true)
            .await;

        let status = self.finish_job(&job_id, &summary, JobStatus::Complete)?;

        if status == JobStatus::Complete && self.options.cleanup_empty_dirs {
            let vacated: Vec<PathBuf> = plan
                .operations
                .iter()
                .filter_map(|op| op.vacated_path())
                .collect();
            let removed = fsops::cleanup_empty_directories(&vacated, &plan.target_folder);
            tracing::debug!(job_id = %job_id, removed, "Cleaned up empty directories");
        }

        Ok(result_from(job_id, summary))
    }

    /// Set the aggregate job status after a run and publish `JobFinished`.
    ///
    /// `success_status` is what a clean run becomes (`Complete` for forward
    /// work, `RolledBack` for a rollback).
    pub(crate) fn finish_job(
        &self,
        job_id: &str,
        summary: &RunSummary,
        success_status: JobStatus,
    ) -> Result<JobStatus, WALError> {
        let status = if summary.failed > 0 {
            JobStatus::Failed
        } else if summary.cancelled {
            JobStatus::Interrupted
        } else {
            success_status
        };

        self.wal.set_job_status(job_id, status)?;
        if status == success_status && self.options.archive_on_complete {
            self.wal.archive_journal(job_id)?;
        }

        tracing::info!(
            job_id = %job_id,
            status = ?status,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "Job finished"
        );

        self.emit(ProgressEvent::JobFinished {
            job_id: job_id.to_string(),
            status,
            completed: summary.completed,
            failed: summary.failed,
            skipped: summary.skipped,
        });

        Ok(status)
    }

    /// Execute entries organized by level.
    ///
    /// Each level runs in parallel, levels run sequentially. The cancel flag
    /// is checked before every level. With `stop_on_failure`, no level
    /// starts after one that had a failure.
    pub(crate) async fn run_levels(
        &self,
        job_id: &str,
        levels: Vec<Vec<WALEntry>>,
        policy: ConflictPolicy,
        stop_on_failure: bool,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        let total_levels = levels.len();

        for (level_idx, level) in levels.into_iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::info!(job_id = %job_id, level = level_idx, "Execution cancelled");
                summary.cancelled = true;
                break;
            }

            tracing::debug!(
                job_id = %job_id,
                level = level_idx,
                operations = level.len(),
                "Executing level"
            );
            self.emit(ProgressEvent::LevelStarted {
                job_id: job_id.to_string(),
                level: level_idx,
                total_levels,
                operations: level.len(),
            });

            let level_summary = self.run_level(job_id, level, policy).await;

            self.emit(ProgressEvent::LevelCompleted {
                job_id: job_id.to_string(),
                level: level_idx,
                completed: level_summary.completed,
                failed: level_summary.failed,
                skipped: level_summary.skipped,
            });

            let level_failed = level_summary.failed > 0;
            summary.completed += level_summary.completed;
            summary.failed += level_summary.failed;
            summary.skipped += level_summary.skipped;
            summary.errors.extend(level_summary.errors);
            summary.skipped_reasons.extend(level_summary.skipped_reasons);

            if level_failed && stop_on_failure {
                tracing::warn!(
                    job_id = %job_id,
                    level = level_idx,
                    failures = level_summary.failed,
                    "Level had failures, stopping execution"
                );
                break;
            }
        }

        summary
    }

    /// Execute a single level of operations in parallel
    async fn run_level(
        &self,
        job_id: &str,
        entries: Vec<WALEntry>,
        policy: ConflictPolicy,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        if entries.is_empty() {
            return summary;
        }

        let semaphore = Arc::new(Semaphore::new(self.options.max_workers.max(1)));
        let mut tasks = FuturesUnordered::new();

        for entry in entries {
            let semaphore = Arc::clone(&semaphore);
            let wal = Arc::clone(&self.wal);
            let trash = self.options.trash_strategy.clone();
            let events = self.events.clone();
            let job_id = job_id.to_string();
            let operation_id = entry.operation_id.clone();
            let description = entry.description();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| format!("Worker pool closed: {}", e))?;

                events::emit(
                    events.as_ref(),
                    ProgressEvent::OperationStarted {
                        job_id: job_id.clone(),
                        operation_id: entry.operation_id.clone(),
                        description: entry.description(),
                    },
                );

                tokio::task::spawn_blocking(move || run_entry(&wal, &job_id, &entry, policy, &trash))
                    .await
                    .map_err(|e| format!("Task panicked: {}", e))
            });

            tasks.push(async move { (operation_id, description, handle.await) });
        }

        // Wait for all operations in this level to complete
        while let Some((operation_id, description, joined)) = tasks.next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => EntryOutcome::Failed(err),
                Err(join_err) => {
                    tracing::warn!(error = %join_err, "Task panicked");
                    EntryOutcome::Failed(format!("Task panicked: {}", join_err))
                }
            };

            match &outcome {
                EntryOutcome::Completed(final_path) => {
                    self.emit(ProgressEvent::OperationCompleted {
                        job_id: job_id.to_string(),
                        operation_id: operation_id.clone(),
                        description,
                        final_path: final_path.clone(),
                        skipped: None,
                    });
                }
                EntryOutcome::Skipped(reason) => {
                    self.emit(ProgressEvent::OperationCompleted {
                        job_id: job_id.to_string(),
                        operation_id: operation_id.clone(),
                        description,
                        final_path: None,
                        skipped: Some(reason.clone()),
                    });
                }
                EntryOutcome::Failed(error) => {
                    self.emit(ProgressEvent::OperationFailed {
                        job_id: job_id.to_string(),
                        operation_id: operation_id.clone(),
                        error: error.clone(),
                    });
                }
            }

            summary.absorb(&operation_id, outcome);
        }

        summary
    }
}

/// Run one entry on the current (blocking) thread, journaling both sides
fn run_entry(
    wal: &WALManager,
    job_id: &str,
    entry: &WALEntry,
    policy: ConflictPolicy,
    trash: &TrashStrategy,
) -> EntryOutcome {
    let operation_id = entry.operation_id.as_str();

    // A renamed destination is journaled before the primitive runs; a
    // replay keeps the one chosen the first time
    let reserved = entry
        .final_path
        .clone()
        .or_else(|| fsops::reserve_destination(&entry.operation, policy));

    if let Err(e) =
        wal.record_outcome(job_id, operation_id, WALStatus::Executing, None, reserved.clone())
    {
        tracing::warn!(job_id = %job_id, operation_id = %operation_id, error = %e, "Failed to mark executing");
        return EntryOutcome::Failed(e.to_string());
    }

    tracing::debug!(
        operation_id = %operation_id,
        operation = %entry.description(),
        "Executing operation"
    );

    let (outcome, status, error, final_path) =
        match fsops::apply_operation(operation_id, &entry.operation, policy, trash, reserved.as_deref()) {
            Ok(OperationOutcome::Completed) => {
                (EntryOutcome::Completed(None), WALStatus::Completed, None, None)
            }
            Ok(OperationOutcome::CompletedAt(path)) => {
                tracing::debug!(new_path = %path.display(), "Operation completed at another path");
                (
                    EntryOutcome::Completed(Some(path.clone())),
                    WALStatus::Completed,
                    None,
                    Some(path),
                )
            }
            Ok(OperationOutcome::Skipped(reason)) => {
                tracing::debug!(reason = %reason, "Operation skipped");
                (
                    EntryOutcome::Skipped(reason.clone()),
                    WALStatus::Skipped,
                    Some(reason),
                    None,
                )
            }
            Err(err) => {
                tracing::debug!(error = %err, "Operation failed");
                (
                    EntryOutcome::Failed(err.clone()),
                    WALStatus::Failed,
                    Some(err),
                    None,
                )
            }
        };

    if let Err(e) = wal.record_outcome(job_id, operation_id, status, error, final_path) {
        tracing::warn!(job_id = %job_id, operation_id = %operation_id, error = %e, "Failed to record outcome");
        return EntryOutcome::Failed(format!("Operation ran but could not be journaled: {}", e));
    }

    outcome
}

/// Arrange entries into the given levels of operation ids.
/// Entries not named by any level are dropped.
pub(crate) fn group_by_levels(entries: Vec<WALEntry>, levels: &[Vec<String>]) -> Vec<Vec<WALEntry>> {
    let mut by_id: HashMap<String, WALEntry> = entries
        .into_iter()
        .map(|e| (e.operation_id.clone(), e))
        .collect();

    levels
        .iter()
        .map(|ids| ids.iter().filter_map(|id| by_id.remove(id)).collect())
        .collect()
}

fn result_from(job_id: String, summary: RunSummary) -> ExecutionResult {
    ExecutionResult {
        job_id,
        completed_count: summary.completed,
        failed_count: summary.failed,
        skipped_count: summary.skipped,
        success: summary.failed == 0 && !summary.cancelled,
        cancelled: summary.cancelled,
        errors: summary.errors,
        skipped: summary.skipped_reasons,
    }
}
