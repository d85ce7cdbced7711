//! WAL Recovery
//!
//! Provides recovery operations for interrupted jobs including:
//! - Summarizing an interrupted or failed job for the recovery prompt
//! - Resuming incomplete operations
//! - Rolling back completed operations in reverse order
//! - Discarding the journal
//!
//! Resume and rollback run through the execution engine, so they are
//! journaled exactly like a forward job.

use super::entry::{JobStatus, WALEntry, WALJournal, WALStatus};
use super::journal::{WALError, WALManager};
use crate::execution::executor::{group_by_levels, ExecutionEngine};
use crate::execution::fsops::{self, ConflictPolicy};
use crate::execution::ExecutionDAG;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Information about a recoverable job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryInfo {
    /// Job ID of the interrupted job
    pub job_id: String,
    pub plan_id: String,
    pub description: String,
    /// Target folder that was being organized
    pub target_folder: PathBuf,
    pub status: JobStatus,
    /// Number of operations completed before interruption
    pub completed_count: usize,
    /// Number of operations still pending (including ones caught mid-flight)
    pub pending_count: usize,
    /// Number of operations that failed
    pub failed_count: usize,
    /// When the job was started
    pub started_at: DateTime<Utc>,
    /// Descriptions of pending operations
    pub pending_operations: Vec<String>,
}

impl RecoveryInfo {
    pub fn from_journal(journal: &WALJournal) -> Self {
        let counts = journal.status_counts();

        // Collect descriptions of pending operations for UI display
        let pending_operations = journal
            .forward_entries()
            .filter(|e| matches!(e.status, WALStatus::Pending | WALStatus::Executing))
            .map(WALEntry::description)
            .collect();

        Self {
            job_id: journal.job_id.clone(),
            plan_id: journal.plan_id.clone(),
            description: journal.description.clone(),
            target_folder: journal.target_folder.clone(),
            status: journal.status,
            completed_count: counts.completed,
            pending_count: counts.pending + counts.executing,
            failed_count: counts.failed,
            started_at: journal.started_at,
            pending_operations,
        }
    }
}

/// Result of a recovery operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResult {
    pub job_id: String,
    /// Whether recovery was successful
    pub success: bool,
    /// Number of operations completed during recovery
    pub completed_count: usize,
    /// Number of operations that failed during recovery
    pub failed_count: usize,
    pub skipped_count: usize,
    /// Error messages from failed operations
    pub errors: Vec<String>,
}

fn load(wal: &WALManager, job_id: &str) -> Result<WALJournal, WALError> {
    wal.load_journal(job_id)?
        .ok_or_else(|| WALError::NotFound(format!("Journal not found: {}", job_id)))
}

fn is_rolling_back(journal: &WALJournal) -> bool {
    journal.status == JobStatus::RolledBack || journal.entries.iter().any(|e| e.reverses.is_some())
}

/// Resume an interrupted journal by executing remaining operations
///
/// This will:
/// 1. Load the journal
/// 2. Rebuild the DAG from pending, executing and failed entries
/// 3. Execute them level by level; completed entries never run again
pub async fn resume_job(engine: &ExecutionEngine, job_id: &str) -> Result<RecoveryResult, WALError> {
    let wal = engine.wal();
    let journal = load(wal, job_id)?;

    if journal.status == JobStatus::Complete {
        return Err(WALError::InvalidState(format!("Job already complete: {}", job_id)));
    }
    if is_rolling_back(&journal) {
        return Err(WALError::InvalidState(format!(
            "Job was rolled back and cannot be resumed: {}",
            job_id
        )));
    }

    let remaining: Vec<&WALEntry> = journal.pending_entries();
    tracing::info!(
        job_id = %job_id,
        pending = remaining.len(),
        "Resuming interrupted journal"
    );

    let dag = ExecutionDAG::from_entries(&remaining)
        .map_err(|e| WALError::InvalidState(format!("Cannot order remaining operations: {}", e)))?;
    let levels = dag.levels();
    let entries: Vec<WALEntry> = remaining.into_iter().cloned().collect();

    wal.set_job_status(job_id, JobStatus::Running)?;
    engine.reset_cancel();
    let summary = engine
        .run_levels(
            job_id,
            group_by_levels(entries, &levels),
            engine.options().conflict_policy,
            true,
        )
        .await;
    let status = engine.finish_job(job_id, &summary, JobStatus::Complete)?;

    Ok(RecoveryResult {
        job_id: job_id.to_string(),
        success: status == JobStatus::Complete,
        completed_count: summary.completed,
        failed_count: summary.failed,
        skipped_count: summary.skipped,
        errors: summary.errors,
    })
}

/// Roll back a job by undoing its applied operations in reverse order
///
/// Completed entries are never modified: each gets a new `<id>:undo` entry
/// appended to the journal, then the undo entries run newest-first
/// (highest level, then highest sequence). Entries that never ran are
/// marked skipped. A rollback interrupted midway can be started again; undo
/// entries already completed are not repeated.
pub async fn rollback_job(engine: &ExecutionEngine, job_id: &str) -> Result<RecoveryResult, WALError> {
    let wal = engine.wal();
    let journal = load(wal, job_id)?;

    tracing::info!(
        job_id = %job_id,
        completed = journal.completed_entries().len(),
        "Rolling back job"
    );

    // Forward entries whose effect is on disk, newest first
    let mut applied: Vec<&WALEntry> = journal
        .forward_entries()
        .filter(|e| match e.status {
            WALStatus::Completed => true,
            WALStatus::Executing => fsops::appears_applied(&e.operation, e.final_path.as_deref()),
            _ => false,
        })
        .collect();
    applied.sort_by(|a, b| (b.level, b.sequence).cmp(&(a.level, a.sequence)));

    let mut errors = Vec::new();
    for entry in &applied {
        let undo_id = format!("{}:undo", entry.operation_id);
        if journal.get_entry(&undo_id).is_some() {
            continue;
        }
        match entry.inverse_entry(0, 0) {
            Ok(undo) => {
                wal.append_entry(job_id, undo)?;
            }
            Err(e) => {
                tracing::warn!(operation_id = %entry.operation_id, error = %e, "No inverse for operation");
                errors.push(format!("{}: {}", entry.operation_id, e));
            }
        }
    }

    // Work that never happened is closed out so the journal reads cleanly
    let mut skipped_count = 0;
    for entry in journal.forward_entries() {
        let never_ran = match entry.status {
            WALStatus::Pending => true,
            WALStatus::Executing => !applied.iter().any(|a| a.operation_id == entry.operation_id),
            _ => false,
        };
        if never_ran {
            wal.record(
                job_id,
                &entry.operation_id,
                WALStatus::Skipped,
                Some("Not executed; job rolled back".to_string()),
            )?;
            skipped_count += 1;
        }
    }

    // Undo entries with work left, in the order they were appended
    let journal = load(wal, job_id)?;
    let mut undo: Vec<WALEntry> = journal
        .entries
        .into_iter()
        .filter(|e| e.reverses.is_some() && e.is_pending())
        .collect();
    undo.sort_by_key(|e| e.sequence);

    wal.set_job_status(job_id, JobStatus::Running)?;
    engine.reset_cancel();
    // One undo per level: strictly sequential, and a failure does not stop
    // the remaining undos
    let levels: Vec<Vec<WALEntry>> = undo.into_iter().map(|e| vec![e]).collect();
    let mut summary = engine
        .run_levels(job_id, levels, ConflictPolicy::Fail, false)
        .await;
    summary.failed += errors.len();
    summary.errors.extend(errors);

    let status = engine.finish_job(job_id, &summary, JobStatus::RolledBack)?;

    Ok(RecoveryResult {
        job_id: job_id.to_string(),
        success: status == JobStatus::RolledBack,
        completed_count: summary.completed,
        failed_count: summary.failed,
        skipped_count: skipped_count + summary.skipped,
        errors: summary.errors,
    })
}

/// Discard a journal without touching the filesystem
pub fn discard_job(wal: &WALManager, job_id: &str) -> Result<(), WALError> {
    wal.discard(job_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecutionOptions, TrashStrategy};
    use crate::plan::{Plan, PlanOperation};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn engine(dir: &Path) -> ExecutionEngine {
        let wal = Arc::new(WALManager::with_dir(dir.join("wal")));
        ExecutionEngine::new(
            wal,
            ExecutionOptions {
                archive_on_complete: false,
                trash_strategy: TrashStrategy::Quarantine(dir.join("quarantine")),
                ..Default::default()
            },
        )
    }

    fn invoice_plan(root: &Path) -> Plan {
        Plan::new("plan-1", "File invoices", root)
            .with_operation(PlanOperation::create_folder("1", root.join("Invoices")))
            .with_operation(PlanOperation::move_item(
                "2",
                root.join("inv1.pdf"),
                root.join("Invoices/inv1.pdf"),
            ))
    }

    fn begin_only(engine: &ExecutionEngine, plan: &Plan) -> String {
        let dag = ExecutionDAG::from_plan(plan).unwrap();
        engine
            .wal()
            .begin(plan, &dag.levels(), &dag.dependency_map())
            .unwrap()
    }

    #[tokio::test]
    async fn test_begun_job_recovers_with_everything_pending() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("Docs");
        fs::create_dir_all(&root).unwrap();
        let engine = engine(dir.path());
        let plan = invoice_plan(&root);

        let job_id = begin_only(&engine, &plan);
        let info = engine.wal().check_recovery().unwrap().unwrap();

        assert_eq!(info.job_id, job_id);
        assert_eq!(info.pending_count, plan.len());
        assert_eq!(info.pending_operations.len(), 2);
    }

    #[tokio::test]
    async fn test_resume_runs_only_unfinished_work() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("Docs");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("inv1.pdf"), "pdf").unwrap();
        let engine = engine(dir.path());
        let plan = invoice_plan(&root);

        // Crash after the folder was created and journaled
        let job_id = begin_only(&engine, &plan);
        fs::create_dir(root.join("Invoices")).unwrap();
        engine.wal().record(&job_id, "1", WALStatus::Executing, None).unwrap();
        engine.wal().record(&job_id, "1", WALStatus::Completed, None).unwrap();
        engine.wal().check_recovery().unwrap();

        let result = resume_job(&engine, &job_id).await.unwrap();

        assert!(result.success);
        assert_eq!(result.completed_count, 1);
        assert!(root.join("Invoices/inv1.pdf").exists());
        let journal = engine.wal().load_journal(&job_id).unwrap().unwrap();
        assert_eq!(journal.status, JobStatus::Complete);
        assert!(journal.is_complete());
    }

    #[tokio::test]
    async fn test_resume_replays_operation_caught_mid_flight() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("Docs");
        fs::create_dir_all(root.join("Invoices")).unwrap();
        let engine = engine(dir.path());
        let plan = invoice_plan(&root);

        // The move hit the disk but its completion was never journaled
        let job_id = begin_only(&engine, &plan);
        fs::write(root.join("Invoices/inv1.pdf"), "pdf").unwrap();
        for id in ["1", "2"] {
            engine.wal().record(&job_id, id, WALStatus::Executing, None).unwrap();
        }
        engine.wal().record(&job_id, "1", WALStatus::Completed, None).unwrap();

        let result = resume_job(&engine, &job_id).await.unwrap();
        assert!(result.success);
        assert_eq!(
            engine
                .wal()
                .load_journal(&job_id)
                .unwrap()
                .unwrap()
                .get_entry("2")
                .unwrap()
                .status,
            WALStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_renamed_move_caught_mid_flight_undoes_the_right_file() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("Docs");
        fs::create_dir_all(root.join("Archive")).unwrap();
        fs::write(root.join("a.txt"), "ours").unwrap();
        fs::write(root.join("Archive/a.txt"), "theirs").unwrap();
        let engine = ExecutionEngine::new(
            Arc::new(WALManager::with_dir(dir.path().join("wal"))),
            ExecutionOptions {
                conflict_policy: ConflictPolicy::AutoRename,
                archive_on_complete: false,
                ..Default::default()
            },
        );
        let plan = Plan::new("plan-2", "Archive", &root).with_operation(PlanOperation::move_item(
            "1",
            root.join("a.txt"),
            root.join("Archive/a.txt"),
        ));

        // The renamed target is journaled, the move lands, then the crash
        let job_id = begin_only(&engine, &plan);
        let renamed = root.join("Archive/a_1.txt");
        engine
            .wal()
            .record_outcome(&job_id, "1", WALStatus::Executing, None, Some(renamed.clone()))
            .unwrap();
        fs::rename(root.join("a.txt"), &renamed).unwrap();
        engine.wal().check_recovery().unwrap();

        let resumed = resume_job(&engine, &job_id).await.unwrap();
        assert!(resumed.success, "{:?}", resumed.errors);
        let journal = engine.wal().load_journal(&job_id).unwrap().unwrap();
        assert_eq!(journal.get_entry("1").unwrap().final_path, Some(renamed.clone()));

        let rolled_back = rollback_job(&engine, &job_id).await.unwrap();
        assert!(rolled_back.success, "{:?}", rolled_back.errors);
        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "ours");
        assert_eq!(fs::read_to_string(root.join("Archive/a.txt")).unwrap(), "theirs");
        assert!(!renamed.exists());
    }

    #[tokio::test]
    async fn test_rollback_restores_move_and_removes_folder() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("Docs");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("inv1.pdf"), "pdf").unwrap();
        let engine = engine(dir.path());

        let executed = engine.execute(&invoice_plan(&root)).await.unwrap();
        assert!(executed.success);

        let result = rollback_job(&engine, &executed.job_id).await.unwrap();

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.completed_count, 2);
        assert!(root.join("inv1.pdf").exists());
        assert!(!root.join("Invoices").exists());

        let journal = engine.wal().load_journal(&executed.job_id).unwrap().unwrap();
        assert_eq!(journal.status, JobStatus::RolledBack);
        // Originals untouched, undo entries appended in reverse order
        assert_eq!(journal.get_entry("1").unwrap().status, WALStatus::Completed);
        let undo: Vec<&str> = journal
            .entries
            .iter()
            .filter(|e| e.reverses.is_some())
            .map(|e| e.operation_id.as_str())
            .collect();
        assert_eq!(undo, vec!["2:undo", "1:undo"]);
    }

    #[tokio::test]
    async fn test_rollback_of_partial_job_skips_unstarted() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("Docs");
        fs::create_dir_all(&root).unwrap();
        let engine = engine(dir.path());
        let plan = invoice_plan(&root);

        let job_id = begin_only(&engine, &plan);
        fs::create_dir(root.join("Invoices")).unwrap();
        engine.wal().record(&job_id, "1", WALStatus::Executing, None).unwrap();
        engine.wal().record(&job_id, "1", WALStatus::Completed, None).unwrap();

        let result = rollback_job(&engine, &job_id).await.unwrap();

        assert!(result.success);
        assert_eq!(result.skipped_count, 1);
        assert!(!root.join("Invoices").exists());
        let journal = engine.wal().load_journal(&job_id).unwrap().unwrap();
        assert_eq!(journal.get_entry("2").unwrap().status, WALStatus::Skipped);

        // A rolled back job cannot be resumed
        assert!(matches!(
            resume_job(&engine, &job_id).await,
            Err(WALError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_rollback_restores_quarantined_trash() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("Docs");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("old.log"), "log").unwrap();
        let engine = engine(dir.path());

        let plan = Plan::new("plan-t", "Tidy", &root)
            .with_operation(PlanOperation::trash("t", root.join("old.log")));
        let executed = engine.execute(&plan).await.unwrap();
        assert!(!root.join("old.log").exists());

        let result = rollback_job(&engine, &executed.job_id).await.unwrap();
        assert!(result.success);
        assert_eq!(fs::read_to_string(root.join("old.log")).unwrap(), "log");
    }

    #[tokio::test]
    async fn test_discard_leaves_filesystem_alone() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("Docs");
        fs::create_dir_all(root.join("Invoices")).unwrap();
        let engine = engine(dir.path());

        let job_id = begin_only(&engine, &invoice_plan(&root));
        discard_job(engine.wal(), &job_id).unwrap();

        assert!(engine.wal().load_journal(&job_id).unwrap().is_none());
        assert!(engine.wal().check_recovery().unwrap().is_none());
        assert!(root.join("Invoices").exists());
    }
}
