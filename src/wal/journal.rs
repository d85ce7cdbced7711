//! WAL Journal Manager
//!
//! Handles persistence of WAL journals to disk, enabling crash recovery.
//! Journals are stored as JSON files in `<data_dir>/sentinel/wal/`, one
//! `<job>.wal.json` per job. Completed jobs are moved to `archive/`.
//!
//! ## Concurrency Safety
//! Every read-modify-write holds an in-process mutex and an exclusive fs2
//! lock on `<job>.wal.lock`, so parallel operations of one level never
//! lose each other's updates.

use super::entry::{JobStatus, WALEntry, WALJournal, WALStatus};
use super::io;
use super::recovery::RecoveryInfo;
use crate::plan::{Plan, PlanError};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Error type for WAL operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WALError {
    #[error("WAL I/O error: {0}")]
    Io(String),
    #[error("WAL serialization error: {0}")]
    Serialization(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid job id: {0:?}")]
    InvalidJobId(String),
    #[error("Invalid WAL state: {0}")]
    InvalidState(String),
    #[error("Another job is still active: {job_id}")]
    ActiveJobExists { job_id: String },
    #[error("Operation '{operation_id}' cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        operation_id: String,
        from: WALStatus,
        to: WALStatus,
    },
}

impl From<WALError> for String {
    fn from(err: WALError) -> Self {
        err.to_string()
    }
}

impl From<PlanError> for WALError {
    fn from(err: PlanError) -> Self {
        WALError::InvalidState(err.to_string())
    }
}

const JOURNAL_SUFFIX: &str = ".wal.json";
const LOCK_SUFFIX: &str = ".wal.lock";
const ARCHIVE_DIR: &str = "archive";

/// Manager for WAL journal persistence
pub struct WALManager {
    /// Base directory for WAL storage
    wal_dir: PathBuf,
    /// Serializes writers within this process
    write_guard: Mutex<()>,
}

impl WALManager {
    /// Create a new WAL manager with default directory
    pub fn new() -> Self {
        Self::with_dir(Self::default_wal_dir())
    }

    /// Create a WAL manager with a custom directory
    pub fn with_dir(wal_dir: PathBuf) -> Self {
        Self {
            wal_dir,
            write_guard: Mutex::new(()),
        }
    }

    /// Get the default WAL directory (`<data_dir>/sentinel/wal/`)
    pub fn default_wal_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sentinel")
            .join("wal")
    }

    /// Get the WAL directory path
    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    fn archive_dir(&self) -> PathBuf {
        self.wal_dir.join(ARCHIVE_DIR)
    }

    /// Ensure the WAL directory exists
    fn ensure_dir(&self) -> Result<(), WALError> {
        fs::create_dir_all(&self.wal_dir)
            .map_err(|e| WALError::Io(format!("Failed to create WAL directory: {}", e)))
    }

    /// Job ids are uuids. Anything else could name a file outside the WAL
    /// directory.
    fn check_job_id(job_id: &str) -> Result<(), WALError> {
        uuid::Uuid::parse_str(job_id)
            .map(|_| ())
            .map_err(|_| WALError::InvalidJobId(job_id.to_string()))
    }

    /// Get the file path for a journal
    fn journal_path(&self, job_id: &str) -> PathBuf {
        self.wal_dir.join(format!("{}{}", job_id, JOURNAL_SUFFIX))
    }

    /// Get the lock file path for a journal
    fn lock_path(&self, job_id: &str) -> PathBuf {
        self.wal_dir.join(format!("{}{}", job_id, LOCK_SUFFIX))
    }

    /// Acquire an exclusive lock for a journal.
    /// Returns a File handle that must be kept alive while holding the lock.
    fn acquire_lock(&self, job_id: &str) -> Result<File, WALError> {
        self.ensure_dir()?;
        io::lock_exclusive(&self.lock_path(job_id))
            .map_err(|e| WALError::Io(format!("Failed to acquire lock: {}", e)))
    }

    /// Run a read-modify-write on a journal under both locks
    fn update<T>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut WALJournal) -> Result<T, WALError>,
    ) -> Result<T, WALError> {
        self.locked(job_id, || {
            let mut journal = self
                .load_journal(job_id)?
                .ok_or_else(|| WALError::NotFound(format!("Journal not found: {}", job_id)))?;
            let value = f(&mut journal)?;
            self.save_journal(&journal)?;
            Ok(value)
        })
    }

    /// Run `f` holding the in-process writer mutex and the job's fs2 lock
    fn locked<T>(
        &self,
        job_id: &str,
        f: impl FnOnce() -> Result<T, WALError>,
    ) -> Result<T, WALError> {
        Self::check_job_id(job_id)?;
        let _guard = self
            .write_guard
            .lock()
            .map_err(|_| WALError::InvalidState("WAL writer lock poisoned".to_string()))?;
        let _lock = self.acquire_lock(job_id)?;
        f()
    }

    /// Save a journal to disk
    ///
    /// Writes atomically through a temp file and rename, so a crash never
    /// leaves a corrupted journal behind.
    pub fn save_journal(&self, journal: &WALJournal) -> Result<(), WALError> {
        Self::check_job_id(&journal.job_id)?;
        self.ensure_dir()?;

        let json = serde_json::to_vec_pretty(journal)
            .map_err(|e| WALError::Serialization(format!("Failed to serialize journal: {}", e)))?;

        io::write_atomic(&self.journal_path(&journal.job_id), &json)
            .map_err(|e| WALError::Io(format!("Failed to write journal: {}", e)))?;

        tracing::trace!(
            job_id = %journal.job_id,
            entries = journal.entries.len(),
            "Saved journal"
        );

        Ok(())
    }

    fn read_journal(path: &Path) -> Result<WALJournal, WALError> {
        let json = fs::read_to_string(path)
            .map_err(|e| WALError::Io(format!("Failed to read journal file: {}", e)))?;

        serde_json::from_str(&json).map_err(|e| {
            WALError::Serialization(format!("Failed to parse journal {}: {}", path.display(), e))
        })
    }

    /// Load a journal from disk by job ID
    pub fn load_journal(&self, job_id: &str) -> Result<Option<WALJournal>, WALError> {
        Self::check_job_id(job_id)?;
        let path = self.journal_path(job_id);

        if !path.exists() {
            return Ok(None);
        }

        Self::read_journal(&path).map(Some)
    }

    /// Load a journal that was archived after completion
    pub fn load_archived(&self, job_id: &str) -> Result<Option<WALJournal>, WALError> {
        Self::check_job_id(job_id)?;
        let path = self.archive_dir().join(format!("{}{}", job_id, JOURNAL_SUFFIX));

        if !path.exists() {
            return Ok(None);
        }

        Self::read_journal(&path).map(Some)
    }

    /// Start a job: every operation is written as pending in one atomic
    /// write before anything executes.
    ///
    /// # Returns
    /// * `Ok(job_id)` - The new job id
    /// * `Err(WALError::ActiveJobExists)` - An unfinished job is on disk
    pub fn begin(
        &self,
        plan: &Plan,
        levels: &[Vec<String>],
        depends_on: &HashMap<String, Vec<String>>,
    ) -> Result<String, WALError> {
        let _guard = self
            .write_guard
            .lock()
            .map_err(|_| WALError::InvalidState("WAL writer lock poisoned".to_string()))?;

        if let Some(job_id) = self.find_unfinished_job()? {
            return Err(WALError::ActiveJobExists { job_id });
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let journal = WALJournal::from_plan(job_id.clone(), plan, levels, depends_on)?;

        let _lock = self.acquire_lock(&job_id)?;
        self.save_journal(&journal)?;

        tracing::info!(
            job_id = %job_id,
            plan_id = %plan.id,
            operations = journal.entries.len(),
            levels = levels.len(),
            "Began journaled job"
        );

        Ok(job_id)
    }

    /// Job id of any journal that is neither complete nor rolled back
    fn find_unfinished_job(&self) -> Result<Option<String>, WALError> {
        for job_id in self.list_journals()? {
            let unfinished = match Self::read_journal(&self.journal_path(&job_id)) {
                Ok(journal) => {
                    !matches!(journal.status, JobStatus::Complete | JobStatus::RolledBack)
                }
                // An unreadable journal still blocks new work until discarded
                Err(_) => true,
            };
            if unfinished {
                return Ok(Some(job_id));
            }
        }
        Ok(None)
    }

    /// Record a status transition for one operation
    pub fn record(
        &self,
        job_id: &str,
        operation_id: &str,
        status: WALStatus,
        error: Option<String>,
    ) -> Result<(), WALError> {
        self.record_outcome(job_id, operation_id, status, error, None)
    }

    /// Record a status transition, optionally with the path the result
    /// actually landed at.
    pub fn record_outcome(
        &self,
        job_id: &str,
        operation_id: &str,
        status: WALStatus,
        error: Option<String>,
        final_path: Option<PathBuf>,
    ) -> Result<(), WALError> {
        self.update(job_id, |journal| {
            let entry = journal.get_entry_mut(operation_id).ok_or_else(|| {
                WALError::NotFound(format!("Entry not found: {}", operation_id))
            })?;

            entry
                .transition(status, error)
                .map_err(|from| WALError::InvalidTransition {
                    operation_id: operation_id.to_string(),
                    from,
                    to: status,
                })?;
            if final_path.is_some() {
                entry.final_path = final_path;
            }
            Ok(())
        })?;

        tracing::debug!(
            job_id = %job_id,
            operation_id = %operation_id,
            status = ?status,
            "Recorded WAL transition"
        );
        Ok(())
    }

    /// Set the aggregate job status
    pub fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<(), WALError> {
        self.update(job_id, |journal| {
            journal.status = status;
            Ok(())
        })?;
        tracing::info!(job_id = %job_id, status = ?status, "Job status changed");
        Ok(())
    }

    /// Append an entry (used for rollback entries); returns its sequence
    pub fn append_entry(&self, job_id: &str, mut entry: WALEntry) -> Result<u32, WALError> {
        self.update(job_id, |journal| {
            if journal.get_entry(&entry.operation_id).is_some() {
                return Err(WALError::InvalidState(format!(
                    "Entry already exists: {}",
                    entry.operation_id
                )));
            }
            let sequence = journal.next_sequence();
            entry.sequence = sequence;
            journal.add_entry(entry);
            Ok(sequence)
        })
    }

    /// Move a finished journal to `archive/`, freeing the active slot
    pub fn archive_journal(&self, job_id: &str) -> Result<(), WALError> {
        self.locked(job_id, || {
            let path = self.journal_path(job_id);
            if !path.exists() {
                return Err(WALError::NotFound(format!("Journal not found: {}", job_id)));
            }

            let archive_dir = self.archive_dir();
            fs::create_dir_all(&archive_dir).map_err(|e| {
                WALError::Io(format!("Failed to create archive directory: {}", e))
            })?;
            fs::rename(&path, archive_dir.join(format!("{}{}", job_id, JOURNAL_SUFFIX)))
                .map_err(|e| WALError::Io(format!("Failed to archive journal: {}", e)))?;
            let _ = io::sync_dir(&self.wal_dir);
            Ok(())
        })?;
        // The lock file goes once the lock itself is released
        let _ = fs::remove_file(self.lock_path(job_id));

        tracing::info!(job_id = %job_id, "Archived journal");
        Ok(())
    }

    /// Discard (delete) a journal and its lock file
    pub fn discard(&self, job_id: &str) -> Result<(), WALError> {
        Self::check_job_id(job_id)?;
        let path = self.journal_path(job_id);
        let lock_path = self.lock_path(job_id);

        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| WALError::Io(format!("Failed to delete journal: {}", e)))?;
            tracing::info!(job_id = %job_id, "Discarded journal");
        }

        if lock_path.exists() {
            let _ = fs::remove_file(&lock_path);
        }
        let _ = io::sync_dir(&self.wal_dir);

        Ok(())
    }

    /// List all active journal IDs in the WAL directory, sorted
    pub fn list_journals(&self) -> Result<Vec<String>, WALError> {
        if !self.wal_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.wal_dir)
            .map_err(|e| WALError::Io(format!("Failed to read WAL directory: {}", e)))?;

        let mut job_ids: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                // Only match journal files, not locks or temp files
                name.strip_suffix(JOURNAL_SUFFIX)
                    .filter(|id| !id.starts_with('.'))
                    .map(str::to_string)
            })
            .collect();
        job_ids.sort();

        Ok(job_ids)
    }

    /// Startup recovery check.
    ///
    /// A journal still marked `running` belongs to a process that died; it is
    /// rewritten as `interrupted`. The first interrupted or failed job is
    /// surfaced. Unreadable journals are reported as errors.
    pub fn check_recovery(&self) -> Result<Option<RecoveryInfo>, WALError> {
        let mut found: Option<RecoveryInfo> = None;

        for job_id in self.list_journals()? {
            let mut journal = Self::read_journal(&self.journal_path(&job_id))?;

            if journal.status == JobStatus::Running {
                self.set_job_status(&job_id, JobStatus::Interrupted)?;
                journal.status = JobStatus::Interrupted;
                tracing::warn!(job_id = %job_id, "Found interrupted job");
            }

            if found.is_none()
                && matches!(journal.status, JobStatus::Interrupted | JobStatus::Failed)
            {
                found = Some(RecoveryInfo::from_journal(&journal));
            }
        }

        Ok(found)
    }

    /// Clean up lock files nobody holds (e.g. from crashed processes)
    pub fn cleanup_stale_locks(&self) -> Result<usize, WALError> {
        if !self.wal_dir.exists() {
            return Ok(0);
        }

        let entries = fs::read_dir(&self.wal_dir)
            .map_err(|e| WALError::Io(format!("Failed to read WAL directory: {}", e)))?;

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(LOCK_SUFFIX) && !io::is_locked(&entry.path()) {
                if fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "Removed stale WAL locks");
        }
        Ok(removed)
    }
}

impl Default for WALManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanOperation;
    use tempfile::tempdir;

    fn create_test_manager() -> (WALManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let manager = WALManager::with_dir(dir.path().join("wal"));
        (manager, dir)
    }

    fn invoice_plan() -> (Plan, Vec<Vec<String>>, HashMap<String, Vec<String>>) {
        let plan = Plan::new("plan-1", "File invoices", "/Docs")
            .with_operation(PlanOperation::create_folder("1", "/Docs/Invoices"))
            .with_operation(PlanOperation::move_item(
                "2",
                "/Docs/inv1.pdf",
                "/Docs/Invoices/inv1.pdf",
            ));
        let levels = vec![vec!["1".to_string()], vec!["2".to_string()]];
        let deps = HashMap::from([("2".to_string(), vec!["1".to_string()])]);
        (plan, levels, deps)
    }

    #[test]
    fn test_begin_writes_all_pending() {
        let (manager, _dir) = create_test_manager();
        let (plan, levels, deps) = invoice_plan();

        let job_id = manager.begin(&plan, &levels, &deps).unwrap();

        let journal = manager.load_journal(&job_id).unwrap().unwrap();
        assert_eq!(journal.plan_id, "plan-1");
        assert_eq!(journal.status, JobStatus::Running);
        assert_eq!(journal.entries.len(), 2);
        assert!(journal
            .entries
            .iter()
            .all(|e| e.status == WALStatus::Pending));
    }

    #[test]
    fn test_begin_refuses_second_job() {
        let (manager, _dir) = create_test_manager();
        let (plan, levels, deps) = invoice_plan();

        let first = manager.begin(&plan, &levels, &deps).unwrap();
        let second = manager.begin(&plan, &levels, &deps);
        assert_eq!(second, Err(WALError::ActiveJobExists { job_id: first }));
    }

    #[test]
    fn test_archived_job_frees_slot() {
        let (manager, _dir) = create_test_manager();
        let (plan, levels, deps) = invoice_plan();

        let first = manager.begin(&plan, &levels, &deps).unwrap();
        manager.set_job_status(&first, JobStatus::Complete).unwrap();
        manager.archive_journal(&first).unwrap();

        assert!(manager.load_journal(&first).unwrap().is_none());
        assert!(manager.load_archived(&first).unwrap().is_some());
        assert!(manager.begin(&plan, &levels, &deps).is_ok());
    }

    #[test]
    fn test_record_enforces_transitions() {
        let (manager, _dir) = create_test_manager();
        let (plan, levels, deps) = invoice_plan();
        let job_id = manager.begin(&plan, &levels, &deps).unwrap();

        let skip_ahead = manager.record(&job_id, "1", WALStatus::Completed, None);
        assert!(matches!(skip_ahead, Err(WALError::InvalidTransition { .. })));

        manager.record(&job_id, "1", WALStatus::Executing, None).unwrap();
        manager.record(&job_id, "1", WALStatus::Completed, None).unwrap();

        let regress = manager.record(&job_id, "1", WALStatus::Executing, None);
        assert!(matches!(
            regress,
            Err(WALError::InvalidTransition {
                from: WALStatus::Completed,
                ..
            })
        ));

        let journal = manager.load_journal(&job_id).unwrap().unwrap();
        assert_eq!(journal.get_entry("1").unwrap().status, WALStatus::Completed);
    }

    #[test]
    fn test_record_unknown_entry() {
        let (manager, _dir) = create_test_manager();
        let (plan, levels, deps) = invoice_plan();
        let job_id = manager.begin(&plan, &levels, &deps).unwrap();

        let result = manager.record(&job_id, "nope", WALStatus::Executing, None);
        assert!(matches!(result, Err(WALError::NotFound(_))));
    }

    #[test]
    fn test_check_recovery_marks_running_interrupted() {
        let (manager, _dir) = create_test_manager();
        let (plan, levels, deps) = invoice_plan();
        let job_id = manager.begin(&plan, &levels, &deps).unwrap();

        let info = manager.check_recovery().unwrap().unwrap();
        assert_eq!(info.job_id, job_id);
        assert_eq!(info.status, JobStatus::Interrupted);
        assert_eq!(info.pending_count, plan.len());
        assert_eq!(info.completed_count, 0);

        let journal = manager.load_journal(&job_id).unwrap().unwrap();
        assert_eq!(journal.status, JobStatus::Interrupted);
    }

    #[test]
    fn test_check_recovery_reports_corrupt_journal() {
        let (manager, _dir) = create_test_manager();
        fs::create_dir_all(manager.wal_dir()).unwrap();
        fs::write(manager.wal_dir().join("broken.wal.json"), "{not json").unwrap();

        assert!(matches!(
            manager.check_recovery(),
            Err(WALError::Serialization(_))
        ));
    }

    #[test]
    fn test_discard_removes_journal_and_lock() {
        let (manager, _dir) = create_test_manager();
        let (plan, levels, deps) = invoice_plan();
        let job_id = manager.begin(&plan, &levels, &deps).unwrap();
        manager.record(&job_id, "1", WALStatus::Executing, None).unwrap();

        manager.discard(&job_id).unwrap();

        assert!(manager.load_journal(&job_id).unwrap().is_none());
        assert!(!manager.lock_path(&job_id).exists());
        assert!(manager.check_recovery().unwrap().is_none());
    }

    #[test]
    fn test_job_id_must_be_a_uuid() {
        let (manager, dir) = create_test_manager();
        fs::create_dir_all(manager.wal_dir()).unwrap();
        let outside = dir.path().join("x.wal.json");
        fs::write(&outside, "{}").unwrap();

        for bad in ["../x", "", "a/b"] {
            assert!(matches!(
                manager.load_journal(bad),
                Err(WALError::InvalidJobId(_))
            ));
            assert!(matches!(manager.discard(bad), Err(WALError::InvalidJobId(_))));
            assert!(matches!(
                manager.archive_journal(bad),
                Err(WALError::InvalidJobId(_))
            ));
            assert!(matches!(
                manager.set_job_status(bad, JobStatus::Failed),
                Err(WALError::InvalidJobId(_))
            ));
        }
        assert!(outside.exists());
    }

    #[test]
    fn test_archive_waits_for_journal_lock() {
        let (manager, _dir) = create_test_manager();
        let (plan, levels, deps) = invoice_plan();
        let job_id = manager.begin(&plan, &levels, &deps).unwrap();
        manager.set_job_status(&job_id, JobStatus::Complete).unwrap();

        // Another process holds the journal lock
        let held = io::lock_exclusive(&manager.lock_path(&job_id)).unwrap();
        let manager = std::sync::Arc::new(manager);
        let archiver = {
            let manager = std::sync::Arc::clone(&manager);
            let job_id = job_id.clone();
            std::thread::spawn(move || manager.archive_journal(&job_id))
        };

        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(manager.load_journal(&job_id).unwrap().is_some());

        drop(held);
        archiver.join().unwrap().unwrap();
        assert!(manager.load_journal(&job_id).unwrap().is_none());
        assert!(manager.load_archived(&job_id).unwrap().is_some());
    }

    #[test]
    fn test_append_entry_assigns_sequence() {
        let (manager, _dir) = create_test_manager();
        let (plan, levels, deps) = invoice_plan();
        let job_id = manager.begin(&plan, &levels, &deps).unwrap();

        let journal = manager.load_journal(&job_id).unwrap().unwrap();
        let undo = journal.get_entry("1").unwrap().inverse_entry(0, 0).unwrap();
        let sequence = manager.append_entry(&job_id, undo.clone()).unwrap();
        assert_eq!(sequence, 2);

        let duplicate = manager.append_entry(&job_id, undo);
        assert!(matches!(duplicate, Err(WALError::InvalidState(_))));
    }

    #[test]
    fn test_cleanup_stale_locks() {
        let (manager, _dir) = create_test_manager();
        fs::create_dir_all(manager.wal_dir()).unwrap();
        fs::write(manager.lock_path("old-job"), "").unwrap();

        assert_eq!(manager.cleanup_stale_locks().unwrap(), 1);
        assert!(!manager.lock_path("old-job").exists());
    }

    #[test]
    fn test_list_journals_ignores_locks_and_archive() {
        let (manager, _dir) = create_test_manager();
        let (plan, levels, deps) = invoice_plan();
        let job_id = manager.begin(&plan, &levels, &deps).unwrap();

        assert_eq!(manager.list_journals().unwrap(), vec![job_id.clone()]);

        manager.set_job_status(&job_id, JobStatus::Complete).unwrap();
        manager.archive_journal(&job_id).unwrap();
        assert!(manager.list_journals().unwrap().is_empty());
    }
}
