//! Write-Ahead Log
//!
//! Durable record of one job's operations and their status. Every
//! operation is journaled as pending before anything touches the disk, so
//! after a crash the journal alone says what completed, what was in flight
//! and what never started.

pub mod entry;
pub mod io;
pub mod journal;
pub mod recovery;

pub use entry::{JobStatus, StatusCounts, WALEntry, WALJournal, WALOperationType, WALStatus};
pub use journal::{WALError, WALManager};
pub use recovery::{discard_job, resume_job, rollback_job, RecoveryInfo, RecoveryResult};
