//! Progress events published to the UI
//!
//! One `tokio::sync::broadcast` channel carries everything the UI renders
//! while a job runs. Sending never blocks; a lagging or missing receiver
//! only loses events.

use crate::controller::Phase;
use crate::wal::{JobStatus, RecoveryInfo};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Capacity of the progress channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    PhaseChanged {
        from: Phase,
        to: Phase,
    },
    PlanReady {
        plan_id: String,
        operation_count: usize,
        ghost_count: usize,
    },
    LevelStarted {
        job_id: String,
        level: usize,
        total_levels: usize,
        operations: usize,
    },
    OperationStarted {
        job_id: String,
        operation_id: String,
        description: String,
    },
    OperationCompleted {
        job_id: String,
        operation_id: String,
        description: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_path: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        skipped: Option<String>,
    },
    OperationFailed {
        job_id: String,
        operation_id: String,
        error: String,
    },
    LevelCompleted {
        job_id: String,
        level: usize,
        completed: usize,
        failed: usize,
        skipped: usize,
    },
    JobFinished {
        job_id: String,
        status: JobStatus,
        completed: usize,
        failed: usize,
        skipped: usize,
    },
    RecoveryAvailable {
        info: RecoveryInfo,
    },
    /// Free-text reasoning streamed by the planner
    PlannerThought {
        text: String,
    },
}

/// Create the progress channel
pub fn channel() -> (broadcast::Sender<ProgressEvent>, broadcast::Receiver<ProgressEvent>) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}

/// Publish to an optional sender, ignoring "no receivers"
pub(crate) fn emit(sender: Option<&broadcast::Sender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(tx) = sender {
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ProgressEvent::LevelStarted {
            job_id: "job".to_string(),
            level: 1,
            total_levels: 2,
            operations: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "level_started");
        assert_eq!(json["totalLevels"], 2);
        assert_eq!(json["jobId"], "job");
    }

    #[test]
    fn test_emit_without_receivers_is_silent() {
        let (tx, rx) = channel();
        drop(rx);
        emit(
            Some(&tx),
            ProgressEvent::PlannerThought {
                text: "hmm".to_string(),
            },
        );
        emit(
            None,
            ProgressEvent::PlannerThought {
                text: "ignored".to_string(),
            },
        );
    }
}
