//! Errors surfaced by the phase controller

use crate::controller::TransitionError;
use crate::execution::ExecutionError;
use crate::wal::WALError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Plan sources were deleted or the plan changed after review
    #[error("Files changed since the plan was reviewed: {}", .0.join("; "))]
    StaleState(Vec<String>),

    #[error("No plan under review")]
    NoPlan,

    #[error(transparent)]
    Wal(#[from] WALError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl From<ControllerError> for String {
    fn from(err: ControllerError) -> Self {
        err.to_string()
    }
}
