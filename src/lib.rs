pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod execution;
pub mod plan;
pub mod security;
pub mod vfs;
pub mod wal;

pub use config::{ConfigError, EngineConfig};
pub use controller::{
    ControllerOptions, FixedPlanner, Phase, PhaseController, PhaseState, Planner, PlannerError,
    ThoughtSink, TransitionError,
};
pub use error::ControllerError;
pub use events::ProgressEvent;
pub use execution::{ExecutionEngine, ExecutionOptions, ExecutionResult};
pub use plan::{OperationKind, Plan, PlanError, PlanOperation};
pub use security::{validate, validate_plan, ValidationError};
pub use wal::{RecoveryInfo, RecoveryResult, WALError, WALManager};

use tracing_subscriber::EnvFilter;

/// Initialize tracing with the RUST_LOG env filter
///
/// Default: warn for most crates, info for the engine (job summaries
/// visible). Use RUST_LOG=debug for per-operation logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,sentinel_engine=info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
