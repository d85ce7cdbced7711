//! Execution Engine Module
//!
//! Provides parallel execution of file operations using a DAG-based
//! dependency graph. Operations at the same level (no dependencies between
//! them) are executed in parallel.
//!
//! # State Validation
//!
//! The `state_validator` submodule checks that the sources a plan was
//! reviewed against are still there before the plan is committed.

pub mod dag;
pub mod executor;
pub mod fsops;
pub mod state_validator;

pub use dag::{DAGError, DAGStats, ExecutionDAG};
pub use executor::{ExecutionEngine, ExecutionError, ExecutionOptions, ExecutionResult};
pub use fsops::{ConflictPolicy, OperationOutcome, TrashStrategy};
pub use state_validator::{PathState, StateCheck, StateConflict, StateSnapshot};
