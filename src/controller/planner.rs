//! Planner seam
//!
//! The controller does not know how plans are produced. Anything that turns
//! an instruction and a directory listing into a `Plan` implements
//! [`Planner`]; an LLM agent, a rules engine or a plan file on disk.

use crate::events::{self, ProgressEvent};
use crate::plan::Plan;
use crate::vfs::FileEntry;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::sync::broadcast;

/// Planner errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlannerError {
    #[error("Failed to generate plan: {0}")]
    Generation(String),

    #[error("Planner returned an invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Planner backend error: {0}")]
    Backend(String),

    #[error("Planning cancelled")]
    Cancelled,
}

impl From<PlannerError> for String {
    fn from(err: PlannerError) -> Self {
        err.to_string()
    }
}

/// Streams free-text planner reasoning to event subscribers
#[derive(Debug, Clone, Default)]
pub struct ThoughtSink {
    sender: Option<broadcast::Sender<ProgressEvent>>,
}

impl ThoughtSink {
    pub fn new(sender: broadcast::Sender<ProgressEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A sink that drops everything
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn thought(&self, text: impl Into<String>) {
        events::emit(
            self.sender.as_ref(),
            ProgressEvent::PlannerThought { text: text.into() },
        );
    }
}

/// Generates an organize plan for a folder
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce a plan for `target` from the user's instruction and the
    /// current listing of `target`
    async fn generate_plan(
        &self,
        instruction: &str,
        target: &Path,
        listing: &[FileEntry],
        thoughts: &ThoughtSink,
    ) -> Result<Plan, PlannerError>;
}

/// Returns a prepared plan, e.g. one loaded from a JSON file
#[derive(Debug, Clone)]
pub struct FixedPlanner {
    plan: Plan,
}

impl FixedPlanner {
    pub fn new(plan: Plan) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl Planner for FixedPlanner {
    async fn generate_plan(
        &self,
        _instruction: &str,
        target: &Path,
        listing: &[FileEntry],
        thoughts: &ThoughtSink,
    ) -> Result<Plan, PlannerError> {
        if self.plan.target_folder != target {
            return Err(PlannerError::InvalidPlan(format!(
                "plan targets {}, requested {}",
                self.plan.target_folder.display(),
                target.display()
            )));
        }
        thoughts.thought(format!(
            "Using prepared plan {} ({} operations) over {} entries",
            self.plan.id,
            self.plan.len(),
            listing.len()
        ));
        Ok(self.plan.clone())
    }
}
