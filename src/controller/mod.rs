//! Phase Controller
//!
//! Drives an organize request from listing to commit. The transitions live
//! in [`state`] as a pure function; [`PhaseController`] owns the state,
//! performs the effects each transition asks for and feeds their outcome
//! back in as the next command.

pub mod planner;
pub mod state;

pub use planner::{FixedPlanner, Planner, PlannerError, ThoughtSink};
pub use state::{Command, Effect, Phase, PhaseState, TransitionError};

use crate::error::ControllerError;
use crate::events::{self, ProgressEvent};
use crate::execution::{ExecutionEngine, StateSnapshot};
use crate::plan::Plan;
use crate::security::validate_plan;
use crate::vfs::{self, DiffTree, GhostEntry, GhostKind};
use crate::wal::{self, RecoveryInfo};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Controller behavior not covered by `ExecutionOptions`
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    /// Include dot files in the listing handed to the planner
    pub show_hidden: bool,
    /// Roll back automatically when a commit fails
    pub auto_rollback: bool,
}

/// Async driver for the phase state machine
pub struct PhaseController {
    state: PhaseState,
    engine: ExecutionEngine,
    planner: Arc<dyn Planner>,
    events: broadcast::Sender<ProgressEvent>,
    show_hidden: bool,
    // Preview of the plan under review
    ghosts: Vec<GhostEntry>,
    diff: Option<DiffTree>,
    snapshot: Option<StateSnapshot>,
}

impl PhaseController {
    pub fn new(
        engine: ExecutionEngine,
        planner: Arc<dyn Planner>,
        events: broadcast::Sender<ProgressEvent>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            state: PhaseState::new(options.auto_rollback),
            engine: engine.with_events(events.clone()),
            planner,
            events,
            show_hidden: options.show_hidden,
            ghosts: Vec::new(),
            diff: None,
            snapshot: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &PhaseState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.state.plan.as_ref()
    }

    pub fn ghosts(&self) -> &[GhostEntry] {
        &self.ghosts
    }

    pub fn diff(&self) -> Option<&DiffTree> {
        self.diff.as_ref()
    }

    /// Interrupted job awaiting a decision
    pub fn recovery_info(&self) -> Option<&RecoveryInfo> {
        self.state.recovery.as_ref()
    }

    /// Flag checked by the executor between levels
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.engine.cancel_handle()
    }

    /// Startup: clear stale locks and look for an interrupted job
    pub async fn startup(&mut self) -> Result<Option<RecoveryInfo>, ControllerError> {
        match self.engine.wal().cleanup_stale_locks() {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "Removed stale WAL locks"),
            Err(e) => tracing::warn!(error = %e, "Failed to clean up stale WAL locks"),
        }

        if let Some(command) = self.perform(Effect::CheckRecovery).await {
            self.dispatch(command).await?;
        }
        Ok(self.state.recovery.clone())
    }

    /// Index `target`, ask the planner for a plan and preview it.
    /// Ends in `review`, or `failed` when listing or planning fails.
    pub async fn organize(
        &mut self,
        target: impl Into<PathBuf>,
        instruction: impl Into<String>,
    ) -> Result<Phase, ControllerError> {
        self.dispatch(Command::Organize {
            target: target.into(),
            instruction: instruction.into(),
        })
        .await
    }

    /// Commit the plan under review
    pub async fn accept_plan(&mut self) -> Result<Phase, ControllerError> {
        if self.state.phase == Phase::Review {
            let plan = self.state.plan.as_ref().ok_or(ControllerError::NoPlan)?;
            if let Some(snapshot) = &self.snapshot {
                let check = snapshot.validate(plan);
                if check.is_blocking() {
                    return Err(ControllerError::StaleState(check.critical_descriptions()));
                }
                if !check.is_clean() {
                    tracing::warn!(
                        plan_id = %plan.id,
                        warnings = check.warning_count,
                        "Files changed since review"
                    );
                }
            }
        }
        self.dispatch(Command::AcceptPlan).await
    }

    /// Drop the plan under review; the WAL is not touched
    pub async fn reject_plan(&mut self) -> Result<Phase, ControllerError> {
        self.dispatch(Command::RejectPlan).await
    }

    pub async fn resume_recovery(&mut self) -> Result<Phase, ControllerError> {
        self.dispatch(Command::ResumeRecovery).await
    }

    pub async fn rollback_recovery(&mut self) -> Result<Phase, ControllerError> {
        self.dispatch(Command::RollbackRecovery).await
    }

    pub async fn discard_recovery(&mut self) -> Result<Phase, ControllerError> {
        self.dispatch(Command::DiscardRecovery).await
    }

    /// Leave `complete` or `failed`
    pub async fn acknowledge(&mut self) -> Result<Phase, ControllerError> {
        self.dispatch(Command::Acknowledge).await
    }

    /// Apply a command and every follow-up command its effects produce
    async fn dispatch(&mut self, command: Command) -> Result<Phase, ControllerError> {
        let mut queue = VecDeque::from([command]);

        while let Some(command) = queue.pop_front() {
            let name = command.name();
            let (next, effects) = self.state.apply(command).inspect_err(|e| {
                tracing::debug!(command = name, phase = ?self.state.phase, error = %e, "Transition refused");
            })?;
            self.transition(next);

            for effect in effects {
                if let Some(follow_up) = self.perform(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }

        Ok(self.state.phase)
    }

    fn transition(&mut self, next: PhaseState) {
        let from = self.state.phase;
        self.state = next;

        if self.state.plan.is_none() {
            self.ghosts.clear();
            self.diff = None;
            self.snapshot = None;
        }

        if from != self.state.phase {
            tracing::info!(from = ?from, to = ?self.state.phase, "Phase changed");
            events::emit(
                Some(&self.events),
                ProgressEvent::PhaseChanged {
                    from,
                    to: self.state.phase,
                },
            );
        }
    }

    /// Run one effect; the returned command reports its outcome
    async fn perform(&mut self, effect: Effect) -> Option<Command> {
        match effect {
            Effect::ListDirectory { path } => {
                let show_hidden = self.show_hidden;
                let listed =
                    tokio::task::spawn_blocking(move || vfs::list_directory(&path, show_hidden))
                        .await;
                Some(match listed {
                    Ok(Ok(entries)) => Command::Indexed { entries },
                    Ok(Err(e)) => Command::Fail {
                        error: e.to_string(),
                    },
                    Err(e) => Command::Fail {
                        error: format!("Listing task failed: {}", e),
                    },
                })
            }

            Effect::GeneratePlan {
                instruction,
                target,
            } => {
                let thoughts = ThoughtSink::new(self.events.clone());
                let generated = self
                    .planner
                    .generate_plan(&instruction, &target, &self.state.listing, &thoughts)
                    .await;
                Some(match generated {
                    Ok(plan) => Command::PlanGenerated { plan },
                    Err(e) => {
                        tracing::warn!(error = %e, "Planner failed");
                        Command::Fail {
                            error: e.to_string(),
                        }
                    }
                })
            }

            Effect::Simulate => Some(self.simulate().await),

            Effect::Execute => {
                let Some(plan) = self.state.plan.clone() else {
                    return Some(Command::Fail {
                        error: "No plan to commit".to_string(),
                    });
                };
                Some(match self.engine.execute(&plan).await {
                    Ok(result) => Command::ExecutionFinished {
                        job_id: Some(result.job_id),
                        success: result.success,
                        cancelled: result.cancelled,
                        errors: result.errors,
                    },
                    Err(e) => Command::ExecutionFinished {
                        job_id: None,
                        success: false,
                        cancelled: false,
                        errors: vec![e.to_string()],
                    },
                })
            }

            Effect::Resume { job_id } => {
                Some(match wal::resume_job(&self.engine, &job_id).await {
                    Ok(result) => Command::ExecutionFinished {
                        job_id: Some(job_id),
                        success: result.success,
                        // Only a cancel request ends a run unsuccessful without failures
                        cancelled: !result.success && result.failed_count == 0,
                        errors: result.errors,
                    },
                    Err(e) => Command::ExecutionFinished {
                        job_id: None,
                        success: false,
                        cancelled: false,
                        errors: vec![e.to_string()],
                    },
                })
            }

            Effect::Rollback { job_id } => {
                Some(match wal::rollback_job(&self.engine, &job_id).await {
                    Ok(result) => Command::RollbackFinished {
                        success: result.success,
                        errors: result.errors,
                    },
                    Err(e) => Command::RollbackFinished {
                        success: false,
                        errors: vec![e.to_string()],
                    },
                })
            }

            Effect::Discard { job_id } => match wal::discard_job(self.engine.wal(), &job_id) {
                Ok(()) => None,
                Err(e) => Some(Command::Fail {
                    error: e.to_string(),
                }),
            },

            Effect::CheckRecovery => match self.engine.wal().check_recovery() {
                Ok(Some(info)) => {
                    tracing::warn!(
                        job_id = %info.job_id,
                        pending = info.pending_count,
                        "Interrupted job needs a decision"
                    );
                    events::emit(
                        Some(&self.events),
                        ProgressEvent::RecoveryAvailable { info: info.clone() },
                    );
                    Some(Command::RecoveryFound { info })
                }
                Ok(None) => None,
                Err(e) => {
                    tracing::error!(error = %e, "Recovery check failed");
                    Some(Command::Fail {
                        error: e.to_string(),
                    })
                }
            },
        }
    }

    /// Validate and project the plan under review
    async fn simulate(&mut self) -> Command {
        let (Some(plan), Some(target)) = (self.state.plan.clone(), self.state.target.clone())
        else {
            return Command::Simulated {
                ghost_count: 0,
                errors: vec!["No plan to simulate".to_string()],
            };
        };

        let mut errors = Vec::new();
        if plan.target_folder != target {
            errors.push(format!(
                "Plan targets {}, expected {}",
                plan.target_folder.display(),
                target.display()
            ));
        }

        // Validation and the snapshot both read the disk
        let checked = plan.clone();
        match tokio::task::spawn_blocking(move || {
            (validate_plan(&checked), StateSnapshot::of_plan(&checked))
        })
        .await
        {
            Ok((validation, snapshot)) => {
                if let Err(e) = validation {
                    tracing::warn!(plan_id = %plan.id, error = %e, "Plan failed validation");
                    errors.push(e.to_string());
                }
                self.snapshot = Some(snapshot);
            }
            Err(e) => errors.push(format!("Validation task failed: {}", e)),
        }

        self.ghosts = vfs::project(&plan, &self.state.listing, &target);
        self.diff = Some(vfs::diff_tree(&plan, &self.state.listing, &target));
        let ghost_count = self
            .ghosts
            .iter()
            .filter(|g| g.kind != GhostKind::Normal)
            .count();

        events::emit(
            Some(&self.events),
            ProgressEvent::PlanReady {
                plan_id: plan.id.clone(),
                operation_count: plan.len(),
                ghost_count,
            },
        );

        Command::Simulated {
            ghost_count,
            errors,
        }
    }
}
