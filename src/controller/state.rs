//! Phase state machine
//!
//! Transitions are a pure function: `PhaseState::apply` takes a command and
//! returns the next state plus the effects the driver must perform. Nothing
//! here touches the disk, the planner or the WAL.

use crate::plan::Plan;
use crate::vfs::FileEntry;
use crate::wal::RecoveryInfo;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Phase of the organize workflow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Indexing,
    Planning,
    Simulation,
    Review,
    Committing,
    RollingBack,
    Complete,
    Failed,
}

/// Inputs to the state machine: user requests and effect outcomes
#[derive(Debug, Clone)]
pub enum Command {
    Organize { target: PathBuf, instruction: String },
    Indexed { entries: Vec<FileEntry> },
    PlanGenerated { plan: Plan },
    /// Preview computed; `errors` are validation failures that block commit
    Simulated { ghost_count: usize, errors: Vec<String> },
    AcceptPlan,
    RejectPlan,
    ExecutionFinished {
        job_id: Option<String>,
        success: bool,
        cancelled: bool,
        errors: Vec<String>,
    },
    RollbackFinished { success: bool, errors: Vec<String> },
    RecoveryFound { info: RecoveryInfo },
    ResumeRecovery,
    RollbackRecovery,
    DiscardRecovery,
    /// An effect failed outright (listing, planner, recovery check)
    Fail { error: String },
    Acknowledge,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Organize { .. } => "organize",
            Command::Indexed { .. } => "indexed",
            Command::PlanGenerated { .. } => "plan_generated",
            Command::Simulated { .. } => "simulated",
            Command::AcceptPlan => "accept_plan",
            Command::RejectPlan => "reject_plan",
            Command::ExecutionFinished { .. } => "execution_finished",
            Command::RollbackFinished { .. } => "rollback_finished",
            Command::RecoveryFound { .. } => "recovery_found",
            Command::ResumeRecovery => "resume_recovery",
            Command::RollbackRecovery => "rollback_recovery",
            Command::DiscardRecovery => "discard_recovery",
            Command::Fail { .. } => "fail",
            Command::Acknowledge => "acknowledge",
        }
    }
}

/// Work the driver performs after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ListDirectory { path: PathBuf },
    GeneratePlan { instruction: String, target: PathBuf },
    /// Project and validate the current plan against the listing
    Simulate,
    /// Commit the current plan
    Execute,
    Resume { job_id: String },
    Rollback { job_id: String },
    Discard { job_id: String },
    CheckRecovery,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Cannot {command} while {phase:?}")]
    InvalidTransition { phase: Phase, command: &'static str },
    #[error("Job {job_id} was interrupted; resume, roll back or discard it first")]
    RecoveryPending { job_id: String },
    #[error("No interrupted job to recover")]
    NoRecovery,
    #[error("Plan failed validation: {}", .0.join("; "))]
    PlanInvalid(Vec<String>),
}

/// Everything the controller knows between transitions
#[derive(Debug, Clone, Default)]
pub struct PhaseState {
    pub phase: Phase,
    pub target: Option<PathBuf>,
    pub instruction: Option<String>,
    pub listing: Vec<FileEntry>,
    pub plan: Option<Plan>,
    pub ghost_count: usize,
    /// Validation failures of the plan under review
    pub validation_errors: Vec<String>,
    /// Job being committed or rolled back
    pub job_id: Option<String>,
    /// Interrupted job awaiting a decision
    pub recovery: Option<RecoveryInfo>,
    /// Errors behind the `failed` phase
    pub errors: Vec<String>,
    /// Roll back automatically when a commit fails
    pub auto_rollback: bool,
}

impl PhaseState {
    pub fn new(auto_rollback: bool) -> Self {
        Self {
            auto_rollback,
            ..Self::default()
        }
    }

    /// Compute the next state and the effects to perform
    pub fn apply(&self, command: Command) -> Result<(PhaseState, Vec<Effect>), TransitionError> {
        let invalid = |command: &Command| TransitionError::InvalidTransition {
            phase: self.phase,
            command: command.name(),
        };
        let mut next = self.clone();
        let mut effects = Vec::new();

        match (self.phase, command) {
            (Phase::Idle, Command::Organize { target, instruction }) => {
                if let Some(info) = &self.recovery {
                    return Err(TransitionError::RecoveryPending {
                        job_id: info.job_id.clone(),
                    });
                }
                next.reset_work();
                next.phase = Phase::Indexing;
                effects.push(Effect::ListDirectory {
                    path: target.clone(),
                });
                next.target = Some(target);
                next.instruction = Some(instruction);
            }

            (Phase::Indexing, Command::Indexed { entries }) => {
                next.phase = Phase::Planning;
                next.listing = entries;
                effects.push(Effect::GeneratePlan {
                    instruction: self.instruction.clone().unwrap_or_default(),
                    target: self.target.clone().unwrap_or_default(),
                });
            }

            (Phase::Planning, Command::PlanGenerated { plan }) => {
                next.phase = Phase::Simulation;
                next.plan = Some(plan);
                effects.push(Effect::Simulate);
            }

            (Phase::Simulation, Command::Simulated { ghost_count, errors }) => {
                next.phase = Phase::Review;
                next.ghost_count = ghost_count;
                next.validation_errors = errors;
            }

            (Phase::Review, Command::AcceptPlan) => {
                if !self.validation_errors.is_empty() {
                    return Err(TransitionError::PlanInvalid(self.validation_errors.clone()));
                }
                next.phase = Phase::Committing;
                effects.push(Effect::Execute);
            }

            (Phase::Review, Command::RejectPlan) => {
                next.reset_work();
                next.phase = Phase::Idle;
            }

            (
                Phase::Committing,
                Command::ExecutionFinished {
                    job_id,
                    success,
                    cancelled,
                    errors,
                },
            ) => {
                next.job_id = job_id.clone();
                next.errors = errors;
                match (success, cancelled, job_id) {
                    (true, _, _) => next.phase = Phase::Complete,
                    // Stopped at a level boundary: the job waits for a decision
                    (false, true, _) if next.errors.is_empty() => {
                        next.phase = Phase::Idle;
                        effects.push(Effect::CheckRecovery);
                    }
                    (false, _, Some(job_id)) if self.auto_rollback => {
                        next.phase = Phase::RollingBack;
                        effects.push(Effect::Rollback { job_id });
                    }
                    (false, _, _) => {
                        next.phase = Phase::Failed;
                        effects.push(Effect::CheckRecovery);
                    }
                }
            }

            (Phase::RollingBack, Command::RollbackFinished { success, errors }) => {
                if success {
                    next.phase = Phase::Complete;
                } else {
                    next.phase = Phase::Failed;
                    next.errors.extend(errors);
                    effects.push(Effect::CheckRecovery);
                }
            }

            (Phase::Idle | Phase::Complete | Phase::Failed, Command::RecoveryFound { info }) => {
                next.recovery = Some(info);
            }

            (Phase::Idle, Command::ResumeRecovery) => {
                let info = self.recovery.as_ref().ok_or(TransitionError::NoRecovery)?;
                next.reset_work();
                next.phase = Phase::Committing;
                next.job_id = Some(info.job_id.clone());
                next.target = Some(info.target_folder.clone());
                next.recovery = None;
                effects.push(Effect::Resume {
                    job_id: info.job_id.clone(),
                });
            }

            (Phase::Idle, Command::RollbackRecovery) => {
                let info = self.recovery.as_ref().ok_or(TransitionError::NoRecovery)?;
                next.reset_work();
                next.phase = Phase::RollingBack;
                next.job_id = Some(info.job_id.clone());
                next.target = Some(info.target_folder.clone());
                next.recovery = None;
                effects.push(Effect::Rollback {
                    job_id: info.job_id.clone(),
                });
            }

            (Phase::Idle, Command::DiscardRecovery) => {
                let info = self.recovery.as_ref().ok_or(TransitionError::NoRecovery)?;
                effects.push(Effect::Discard {
                    job_id: info.job_id.clone(),
                });
                next.recovery = None;
            }

            (
                Phase::Idle | Phase::Indexing | Phase::Planning | Phase::Committing | Phase::RollingBack,
                Command::Fail { error },
            ) => {
                next.phase = Phase::Failed;
                next.errors.push(error);
            }

            (Phase::Complete | Phase::Failed, Command::Acknowledge) => {
                next.reset_work();
                next.phase = Phase::Idle;
            }

            (_, command) => return Err(invalid(&command)),
        }

        Ok((next, effects))
    }

    /// Drop everything tied to the current organize request
    fn reset_work(&mut self) {
        self.target = None;
        self.instruction = None;
        self.listing.clear();
        self.plan = None;
        self.ghost_count = 0;
        self.validation_errors.clear();
        self.job_id = None;
        self.errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanOperation;
    use crate::wal::JobStatus;
    use chrono::Utc;

    fn recovery_info() -> RecoveryInfo {
        RecoveryInfo {
            job_id: "job-1".to_string(),
            plan_id: "plan-1".to_string(),
            description: "File invoices".to_string(),
            target_folder: PathBuf::from("/Docs"),
            status: JobStatus::Interrupted,
            completed_count: 1,
            pending_count: 1,
            failed_count: 0,
            started_at: Utc::now(),
            pending_operations: vec!["Move a -> b".to_string()],
        }
    }

    fn step(state: &PhaseState, command: Command) -> (PhaseState, Vec<Effect>) {
        state.apply(command).unwrap()
    }

    fn in_review(errors: Vec<String>) -> PhaseState {
        let state = PhaseState::new(false);
        let (state, _) = step(
            &state,
            Command::Organize {
                target: PathBuf::from("/Docs"),
                instruction: "tidy".to_string(),
            },
        );
        let (state, _) = step(&state, Command::Indexed { entries: Vec::new() });
        let plan = Plan::new("p", "Tidy", "/Docs")
            .with_operation(PlanOperation::create_folder("1", "/Docs/Invoices"));
        let (state, _) = step(&state, Command::PlanGenerated { plan });
        let (state, _) = step(&state, Command::Simulated { ghost_count: 1, errors });
        state
    }

    #[test]
    fn test_happy_path_effects() {
        let state = PhaseState::new(false);

        let (state, effects) = step(
            &state,
            Command::Organize {
                target: PathBuf::from("/Docs"),
                instruction: "tidy".to_string(),
            },
        );
        assert_eq!(state.phase, Phase::Indexing);
        assert_eq!(
            effects,
            vec![Effect::ListDirectory {
                path: PathBuf::from("/Docs")
            }]
        );

        let (state, effects) = step(&state, Command::Indexed { entries: Vec::new() });
        assert_eq!(state.phase, Phase::Planning);
        assert!(matches!(effects[0], Effect::GeneratePlan { .. }));

        let plan = Plan::new("p", "Tidy", "/Docs");
        let (state, effects) = step(&state, Command::PlanGenerated { plan });
        assert_eq!(state.phase, Phase::Simulation);
        assert_eq!(effects, vec![Effect::Simulate]);

        let (state, _) = step(&state, Command::Simulated { ghost_count: 0, errors: Vec::new() });
        assert_eq!(state.phase, Phase::Review);

        let (state, effects) = step(&state, Command::AcceptPlan);
        assert_eq!(state.phase, Phase::Committing);
        assert_eq!(effects, vec![Effect::Execute]);

        let (state, _) = step(
            &state,
            Command::ExecutionFinished {
                job_id: Some("job".to_string()),
                success: true,
                cancelled: false,
                errors: Vec::new(),
            },
        );
        assert_eq!(state.phase, Phase::Complete);

        let (state, _) = step(&state, Command::Acknowledge);
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.plan.is_none());
    }

    #[test]
    fn test_apply_does_not_mutate_input() {
        let state = in_review(Vec::new());
        let _ = state.apply(Command::AcceptPlan).unwrap();
        assert_eq!(state.phase, Phase::Review);
    }

    #[test]
    fn test_reject_returns_to_idle_without_effects() {
        let (state, effects) = step(&in_review(Vec::new()), Command::RejectPlan);
        assert_eq!(state.phase, Phase::Idle);
        assert!(effects.is_empty());
        assert!(state.plan.is_none());
    }

    #[test]
    fn test_invalid_plan_cannot_be_accepted() {
        let state = in_review(vec!["NAME_COLLISION".to_string()]);
        assert!(matches!(
            state.apply(Command::AcceptPlan),
            Err(TransitionError::PlanInvalid(_))
        ));
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let state = PhaseState::new(false);
        assert_eq!(
            state.apply(Command::AcceptPlan).unwrap_err(),
            TransitionError::InvalidTransition {
                phase: Phase::Idle,
                command: "accept_plan"
            }
        );
        assert!(state.apply(Command::Acknowledge).is_err());
    }

    #[test]
    fn test_recovery_blocks_organize() {
        let state = PhaseState::new(false);
        let (state, _) = step(&state, Command::RecoveryFound { info: recovery_info() });

        let refused = state.apply(Command::Organize {
            target: PathBuf::from("/Docs"),
            instruction: "tidy".to_string(),
        });
        assert_eq!(
            refused.unwrap_err(),
            TransitionError::RecoveryPending {
                job_id: "job-1".to_string()
            }
        );

        let (resumed, effects) = step(&state, Command::ResumeRecovery);
        assert_eq!(resumed.phase, Phase::Committing);
        assert_eq!(
            effects,
            vec![Effect::Resume {
                job_id: "job-1".to_string()
            }]
        );

        let (rolling, effects) = step(&state, Command::RollbackRecovery);
        assert_eq!(rolling.phase, Phase::RollingBack);
        assert!(matches!(effects[0], Effect::Rollback { .. }));

        let (discarded, effects) = step(&state, Command::DiscardRecovery);
        assert_eq!(discarded.phase, Phase::Idle);
        assert!(discarded.recovery.is_none());
        assert!(matches!(effects[0], Effect::Discard { .. }));
    }

    #[test]
    fn test_failed_commit_with_auto_rollback() {
        let mut state = in_review(Vec::new());
        state.auto_rollback = true;
        let (state, _) = step(&state, Command::AcceptPlan);

        let (state, effects) = step(
            &state,
            Command::ExecutionFinished {
                job_id: Some("job".to_string()),
                success: false,
                cancelled: false,
                errors: vec!["1: disk full".to_string()],
            },
        );
        assert_eq!(state.phase, Phase::RollingBack);
        assert_eq!(
            effects,
            vec![Effect::Rollback {
                job_id: "job".to_string()
            }]
        );

        let (state, _) = step(
            &state,
            Command::RollbackFinished {
                success: false,
                errors: vec!["1:undo: busy".to_string()],
            },
        );
        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.errors.len(), 2);
    }

    #[test]
    fn test_cancelled_commit_surfaces_recovery() {
        let (state, _) = step(&in_review(Vec::new()), Command::AcceptPlan);
        let (state, effects) = step(
            &state,
            Command::ExecutionFinished {
                job_id: Some("job".to_string()),
                success: false,
                cancelled: true,
                errors: Vec::new(),
            },
        );
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(effects, vec![Effect::CheckRecovery]);
    }
}
