//! `sentinel-engine` - preview, validate, execute and recover organize plans.

use anyhow::{bail, Context, Result};
use clap::Parser;
use sentinel_engine::cli::{ApplyArgs, Cli, Command, JobArgs, PlanArgs, PreviewArgs};
use sentinel_engine::events::{self, ProgressEvent};
use sentinel_engine::execution::ExecutionDAG;
use sentinel_engine::{
    vfs, wal, EngineConfig, ExecutionEngine, FixedPlanner, Phase, PhaseController, Plan,
    RecoveryResult,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    sentinel_engine::init_tracing();

    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = cli.wal_dir {
        config.wal_dir = dir;
    }

    let exit_code = match cli.command {
        Command::Recover => recover(&config)?,
        Command::Validate(args) => validate(args)?,
        Command::Preview(args) => preview(args)?,
        Command::Apply(args) => apply(config, args).await?,
        Command::Resume(args) => resume(&config, args).await?,
        Command::Rollback(args) => rollback(&config, args).await?,
        Command::Discard(args) => discard(&config, args)?,
    };
    std::process::exit(exit_code);
}

fn load_plan(path: &Path) -> Result<Plan> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan {}", path.display()))?;
    Plan::from_json(&json).with_context(|| format!("Failed to parse plan {}", path.display()))
}

fn engine(config: &EngineConfig) -> ExecutionEngine {
    ExecutionEngine::new(Arc::new(config.wal_manager()), config.execution_options())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn recover(config: &EngineConfig) -> Result<i32> {
    match config.wal_manager().check_recovery()? {
        Some(info) => {
            print_json(&info)?;
            Ok(2)
        }
        None => {
            println!("No interrupted job");
            Ok(0)
        }
    }
}

fn validate(args: PlanArgs) -> Result<i32> {
    let plan = load_plan(&args.plan)?;

    match sentinel_engine::validate_plan(&plan) {
        Ok(()) => {
            let stats = ExecutionDAG::from_plan(&plan)?.stats();
            if args.json {
                print_json(&stats)?;
            } else {
                println!(
                    "Plan {} is valid: {} operations in {} levels",
                    plan.id, stats.total_operations, stats.level_count
                );
            }
            Ok(0)
        }
        Err(e) => {
            if args.json {
                print_json(&e)?;
            } else {
                println!("Plan {} is invalid: {}", plan.id, e);
            }
            Ok(1)
        }
    }
}

fn preview(args: PreviewArgs) -> Result<i32> {
    let plan = load_plan(&args.plan.plan)?;
    let dir = args.dir.unwrap_or_else(|| plan.target_folder.clone());
    let entries = vfs::list_directory(&dir, args.show_hidden)?;

    let ghosts = vfs::project(&plan, &entries, &dir);
    let diff = vfs::diff_tree(&plan, &entries, &dir);

    if args.plan.json {
        print_json(&serde_json::json!({ "ghosts": ghosts, "diff": diff }))?;
        return Ok(0);
    }

    for ghost in &ghosts {
        let kind = serde_json::to_value(ghost.kind)?;
        let kind = kind.as_str().unwrap_or_default();
        match &ghost.linked_path {
            Some(linked) => println!(
                "{:<12} {} <-> {}",
                kind,
                ghost.path.display(),
                linked.display()
            ),
            None => println!("{:<12} {}", kind, ghost.path.display()),
        }
    }
    Ok(0)
}

/// Human-readable line for a progress event
fn describe(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::LevelStarted {
            level,
            total_levels,
            operations,
            ..
        } => Some(format!(
            "Level {}/{}: {} operations",
            level + 1,
            total_levels,
            operations
        )),
        ProgressEvent::OperationCompleted {
            description,
            skipped,
            ..
        } => Some(match skipped {
            Some(reason) => format!("  skipped {} ({})", description, reason),
            None => format!("  done    {}", description),
        }),
        ProgressEvent::OperationFailed {
            operation_id,
            error,
            ..
        } => Some(format!("  failed  {}: {}", operation_id, error)),
        ProgressEvent::JobFinished {
            job_id,
            status,
            completed,
            failed,
            skipped,
        } => Some(format!(
            "Job {} {:?}: {} completed, {} failed, {} skipped",
            job_id, status, completed, failed, skipped
        )),
        ProgressEvent::PlannerThought { text } => Some(text.clone()),
        _ => None,
    }
}

async fn apply(mut config: EngineConfig, args: ApplyArgs) -> Result<i32> {
    let plan = load_plan(&args.plan.plan)?;
    if let Some(policy) = args.conflict_policy {
        config.conflict_policy = policy;
    }
    config.auto_rollback |= args.auto_rollback;
    let json = args.plan.json;

    let (tx, mut rx) = events::channel();
    let printer = tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if json {
                        if let Ok(line) = serde_json::to_string(&event) {
                            println!("{}", line);
                        }
                    } else if let Some(line) = describe(&event) {
                        println!("{}", line);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Progress printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let target = plan.target_folder.clone();
    let instruction = plan.description.clone();
    let mut controller = PhaseController::new(
        engine(&config),
        Arc::new(FixedPlanner::new(plan)),
        tx,
        config.controller_options(),
    );

    let exit_code = run_apply(&mut controller, target, instruction).await;

    drop(controller);
    let _ = printer.await;
    exit_code
}

/// Startup check, organize, then commit if the plan validated
async fn run_apply(
    controller: &mut PhaseController,
    target: PathBuf,
    instruction: String,
) -> Result<i32> {
    if let Some(info) = controller.startup().await? {
        bail!(
            "Job {} was interrupted; run resume, rollback or discard first",
            info.job_id
        );
    }

    if controller.organize(target, instruction).await? != Phase::Review {
        for error in &controller.state().errors {
            eprintln!("{}", error);
        }
        return Ok(1);
    }

    if !controller.state().validation_errors.is_empty() {
        for error in &controller.state().validation_errors {
            eprintln!("Invalid plan: {}", error);
        }
        return Ok(1);
    }

    let phase = controller.accept_plan().await?;
    for error in &controller.state().errors {
        eprintln!("{}", error);
    }
    Ok(if phase == Phase::Complete { 0 } else { 1 })
}

fn report(result: &RecoveryResult, json: bool) -> Result<i32> {
    if json {
        print_json(result)?;
    } else {
        println!(
            "Job {}: {} completed, {} failed, {} skipped",
            result.job_id, result.completed_count, result.failed_count, result.skipped_count
        );
        for error in &result.errors {
            eprintln!("  {}", error);
        }
    }
    Ok(if result.success { 0 } else { 1 })
}

async fn resume(config: &EngineConfig, args: JobArgs) -> Result<i32> {
    let result = wal::resume_job(&engine(config), &args.job_id).await?;
    report(&result, args.json)
}

async fn rollback(config: &EngineConfig, args: JobArgs) -> Result<i32> {
    let result = wal::rollback_job(&engine(config), &args.job_id).await?;
    report(&result, args.json)
}

fn discard(config: &EngineConfig, args: JobArgs) -> Result<i32> {
    wal::discard_job(&config.wal_manager(), &args.job_id)?;
    if !args.json {
        println!("Discarded job {}", args.job_id);
    }
    Ok(0)
}
