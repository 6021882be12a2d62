//! Thread management commands: `rover thread ...`.
//!
//! These are the non-interactive entry points. A paused thread stays paused
//! until one of `approve`, `reject`, `skip` or `abort` is called, possibly from
//! a different process.

use anyhow::{Context, Result};
use console::style;
use std::io::Read;
use std::path::PathBuf;

use rover::engine::{Decision, RunReport, ThreadState};
use rover::ui;
use rover_common::{StageName, StageUpdate, ThreadId};

use super::review::{default_thread_id, initial_blackboard};
use super::{Session, cancel_on_ctrl_c, print_json};
use crate::{Cli, ThreadCommands};

pub fn parse_thread(raw: &str) -> Result<ThreadId> {
    ThreadId::new(raw).context("Thread id must not be empty")
}

/// Read a JSON stage update from a file, or from stdin when `source` is `-`.
pub fn read_update(source: &str) -> Result<StageUpdate> {
    let json = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read update from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read update file {}", source))?
    };
    StageUpdate::from_json(&json).context("Invalid stage update")
}

fn report(cli: &Cli, report: &RunReport) -> Result<()> {
    if cli.json {
        print_json(&report.checkpoint)
    } else {
        ui::print_report(report);
        Ok(())
    }
}

pub async fn cmd_thread(cli: &Cli, project_dir: PathBuf, command: ThreadCommands) -> Result<()> {
    let session = Session::open(cli, project_dir)?;
    let result = run(cli, &session, command).await;
    session.close().await;
    result
}

async fn run(cli: &Cli, session: &Session, command: ThreadCommands) -> Result<()> {
    let engine = &session.engine;
    let cancel = cancel_on_ctrl_c();
    let opts = session.run_options(&cancel);

    match command {
        ThreadCommands::Start {
            file,
            thread,
            context,
            context_file,
        } => {
            let initial = initial_blackboard(&file, context.as_deref(), context_file.as_deref())?;
            let thread = match thread {
                Some(id) => parse_thread(&id)?,
                None => default_thread_id(&file),
            };
            let result = engine.start(&thread, initial, &opts).await?;
            report(cli, &result)
        }
        ThreadCommands::Resume { thread } => {
            let result = engine.resume(&parse_thread(&thread)?, &opts).await?;
            report(cli, &result)
        }
        ThreadCommands::Approve { thread } => {
            let result = engine.approve(&parse_thread(&thread)?, &opts).await?;
            report(cli, &result)
        }
        ThreadCommands::Reject { thread, feedback } => {
            let result = engine
                .decide(&parse_thread(&thread)?, Decision::Reject(feedback), &opts)
                .await?;
            report(cli, &result)
        }
        ThreadCommands::Skip { thread, reason } => {
            let result = engine
                .decide(&parse_thread(&thread)?, Decision::Skip(reason), &opts)
                .await?;
            report(cli, &result)
        }
        ThreadCommands::Abort { thread, reason } => {
            let thread = parse_thread(&thread)?;
            let cp = engine.terminate(&thread, &reason).await?;
            if cli.json {
                print_json(&cp)
            } else {
                println!("Thread {} terminated.", style(&thread).cyan());
                Ok(())
            }
        }
        ThreadCommands::Inject {
            thread,
            stage,
            update,
            no_resume,
        } => {
            let thread = parse_thread(&thread)?;
            let stage: StageName = stage.parse()?;
            let update = read_update(&update)?;
            if no_resume {
                let cp = engine.apply_as_if(&thread, stage, update).await?;
                if cli.json {
                    return print_json(&cp);
                }
                println!(
                    "Applied {} result to {}. Next stage: {}",
                    stage,
                    style(&thread).cyan(),
                    cp.next_stage()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "none".to_string())
                );
                Ok(())
            } else {
                let result = engine
                    .inject_and_resume(&thread, stage, update, &opts)
                    .await?;
                report(cli, &result)
            }
        }
        ThreadCommands::Status { thread } => {
            let thread = parse_thread(&thread)?;
            let cp = engine.snapshot(&thread).await?;
            let state = ThreadState::of(Some(&cp), engine.graph());
            if cli.json {
                return print_json(&serde_json::json!({
                    "thread": cp.thread_id,
                    "state": state,
                    "next": cp.next_stage(),
                    "outcome": cp.outcome,
                    "iteration_count": cp.blackboard.iteration_count,
                    "execution_status": cp.blackboard.execution_status,
                    "version": cp.blackboard.version,
                }));
            }
            println!("Thread:    {}", style(&cp.thread_id).cyan());
            println!("File:      {}", cp.blackboard.file_path);
            println!("State:     {}", state);
            if let Some(next) = cp.next_stage() {
                println!("Next:      {}", next);
            }
            if let Some(outcome) = cp.outcome {
                println!("Outcome:   {}", outcome);
            }
            println!(
                "Attempts:  {} of {}",
                cp.blackboard.iteration_count,
                engine.graph().max_retries()
            );
            println!("Version:   {}", cp.blackboard.version);
            Ok(())
        }
        ThreadCommands::Show { thread } => {
            let cp = engine.snapshot(&parse_thread(&thread)?).await?;
            if cli.json {
                return print_json(&cp);
            }
            println!();
            ui::print_separator();
            println!(
                "  {} {}",
                style(&cp.thread_id).cyan().bold(),
                style(format!("({})", cp.blackboard.file_path)).dim()
            );
            ui::print_separator();
            ui::print_history(&cp);
            println!();
            ui::print_blackboard(&cp.blackboard);
            if let Some(log) = &cp.blackboard.execution_log {
                println!("\n{}\n{}", style("Execution log:").bold(), log);
            }
            Ok(())
        }
        ThreadCommands::List => {
            let ids = engine.store().list().await?;
            if cli.json {
                let mut rows = Vec::new();
                for id in &ids {
                    rows.push(serde_json::json!({
                        "thread": id,
                        "state": engine.state(id).await?,
                    }));
                }
                return print_json(&rows);
            }
            if ids.is_empty() {
                println!("No threads.");
                return Ok(());
            }
            println!("{:<40} State", "Thread");
            println!("{:<40} -----", "-".repeat(40));
            for id in &ids {
                let state = engine.state(id).await?;
                println!("{:<40} {}", id.as_str(), state);
            }
            Ok(())
        }
        ThreadCommands::Archive { thread } => {
            let thread = parse_thread(&thread)?;
            engine.archive(&thread).await?;
            println!("Archived thread {}.", style(&thread).cyan());
            Ok(())
        }
    }
}
