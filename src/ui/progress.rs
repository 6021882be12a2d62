use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rover_common::{
    Blackboard, Checkpoint, ExecutionStatus, StageName, TerminalOutcome,
};

use crate::engine::{EngineEvent, PendingReview, RunOutcome, RunReport};
use crate::ui::icons::{
    CHECK, CROSS, DOCUMENT, EXECUTE, INJECT, PAUSE, REFACTOR, REVIEW, SPARKLE, STOP,
};

/// Terminal UI for a pipeline run, driven by [`EngineEvent`]s.
///
/// A single spinner shows the stage in flight; every persisted state change
/// is printed above it as a permanent line.
pub struct EngineUI {
    spinner: ProgressBar,
    verbose: bool,
}

pub fn stage_icon(stage: StageName) -> String {
    match stage {
        StageName::Review => REVIEW.to_string(),
        StageName::Refactor => REFACTOR.to_string(),
        StageName::Execute => EXECUTE.to_string(),
        StageName::Document => DOCUMENT.to_string(),
    }
}

fn status_label(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Success => style(status).green().to_string(),
        ExecutionStatus::Failure => style(status).red().to_string(),
        ExecutionStatus::SkippedToDocs => style(status).yellow().to_string(),
        ExecutionStatus::Pending => style(status).dim().to_string(),
    }
}

/// One-line description of an event, or `None` for events that only move the
/// spinner.
pub fn describe(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::StageStarted { .. } => None,
        EngineEvent::StageCompleted {
            stage,
            summary,
            status,
            iteration_count,
            folded,
            ..
        } => {
            let icon = if *folded {
                CROSS.to_string()
            } else {
                stage_icon(*stage)
            };
            Some(format!(
                "{}{} [{} | attempts {}]",
                icon,
                summary,
                status_label(*status),
                iteration_count
            ))
        }
        EngineEvent::Injected {
            stage,
            summary,
            status,
            ..
        } => Some(format!(
            "{}{} {} [{}]",
            INJECT,
            style(format!("{} (injected):", stage)).magenta(),
            summary,
            status_label(*status)
        )),
        EngineEvent::Paused { before, .. } => Some(format!(
            "{}Paused before {}, waiting for approval",
            PAUSE,
            style(before).yellow().bold()
        )),
        EngineEvent::Terminated { outcome, .. } => Some(outcome_line(*outcome)),
    }
}

fn outcome_line(outcome: TerminalOutcome) -> String {
    match outcome {
        TerminalOutcome::Completed => format!(
            "{}{}",
            SPARKLE,
            style("Pipeline completed").green().bold()
        ),
        TerminalOutcome::RetryExhausted => format!(
            "{}{}",
            CROSS,
            style("Retry limit reached, giving up").red().bold()
        ),
        TerminalOutcome::Halted => format!("{}{}", STOP, style("Pipeline halted").yellow().bold()),
    }
}

impl EngineUI {
    pub fn new(verbose: bool) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{prefix:.bold.dim} {spinner} {msg}")
                .expect("progress bar template is a valid static string"),
        );
        spinner.set_prefix("Stage");
        Self { spinner, verbose }
    }

    /// A UI that draws nothing, for `--json` output.
    pub fn hidden() -> Self {
        let ui = Self::new(false);
        ui.spinner
            .set_draw_target(indicatif::ProgressDrawTarget::hidden());
        ui
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.spinner.is_hidden() {
            return;
        }
        self.spinner.println(msg.as_ref());
    }

    pub fn handle(&self, event: &EngineEvent) {
        tracing::debug!(?event, "engine event");
        match event {
            EngineEvent::StageStarted { stage, .. } => {
                self.spinner.set_message(format!(
                    "{}running {}...",
                    stage_icon(*stage),
                    style(stage).cyan()
                ));
                self.spinner.enable_steady_tick(Duration::from_millis(100));
            }
            other => {
                if let Some(line) = describe(other) {
                    self.print_line(format!("  {}", line));
                }
                if self.verbose
                    && let EngineEvent::StageCompleted {
                        version, thread, ..
                    } = other
                {
                    self.print_line(format!(
                        "    {} {}",
                        style("→").dim(),
                        style(format!("{} checkpoint v{}", thread, version)).dim()
                    ));
                }
                if matches!(
                    other,
                    EngineEvent::Paused { .. } | EngineEvent::Terminated { .. }
                ) {
                    self.spinner.finish_and_clear();
                }
            }
        }
    }

    /// Render events until the sender side is dropped.
    pub fn spawn_listener(self, mut rx: mpsc::Receiver<EngineEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.handle(&event);
            }
            self.spinner.finish_and_clear();
        })
    }
}

/// Print a full-width cyan separator line.
pub fn print_separator() {
    println!("{}", style("═".repeat(70)).cyan());
}

/// Print what a reviewer needs to decide on a paused thread.
pub fn print_pending_review(review: &PendingReview) {
    println!();
    print_separator();
    println!(
        "  {} {} {}",
        style("Thread").bold(),
        style(&review.thread).cyan().bold(),
        style(format!("({})", review.file_path)).dim()
    );
    print_separator();
    if let Some(intent) = &review.intent_summary {
        println!("\n  {} {}", style("Intent:").bold(), intent);
    }
    if !review.issues.is_empty() {
        println!("\n  {}", style("Issues:").bold());
        for issue in &review.issues {
            println!(
                "    {} {} {}",
                issue.severity.emoji(),
                style(issue.location()).dim(),
                issue.description
            );
        }
    }
    if review.last_status == ExecutionStatus::Failure
        && let Some(log) = &review.last_log
    {
        println!("\n  {}", style("Last failure:").red().bold());
        for line in log.lines().take(10) {
            println!("    {}", style(line).red());
        }
    }
    println!("\n  {}", style("Candidate code:").bold());
    for line in review.candidate_code.lines() {
        println!("    {}", line);
    }
    println!(
        "\n  {} {} of {} failures used, {} left before giving up",
        style("Attempts:").bold(),
        review.attempts,
        review.max_retries,
        review.retries_left()
    );
    println!();
}

/// Print a short summary of a finished or paused run.
pub fn print_report(report: &RunReport) {
    match report.outcome {
        RunOutcome::Paused { before } => println!(
            "\n{}Thread {} is paused before {}. Use `rover thread approve {}` to continue.",
            PAUSE,
            style(report.thread_id()).cyan(),
            before,
            report.thread_id()
        ),
        RunOutcome::Finished(outcome) => {
            println!("\n{}", outcome_line(outcome));
            print_blackboard(report.blackboard());
        }
    }
}

pub fn print_blackboard(bb: &Blackboard) {
    let (critical, warning, info) = bb.issue_counts();
    println!(
        "  {} {} ({} critical, {} warning, {} info)",
        style("Issues:").bold(),
        bb.review_issues.len(),
        critical,
        warning,
        info
    );
    println!(
        "  {} {} after {} failed attempt(s)",
        style("Execution:").bold(),
        status_label(bb.execution_status),
        bb.iteration_count
    );
    if let Some(doc) = &bb.documentation {
        println!("\n{}\n{}", style("Documentation:").bold(), doc);
    }
}

/// Print the run log of a checkpoint.
pub fn print_history(cp: &Checkpoint) {
    for entry in &cp.run_log {
        let marker = if entry.injected {
            INJECT.to_string()
        } else {
            CHECK.to_string()
        };
        println!(
            "  {} {}{} {}",
            style(entry.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
            marker,
            style(entry.stage).cyan(),
            entry.summary
        );
    }
}
