//! `rover review`: run a file through the whole pipeline, asking for approval
//! at every pause.

use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};

use rover::engine::RunReport;
use rover::errors::EngineError;
use rover::gates::ApprovalGate;
use rover::ui;
use rover_common::{Blackboard, TerminalOutcome, ThreadId};

use super::{Session, cancel_on_ctrl_c, print_json};
use crate::Cli;

pub struct ReviewArgs {
    pub file: PathBuf,
    pub thread: Option<String>,
    pub context: Option<String>,
    pub context_file: Option<PathBuf>,
    pub write: bool,
    pub docs: Option<PathBuf>,
}

/// A fresh thread id derived from the file name.
pub fn default_thread_id(file: &Path) -> ThreadId {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    file.file_stem()
        .map(|s| s.to_string_lossy().trim().to_string())
        .filter(|s| !s.is_empty())
        .and_then(|stem| ThreadId::new(format!("{}-{}", stem, &suffix[..8])))
        .unwrap_or_else(ThreadId::generate)
}

/// Read the file under review and its optional context into a blackboard.
pub fn initial_blackboard(
    file: &Path,
    context: Option<&str>,
    context_file: Option<&Path>,
) -> Result<Blackboard> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mut context = context.unwrap_or_default().to_string();
    if let Some(path) = context_file {
        let extra = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read context file {}", path.display()))?;
        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str(&extra);
    }
    Ok(Blackboard::new(&file.display().to_string(), &source, &context))
}

pub async fn cmd_review(cli: &Cli, project_dir: PathBuf, args: ReviewArgs) -> Result<()> {
    let initial = initial_blackboard(
        &args.file,
        args.context.as_deref(),
        args.context_file.as_deref(),
    )?;
    let thread = match &args.thread {
        Some(id) => super::thread::parse_thread(id)?,
        None => default_thread_id(&args.file),
    };

    let session = Session::open(cli, project_dir)?;
    let cancel = cancel_on_ctrl_c();
    let mut opts = session.run_options(&cancel);
    let mut gate = ApprovalGate::new(opts.bypass_interrupt);

    if !cli.json {
        println!(
            "{} {} as thread {}",
            style("Reviewing").bold(),
            args.file.display(),
            style(&thread).cyan()
        );
    }

    let mut result = session.engine.start(&thread, initial, &opts).await;
    while let Ok(report) = &result {
        if !report.is_paused() {
            break;
        }
        let pending = session.engine.pending_review(&thread).await?;
        let decision = gate.check(&pending)?;
        if gate.skip_all {
            opts.bypass_interrupt = true;
        }
        result = session.engine.decide(&thread, decision, &opts).await;
    }

    session.close().await;
    let report = match result {
        Ok(report) => report,
        Err(e @ EngineError::Cancelled { .. }) => {
            eprintln!(
                "Resume later with `rover thread resume {}`.",
                style(&thread).cyan()
            );
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    if cli.json {
        print_json(&report.checkpoint)?;
    } else {
        ui::print_report(&report);
    }
    write_outputs(&report, &args)
}

fn write_outputs(report: &RunReport, args: &ReviewArgs) -> Result<()> {
    if report.terminal_outcome() != Some(TerminalOutcome::Completed) {
        return Ok(());
    }
    let bb = report.blackboard();
    if args.write
        && let Some(code) = &bb.refactored_code
    {
        std::fs::write(&args.file, code)
            .with_context(|| format!("Failed to write {}", args.file.display()))?;
        println!("Wrote refactored code to {}", args.file.display());
    }
    if let Some(path) = &args.docs
        && let Some(docs) = &bb.documentation
    {
        std::fs::write(path, docs)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Wrote documentation to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thread_id_uses_file_stem() {
        let id = default_thread_id(Path::new("src/calc.py"));
        assert!(id.as_str().starts_with("calc-"));
        assert_eq!(id.as_str().len(), "calc-".len() + 8);
    }

    #[test]
    fn test_initial_blackboard_joins_context() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("calc.py");
        let ctx = dir.path().join("ctx.md");
        std::fs::write(&file, "print(1)").unwrap();
        std::fs::write(&ctx, "uses python 3.12").unwrap();

        let bb = initial_blackboard(&file, Some("hot path"), Some(&ctx)).unwrap();
        assert_eq!(bb.source_code, "print(1)");
        assert_eq!(bb.context, "hot path\n\nuses python 3.12");
    }

    #[test]
    fn test_initial_blackboard_missing_file_fails() {
        let err = initial_blackboard(Path::new("/no/such/file.py"), None, None).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
