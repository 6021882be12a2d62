//! Execute stage: runs the candidate code in a sandbox.

use async_trait::async_trait;
use regex::Regex;
use std::io::Write;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use rover_common::{Blackboard, ExecutionStatus, StageName, StageUpdate};

use super::Stage;
use crate::errors::StageError;

pub const NO_OUTPUT: &str = "Code ran successfully with no output.";

/// Captured result of one sandboxed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl RunOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Somewhere to run untrusted code.
///
/// Return `Err(StageError::Unavailable)` only when the sandbox itself could not
/// be reached or started; a program that crashes is a normal [`RunOutput`].
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, code: &str) -> Result<RunOutput, StageError>;
}

/// Runs code with a local interpreter in a child process.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    command: String,
    args: Vec<String>,
    suffix: String,
    timeout: Duration,
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self::new("python3")
    }
}

impl ProcessSandbox {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            suffix: ".py".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn run(&self, code: &str) -> Result<RunOutput, StageError> {
        let mut script = tempfile::Builder::new()
            .prefix("rover-")
            .suffix(&self.suffix)
            .tempfile()
            .map_err(|e| StageError::Unavailable(format!("cannot create script file: {}", e)))?;
        script
            .write_all(code.as_bytes())
            .and_then(|_| script.flush())
            .map_err(|e| StageError::Unavailable(format!("cannot write script file: {}", e)))?;

        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(script.path())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, child).await {
            Err(_) => {
                warn!(command = %self.command, timeout = ?self.timeout, "sandbox run timed out");
                Ok(RunOutput {
                    timed_out: true,
                    ..Default::default()
                })
            }
            Ok(Err(e)) => Err(StageError::Unavailable(format!(
                "failed to start '{}': {}",
                self.command, e
            ))),
            Ok(Ok(output)) => Ok(RunOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            }),
        }
    }
}

/// Runs the current candidate and reports SUCCESS or FAILURE.
pub struct ExecuteStage {
    sandbox: Arc<dyn Sandbox>,
}

impl ExecuteStage {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self { sandbox }
    }
}

// `NameError: name 'x' is not defined`, `json.decoder.JSONDecodeError: ...`
static EXCEPTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][\w.]*(Error|Exception|Exit|Interrupt)(:.*)?$").unwrap()
});

/// Build the failure log: a one-line `Error: ...` headline followed by the
/// captured stderr. The headline is the last exception line, or the last
/// non-empty line when there is none.
fn failure_log(output: &RunOutput) -> String {
    if output.timed_out {
        return "Error: TimeoutError: execution did not finish in time".to_string();
    }
    let stderr = output.stderr.trim();
    let lines = || stderr.lines().rev().map(str::trim).filter(|l| !l.is_empty());
    let headline = lines()
        .find(|l| EXCEPTION_LINE.is_match(l))
        .or_else(|| lines().next())
        .map(str::to_string)
        .unwrap_or_else(|| match output.exit_code {
            Some(code) => format!("process exited with status {}", code),
            None => "process was killed by a signal".to_string(),
        });
    if stderr.is_empty() {
        format!("Error: {}", headline)
    } else {
        format!("Error: {}\n{}", headline, stderr)
    }
}

#[async_trait]
impl Stage for ExecuteStage {
    fn name(&self) -> StageName {
        StageName::Execute
    }

    async fn run(&self, bb: &Blackboard) -> Result<StageUpdate, StageError> {
        let output = self.sandbox.run(bb.candidate_code()).await?;

        if output.succeeded() {
            let stdout = output.stdout.trim_end();
            let log = if stdout.is_empty() { NO_OUTPUT } else { stdout };
            info!(file = %bb.file_path, "execution succeeded");
            return Ok(StageUpdate::execution(ExecutionStatus::Success, log));
        }

        let log = failure_log(&output);
        info!(
            file = %bb.file_path,
            error = log.lines().next().unwrap_or_default(),
            "execution failed"
        );
        Ok(StageUpdate::execution(ExecutionStatus::Failure, &log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSandbox(Result<RunOutput, StageError>);

    #[async_trait]
    impl Sandbox for FixedSandbox {
        async fn run(&self, _code: &str) -> Result<RunOutput, StageError> {
            self.0.clone()
        }
    }

    fn stage(result: Result<RunOutput, StageError>) -> ExecuteStage {
        ExecuteStage::new(Arc::new(FixedSandbox(result)))
    }

    fn bb() -> Blackboard {
        Blackboard::new("a.py", "print(1)", "")
    }

    #[tokio::test]
    async fn test_success_uses_stdout() {
        let update = stage(Ok(RunOutput {
            exit_code: Some(0),
            stdout: "3.14\n".into(),
            ..Default::default()
        }))
        .run(&bb())
        .await
        .unwrap();
        assert_eq!(update.execution_status, Some(ExecutionStatus::Success));
        assert_eq!(update.execution_log.as_deref(), Some("3.14"));
    }

    #[tokio::test]
    async fn test_success_without_output() {
        let update = stage(Ok(RunOutput {
            exit_code: Some(0),
            ..Default::default()
        }))
        .run(&bb())
        .await
        .unwrap();
        assert_eq!(update.execution_log.as_deref(), Some(NO_OUTPUT));
    }

    #[tokio::test]
    async fn test_failure_log_leads_with_last_stderr_line() {
        let stderr = "Traceback (most recent call last):\n  File \"a.py\", line 1\nNameError: name 'math' is not defined\n";
        let update = stage(Ok(RunOutput {
            exit_code: Some(1),
            stderr: stderr.into(),
            ..Default::default()
        }))
        .run(&bb())
        .await
        .unwrap();
        assert_eq!(update.execution_status, Some(ExecutionStatus::Failure));
        let log = update.execution_log.unwrap();
        assert!(log.starts_with("Error: NameError: name 'math' is not defined\nTraceback"));
    }

    #[test]
    fn test_failure_headline_skips_trailing_noise() {
        let log = failure_log(&RunOutput {
            exit_code: Some(1),
            stderr: "Traceback (most recent call last):\nValueError: bad input\n[cleanup] closing db\n"
                .into(),
            ..Default::default()
        });
        assert!(log.starts_with("Error: ValueError: bad input\n"));

        let log = failure_log(&RunOutput {
            exit_code: Some(2),
            stderr: "usage: tool [-h]\n".into(),
            ..Default::default()
        });
        assert!(log.starts_with("Error: usage: tool [-h]\n"));
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let update = stage(Ok(RunOutput {
            timed_out: true,
            ..Default::default()
        }))
        .run(&bb())
        .await
        .unwrap();
        assert_eq!(update.execution_status, Some(ExecutionStatus::Failure));
        assert!(update.execution_log.unwrap().contains("TimeoutError"));
    }

    #[tokio::test]
    async fn test_sandbox_unavailable_is_propagated() {
        let err = stage(Err(StageError::Unavailable("no sandbox".into())))
            .run(&bb())
            .await
            .unwrap_err();
        assert_eq!(err, StageError::Unavailable("no sandbox".into()));
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;

        fn shell() -> ProcessSandbox {
            ProcessSandbox::new("sh").with_suffix(".sh")
        }

        #[tokio::test]
        async fn test_process_sandbox_captures_stdout() {
            let out = shell().run("echo hello").await.unwrap();
            assert!(out.succeeded());
            assert_eq!(out.stdout, "hello\n");
        }

        #[tokio::test]
        async fn test_process_sandbox_reports_exit_code() {
            let out = shell().run("echo boom >&2\nexit 3").await.unwrap();
            assert!(!out.succeeded());
            assert_eq!(out.exit_code, Some(3));
            assert_eq!(out.stderr.trim(), "boom");
        }

        #[tokio::test]
        async fn test_process_sandbox_times_out() {
            let out = shell()
                .with_timeout(Duration::from_millis(100))
                .run("sleep 5")
                .await
                .unwrap();
            assert!(out.timed_out);
        }

        #[tokio::test]
        async fn test_missing_interpreter_is_unavailable() {
            let err = ProcessSandbox::new("rover-no-such-interpreter")
                .run("x")
                .await
                .unwrap_err();
            assert!(matches!(err, StageError::Unavailable(_)));
        }
    }
}
