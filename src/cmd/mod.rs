//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                      |
//! |-----------|----------------------------------------|
//! | `project` | `Init`                                 |
//! | `review`  | `Review`                               |
//! | `thread`  | `Thread` and its subcommands           |
//! | `config`  | `Config`                               |

pub mod config;
pub mod project;
pub mod review;
pub mod thread;

pub use config::cmd_config;
pub use project::cmd_init;
pub use review::cmd_review;
pub use thread::cmd_thread;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rover::config::RoverConfig;
use rover::engine::{Engine, RunOptions};
use rover::stages::default_registry;
use rover::ui::EngineUI;

use super::Cli;

/// An engine wired to the project's store, stages and terminal UI.
pub struct Session {
    pub engine: Engine,
    pub config: RoverConfig,
    listener: JoinHandle<()>,
}

impl Session {
    pub fn open(cli: &Cli, project_dir: std::path::PathBuf) -> Result<Self> {
        let config = RoverConfig::with_cli_args(
            project_dir,
            cli.yes,
            cli.store,
            cli.model.clone(),
        )?;
        for warning in config.validate() {
            tracing::warn!("{}", warning);
        }

        let registry = default_registry(
            Arc::new(config.llm_client()),
            Arc::new(config.sandbox()),
        )?;
        let store = config.open_store()?;

        let (tx, rx) = mpsc::channel(64);
        let ui = if cli.json {
            EngineUI::hidden()
        } else {
            EngineUI::new(cli.verbose)
        };
        let listener = ui.spawn_listener(rx);

        let engine = Engine::new(config.graph()?, registry, store)
            .context("Failed to build the pipeline")?
            .with_event_channel(tx);

        Ok(Self {
            engine,
            config,
            listener,
        })
    }

    pub fn run_options(&self, cancel: &CancellationToken) -> RunOptions {
        RunOptions {
            bypass_interrupt: self.config.auto_approve(),
            cancel: cancel.clone(),
        }
    }

    /// Drop the engine and wait for the UI to drain its events.
    pub async fn close(self) {
        let Self {
            engine, listener, ..
        } = self;
        drop(engine);
        listener.await.ok();
    }
}

/// Cancel `token` on the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{} the running stage is abandoned and the last checkpoint is kept",
                console::style("Interrupted:").yellow().bold()
            );
            child.cancel();
        }
    });
    token
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}
