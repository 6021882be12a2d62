use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rover::store::StoreKind;

mod cmd;

#[derive(Parser)]
#[command(name = "rover")]
#[command(version, about = "Review, refactor, execute and document code through a checkpointed pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Approve every pause without asking
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Checkpoint store backend: memory, file, sqlite. Overrides rover.toml
    #[arg(long, global = true)]
    pub store: Option<StoreKind>,

    /// LLM model name. Overrides rover.toml
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Machine-readable output on stdout, JSON logs on stderr
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new rover project
    Init,
    /// Review a file interactively: review, refactor, approve, execute, document
    Review {
        /// The source file to review
        file: PathBuf,

        /// Thread id (defaults to the file name plus a random suffix)
        #[arg(short, long)]
        thread: Option<String>,

        /// Extra context for the reviewer
        #[arg(short, long)]
        context: Option<String>,

        /// Read extra context from a file
        #[arg(long)]
        context_file: Option<PathBuf>,

        /// Overwrite the file with the refactored code when the pipeline completes
        #[arg(long)]
        write: bool,

        /// Write the generated documentation to this path
        #[arg(long)]
        docs: Option<PathBuf>,
    },
    /// Manage pipeline threads
    Thread {
        #[command(subcommand)]
        command: ThreadCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ThreadCommands {
    /// Start a new thread and run it until it pauses or finishes
    Start {
        file: PathBuf,
        #[arg(short, long)]
        thread: Option<String>,
        #[arg(short, long)]
        context: Option<String>,
        #[arg(long)]
        context_file: Option<PathBuf>,
    },
    /// Continue a thread from its last checkpoint
    Resume { thread: String },
    /// Approve the candidate of a paused thread and continue
    Approve { thread: String },
    /// Reject the candidate of a paused thread; the feedback goes back to refactor
    Reject {
        thread: String,
        #[arg(short, long)]
        feedback: String,
    },
    /// Skip execution of a paused thread and go to documentation
    Skip {
        thread: String,
        #[arg(short, long, default_value = "execution skipped by reviewer")]
        reason: String,
    },
    /// Terminate a thread
    Abort {
        thread: String,
        #[arg(short, long, default_value = "aborted by user")]
        reason: String,
    },
    /// Apply a stage result from a JSON file (or `-` for stdin) as if the stage produced it
    Inject {
        thread: String,
        /// The stage the result stands in for
        #[arg(short, long)]
        stage: String,
        /// Path to the JSON update, or `-`
        #[arg(short, long)]
        update: String,
        /// Apply the result without resuming the thread
        #[arg(long)]
        no_resume: bool,
    },
    /// Show the state of a thread
    Status { thread: String },
    /// Show a thread's run log and results
    Show { thread: String },
    /// List all threads
    List,
    /// Delete a thread's checkpoint
    Archive { thread: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default rover.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    rover::logging::init(cli.verbose, cli.json);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Review {
            file,
            thread,
            context,
            context_file,
            write,
            docs,
        } => {
            let args = cmd::review::ReviewArgs {
                file: file.clone(),
                thread: thread.clone(),
                context: context.clone(),
                context_file: context_file.clone(),
                write: *write,
                docs: docs.clone(),
            };
            cmd::cmd_review(&cli, project_dir, args).await?;
        }
        Commands::Thread { command } => {
            cmd::cmd_thread(&cli, project_dir, command.clone()).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
