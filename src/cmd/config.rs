//! Configuration view and validation commands: `rover config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use rover::config::{CONFIG_FILE, ROVER_DIR, RoverConfig, RoverToml};

    let rover_dir = project_dir.join(ROVER_DIR);
    let config_path = rover_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Rover Configuration");
            println!("===================");
            println!();

            let config = RoverConfig::new(project_dir.to_path_buf())?;
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No rover.toml found at {}", config_path.display());
                println!("Using defaults. Run 'rover config init' to create one.");
            }
            println!();

            let toml = &config.toml;
            println!("[engine]");
            println!("  max_retries = {}", toml.engine.max_retries);
            println!("  interrupt = {}", toml.engine.interrupt);
            println!("  auto_approve = {}", toml.engine.auto_approve);
            println!("  entry = \"{}\"", toml.engine.entry);
            println!();
            println!("[store]");
            println!("  backend = \"{}\"", toml.store.backend);
            if let Some(path) = &toml.store.path {
                println!("  path = \"{}\"", path.display());
            }
            println!();
            println!("[llm]");
            println!("  model = \"{}\"", toml.llm.model);
            println!("  temperature = {}", toml.llm.temperature);
            println!("  api_key_env = \"{}\"", toml.llm.api_key_env);
            println!("  endpoint = \"{}\"", toml.llm.endpoint);
            println!("  timeout_secs = {}", toml.llm.timeout_secs);
            println!();
            println!("[sandbox]");
            println!("  command = \"{}\"", toml.sandbox.command);
            if !toml.sandbox.args.is_empty() {
                println!("  args = {:?}", toml.sandbox.args);
            }
            println!("  timeout_secs = {}", toml.sandbox.timeout_secs);
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("  model = \"{}\"", config.model());
            match config.store_kind() {
                Ok(kind) => println!(
                    "  store = \"{}\" at {}",
                    kind,
                    config.store_path(kind).display()
                ),
                Err(e) => println!("  store = invalid ({:#})", e),
            }
            println!(
                "  api key = {}",
                if config.api_key().is_some() {
                    "set"
                } else {
                    "not set"
                }
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = RoverConfig::new(project_dir.to_path_buf())?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("rover.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !rover_dir.exists() {
                std::fs::create_dir_all(&rover_dir)?;
            }

            RoverToml::default().save(&config_path)?;

            println!("Created rover.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [engine] max_retries, interrupt, auto_approve, entry");
            println!("  - [store] backend (memory, file, sqlite) and path");
            println!("  - [llm] model, temperature, api_key_env");
            println!("  - [sandbox] command, args, timeout_secs");
            println!();
        }
    }

    Ok(())
}
