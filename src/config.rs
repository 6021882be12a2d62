//! Configuration for Rover, read from `.rover/rover.toml`.
//!
//! Settings are layered: file, then environment, then CLI flags.
//!
//! ```toml
//! [engine]
//! max_retries = 3
//! interrupt = true        # pause for approval before execute
//! auto_approve = false
//! entry = "review"        # or "refactor" to skip the review stage
//!
//! [store]
//! backend = "file"        # memory | file | sqlite
//! # path = ".rover/threads"
//!
//! [llm]
//! model = "gemini-2.5-flash"
//! temperature = 0.0
//! api_key_env = "GOOGLE_API_KEY"
//!
//! [sandbox]
//! command = "python3"
//! timeout_secs = 30
//! ```
//!
//! Environment overrides: `ROVER_MODEL`, `ROVER_STORE`, and the variable named
//! by `llm.api_key_env` for the API key. Without a project file, the user-level
//! `rover/rover.toml` under the platform config directory is used.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rover_common::StageName;

use crate::graph::{Graph, MAX_RETRIES};
use crate::stages::llm::{API_KEY_ENV, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::stages::{GeminiClient, ProcessSandbox};
use crate::store::{self, CheckpointStore, StoreKind};

/// The name of the per-project configuration directory.
pub const ROVER_DIR: &str = ".rover";
pub const CONFIG_FILE: &str = "rover.toml";

pub const MODEL_ENV: &str = "ROVER_MODEL";
pub const STORE_ENV: &str = "ROVER_STORE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Failed execute attempts before the router gives up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause for approval before the execute stage
    #[serde(default = "default_true")]
    pub interrupt: bool,
    /// Approve every pause automatically
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default = "default_entry")]
    pub entry: StageName,
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

fn default_true() -> bool {
    true
}

fn default_entry() -> StageName {
    StageName::Review
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            interrupt: true,
            auto_approve: false,
            entry: default_entry(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreKind,
    /// Directory (file backend) or database file (sqlite backend).
    /// Relative paths are resolved against the project directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_key_env() -> String {
    API_KEY_ENV.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: 0.0,
            api_key_env: default_api_key_env(),
            endpoint: default_endpoint(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSection {
    /// Interpreter used to run candidate code
    #[serde(default = "default_sandbox_command")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,
}

fn default_sandbox_command() -> String {
    "python3".to_string()
}

fn default_sandbox_timeout() -> u64 {
    30
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            command: default_sandbox_command(),
            args: Vec::new(),
            timeout_secs: default_sandbox_timeout(),
        }
    }
}

/// Contents of `rover.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoverToml {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub sandbox: SandboxSection,
}

impl RoverToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse rover.toml")
    }

    /// Load `rover.toml` from `rover_dir`, falling back to the user-level file
    /// and then to defaults.
    pub fn load_or_default(rover_dir: &Path) -> Result<Self> {
        let config_path = rover_dir.join(CONFIG_FILE);
        if config_path.exists() {
            return Self::load(&config_path);
        }
        match user_config_path().filter(|p| p.exists()) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize rover.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Build the pipeline graph described by `[engine]`.
    pub fn graph(&self) -> Result<Graph> {
        let interrupt = self.engine.interrupt.then_some(StageName::Execute);
        Graph::builder()
            .entry(self.engine.entry)
            .interrupt_before(interrupt)
            .max_retries(self.engine.max_retries)
            .build()
            .context("Invalid [engine] section in rover.toml")
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.engine.max_retries == 0 {
            warnings.push(
                "engine.max_retries is 0: the first failed execution ends the thread".to_string(),
            );
        }
        if let Err(e) = self.graph() {
            warnings.push(format!("{:#}", e));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            warnings.push(format!(
                "llm.temperature {} is outside the supported range 0.0-2.0",
                self.llm.temperature
            ));
        }
        if self.llm.api_key_env.trim().is_empty() {
            warnings.push("llm.api_key_env is empty".to_string());
        }
        if self.sandbox.command.trim().is_empty() {
            warnings.push("sandbox.command is empty".to_string());
        }
        if self.sandbox.timeout_secs == 0 {
            warnings.push("sandbox.timeout_secs is 0: every execution will time out".to_string());
        }
        if self.store.backend == StoreKind::Memory {
            warnings.push(
                "store.backend is memory: paused threads cannot be resumed by a later command"
                    .to_string(),
            );
        }

        warnings
    }
}

/// User-level configuration file, e.g. `~/.config/rover/rover.toml`.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rover").join(CONFIG_FILE))
}

/// Resolved runtime configuration.
///
/// Merges settings from:
/// 1. rover.toml
/// 2. Environment variables
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct RoverConfig {
    pub project_dir: PathBuf,
    pub rover_dir: PathBuf,
    pub toml: RoverToml,
    /// CLI override: approve every pause
    pub auto_approve: bool,
    /// CLI override for the store backend
    pub cli_store: Option<StoreKind>,
    /// CLI override for the model
    pub cli_model: Option<String>,
}

impl RoverConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let rover_dir = project_dir.join(ROVER_DIR);
        let toml = RoverToml::load_or_default(&rover_dir)?;

        Ok(Self {
            project_dir,
            rover_dir,
            toml,
            auto_approve: false,
            cli_store: None,
            cli_model: None,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        auto_approve: bool,
        store: Option<StoreKind>,
        model: Option<String>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.auto_approve = auto_approve;
        config.cli_store = store;
        config.cli_model = model;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.rover_dir.join(CONFIG_FILE)
    }

    /// Approve pauses automatically (CLI → file).
    pub fn auto_approve(&self) -> bool {
        self.auto_approve || self.toml.engine.auto_approve
    }

    /// Model name (CLI → `ROVER_MODEL` → file).
    pub fn model(&self) -> String {
        self.model_with_env(std::env::var(MODEL_ENV).ok())
    }

    fn model_with_env(&self, env: Option<String>) -> String {
        self.cli_model
            .clone()
            .or(env.filter(|m| !m.trim().is_empty()))
            .unwrap_or_else(|| self.toml.llm.model.clone())
    }

    /// Store backend (CLI → `ROVER_STORE` → file).
    pub fn store_kind(&self) -> Result<StoreKind> {
        self.store_kind_with_env(std::env::var(STORE_ENV).ok())
    }

    fn store_kind_with_env(&self, env: Option<String>) -> Result<StoreKind> {
        if let Some(kind) = self.cli_store {
            return Ok(kind);
        }
        match env.filter(|s| !s.trim().is_empty()) {
            Some(raw) => raw
                .parse::<StoreKind>()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("Invalid {}", STORE_ENV)),
            None => Ok(self.toml.store.backend),
        }
    }

    /// Location of the store for `kind`.
    pub fn store_path(&self, kind: StoreKind) -> PathBuf {
        match &self.toml.store.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.project_dir.join(path),
            None => match kind {
                StoreKind::Sqlite => self.rover_dir.join("rover.db"),
                StoreKind::File | StoreKind::Memory => self.rover_dir.join("threads"),
            },
        }
    }

    pub fn open_store(&self) -> Result<Arc<dyn CheckpointStore>> {
        let kind = self.store_kind()?;
        let path = self.store_path(kind);
        store::open(kind, &path)
            .with_context(|| format!("Failed to open {} store at {}", kind, path.display()))
    }

    /// The API key from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.toml.llm.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn llm_client(&self) -> GeminiClient {
        GeminiClient::new(self.api_key().unwrap_or_default())
            .with_model(self.model())
            .with_endpoint(self.toml.llm.endpoint.clone())
            .with_temperature(self.toml.llm.temperature)
            .with_timeout(Duration::from_secs(self.toml.llm.timeout_secs))
    }

    pub fn sandbox(&self) -> ProcessSandbox {
        ProcessSandbox::new(self.toml.sandbox.command.clone())
            .with_args(self.toml.sandbox.args.clone())
            .with_timeout(Duration::from_secs(self.toml.sandbox.timeout_secs))
    }

    pub fn graph(&self) -> Result<Graph> {
        self.toml.graph()
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if self.api_key().is_none() {
            warnings.push(format!(
                "{} is not set: review, refactor and document stages will fail",
                self.toml.llm.api_key_env
            ));
        }
        if let Err(e) = self.store_kind() {
            warnings.push(format!("{:#}", e));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = RoverToml::parse("").unwrap();
        assert_eq!(config.engine.max_retries, 3);
        assert!(config.engine.interrupt);
        assert!(!config.engine.auto_approve);
        assert_eq!(config.engine.entry, StageName::Review);
        assert_eq!(config.store.backend, StoreKind::File);
        assert_eq!(config.llm.model, "gemini-2.5-flash");
        assert_eq!(config.llm.api_key_env, "GOOGLE_API_KEY");
        assert_eq!(config.sandbox.command, "python3");
    }

    #[test]
    fn test_parse_full_config() {
        let config = RoverToml::parse(
            r#"
            [engine]
            max_retries = 5
            interrupt = false
            entry = "refactor"

            [store]
            backend = "sqlite"
            path = "state/rover.db"

            [llm]
            model = "gemini-2.5-pro"
            temperature = 0.2

            [sandbox]
            command = "python3.12"
            args = ["-I"]
            timeout_secs = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.max_retries, 5);
        assert_eq!(config.store.backend, StoreKind::Sqlite);
        assert_eq!(config.sandbox.args, vec!["-I"]);

        let graph = config.graph().unwrap();
        assert_eq!(graph.entry(), StageName::Refactor);
        assert_eq!(graph.interrupt_before(), None);
        assert_eq!(graph.max_retries(), 5);
    }

    #[test]
    fn test_parse_invalid_backend_fails() {
        let result = RoverToml::parse("[store]\nbackend = \"redis\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = RoverToml::default();
        config.engine.max_retries = 7;
        config.store.backend = StoreKind::Sqlite;
        config.save(&path).unwrap();

        let loaded = RoverToml::load(&path).unwrap();
        assert_eq!(loaded.engine.max_retries, 7);
        assert_eq!(loaded.store.backend, StoreKind::Sqlite);
    }

    #[test]
    fn test_validate_defaults_clean() {
        assert!(RoverToml::default().validate().is_empty());
    }

    #[test]
    fn test_validate_warns_on_bad_values() {
        let mut config = RoverToml::default();
        config.engine.max_retries = 0;
        config.engine.entry = StageName::Document;
        config.llm.temperature = 3.5;
        config.sandbox.timeout_secs = 0;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 4, "{:?}", warnings);
        assert!(warnings.iter().any(|w| w.contains("entry stage")));
    }

    fn project() -> (tempfile::TempDir, RoverConfig) {
        let dir = tempdir().unwrap();
        let rover_dir = dir.path().join(ROVER_DIR);
        std::fs::create_dir_all(&rover_dir).unwrap();
        RoverToml::default().save(&rover_dir.join(CONFIG_FILE)).unwrap();
        let config = RoverConfig::new(dir.path().to_path_buf()).unwrap();
        (dir, config)
    }

    #[test]
    fn test_model_precedence() {
        let (_dir, mut config) = project();
        assert_eq!(config.model_with_env(None), "gemini-2.5-flash");
        assert_eq!(config.model_with_env(Some("env-model".into())), "env-model");
        config.cli_model = Some("cli-model".into());
        assert_eq!(config.model_with_env(Some("env-model".into())), "cli-model");
    }

    #[test]
    fn test_store_kind_precedence() {
        let (_dir, mut config) = project();
        assert_eq!(config.store_kind_with_env(None).unwrap(), StoreKind::File);
        assert_eq!(
            config.store_kind_with_env(Some("sqlite".into())).unwrap(),
            StoreKind::Sqlite
        );
        assert!(config.store_kind_with_env(Some("redis".into())).is_err());
        config.cli_store = Some(StoreKind::Memory);
        assert_eq!(
            config.store_kind_with_env(Some("redis".into())).unwrap(),
            StoreKind::Memory
        );
    }

    #[test]
    fn test_store_path_defaults() {
        let (_dir, mut config) = project();
        assert_eq!(
            config.store_path(StoreKind::File),
            config.rover_dir.join("threads")
        );
        assert_eq!(
            config.store_path(StoreKind::Sqlite),
            config.rover_dir.join("rover.db")
        );
        config.toml.store.path = Some(PathBuf::from("custom"));
        assert_eq!(
            config.store_path(StoreKind::File),
            config.project_dir.join("custom")
        );
    }

    #[test]
    fn test_auto_approve_from_cli_or_file() {
        let (_dir, mut config) = project();
        assert!(!config.auto_approve());
        config.toml.engine.auto_approve = true;
        assert!(config.auto_approve());
    }
}
