//! Initialization module for rover projects.
//!
//! `rover init` creates the `.rover/` directory in a project:
//!
//! ```text
//! .rover/
//! ├── rover.toml       # Project configuration (defaults)
//! ├── .gitignore       # Keeps thread state out of version control
//! └── threads/         # Checkpoints for the file store
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{CONFIG_FILE, ROVER_DIR, RoverToml};

const GITIGNORE: &str = "threads/\nrover.db\n";

/// Result of initializing a rover project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the .rover directory
    pub rover_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

/// Initialize a rover project in the given directory.
///
/// Existing files are left untouched; missing pieces are filled in.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let rover_dir = project_dir.join(ROVER_DIR);

    let created = !rover_dir.exists();
    if created {
        std::fs::create_dir_all(&rover_dir)
            .with_context(|| format!("Failed to create directory: {}", rover_dir.display()))?;
    }
    ensure_directory_structure(&rover_dir)?;

    Ok(InitResult { rover_dir, created })
}

fn ensure_directory_structure(rover_dir: &Path) -> Result<()> {
    let threads_dir = rover_dir.join("threads");
    std::fs::create_dir_all(&threads_dir).with_context(|| {
        format!(
            "Failed to create threads directory: {}",
            threads_dir.display()
        )
    })?;

    let config_file = rover_dir.join(CONFIG_FILE);
    if !config_file.exists() {
        RoverToml::default().save(&config_file)?;
    }

    let gitignore = rover_dir.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(&gitignore, GITIGNORE)
            .with_context(|| format!("Failed to create {}", gitignore.display()))?;
    }

    Ok(())
}

/// Check if a project is already initialized with rover.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(ROVER_DIR).join(CONFIG_FILE).exists()
}
