//! `rover init`.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use rover::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized rover project at {}",
            result.rover_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .rover/");
        println!("  ├── rover.toml    # Pipeline, store, LLM and sandbox settings");
        println!("  └── threads/      # Checkpoints (one JSON file per thread)");
        println!();
        println!("Next steps:");
        println!("  1. Export GOOGLE_API_KEY (or add it to .env)");
        println!("  2. Run `rover review <file>` to review and refactor a file");
    } else if was_initialized {
        println!(
            "Rover project already initialized at {}",
            result.rover_dir.display()
        );
        println!("Directory structure verified.");
    } else {
        println!(
            "Completed rover initialization at {}",
            result.rover_dir.display()
        );
    }

    Ok(())
}
