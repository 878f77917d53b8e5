//! Project initialization and status commands.

use anyhow::Result;
use std::path::Path;

use super::super::Cli;

pub async fn cmd_init(cli: &Cli, project_dir: &Path, goal: Option<&str>, new: bool) -> Result<()> {
    use wright::engine_config::WrightToml;
    use wright::project::Project;
    use wright::services::{JsonFileStore, ProjectStore};

    std::fs::create_dir_all(project_dir)?;
    let wright_dir = project_dir.join(".wright");
    let was_initialized = wright_dir.join("wright.toml").exists();
    std::fs::create_dir_all(wright_dir.join("logs"))?;

    if !was_initialized {
        let mut toml = WrightToml::default();
        if let Some(profile) = &cli.profile {
            toml.profile.name = profile.clone();
        }
        toml.save(&wright_dir.join("wright.toml"))?;
    }

    if let Some(goal) = goal.filter(|g| !g.trim().is_empty()) {
        return super::run::run_engine(cli, project_dir.to_path_buf(), Some(goal), new).await;
    }

    let store = JsonFileStore::new(wright_dir.join("project.json"));
    if new || store.load().await?.is_none() {
        let profile = cli.profile.clone().unwrap_or_else(|| {
            WrightToml::load_or_default(&wright_dir)
                .map(|t| t.profile.name)
                .unwrap_or_else(|_| "generic".to_string())
        });
        let root = project_dir.canonicalize()?;
        store.save(&Project::new(root, &profile, "")).await?;
    }

    if was_initialized && !new {
        println!("Wright project already initialized at {}", wright_dir.display());
        println!("Directory structure verified.");
        return Ok(());
    }

    println!("Initialized wright project at {}", wright_dir.display());
    println!();
    println!("Created directory structure:");
    println!("  .wright/");
    println!("  ├── wright.toml    # Configuration (use `wright config`)");
    println!("  ├── project.json   # Project state, saved after every step");
    println!("  └── logs/          # Daily rolling logs");
    println!();
    println!("Next steps:");
    println!("  1. Set the API key named by generation.api_key_env (WRIGHT_API_KEY)");
    println!("  2. Run `wright goal \"<what to build>\"`");
    Ok(())
}

pub async fn cmd_status(project_dir: &Path) -> Result<()> {
    use wright::services::{JsonFileStore, ProjectStore};
    use wright::ui::render_status;

    println!();
    println!("Wright Project Status");
    println!("=====================");
    println!();

    let store = JsonFileStore::new(project_dir.join(".wright").join("project.json"));
    match store.load().await? {
        Some(project) => print!("{}", render_status(&project)),
        None => {
            println!("Project: Not initialized");
            println!();
            println!("Run 'wright init' to initialize the project.");
        }
    }
    println!();
    Ok(())
}
