//! Engine-driving commands: `wright goal`, `wright resume`, `wright cancel`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wright::engine_config::EngineConfig;
use wright::services::Collaborators;
use wright::ui::{RunUI, UiMode};
use wright::{Config, Engine, EngineError, RunOutcome};

use super::super::Cli;

pub fn check_initialized(project_dir: &Path) -> Result<()> {
    if !project_dir.join(".wright").join("project.json").exists() {
        anyhow::bail!("Project not initialized. Run 'wright init' first.");
    }
    Ok(())
}

fn load_config(cli: &Cli, project_dir: PathBuf) -> Result<(EngineConfig, Config)> {
    let engine_config =
        EngineConfig::with_cli_args(project_dir, cli.verbose, cli.yes, cli.profile.clone())?;
    let config = Config::from_engine_config(&engine_config)?;
    config.ensure_directories()?;
    Ok((engine_config, config))
}

/// Cancel `token` on the first Ctrl-C.
fn watch_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current step");
            token.cancel();
        }
    });
}

/// Run the engine on `goal` (or resume when `None`) with the terminal UI attached.
pub async fn run_engine(
    cli: &Cli,
    project_dir: PathBuf,
    goal: Option<&str>,
    is_new: bool,
) -> Result<()> {
    let (engine_config, config) = load_config(cli, project_dir)?;
    let _guard = wright::logging::init(cli.verbose, &config.log_dir, cli.log_json)?;
    for warning in engine_config.validate() {
        tracing::warn!("config: {}", warning);
    }

    let services = Collaborators::from_config(&engine_config)?;
    let cancel = CancellationToken::new();
    watch_interrupt(cancel.clone());

    let (tx, mut rx) = mpsc::channel(256);
    let ui = RunUI::new(cli.ui.parse().unwrap_or(UiMode::Full), cli.verbose);
    let ui_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            ui.handle_event(&event);
        }
        ui
    });

    let mut engine = Engine::new(config, services, cancel).with_events(tx);
    let result = match goal {
        Some(goal) => engine.initialize_project(goal, is_new).await,
        None => engine.resume().await,
    };
    // closes the event channel so the UI task can drain and exit
    drop(engine);
    let ui = ui_task.await.context("UI task panicked")?;

    match result {
        Ok(RunOutcome::Finished { merged }) => {
            ui.finish(true, &format!("Done: {} feature(s) merged", merged));
            Ok(())
        }
        Ok(RunOutcome::Halted {
            feature,
            status,
            cause,
        }) => {
            ui.finish(false, &format!("Stopped at feature {}", feature));
            anyhow::bail!("Feature {} ended {}: {}", feature, status, cause)
        }
        Err(EngineError::Interrupted) => {
            ui.finish(false, "Interrupted. Run 'wright resume' to continue.");
            Ok(())
        }
        Err(e) => {
            ui.finish(false, "Run failed");
            Err(e.into())
        }
    }
}

pub async fn cmd_goal(cli: &Cli, project_dir: PathBuf, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("Goal text is empty");
    }
    run_engine(cli, project_dir, Some(text), false).await
}

pub async fn cmd_resume(cli: &Cli, project_dir: PathBuf) -> Result<()> {
    check_initialized(&project_dir)?;
    run_engine(cli, project_dir, None, false).await
}

pub async fn cmd_cancel(cli: &Cli, project_dir: PathBuf, feature: &str) -> Result<()> {
    check_initialized(&project_dir)?;
    let (engine_config, config) = load_config(cli, project_dir)?;
    let _guard = wright::logging::init(cli.verbose, &config.log_dir, cli.log_json)?;

    let services = Collaborators::from_config(&engine_config)?;
    let mut engine = Engine::new(config, services, CancellationToken::new());
    engine.cancel_feature(feature).await?;
    println!("Feature {} cancelled", feature);
    Ok(())
}
