use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "wright")]
#[command(version, about = "Autonomous software-construction engine")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer yes to every confirmation and skip interactive prompts
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Domain profile: generic, django, node. Overrides wright.toml.
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Write the log file as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// UI output mode: full, minimal, json
    #[arg(long, default_value = "full", global = true)]
    pub ui: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a wright project, optionally starting on a goal
    Init {
        /// Goal to work on right away
        #[arg(long)]
        goal: Option<String>,

        /// Discard any existing project state
        #[arg(long)]
        new: bool,
    },
    /// Add a goal to the project and build it
    Goal {
        /// What to build, in plain language
        text: String,
    },
    /// Show features and task progress from the saved project
    Status,
    /// Continue the saved project where it stopped
    Resume,
    /// Force a feature to the cancelled state
    Cancel {
        /// Feature id, e.g. f2
        feature: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default wright.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    // a missing .env is the common case
    dotenvy::from_path(project_dir.join(".env")).ok();

    match &cli.command {
        Commands::Init { goal, new } => {
            cmd::cmd_init(&cli, &project_dir, goal.as_deref(), *new).await?
        }
        Commands::Goal { text } => cmd::cmd_goal(&cli, project_dir, text).await?,
        Commands::Status => cmd::cmd_status(&project_dir).await?,
        Commands::Resume => cmd::cmd_resume(&cli, project_dir).await?,
        Commands::Cancel { feature } => cmd::cmd_cancel(&cli, project_dir, feature).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
