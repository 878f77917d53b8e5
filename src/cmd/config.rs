//! Configuration view and validation commands: `wright config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use wright::engine_config::{EngineConfig, ProviderKind, WrightToml};

    let wright_dir = project_dir.join(".wright");
    let config_path = wright_dir.join("wright.toml");

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Wright Configuration");
            println!("====================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                WrightToml::load(&config_path)?
            } else {
                println!("No wright.toml found at {}; showing defaults.", config_path.display());
                WrightToml::default()
            };
            println!();
            print!("{}", toml::to_string_pretty(&toml)?);
            println!();

            if project_dir.exists() {
                println!("Effective values (with env overrides):");
                let config = EngineConfig::new(project_dir.to_path_buf())?;
                let provider = match config.toml.generation.provider {
                    ProviderKind::Http => "http",
                    ProviderKind::Command => "command",
                };
                println!("  provider = \"{}\"", provider);
                println!("  model = \"{}\"", config.toml.generation.model);
                println!("  profile = \"{}\"", config.toml.profile.name);
                println!(
                    "  api key ({}) = {}",
                    config.toml.generation.api_key_env,
                    if config.api_key().is_some() { "set" } else { "not set" }
                );
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No wright.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = WrightToml::load(&config_path)?;
            let warnings = toml.validate();

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
                println!("wright.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            std::fs::create_dir_all(&wright_dir)?;
            WrightToml::default().save(&config_path)?;

            println!("Created wright.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [generation] provider, endpoint, model, api_key_env");
            println!("  - [limits] retry and attempt caps");
            println!("  - [breaker] repeated-failure detection");
            println!("  - [sandbox] deny list and command substitutions");
            println!();
        }
    }

    Ok(())
}
