//! Configuration view and validation commands: `playctl config`.

use std::path::Path;

use anyhow::{Context, Result};

use playctl::config::{ControlConfig, DEFAULT_CONFIG_FILE};

use super::super::ConfigCommands;

pub fn cmd_config(config: &ControlConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let mut shown = config.clone();
            for token in [&mut shown.auth.admin_token, &mut shown.auth.user_token] {
                if token.is_some() {
                    *token = Some("********".to_string());
                }
            }
            println!("# Effective configuration (file + environment)");
            print!("{}", shown.to_toml_string()?);
            let warnings = config.validate();
            if !warnings.is_empty() {
                println!();
                for warning in warnings {
                    println!("# warning: {}", warning);
                }
            }
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        // Handled before the configuration is loaded.
        Some(ConfigCommands::Init { force }) => cmd_config_init(None, force)?,
    }
    Ok(())
}

/// Write the default configuration to `path` (or `./playctl.toml`).
pub fn cmd_config_init(path: Option<&Path>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    if path.exists() && !force {
        println!("{} already exists.", path.display());
        println!("Pass --force to overwrite it.");
        return Ok(());
    }

    let body = ControlConfig::default().to_toml_string()?;
    std::fs::write(path, body)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    Ok(())
}
