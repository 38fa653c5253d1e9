use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use playctl::config::ControlConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "playctl")]
#[command(version, about = "Run automation playbooks and sync project repositories")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to playctl.toml (defaults to ./playctl.toml when present)
    #[arg(long, global = true, env = "PLAYCTL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Managed playbook directory (overrides paths.playbook_dir)
        #[arg(long)]
        playbook_dir: Option<PathBuf>,

        /// Enable permissive CORS for local frontend development
        #[arg(long)]
        dev: bool,
    },
    /// List playbooks in the managed playbook directory
    Playbooks {
        /// Directory to list instead of paths.playbook_dir
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default playctl.toml in the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // `config init` must work even when the existing file is broken.
    if let Commands::Config {
        command: Some(ConfigCommands::Init { force }),
    } = &cli.command
    {
        return cmd::cmd_config_init(cli.config.as_deref(), *force);
    }

    let config = ControlConfig::load_layered(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let _log_guard = playctl::logging::init(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            playbook_dir,
            dev,
        } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = playbook_dir {
                config.paths.playbook_dir = dir;
            }
            cmd::cmd_serve(config, dev).await?;
        }
        Commands::Playbooks { dir, json } => {
            let dir = dir.unwrap_or_else(|| config.paths.playbook_dir.clone());
            cmd::cmd_playbooks(&dir, json)?;
        }
        Commands::Config { command } => cmd::cmd_config(&config, command)?,
    }

    Ok(())
}
