//! gitsync CLI - Command line interface for gitsync
//!
//! Clones a GitHub repository, lets a command change it, then commits and
//! pushes the result.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gitsync_core::{Config, Secrets};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::SyncArgs;

/// gitsync: clone, change, commit and push GitHub repositories
#[derive(Parser, Debug)]
#[command(name = "gitsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config file (defaults to ~/.config/gitsync/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base URL repositories are cloned from (overrides config and env)
    #[arg(long, global = true)]
    git_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Synchronize a repository
    #[command(visible_alias = "s")]
    Sync(SyncArgs),

    /// Show current configuration
    Config {
        /// Create a secrets file template at ~/.config/gitsync/secrets.toml
        #[arg(long)]
        init_secrets: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Some(Commands::Version) => {
            println!("gitsync {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Sync(args)) => {
            args.execute(cli.verbose, cli.config.as_deref(), cli.git_url.clone())
                .await?;
        }
        Some(Commands::Config { init_secrets }) => {
            if init_secrets {
                let path = Secrets::create_template()?;
                println!("Created secrets template at {}", path.display());
                return Ok(());
            }
            let config =
                Config::load_with_overrides(cli.config.as_deref(), cli.git_url.clone(), None)?;
            print_config(&config, cli.config.as_deref());
        }
        None => {
            println!("gitsync - clone, change, commit and push GitHub repositories");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}

fn print_config(config: &Config, config_path: Option<&std::path::Path>) {
    fn or_unset<T: std::fmt::Display>(value: Option<T>) -> String {
        value.map_or_else(|| "(not set)".to_string(), |v| v.to_string())
    }

    println!("gitsync Configuration");
    println!("=====================");
    println!();
    println!("GitHub:");
    println!("  git_url: {}", config.github.git_url);
    println!("  api_url: {}", config.github.api_url);
    println!("  app_id: {}", or_unset(config.github.app_id));
    println!("  installation_id: {}", or_unset(config.github.installation_id));
    println!(
        "  private_key_path: {}",
        or_unset(config.github.private_key_path.as_ref().map(|p| p.display()))
    );
    println!();
    println!("Git identity:");
    println!(
        "  author: {} <{}>",
        or_unset(config.git.author_name.as_ref()),
        or_unset(config.git.author_email.as_ref())
    );
    println!(
        "  committer: {} <{}>",
        or_unset(config.git.committer_name.as_ref()),
        or_unset(config.git.committer_email.as_ref())
    );
    println!();
    println!("Sync:");
    match config.workdir() {
        Ok(dir) => println!("  workdir: {}", dir.display()),
        Err(e) => println!("  workdir: ({})", e),
    }
    println!(
        "  timeout: {}",
        config
            .sync
            .timeout
            .map_or_else(|| "(none)".to_string(), |t| format!("{:?}", t))
    );
    println!();

    let path = config_path
        .map(|p| p.to_path_buf())
        .or_else(Config::default_config_path);
    if let Some(path) = path {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
    if let Some(path) = Secrets::default_secrets_path() {
        println!("Secrets file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found)");
        }
    }
}
