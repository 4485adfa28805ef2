//! blogsync CLI
//!
//! The command-line interface for syncing blog folders and rebuilding entries.

mod builder;
mod cli;
mod commands;
mod context;
mod error;
mod logging;

use clap::Parser;
use colored::Colorize;

use cli::{Cli, Commands};
use context::AppContext;
use error::Result;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("{}: could not initialise logging: {}", "warning".yellow().bold(), e);
    }
    tracing::debug!("Verbose mode enabled");

    let Some(command) = cli.command else {
        // No command provided - show help hint
        println!("{} blog folder sync", "blogsync".green().bold());
        println!();
        println!("Run {} for available commands.", "blogsync --help".cyan());
        return Ok(());
    };

    let ctx = AppContext::load(cli.config, cli.config_dir)?;
    execute_command(&ctx, command).await
}

async fn execute_command(ctx: &AppContext, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Sync { blog, json } => commands::run_sync(ctx, blog.as_deref(), json).await,
        Commands::Resync { blog, direction, json } => commands::run_resync(ctx, &blog, direction, json).await,
        Commands::Rebuild { blog, json } => commands::run_rebuild(ctx, &blog, json).await,
        Commands::Lock { blog, json } => commands::run_lock(ctx, &blog, json).await,
        Commands::Status { blog, json } => commands::run_status(ctx, blog.as_deref(), json).await,
    }
}
