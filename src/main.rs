// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let fallback = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(&cli.config, cli.cachedir.as_deref())?;

    match cli.command {
        Commands::Makecache {
            repos,
            cacheonly,
            refresh,
            json,
        } => commands::cmd_makecache(config, &repos, cacheonly, refresh, json),
        Commands::List { all } => commands::cmd_list(&config, all),
        Commands::Clean { what } => commands::cmd_clean(&config, what),
        Commands::Query { name, provides } => commands::cmd_query(config, &name, provides),
    }
}
