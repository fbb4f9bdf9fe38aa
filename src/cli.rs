// src/cli.rs
//! CLI definitions for reposync
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reposync")]
#[command(version)]
#[command(about = "Synchronize and cache rpm-md repository metadata", long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "/etc/reposync/reposync.toml")]
    pub config: PathBuf,

    /// Override the cache root
    #[arg(long, global = true)]
    pub cachedir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synchronize repository metadata and build the binary index cache
    #[command(alias = "sync")]
    Makecache {
        /// Only these repositories (default: all enabled)
        #[arg(long = "repo")]
        repos: Vec<String>,

        /// Never touch the network
        #[arg(long)]
        cacheonly: bool,

        /// Expire every cache first
        #[arg(long)]
        refresh: bool,

        /// Print the per-repository report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured repositories with their cache state
    List {
        /// Include disabled repositories
        #[arg(long)]
        all: bool,
    },

    /// Remove cached data
    Clean {
        #[arg(value_enum)]
        what: CleanTarget,
    },

    /// Synchronize, then show packages by name
    Query {
        /// Package name or provided capability
        name: String,

        /// Look up providers instead of package names
        #[arg(long)]
        provides: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CleanTarget {
    /// Downloaded metadata and mirror documents
    Metadata,
    /// Downloaded packages
    Packages,
    /// Binary index files
    Dbcache,
    /// Mark every cache expired without removing anything
    ExpireCache,
    /// Whole cache directories
    All,
}
