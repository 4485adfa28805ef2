//! CLI argument parsing using clap derive

use std::path::PathBuf;

use blogsync_core::Direction;
use clap::{Parser, Subcommand};

/// blogsync - Mirror blog folders from storage providers and rebuild entries
#[derive(Parser, Debug)]
#[command(name = "blogsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file layered over the global config
    #[arg(short, long, global = true, env = "BLOGSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the global config.toml
    #[arg(long, global = true, env = "BLOGSYNC_CONFIG_DIR", hide = true)]
    pub config_dir: Option<PathBuf>,

    /// The command to run
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Apply pending remote changes to blog folders
    ///
    /// Examples:
    ///   blogsync sync            # Every configured blog
    ///   blogsync sync my-blog    # One blog
    Sync {
        /// Blog to sync (all configured blogs when omitted)
        blog: Option<String>,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Compare full listings and reconcile the difference
    Resync {
        blog: String,

        /// pull (remote to local) or push (local to remote)
        #[arg(short, long, default_value = "pull")]
        direction: Direction,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Rebuild every entry from the local folder
    Rebuild {
        blog: String,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Show the folder lock of a blog
    Lock {
        blog: String,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Show sync state of configured blogs
    Status {
        /// Blog to show (all configured blogs when omitted)
        blog: Option<String>,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },
}
