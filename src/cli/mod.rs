pub mod commands;

use clap::{Parser, Subcommand};
use crate::config::{Config, Priority};
use crate::error::Result;
use crate::feed::{Category, RefreshTarget};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "novine")]
#[command(about = "Category-keyed news cache with scheduled background refresh")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Start the scheduler and keep the cache warm until Ctrl+C
    Run,

    /// Show the news for one category
    Show {
        /// Category name (Hrvatska, Svijet, Ekonomija, Sport, Regija)
        category: Category,

        /// Only read the cache, never fetch
        #[arg(long)]
        cached_only: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Refresh one category, a priority group or all of them now
    Refresh {
        /// Category name or "all"
        #[arg(default_value = "all")]
        target: RefreshTarget,

        /// Refresh every category of this priority (high, medium, low)
        #[arg(short, long, conflicts_with = "target")]
        priority: Option<Priority>,
    },

    /// Drop cached news for one category or all of them
    Invalidate {
        /// Category name or "all"
        target: RefreshTarget,
    },

    /// Show cache statistics
    Stats {
        /// Reset the counters after printing
        #[arg(long)]
        reset: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List cache keys with their metadata, or delete them
    Keys {
        /// Glob pattern (default: every key under the cache prefix)
        pattern: Option<String>,

        /// Delete the matching keys instead of listing them
        #[arg(long)]
        delete: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show per-category schedule and cache status
    Status {
        /// Print the full admin report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recent refresh tasks
    Tasks {
        /// Maximum number of tasks to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config_path = match self.config {
            Some(path) => path,
            None => Config::default_path()?,
        };

        let config = match &self.command {
            Commands::Init { .. } | Commands::Completions { .. } => None,
            _ => Some(commands::load_config(&config_path)?),
        };

        let logging = config
            .as_ref()
            .map(|c| c.logging.clone())
            .unwrap_or_default();
        let _guard = commands::init_logging(self.debug, self.verbose, &logging)?;

        let Some(config) = config else {
            return match self.command {
                Commands::Init { force } => commands::init(&config_path, force),
                Commands::Completions { shell } => {
                    commands::generate_completions(shell);
                    Ok(())
                }
                _ => Ok(()),
            };
        };

        match self.command {
            Commands::Run => commands::run(&config).await,
            Commands::Show { category, cached_only, json } => {
                commands::show(&config, category, cached_only, json).await
            }
            Commands::Refresh { target, priority } => {
                commands::refresh(&config, target, priority).await
            }
            Commands::Invalidate { target } => commands::invalidate(&config, target).await,
            Commands::Stats { reset, json } => commands::stats(&config, reset, json).await,
            Commands::Keys { pattern, delete, json } => {
                commands::keys(&config, pattern, delete, json).await
            }
            Commands::Status { json } => commands::status(&config, json).await,
            Commands::Tasks { limit, json } => commands::tasks(&config, limit, json).await,
            Commands::Init { .. } | Commands::Completions { .. } => Ok(()),
        }
    }
}
