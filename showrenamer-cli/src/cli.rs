use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use showrenamer_core::{OperatingMode, RenamerSettings};

#[derive(Debug, Parser)]
#[command(
    name = "showrenamer",
    version,
    about = "Rename TV episode files from TheTVDB and file them into a show library"
)]
pub struct Cli {
    /// TheTVDB v4 API key
    #[arg(long, env = "TVDB_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Directory holding patterns, mappings, library folders and the cache
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Log what would happen without touching any file
    #[arg(long, global = true, conflicts_with = "rename_only")]
    pub dry_run: bool,

    /// Rename in place; never move into the library
    #[arg(long, global = true)]
    pub rename_only: bool,

    /// Accept fuzzy series matches without asking
    #[arg(long, global = true)]
    pub no_interactive: bool,

    /// Metadata cache lifetime in days
    #[arg(long, value_name = "DAYS", global = true)]
    pub cache_ttl: Option<u32>,

    /// Quiet time before a batch of changed files is processed (e.g. "30s")
    #[arg(long, value_parser = humantime::parse_duration, global = true)]
    pub stability_period: Option<Duration>,

    /// Delay before a deferred file is attempted again (e.g. "24h")
    #[arg(long, value_parser = humantime::parse_duration, global = true)]
    pub retry_interval: Option<Duration>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Process existing files, then keep watching for new ones
    Watch {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Process every video file below the paths once and exit
    Run {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show recorded rename and move operations
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only operations involving this file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Move files back to where recorded renames and moves found them
    Undo {
        /// How many recent log records to revert
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only revert the operations this file went through
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Remove every cached catalog response
    ClearCache,
}

impl Cli {
    pub fn mode(&self) -> OperatingMode {
        if self.dry_run {
            OperatingMode::DryRun
        } else if self.rename_only {
            OperatingMode::RenameOnly
        } else {
            OperatingMode::Normal
        }
    }

    pub fn interactive(&self) -> bool {
        !self.no_interactive
    }

    /// Command-line values win over `settings.toml`.
    pub fn apply_overrides(&self, settings: &mut RenamerSettings) {
        if let Some(days) = self.cache_ttl {
            settings.cache_ttl_days = days;
        }
        if let Some(period) = self.stability_period {
            settings.watch.stability_period_secs = period.as_secs();
        }
        if let Some(interval) = self.retry_interval {
            settings.watch.retry_interval_secs = interval.as_secs();
        }
    }
}
