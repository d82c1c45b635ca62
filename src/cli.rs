use clap::{Parser, Subcommand};

use crate::types::{FailurePolicy, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "flickrd-rs",
    version,
    about = "Mirror a Flickr photo collection to local storage"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Flickr API key (falls back to the config file)
    #[arg(long, env = "FLICKR_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Flickr user: NSID (e.g. 12345678@N00) or username
    #[arg(short = 'u', long, global = true)]
    pub user: Option<String>,

    /// Local directory for downloads [default: flickr_photos]
    #[arg(short = 'd', long, global = true)]
    pub download_dir: Option<String>,

    /// Filename template; tokens: YYYY MM DD hh mm ss camera photo_id
    /// [default: YYYY-MM-DD_hhmmss(camera)]
    #[arg(short = 'n', long, global = true)]
    pub naming_rule: Option<String>,

    /// Subdirectory template, same tokens as --naming-rule [default: none]
    #[arg(short = 'r', long, global = true)]
    pub subdir_rule: Option<String>,

    /// Answer yes to the confirmation prompt
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Directory for the photo metadata cache
    #[arg(long, default_value = "~/.flickrd-rs", global = true)]
    pub cache_dir: String,

    /// Config file holding defaults for the options above
    #[arg(long, default_value = "flickrd.toml", global = true)]
    pub config: String,

    /// Seconds between sync runs
    #[arg(long, default_value_t = 300, global = true)]
    pub sync_interval: u64,

    /// What to do when a single photo fails to transfer
    #[arg(long, value_enum, default_value = "abort", global = true)]
    pub on_transfer_failure: FailurePolicy,

    /// Retries for transient network failures
    #[arg(long, default_value_t = 2, global = true)]
    pub max_retries: u32,

    /// Base delay in seconds between retries
    #[arg(long, default_value_t = 5, global = true)]
    pub retry_delay: u64,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Disable progress bar
    #[arg(long, global = true)]
    pub no_progress_bar: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show account details and albums
    Status,
    /// Download every photo
    All,
    /// Download one album
    Album {
        /// Numeric album (photoset) id
        album_id: String,
    },
    /// Download photos taken within a date range (inclusive)
    Taken {
        /// Start date, YYYYMMDD
        start: String,
        /// End date, YYYYMMDD [default: start]
        end: Option<String>,
    },
    /// Download photos uploaded within a date range (inclusive)
    Posted {
        /// Start date, YYYYMMDD
        start: String,
        /// End date, YYYYMMDD [default: start]
        end: Option<String>,
    },
    /// Download new photos, then repeat every --sync-interval seconds
    Sync,
    /// Delete the local photo metadata cache
    DeleteCache,
}
