//! flickrd-rs: incrementally mirror a Flickr user's photos to local storage.
//!
//! Every photo's metadata is resolved once and cached in SQLite together with
//! the SHA-256 of its downloaded bytes. That hash, not the filename, decides
//! whether a photo is already on disk, so repeated runs never download the
//! same photo twice and a `sync` can stop as soon as it reaches content it
//! has seen before.

#![warn(clippy::all)]

mod cli;
mod config;
mod download;
mod flickr;
mod metadata;
mod request;
pub mod retry;
mod scan;
mod schedule;
mod shutdown;
mod state;
#[cfg(test)]
mod test_support;
mod types;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::{Config, FileConfig};
use download::file::HttpFetcher;
use download::Pipeline;
use flickr::{FlickrClient, PhotoSource};
use metadata::MetadataCache;
use scan::{AutoConfirm, Confirm, ScanDriver, ScanOutcome, StdinConfirm};
use state::{PhotoStore, SqlitePhotoStore};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(120);

fn build_http_client() -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("flickrd-rs/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .build()?;
    Ok(client)
}

/// Persist the effective options; failure only costs convenience.
fn save_config(config: &Config) {
    if let Err(e) = config.to_file_config().save(&config.config_path) {
        tracing::warn!("Could not save settings: {}", e);
    }
}

/// Run the status command.
async fn run_status(config: &Config) -> anyhow::Result<()> {
    let (api_key, user) = config.credentials()?;
    save_config(config);

    let client = FlickrClient::new(
        build_http_client()?,
        api_key.to_string(),
        user.to_string(),
        config.retry,
    )
    .resolve_user()
    .await?;
    let status = client.account_status().await?;

    println!("Account:");
    println!("  User name:    {}", status.username);
    println!("  Real name:    {}", status.realname);
    println!("  NSID:         {}", status.nsid);
    println!("  Profile:      {}", status.profile_url);
    println!("  Photos:       {}", status.photo_count);
    println!("  First taken:  {}", status.first_taken);
    if let Some(first) = status.first_upload {
        println!("  First upload: {}", first.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!();

    println!("Albums ({}):", status.albums.len());
    println!("  {:<20} {:>7} {:>7}  Title", "Id", "Photos", "Videos");
    for album in &status.albums {
        println!(
            "  {:<20} {:>7} {:>7}  {}",
            album.id, album.photos, album.videos, album.title
        );
    }
    println!();

    let db_path = config.database_path();
    if !db_path.exists() {
        println!("No metadata cache at {}", db_path.display());
        return Ok(());
    }
    let store = SqlitePhotoStore::open(&db_path).await?;
    let summary = store.summary().await?;
    println!("Metadata cache: {}", store.path().display());
    println!("  Resolved:   {}", summary.total_photos);
    println!("  Downloaded: {}", summary.downloaded);

    Ok(())
}

/// Run the delete-cache command.
fn run_delete_cache(config: &Config) -> anyhow::Result<()> {
    let db_path = config.database_path();

    if !db_path.exists() {
        println!("No metadata cache found at {}", db_path.display());
        return Ok(());
    }

    if !config.yes {
        println!("This will delete the metadata cache at:");
        println!("  {}", db_path.display());
        println!();
        print!("Are you sure? [y/N] ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    state::remove_database(&db_path)?;
    println!("Metadata cache deleted.");
    Ok(())
}

/// Run one of the download commands.
async fn run_download(config: &Config, command: &Command) -> anyhow::Result<ScanOutcome> {
    let (api_key, user) = config.credentials()?;
    let Some(request) = config.request(command)? else {
        anyhow::bail!("{:?} is not a download command", command);
    };
    save_config(config);

    let http = build_http_client()?;
    let client = FlickrClient::new(
        http.clone(),
        api_key.to_string(),
        user.to_string(),
        config.retry,
    )
    .resolve_user()
    .await?;
    tracing::debug!(user_id = client.user_id(), "Using Flickr account");
    let source: Arc<dyn PhotoSource> = Arc::new(client);

    let db_path = config.database_path();
    let store: Arc<dyn PhotoStore> = Arc::new(SqlitePhotoStore::open(&db_path).await?);
    tracing::debug!("Metadata cache opened at {}", db_path.display());

    let cache = Arc::new(MetadataCache::new(source.clone(), store));
    let fetcher = Arc::new(HttpFetcher::new(http, config.retry));
    let pipeline = Pipeline::new(cache, fetcher, config.no_progress_bar);
    let confirm: Box<dyn Confirm> = if config.yes {
        Box::new(AutoConfirm)
    } else {
        Box::new(StdinConfirm)
    };

    let shutdown_token = shutdown::install_signal_handler()?;
    let driver = ScanDriver::new(source, pipeline, confirm, shutdown_token.clone());

    let outcome = if request.kind.is_sync() {
        schedule::run_sync_loop(
            &driver,
            &schedule::TokioClock,
            &request,
            config.sync_interval,
            &shutdown_token,
        )
        .await?
    } else {
        driver.run_once(&request).await?.outcome
    };

    tracing::info!(?outcome, "Finished");
    Ok(outcome)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let file = FileConfig::load(&config::expand_tilde(&cli.config))?;
    let config = Config::resolve(&cli, file)?;
    tracing::debug!(?config, "Effective configuration");

    match &cli.command {
        Command::DeleteCache => run_delete_cache(&config),
        Command::Status => run_status(&config).await,
        command => {
            let code = run_download(&config, command).await?.exit_code();
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
    }
}
