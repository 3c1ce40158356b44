mod cli;
mod config;
mod downloader;
mod error;
mod selector;
mod types;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use colored::*;
use config::DownloadOptions;
use log::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    info!("Starting media downloader");

    let cli = Cli::parse();
    let options = match DownloadOptions::resolve(cli).await {
        Ok(options) => options,
        Err(e) => {
            error!("Failed to resolve configuration: {}", e);
            eprintln!("{}", "Invalid configuration".red());
            return Err(e.into());
        }
    };
    info!(
        "Downloading attachments of asset {} into {}",
        options.asset_uid,
        options.asset_dir().display()
    );

    let verbosity = options.verbosity;
    let downloader = downloader::Downloader::new(options);
    let stats = downloader
        .walk()
        .await
        .context("download process failed")?;

    info!("{} attachments handled", stats.total());

    if verbosity > 1 {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}
