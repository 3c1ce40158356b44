use clap::{ArgGroup, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Download media attachments of KoboToolbox submissions", long_about = None)]
#[command(group(ArgGroup::new("source").required(true).args(["asset_uid", "url"])))]
pub struct Cli {
    /// Asset UID
    #[arg(short, long)]
    pub asset_uid: Option<String>,

    /// Full asset URL; the API host and asset UID are extracted from it
    #[arg(short, long)]
    pub url: Option<String>,

    /// API token (overrides the settings file)
    #[arg(long)]
    pub token: Option<String>,

    /// API host, e.g. https://kf.kobotoolbox.org (overrides the settings file)
    #[arg(long)]
    pub api_url: Option<String>,

    /// Media host used to rewrite attachment download URLs
    #[arg(long)]
    pub media_url: Option<String>,

    /// Settings file holding kf_url, kc_url and token
    #[arg(long, default_value = "kobo.json")]
    pub config: PathBuf,

    /// Root directory of the downloaded tree
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Query limit (page size)
    #[arg(short, long, default_value_t = 100)]
    pub limit: u32,

    /// Custom data query
    #[arg(short, long, default_value = "")]
    pub query: String,

    /// Comma separated question names to restrict downloads to
    #[arg(short = 'Q', long, default_value = "")]
    pub question_names: String,

    /// Stream chunk size in bytes
    #[arg(short, long, default_value_t = 1024)]
    pub chunk_size: usize,

    /// Seconds to wait after each download
    #[arg(short, long, default_value_t = 1.0)]
    pub throttle: f64,

    /// Output verbosity (0-3)
    #[arg(short, long, default_value_t = 3)]
    pub verbosity: u8,
}
