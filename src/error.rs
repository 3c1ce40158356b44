use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloaderError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Could not extract an asset uid from URL: {0}")]
    InvalidSourceUrl(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Failed to decode JSON: {0}")]
    DecodeError(#[from] serde_json::Error),
}
