use crate::cli::Cli;
use crate::error::DownloaderError;
use log::{debug, info};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

pub const DEFAULT_CONFIG_FILE: &str = "kobo.json";

static SOURCE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://[^/#?]+)/.*\b(?:forms|assets)/([A-Za-z0-9]+)")
        .expect("source url pattern is valid")
});

/// Contents of the settings file.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Settings {
    pub kf_url: Option<String>,
    pub kc_url: Option<String>,
    pub token: Option<String>,
}

/// Everything the walk needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub asset_uid: String,
    pub output_dir: PathBuf,
    pub limit: u32,
    pub query: String,
    pub question_names: String,
    pub chunk_size: usize,
    pub throttle: Duration,
    pub verbosity: u8,
    pub token: String,
    pub api_url: String,
    pub media_url: Option<String>,
}

impl DownloadOptions {
    pub async fn resolve(cli: Cli) -> Result<Self, DownloaderError> {
        let explicit = cli.config != Path::new(DEFAULT_CONFIG_FILE);
        let settings = load_settings(&cli.config, explicit).await?;
        Self::from_parts(cli, settings)
    }

    /// Merges CLI flags over the settings file. Flags win.
    pub fn from_parts(cli: Cli, settings: Settings) -> Result<Self, DownloaderError> {
        let (url_host, url_uid) = match cli.url.as_deref() {
            Some(url) => {
                let (host, uid) = parse_source_url(url)?;
                (Some(host), Some(uid))
            }
            None => (None, None),
        };

        let asset_uid = cli.asset_uid.or(url_uid).ok_or_else(|| {
            DownloaderError::Config("an asset uid or asset URL is required".into())
        })?;

        let api_url = cli
            .api_url
            .or(url_host)
            .or(settings.kf_url)
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| DownloaderError::Config("no API host (kf_url) configured".into()))?;

        let token = cli
            .token
            .or(settings.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DownloaderError::Config("no API token configured".into()))?;

        let media_url = cli
            .media_url
            .or(settings.kc_url)
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());

        if cli.chunk_size == 0 {
            return Err(DownloaderError::Config("chunk size must be greater than zero".into()));
        }
        if cli.verbosity > 3 {
            return Err(DownloaderError::Config(format!(
                "verbosity must be between 0 and 3, got {}",
                cli.verbosity
            )));
        }
        if !cli.throttle.is_finite() || cli.throttle < 0.0 {
            return Err(DownloaderError::Config(format!(
                "throttle must be a non-negative number of seconds, got {}",
                cli.throttle
            )));
        }

        let options = Self {
            asset_uid,
            output_dir: cli.output_dir,
            limit: cli.limit,
            query: cli.query,
            question_names: cli.question_names,
            chunk_size: cli.chunk_size,
            throttle: Duration::from_secs_f64(cli.throttle),
            verbosity: cli.verbosity,
            token,
            api_url,
            media_url,
        };
        debug!(
            "Resolved options: asset_uid={} api_url={} media_url={:?}",
            options.asset_uid, options.api_url, options.media_url
        );
        Ok(options)
    }

    pub fn data_url(&self) -> String {
        format!("{}/api/v2/assets/{}/data", self.api_url, self.asset_uid)
    }

    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("format", "json".to_string()), ("limit", self.limit.to_string())];
        if !self.query.is_empty() {
            params.push(("query", self.query.clone()));
        }
        params
    }

    pub fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }

    pub fn question_list(&self) -> Vec<&str> {
        self.question_names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect()
    }

    pub fn asset_dir(&self) -> PathBuf {
        self.output_dir.join(&self.asset_uid)
    }
}

/// Reads the settings file. A missing file is only an error when it was named explicitly.
pub async fn load_settings(path: &Path, required: bool) -> Result<Settings, DownloaderError> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            debug!("No settings file at {}, relying on flags", path.display());
            return Ok(Settings::default());
        }
        Err(e) => {
            return Err(DownloaderError::Config(format!(
                "cannot read settings file {}: {}",
                path.display(),
                e
            )))
        }
    };

    let mut contents = String::new();
    file.read_to_string(&mut contents).await?;

    let settings = serde_json::from_str(&contents)?;
    info!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Splits an asset URL into `(api_host, asset_uid)`.
pub fn parse_source_url(url: &str) -> Result<(String, String), DownloaderError> {
    let caps = SOURCE_URL
        .captures(url.trim())
        .ok_or_else(|| DownloaderError::InvalidSourceUrl(url.to_string()))?;
    Ok((caps[1].to_string(), caps[2].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["kobo-media-downloader"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    fn settings() -> Settings {
        Settings {
            kf_url: Some("https://kf.example.org/".into()),
            kc_url: Some("https://kc.example.org".into()),
            token: Some("secret".into()),
        }
    }

    #[test]
    fn test_parse_source_url_form_link() {
        let (host, uid) =
            parse_source_url("https://kf.kobotoolbox.org/#/forms/aBc123XyZ/data/table").unwrap();
        assert_eq!(host, "https://kf.kobotoolbox.org");
        assert_eq!(uid, "aBc123XyZ");
    }

    #[test]
    fn test_parse_source_url_api_link() {
        let (host, uid) =
            parse_source_url("http://localhost:8000/api/v2/assets/a7Gk9/data/?format=json").unwrap();
        assert_eq!(host, "http://localhost:8000");
        assert_eq!(uid, "a7Gk9");
    }

    #[test]
    fn test_parse_source_url_rejects_unrelated() {
        assert!(matches!(
            parse_source_url("https://example.org/projects/123"),
            Err(DownloaderError::InvalidSourceUrl(_))
        ));
        assert!(parse_source_url("not a url").is_err());
    }

    #[test]
    fn test_flags_override_settings() {
        let opts = DownloadOptions::from_parts(
            cli(&["-a", "uid1", "--token", "flag-token", "--api-url", "http://api.local/"]),
            settings(),
        )
        .unwrap();
        assert_eq!(opts.token, "flag-token");
        assert_eq!(opts.api_url, "http://api.local");
        assert_eq!(opts.media_url.as_deref(), Some("https://kc.example.org"));
        assert_eq!(opts.data_url(), "http://api.local/api/v2/assets/uid1/data");
        assert_eq!(opts.auth_header(), "Token flag-token");
    }

    #[test]
    fn test_url_supplies_host_and_uid() {
        let opts = DownloadOptions::from_parts(
            cli(&["--url", "https://kf.other.org/#/forms/zz99/summary"]),
            settings(),
        )
        .unwrap();
        assert_eq!(opts.asset_uid, "zz99");
        assert_eq!(opts.api_url, "https://kf.other.org");
    }

    #[test]
    fn test_missing_token_is_fatal() {
        let err = DownloadOptions::from_parts(
            cli(&["-a", "uid1", "--api-url", "http://api.local"]),
            Settings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DownloaderError::Config(_)));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        assert!(DownloadOptions::from_parts(cli(&["-a", "u", "-c", "0"]), settings()).is_err());
        assert!(DownloadOptions::from_parts(cli(&["-a", "u", "-v", "4"]), settings()).is_err());
        assert!(
            DownloadOptions::from_parts(cli(&["-a", "u", "--throttle=-1"]), settings()).is_err()
        );
    }

    #[test]
    fn test_query_params_and_question_list() {
        let opts = DownloadOptions::from_parts(
            cli(&["-a", "u", "-l", "30", "-q", r#"{"_submitted_by":"x"}"#, "-Q", "photo, audio,,"]),
            settings(),
        )
        .unwrap();
        assert_eq!(
            opts.query_params(),
            vec![
                ("format", "json".to_string()),
                ("limit", "30".to_string()),
                ("query", r#"{"_submitted_by":"x"}"#.to_string()),
            ]
        );
        assert_eq!(opts.question_list(), vec!["photo", "audio"]);

        let plain = DownloadOptions::from_parts(cli(&["-a", "u"]), settings()).unwrap();
        assert_eq!(plain.query_params().len(), 2);
        assert!(plain.question_list().is_empty());
    }

    #[tokio::test]
    async fn test_load_settings_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"kf_url": "https://kf", "kc_url": "https://kc", "token": "t"}}"#).unwrap();

        let settings = load_settings(file.path(), true).await.unwrap();
        assert_eq!(settings.kf_url.as_deref(), Some("https://kf"));
        assert_eq!(settings.token.as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn test_load_settings_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kobo.json");

        let settings = load_settings(&path, false).await.unwrap();
        assert!(settings.token.is_none());
        assert!(load_settings(&path, true).await.is_err());
    }

    #[tokio::test]
    async fn test_load_settings_malformed_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            load_settings(file.path(), true).await,
            Err(DownloaderError::DecodeError(_))
        ));
    }
}
