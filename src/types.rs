use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// One page of the `/api/v2/assets/{uid}/data` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub next: Option<String>,
    pub results: Vec<Submission>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    #[serde(rename = "_uuid")]
    pub uuid: String,
    #[serde(rename = "_attachments", default)]
    pub attachments: Vec<Attachment>,
    /// Every other field of the submission, keyed by question name.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Submission {
    /// Value of a question field as text, `None` when absent or null.
    pub fn field_text(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub download_url: String,
    /// Server side path; only the last segment is the display name.
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTask {
    pub url: String,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl Stats {
    pub fn total(&self) -> u64 {
        self.successful + self.failed + self.skipped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    Failed,
}
