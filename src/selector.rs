use crate::config::DownloadOptions;
use crate::types::{Attachment, DownloadTask, Submission};
use log::{debug, warn};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use url::Url;

static INVALID_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^-\w.]").expect("filename pattern is valid"));

static MEDIA_FILE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(media_file=.*)").expect("media_file pattern is valid"));

/// Makes a string safe to use as a file name.
///
/// Surrounding whitespace is trimmed, spaces become underscores and anything
/// other than word characters, `-` and `.` is dropped.
pub fn get_valid_filename(name: &str) -> String {
    let s = name.trim().replace(' ', "_");
    INVALID_FILENAME_CHARS.replace_all(&s, "").into_owned()
}

/// Sanitised single path component, `None` if nothing usable is left.
///
/// Guards against names that would resolve to the parent directory itself.
pub fn path_component(name: &str) -> Option<String> {
    let name = get_valid_filename(name);
    match name.as_str() {
        "" | "." | ".." => None,
        _ => Some(name),
    }
}

/// Last `/` separated segment of a server side path.
pub fn get_filename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Points a download URL at the media host, keeping its `media_file=` fragment.
///
/// Returns `None` when the URL carries no `media_file` parameter.
pub fn rewrite_download_url(url: &str, media_url: &str) -> Option<String> {
    let caps = MEDIA_FILE_PARAM.captures(url)?;
    Some(format!("{}/media/original?{}", media_url.trim_end_matches('/'), &caps[1]))
}

/// Final URL for an attachment. Relative URLs are resolved against the API host.
pub fn resolve_download_url(attachment: &Attachment, options: &DownloadOptions) -> String {
    if let Some(media_url) = &options.media_url {
        if let Some(rewritten) = rewrite_download_url(&attachment.download_url, media_url) {
            return rewritten;
        }
        debug!("No media_file parameter in {}, using it as is", attachment.download_url);
    }

    match Url::parse(&attachment.download_url) {
        Ok(url) => url.to_string(),
        Err(_) => Url::parse(&options.api_url)
            .and_then(|base| base.join(&attachment.download_url))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| attachment.download_url.clone()),
    }
}

/// Sanitised file names referenced by the given question fields.
fn referenced_filenames(submission: &Submission, questions: &[&str]) -> HashSet<String> {
    questions
        .iter()
        .filter_map(|name| submission.field_text(name))
        .map(|value| get_valid_filename(&value))
        .collect()
}

/// Attachments of `submission` that qualify for download, mapped to their
/// destination under `submission_dir`.
pub fn select(
    submission: &Submission,
    submission_dir: &Path,
    options: &DownloadOptions,
) -> Vec<DownloadTask> {
    let questions = options.question_list();
    let wanted = (!questions.is_empty()).then(|| referenced_filenames(submission, &questions));

    submission
        .attachments
        .iter()
        .filter_map(|attachment| {
            let Some(filename) = path_component(get_filename(&attachment.filename)) else {
                warn!(
                    "Attachment {:?} of submission {} has no usable file name, ignoring it",
                    attachment.filename, submission.uuid
                );
                return None;
            };
            if let Some(wanted) = &wanted {
                if !wanted.contains(&filename) {
                    debug!("Attachment {} not referenced by {:?}", filename, questions);
                    return None;
                }
            }
            Some(DownloadTask {
                url: resolve_download_url(attachment, options),
                output_path: submission_dir.join(filename),
            })
        })
        .collect()
}
