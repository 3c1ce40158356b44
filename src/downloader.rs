use crate::config::DownloadOptions;
use crate::error::DownloaderError;
use crate::selector;
use crate::types::{DownloadTask, FetchOutcome, Page, Stats, Submission};
use colored::*;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use reqwest::header::AUTHORIZATION;
use std::collections::HashSet;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use url::Url;

/// Upper bound on the write buffer reserved up front; larger chunks grow on demand.
const MAX_CHUNK_RESERVE: usize = 64 * 1024;

pub struct Downloader {
    client: reqwest::Client,
    options: DownloadOptions,
    progress: ProgressBar,
}

impl Downloader {
    pub fn new(options: DownloadOptions) -> Self {
        let progress = if options.verbosity >= 1 {
            Self::create_progress_bar()
        } else {
            ProgressBar::hidden()
        };
        Self {
            client: reqwest::Client::new(),
            options,
            progress,
        }
    }

    /// Follows the listing from the first page until no `next` link remains.
    ///
    /// A page request that fails ends the walk with whatever was counted so far.
    pub async fn walk(&self) -> Result<Stats, DownloaderError> {
        let mut stats = Stats::default();
        let params = self.options.query_params();
        let mut next_url = Some(self.options.data_url());
        let mut page_number = 0usize;

        while let Some(url) = next_url.take() {
            page_number += 1;
            self.progress.set_message(format!("page {}", page_number));
            self.progress.tick();

            let Some(page) = self.fetch_page(&url, &params).await? else {
                break;
            };
            if page.results.is_empty() {
                debug!("Page {} has no results", page_number);
                break;
            }

            info!("Page {}: {} submissions", page_number, page.results.len());
            for submission in &page.results {
                self.process_submission(submission, &mut stats).await?;
            }

            next_url = page.next;
        }

        self.progress.finish_and_clear();
        info!(
            "Walk finished after {} pages: {} successful, {} failed, {} skipped",
            page_number, stats.successful, stats.failed, stats.skipped
        );
        Ok(stats)
    }

    async fn fetch_page(
        &self,
        url: &str,
        params: &[(&'static str, String)],
    ) -> Result<Option<Page>, DownloaderError> {
        debug!("Requesting page {}", url);
        let resp = match self
            .client
            .get(url)
            .query(&missing_params(url, params))
            .header(AUTHORIZATION, self.options.auth_header())
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Page request failed for {}: {}", url, e);
                return Ok(None);
            }
        };

        if !resp.status().is_success() {
            warn!("HTTP error: {} for page URL: {}, stopping", resp.status(), url);
            return Ok(None);
        }

        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Page body interrupted for {}: {}, stopping", url, e);
                return Ok(None);
            }
        };
        let page = serde_json::from_slice(&body)?;
        Ok(Some(page))
    }

    async fn process_submission(
        &self,
        submission: &Submission,
        stats: &mut Stats,
    ) -> Result<(), DownloaderError> {
        if submission.attachments.is_empty() {
            return Ok(());
        }

        let Some(dir_name) = selector::path_component(&submission.uuid) else {
            warn!(
                "Submission uuid {:?} is not a usable directory name, skipping it",
                submission.uuid
            );
            return Ok(());
        };
        let submission_dir = self.options.asset_dir().join(dir_name);
        fs::create_dir_all(&submission_dir).await?;

        for task in selector::select(submission, &submission_dir, &self.options) {
            debug!("Download task: {} -> {}", task.url, task.output_path.display());
            if fs::try_exists(&task.output_path).await? {
                let line = format!("File already exists, skipping: {}", task.output_path.display());
                self.report(line.yellow());
                stats.skipped += 1;
                continue;
            }
            self.fetch_media(&task, stats).await?;
        }
        Ok(())
    }

    /// Streams one attachment to its destination and records the outcome.
    ///
    /// Request failures are counted, filesystem failures are returned. A stream
    /// that breaks off midway leaves the partial file in place.
    pub async fn fetch_media(
        &self,
        task: &DownloadTask,
        stats: &mut Stats,
    ) -> Result<FetchOutcome, DownloaderError> {
        self.progress.set_message(format!("{}", task.output_path.display()));
        self.progress.tick();

        let resp = match self
            .client
            .get(&task.url)
            .header(AUTHORIZATION, self.options.auth_header())
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                error!("Download failed for {}: {}", task.url, e);
                return Ok(self.record_failure(task, stats));
            }
        };

        if !resp.status().is_success() {
            error!("HTTP error: {} for URL: {}", resp.status(), task.url);
            return Ok(self.record_failure(task, stats));
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&task.output_path)
            .await?;

        let chunk_size = self.options.chunk_size;
        let mut buffer = Vec::with_capacity(chunk_size.min(MAX_CHUNK_RESERVE));
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    file.write_all(&buffer).await?;
                    file.flush().await?;
                    error!("Stream interrupted for {}: {}", task.url, e);
                    return Ok(self.record_failure(task, stats));
                }
            };

            let mut rest = &chunk[..];
            while !rest.is_empty() {
                let take = (chunk_size - buffer.len()).min(rest.len());
                buffer.extend_from_slice(&rest[..take]);
                rest = &rest[take..];
                if buffer.len() == chunk_size {
                    file.write_all(&buffer).await?;
                    buffer.clear();
                }
            }
        }
        if !buffer.is_empty() {
            file.write_all(&buffer).await?;
        }
        file.flush().await?;

        self.report(format!("Success: {}", task.output_path.display()).green());
        stats.successful += 1;

        if !self.options.throttle.is_zero() {
            debug!("Throttling for {:?}", self.options.throttle);
            sleep(self.options.throttle).await;
        }

        Ok(FetchOutcome::Success)
    }

    fn record_failure(&self, task: &DownloadTask, stats: &mut Stats) -> FetchOutcome {
        self.report(format!("Fail: {}", task.output_path.display()).red());
        stats.failed += 1;
        FetchOutcome::Failed
    }

    fn report(&self, line: ColoredString) {
        if self.options.verbosity == 3 {
            self.progress.suspend(|| println!("{}", line));
        }
    }

    fn create_progress_bar() -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb
    }
}

/// Query parameters not already carried by `url`. `next` links embed the
/// original query, so they only get what they lack.
fn missing_params(url: &str, params: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
    let present: HashSet<String> = Url::parse(url)
        .map(|u| u.query_pairs().map(|(k, _)| k.into_owned()).collect())
        .unwrap_or_default();
    params
        .iter()
        .filter(|(key, _)| !present.contains(*key))
        .cloned()
        .collect()
}
