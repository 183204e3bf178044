// src/download/mod.rs

//! Parallel batch downloader
//!
//! Each [`DownloadJob`] carries an ordered mirror list; a job races one URL
//! at a time through that list and fails only when the whole list is
//! exhausted. Jobs run concurrently (one worker thread each), every job
//! keeps live progress state, and progress paints are rate-limited so the
//! terminal is repainted at most every half second. A job that ultimately
//! fails leaves no partial file behind.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default connect timeout for HTTP requests
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum interval between progress paints and speed samples
const PAINT_INTERVAL: Duration = Duration::from_millis(500);

/// Streaming buffer size (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// One download task and its live progress state
#[derive(Debug)]
pub struct DownloadJob {
    // --- Inputs ---
    pub urls: Vec<String>,
    pub destination: PathBuf,
    pub display_name: String,

    // --- Live state ---
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub speed_bps: f64,
    pub finished: bool,
    pub error_message: Option<String>,
}

impl DownloadJob {
    pub fn new(urls: Vec<String>, destination: PathBuf, display_name: String) -> Self {
        Self {
            urls,
            destination,
            display_name,
            total_bytes: 0,
            downloaded_bytes: 0,
            speed_bps: 0.0,
            finished: false,
            error_message: None,
        }
    }
}

/// Parallel downloader over a shared HTTP client
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::DownloadFailed(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Download every job concurrently, updating each job's state in place
    ///
    /// Returns `true` iff every job finished successfully. The caller must
    /// not touch job state while this call is running.
    pub fn download_all(&self, jobs: &mut [DownloadJob]) -> bool {
        if jobs.is_empty() {
            return true;
        }

        let multi = if std::io::stdout().is_terminal() {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        std::thread::scope(|scope| {
            for job in jobs.iter_mut() {
                let client = &self.client;
                let bar = multi.add(ProgressBar::new(0));
                scope.spawn(move || run_job(client, &bar, job));
            }
        });

        jobs.iter().all(|job| job.error_message.is_none())
    }

    /// Probe the first mirror of every job with a header-only request and
    /// return the summed content length
    ///
    /// Returns a negative sentinel if any probe fails or reports no length.
    pub fn total_download_size(&self, jobs: &[DownloadJob]) -> i64 {
        let mut total: i64 = 0;
        for job in jobs {
            let Some(url) = job.urls.first() else {
                return -1;
            };
            let length = self
                .client
                .head(url)
                .send()
                .ok()
                .filter(|resp| resp.status().is_success())
                .and_then(|resp| resp.content_length());
            match length {
                Some(len) => total += len as i64,
                None => return -1,
            }
        }
        total
    }
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg:<28} {bytes:>10}/{total_bytes:<10} [{bar:20}] {percent:>3}%",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

/// Drive one job: try each mirror in order, clean up on total failure
fn run_job(client: &Client, bar: &ProgressBar, job: &mut DownloadJob) {
    bar.set_style(progress_style());
    bar.set_message(job.display_name.clone());

    let mut last_error = String::from("no mirrors configured");

    for url in &job.urls {
        debug!("fetching {} -> {}", url, job.destination.display());
        match fetch_to_file(
            client,
            url,
            &job.destination,
            bar,
            &mut job.total_bytes,
            &mut job.downloaded_bytes,
            &mut job.speed_bps,
        ) {
            Ok(()) => {
                job.finished = true;
                job.speed_bps = 0.0;
                bar.finish();
                return;
            }
            Err(e) => {
                warn!("mirror failed for '{}': {e}", job.display_name);
                last_error = e.to_string();
                job.downloaded_bytes = 0;
                job.total_bytes = 0;
            }
        }
    }

    // Every mirror failed: the destination must not survive half-written.
    if let Err(e) = fs::remove_file(&job.destination) {
        if job.destination.exists() {
            warn!(
                "failed to clean up partial download {}: {e}",
                job.destination.display()
            );
        }
    }
    job.finished = true;
    job.speed_bps = 0.0;
    job.error_message = Some(last_error.clone());
    bar.abandon_with_message(format!("{}: {last_error}", job.display_name));
}

/// One attempt against one URL, streaming to the destination file
fn fetch_to_file(
    client: &Client,
    url: &str,
    destination: &Path,
    bar: &ProgressBar,
    total_bytes: &mut u64,
    downloaded_bytes: &mut u64,
    speed_bps: &mut f64,
) -> Result<()> {
    let mut response = client
        .get(url)
        .send()
        .map_err(|e| Error::DownloadFailed(format!("{url}: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::DownloadFailed(format!(
            "HTTP {} from {url}",
            response.status()
        )));
    }

    *total_bytes = response.content_length().unwrap_or(0);
    bar.set_length(*total_bytes);

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    // Creating truncates whatever a previous mirror attempt left behind.
    let mut file = File::create(destination)?;

    *downloaded_bytes = 0;
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
    let mut window_start = Instant::now();
    let mut window_bytes: u64 = 0;

    loop {
        let n = response.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n])?;
        *downloaded_bytes += n as u64;

        let elapsed = window_start.elapsed();
        if elapsed >= PAINT_INTERVAL {
            *speed_bps = (*downloaded_bytes - window_bytes) as f64 / elapsed.as_secs_f64();
            window_bytes = *downloaded_bytes;
            window_start = Instant::now();
            bar.set_position(*downloaded_bytes);
        }
    }

    file.sync_all()?;
    bar.set_position(*downloaded_bytes);
    Ok(())
}
