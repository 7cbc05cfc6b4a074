// src/repository/fetch.rs

//! Package downloading
//!
//! [`Fetcher`] is the byte-transfer capability the sync loop depends on.
//! Two implementations are provided: an in-process HTTP client and an
//! external downloader command. Both write to `{name}.part`, flush the file
//! to disk and rename it over the target, so a file under its final name is
//! always a completed download.

use crate::cancel::CancellationToken;
use crate::config::Architecture;
use crate::error::{Error, Result};
use crate::report::Reporter;
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Attempts per file before the failure is handed back to the sync loop
const MAX_ATTEMPTS: u32 = 3;

/// Retry delay in milliseconds, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// Size of each read from the response body
const CHUNK_SIZE: usize = 1024 * 1024;

const USER_AGENT: &str = concat!("archmirror/", env!("CARGO_PKG_VERSION"));

/// Callback receiving `(bytes_so_far, total_bytes)` during a transfer
pub type Progress<'a> = dyn FnMut(u64, Option<u64>) + 'a;

/// Retrieves one remote file into a local path
pub trait Fetcher {
    /// Download `url` to `dest`, returning the number of bytes written.
    ///
    /// Transient failures are retried internally; an `Err(DownloadError)`
    /// means every attempt failed and `dest` was left untouched.
    fn fetch(
        &mut self,
        url: &str,
        dest: &Path,
        progress: &mut Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

/// Temporary name a download is written under
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Flush `part` to disk and move it over `dest`
fn persist(part: &Path, dest: &Path) -> Result<()> {
    File::open(part)?.sync_all()?;
    fs::rename(part, dest)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Run `attempt` until it succeeds, fails with a non-transient error, or the
/// attempt budget runs out. The partial file is removed on failure.
fn with_retries(
    max_attempts: u32,
    url: &str,
    dest: &Path,
    cancel: &CancellationToken,
    mut attempt: impl FnMut(&Path) -> Result<u64>,
) -> Result<u64> {
    let part = part_path(dest);
    let mut tries = 0;
    loop {
        tries += 1;
        cancel.check()?;
        let result = attempt(&part).and_then(|written| {
            persist(&part, dest)?;
            Ok(written)
        });
        match result {
            Ok(written) => return Ok(written),
            Err(Error::DownloadError(msg)) if tries < max_attempts => {
                warn!("Download attempt {} of {} failed: {}, retrying...", tries, url, msg);
                std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * tries as u64));
            }
            Err(e) => {
                remove_if_exists(&part)?;
                return Err(match e {
                    Error::DownloadError(msg) => Error::DownloadError(format!(
                        "Failed to download {} after {} attempts: {}",
                        url, tries, msg
                    )),
                    other => other,
                });
            }
        }
    }
}

/// HTTP client wrapper with retry support
pub struct HttpFetcher {
    client: Client,
    max_attempts: u32,
}

impl HttpFetcher {
    /// Create a new fetcher; its connection pool is reused for every file
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_attempts: MAX_ATTEMPTS,
        })
    }

    fn fetch_once(
        &self,
        url: &str,
        part: &Path,
        progress: &mut Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!("HTTP {} from {}", response.status(), url)));
        }

        let total = response.content_length();
        let mut file = File::create(part)?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;

        loop {
            cancel.check()?;
            let read = response
                .read(&mut buf)
                .map_err(|e| Error::DownloadError(format!("Failed to read response: {}", e)))?;
            if read == 0 {
                break;
            }
            file.write_all(&buf[..read])?;
            written += read as u64;
            progress(written, total);
        }
        file.flush()?;

        if let Some(total) = total.filter(|&total| total != written) {
            return Err(Error::DownloadError(format!(
                "Truncated response from {}: {} of {} bytes",
                url, written, total
            )));
        }
        Ok(written)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(
        &mut self,
        url: &str,
        dest: &Path,
        progress: &mut Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        debug!("Downloading {} to {}", url, dest.display());
        with_retries(self.max_attempts, url, dest, cancel, |part| {
            self.fetch_once(url, part, progress, cancel)
        })
    }
}

/// Fetcher delegating the transfer to an external program such as curl or wget.
///
/// Arguments may contain the placeholders `{url}` and `{dest}`.
pub struct CommandFetcher {
    program: String,
    args: Vec<String>,
    max_attempts: u32,
}

impl CommandFetcher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    /// `curl --fail --location --silent --show-error --output {dest} {url}`
    pub fn curl() -> Self {
        Self::new(
            "curl",
            ["--fail", "--location", "--silent", "--show-error", "--output", "{dest}", "{url}"]
                .iter()
                .map(|arg| arg.to_string())
                .collect(),
        )
    }

    /// Parse a command line like `wget -q -O {dest} {url}`
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::ConfigError("Download command is empty".to_string()))?;
        let args: Vec<String> = parts.collect();
        if !args.iter().any(|arg| arg.contains("{dest}")) {
            return Err(Error::ConfigError(format!(
                "Download command '{}' has no {{dest}} placeholder",
                command
            )));
        }
        Ok(Self::new(program, args))
    }

    fn render_args(&self, url: &str, part: &Path) -> Vec<String> {
        let dest = part.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{url}", url).replace("{dest}", &dest))
            .collect()
    }

    fn fetch_once(&self, url: &str, part: &Path, progress: &mut Progress<'_>) -> Result<u64> {
        let args = self.render_args(url, part);
        debug!("Running {} {}", self.program, args.join(" "));

        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| Error::InitError(format!("Failed to run {}: {}", self.program, e)))?;

        if !status.success() {
            return Err(Error::DownloadError(format!("{} exited with {}", self.program, status)));
        }

        let written = fs::metadata(part)
            .map_err(|e| {
                Error::DownloadError(format!("{} produced no output file: {}", self.program, e))
            })?
            .len();
        progress(written, Some(written));
        Ok(written)
    }
}

impl Fetcher for CommandFetcher {
    fn fetch(
        &mut self,
        url: &str,
        dest: &Path,
        progress: &mut Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        with_retries(self.max_attempts, url, dest, cancel, |part| {
            self.fetch_once(url, part, progress)
        })
    }
}

/// Files of one download batch that could not be fetched
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub fetched: Vec<String>,
    pub failed: Vec<String>,
}

/// Remove any local copies of `names` and fetch them again from `mirror`.
///
/// Per-file download failures are logged and listed in the summary; the next
/// verification pass reports the file as missing. Filesystem errors and
/// cancellation propagate.
#[allow(clippy::too_many_arguments)]
pub fn download_files(
    fetcher: &mut dyn Fetcher,
    work_dir: &Path,
    mirror: &str,
    arch: Architecture,
    branch: &str,
    names: &[String],
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
) -> Result<DownloadSummary> {
    for name in names {
        let path = work_dir.join(name);
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path)?,
            Ok(_) => fs::remove_file(&path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    let count = names.len();
    let mut summary = DownloadSummary::default();

    for (index, name) in names.iter().enumerate() {
        cancel.check()?;
        let index = index + 1;
        let url = arch.file_url(mirror, branch, name);
        let dest = work_dir.join(name);

        let mut progress =
            |done: u64, total: Option<u64>| reporter.download_progress(name, index, count, done, total);

        match fetcher.fetch(&url, &dest, &mut progress, cancel) {
            Ok(written) => {
                debug!("Fetched {} ({} bytes)", name, written);
                reporter.download_finished(name, index, count);
                summary.fetched.push(name.clone());
            }
            Err(Error::DownloadError(msg)) => {
                warn!("{}", msg);
                reporter.status(&format!("[{}/{}] {}: failed: {}", index, count, name, msg));
                summary.failed.push(name.clone());
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        "Downloaded {} of {} files for {}/{}",
        summary.fetched.len(),
        count,
        arch,
        branch
    );
    Ok(summary)
}
