//! HTTP downloads with a URL-keyed, write-once disk cache.

use crate::config::DownloadConfig;
use crate::types::{CalError, CalResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Cache file name for a URL: scheme dropped, separators flattened
pub fn cache_name(url: &str) -> String {
    let stripped = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    stripped
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Outcome of one attempt, distinguishing faults worth retrying
enum Attempt {
    Done(Vec<u8>),
    Transient(String),
    Fatal(String),
}

/// Blocking HTTP client with retries and a disk cache
pub struct Downloader {
    client: reqwest::blocking::Client,
    cache_dir: PathBuf,
    max_retries: u32,
    backoff: Duration,
}

impl Downloader {
    pub fn new<P: AsRef<Path>>(cache_dir: P, config: &DownloadConfig) -> CalResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("buoycal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                CalError::RemoteFetchFailed(format!("failed to create HTTP client: {}", e))
            })?;
        Ok(Self {
            client,
            cache_dir: cache_dir.as_ref().to_path_buf(),
            max_retries: config.max_retries.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        })
    }

    pub fn cache_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(cache_name(url))
    }

    pub fn is_cached(&self, url: &str) -> bool {
        self.cache_path(url).is_file()
    }

    /// Path of the cached artifact for `url`, downloading it first if needed
    pub fn fetch(&self, url: &str) -> CalResult<PathBuf> {
        let path = self.cache_path(url);
        if path.is_file() {
            log::debug!("Using cached {}", path.display());
            return Ok(path);
        }

        log::info!("Downloading {}", url);
        let bytes = self.download_with_retries(url)?;
        self.store(&path, &bytes)?;
        log::info!("Cached {} bytes at {}", bytes.len(), path.display());
        Ok(path)
    }

    /// Try each URL in turn, returning the first that downloads
    pub fn fetch_first(&self, urls: &[String]) -> CalResult<PathBuf> {
        let mut last_error = None;
        for url in urls {
            match self.fetch(url) {
                Ok(path) => return Ok(path),
                Err(e) => {
                    log::debug!("{} unavailable: {}", url, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| CalError::RemoteFetchFailed("no URLs to fetch".to_string())))
    }

    fn download_with_retries(&self, url: &str) -> CalResult<Vec<u8>> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_retries {
            log::debug!("Download attempt {} of {}", attempt, self.max_retries);
            match self.try_once(url) {
                Attempt::Done(bytes) => return Ok(bytes),
                Attempt::Fatal(msg) => return Err(CalError::RemoteFetchFailed(msg)),
                Attempt::Transient(msg) => {
                    last_error = msg;
                    if attempt < self.max_retries {
                        let wait = self.backoff * 2u32.saturating_pow(attempt - 1);
                        log::warn!(
                            "Download attempt {} failed ({}), retrying in {:?}",
                            attempt,
                            last_error,
                            wait
                        );
                        std::thread::sleep(wait);
                    }
                }
            }
        }
        Err(CalError::RemoteFetchFailed(format!(
            "{} after {} attempts: {}",
            url, self.max_retries, last_error
        )))
    }

    fn try_once(&self, url: &str) -> Attempt {
        let response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                return Attempt::Transient(format!("HTTP request failed: {}", e))
            }
            Err(e) => return Attempt::Fatal(format!("HTTP request failed: {}", e)),
        };

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Attempt::Transient(format!("HTTP {}: {}", status.as_u16(), url));
        }
        if !status.is_success() {
            return Attempt::Fatal(format!("HTTP {}: {}", status.as_u16(), url));
        }

        match response.bytes() {
            Ok(bytes) => Attempt::Done(bytes.to_vec()),
            Err(e) => Attempt::Transient(format!("failed to read response body: {}", e)),
        }
    }

    /// Write-once: bytes land in a temp file in the cache directory, then
    /// are renamed into place
    fn store(&self, path: &Path, bytes: &[u8]) -> CalResult<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        match tmp.persist_noclobber(path) {
            Ok(_) => Ok(()),
            // Another writer got there first; its copy is equivalent
            Err(_) if path.is_file() => Ok(()),
            Err(e) => Err(CalError::Io(e.error)),
        }
    }
}
