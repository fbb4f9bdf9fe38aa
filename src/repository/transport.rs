// src/repository/transport.rs

//! Content transfer
//!
//! [`Transport`] is the seam between the synchronizer and the network.
//! [`HttpTransport`] wraps a blocking reqwest client with retry support
//! and also serves `file://` URLs and plain local paths, so local
//! repositories go through the same code path as remote ones.

use crate::error::{Error, Result};
use crate::progress::{TransferCallbacks, TransferStatus};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for HTTP requests (30 seconds)
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts against one URL for transient failures
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// A file to fetch from a list of mirrors
#[derive(Debug, Clone)]
pub struct TransferTarget<'a> {
    /// Base URLs, tried in order
    pub mirrors: &'a [String],
    /// Path relative to a mirror base URL
    pub path: &'a str,
    /// Mirrors to try before giving up (0 = all)
    pub max_mirror_tries: usize,
    /// Label passed to the callbacks
    pub description: &'a str,
}

/// Join a base URL and a relative path
pub fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Local filesystem path for `file:` URLs and absolute paths
pub fn local_path(url: &str) -> Option<PathBuf> {
    if url.starts_with('/') {
        return Some(PathBuf::from(url));
    }
    if url.starts_with("file:") {
        return url::Url::parse(url).ok()?.to_file_path().ok();
    }
    None
}

/// Performs downloads
pub trait Transport: Send + Sync {
    /// Download `url` to `dest`, returning the number of bytes written
    fn fetch(&self, url: &str, dest: &Path, callbacks: &dyn TransferCallbacks) -> Result<u64>;

    /// Download `url` into memory
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Download a target, failing over between mirrors
    ///
    /// Returns the URL the file was retrieved from.
    fn fetch_target(
        &self,
        target: &TransferTarget<'_>,
        dest: &Path,
        callbacks: &dyn TransferCallbacks,
    ) -> Result<String> {
        if target.mirrors.is_empty() {
            return Err(Error::Transport(format!(
                "No mirrors available for {}",
                target.description
            )));
        }

        let tries = match target.max_mirror_tries {
            0 => target.mirrors.len(),
            n => n.min(target.mirrors.len()),
        };

        let mut last_error = None;
        for mirror in &target.mirrors[..tries] {
            let url = join_url(mirror, target.path);
            match self.fetch(&url, dest, callbacks) {
                Ok(_) => return Ok(url),
                Err(e) => {
                    callbacks.on_mirror_failure(target.description, &url, &e);
                    last_error = Some(e);
                }
            }
        }

        let detail = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(Error::Transport(format!(
            "Cannot download {}: all mirrors were tried ({detail})",
            target.path
        )))
    }
}

/// Stream a reader to `dest`, reporting progress
fn stream_to_file<R: Read>(
    mut source: R,
    dest: &Path,
    description: &str,
    callbacks: &dyn TransferCallbacks,
) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(dest)
        .map_err(|e| Error::Filesystem(format!("Cannot create {}: {e}", dest.display())))?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
    loop {
        let bytes_read = source
            .read(&mut buffer)
            .map_err(|e| Error::Transport(format!("Failed to read {description}: {e}")))?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])
            .map_err(|e| Error::Filesystem(format!("Failed to write {}: {e}", dest.display())))?;
        downloaded += bytes_read as u64;
        callbacks.on_progress(description, downloaded);
    }
    file.sync_all()?;
    Ok(downloaded)
}

/// HTTP(S) and local file transport
pub struct HttpTransport {
    client: Client,
    max_retries: u32,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Self::with_timeout(HTTP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("reposync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Init(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    /// Send a GET, retrying connection errors and server errors
    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match self.client.get(url).send() {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if !response.status().is_server_error() => {
                    // 4xx will not get better by retrying
                    return Err(Error::Transport(format!("HTTP {} from {}", response.status(), url)));
                }
                Ok(response) => format!("HTTP {}", response.status()),
                Err(e) => e.to_string(),
            };

            if attempt >= self.max_retries {
                return Err(Error::Transport(format!(
                    "Failed to fetch {url} after {attempt} attempts: {outcome}"
                )));
            }
            warn!("Fetch attempt {} of {} failed: {}, retrying...", attempt, url, outcome);
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
        }
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: &str, dest: &Path, callbacks: &dyn TransferCallbacks) -> Result<u64> {
        debug!("Fetching {} -> {}", url, dest.display());

        let result = if let Some(path) = local_path(url) {
            File::open(&path)
                .map_err(|e| Error::Transport(format!("Cannot open {}: {e}", path.display())))
                .and_then(|file| {
                    let total = file.metadata().ok().map(|m| m.len());
                    callbacks.on_start(url, total);
                    stream_to_file(file, dest, url, callbacks)
                })
        } else {
            self.get(url).and_then(|response| {
                callbacks.on_start(url, response.content_length());
                stream_to_file(response, dest, url, callbacks)
            })
        };

        match &result {
            Ok(_) => callbacks.on_end(url, TransferStatus::Successful, None),
            Err(e) => {
                let message = e.to_string();
                callbacks.on_end(url, TransferStatus::Failed, Some(&message));
            }
        }
        result
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(path) = local_path(url) {
            return fs::read(&path)
                .map_err(|e| Error::Transport(format!("Cannot read {}: {e}", path.display())));
        }

        let response = self.get(url)?;
        let bytes = response
            .bytes()
            .map_err(|e| Error::Transport(format!("Failed to read response from {url}: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentCallbacks;
    use std::sync::Mutex;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://a/os/", "repodata/repomd.xml"), "https://a/os/repodata/repomd.xml");
        assert_eq!(join_url("https://a/os", "/repodata/repomd.xml"), "https://a/os/repodata/repomd.xml");
        assert_eq!(join_url("https://a/os/", ""), "https://a/os/");
    }

    #[test]
    fn test_local_path() {
        assert_eq!(local_path("file:///srv/repo"), Some(PathBuf::from("/srv/repo")));
        assert_eq!(local_path("/srv/repo"), Some(PathBuf::from("/srv/repo")));
        assert_eq!(local_path("https://example.org/repo"), None);
    }

    #[test]
    fn test_fetch_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.xml");
        fs::write(&src, "<repomd/>").unwrap();
        let dest = dir.path().join("out/repomd.xml");

        let transport = HttpTransport::new().unwrap();
        let url = format!("file://{}", src.display());
        let written = transport.fetch(&url, &dest, &SilentCallbacks).unwrap();
        assert_eq!(written, 9);
        assert_eq!(fs::read_to_string(&dest).unwrap(), "<repomd/>");
        assert_eq!(transport.fetch_bytes(&url).unwrap(), b"<repomd/>");
    }

    struct RecordingCallbacks(Mutex<Vec<String>>);

    impl TransferCallbacks for RecordingCallbacks {
        fn on_mirror_failure(&self, _description: &str, url: &str, _error: &Error) {
            self.0.lock().unwrap().push(url.to_string());
        }
    }

    #[test]
    fn test_mirror_failover() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good");
        fs::create_dir_all(good.join("repodata")).unwrap();
        fs::write(good.join("repodata/repomd.xml"), "ok").unwrap();

        let mirrors = vec![
            dir.path().join("missing").display().to_string(),
            good.display().to_string(),
        ];
        let callbacks = RecordingCallbacks(Mutex::new(Vec::new()));
        let transport = HttpTransport::new().unwrap();
        let dest = dir.path().join("repomd.xml");

        let target = TransferTarget {
            mirrors: &mirrors,
            path: "repodata/repomd.xml",
            max_mirror_tries: 0,
            description: "test",
        };
        let used = transport.fetch_target(&target, &dest, &callbacks).unwrap();
        assert!(used.starts_with(&mirrors[1]));
        assert_eq!(callbacks.0.lock().unwrap().len(), 1);

        // Limited to the first (broken) mirror
        let limited = TransferTarget {
            max_mirror_tries: 1,
            ..target
        };
        let err = transport.fetch_target(&limited, &dest, &callbacks).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
