// src/progress.rs

//! Transfer progress reporting
//!
//! The transport reports every download through the [`TransferCallbacks`]
//! trait. Implementations:
//! - `CliCallbacks`: one indicatif progress bar per transfer
//! - `LogCallbacks`: logs transfers to tracing
//! - `SilentCallbacks`: no-op for scripted/quiet modes and tests
//!
//! Callbacks are invoked from the download worker threads, so every
//! implementation is `Send + Sync`.

use crate::error::Error;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Final state of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Successful,
    Failed,
}

/// Hooks invoked by the transport during a transfer
pub trait TransferCallbacks: Send + Sync {
    /// A transfer is starting; `total` is the size if known
    fn on_start(&self, _description: &str, _total: Option<u64>) {}

    /// Bytes downloaded so far
    fn on_progress(&self, _description: &str, _downloaded: u64) {}

    /// A mirror failed; the transport moves on to the next one
    fn on_mirror_failure(&self, _description: &str, _url: &str, _error: &Error) {}

    fn on_end(&self, _description: &str, _status: TransferStatus, _message: Option<&str>) {}
}

/// Ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentCallbacks;

impl TransferCallbacks for SilentCallbacks {}

/// Reports transfers through tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCallbacks;

impl TransferCallbacks for LogCallbacks {
    fn on_start(&self, description: &str, total: Option<u64>) {
        match total {
            Some(total) => debug!("Downloading {} ({} bytes)", description, total),
            None => debug!("Downloading {}", description),
        }
    }

    fn on_mirror_failure(&self, description: &str, url: &str, error: &Error) {
        warn!("{}: mirror {} failed: {}", description, url, error);
    }

    fn on_end(&self, description: &str, status: TransferStatus, message: Option<&str>) {
        match status {
            TransferStatus::Successful => debug!("Downloaded {}", description),
            TransferStatus::Failed => {
                info!("Download of {} failed: {}", description, message.unwrap_or("unknown error"))
            }
        }
    }
}

/// Progress bars on the terminal
pub struct CliCallbacks {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl CliCallbacks {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn with_bar(&self, description: &str, f: impl FnOnce(&ProgressBar)) {
        if let Ok(bars) = self.bars.lock() {
            if let Some(bar) = bars.get(description) {
                f(bar);
            }
        }
    }
}

impl Default for CliCallbacks {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferCallbacks for CliCallbacks {
    fn on_start(&self, description: &str, total: Option<u64>) {
        let bar = match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("{msg:30!} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec}")
                {
                    bar.set_style(style.progress_chars("=> "));
                }
                bar
            }
            None => ProgressBar::new_spinner(),
        };
        let bar = self.multi.add(bar);
        bar.set_message(description.to_string());
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(description.to_string(), bar);
        }
    }

    fn on_progress(&self, description: &str, downloaded: u64) {
        self.with_bar(description, |bar| bar.set_position(downloaded));
    }

    fn on_mirror_failure(&self, description: &str, url: &str, error: &Error) {
        let _ = self.multi.println(format!("{description}: mirror {url} failed: {error}"));
    }

    fn on_end(&self, description: &str, status: TransferStatus, message: Option<&str>) {
        let bar = self.bars.lock().ok().and_then(|mut bars| bars.remove(description));
        if let Some(bar) = bar {
            match status {
                TransferStatus::Successful => bar.finish_and_clear(),
                TransferStatus::Failed => {
                    bar.abandon_with_message(format!(
                        "{description}: {}",
                        message.unwrap_or("failed")
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_callbacks_track_bars() {
        let callbacks = CliCallbacks::new();
        callbacks.on_start("updates: repomd.xml", Some(100));
        callbacks.on_progress("updates: repomd.xml", 50);
        assert_eq!(callbacks.bars.lock().unwrap().len(), 1);

        callbacks.on_end("updates: repomd.xml", TransferStatus::Successful, None);
        assert!(callbacks.bars.lock().unwrap().is_empty());

        // Unknown transfers are ignored
        callbacks.on_progress("never started", 1);
        callbacks.on_end("never started", TransferStatus::Failed, Some("boom"));
    }
}
