// src/repository/countme.rs

//! Anonymous usage counting ("countme")
//!
//! At most once per week-long window a repository's metalink or
//! mirrorlist request carries `countme=<bucket>`, where the bucket says
//! roughly how long this system has been counting (not who it is).
//! Windows are aligned to a fixed offset from the Unix epoch, so every
//! system counts in the same windows, and the request that is counted is
//! chosen randomly among the first few of the window.
//!
//! The cookie file holds `version epoch window budget`:
//! - `epoch`: start of the first counted window (0 = never counted)
//! - `window`: start of the last counted window
//! - `budget`: requests left before the next count (-1 = not drawn)

use crate::error::{Error, Result};
use rand::Rng;
use std::fs;
use std::path::Path;
use tracing::{debug, trace};

pub const COUNTME_VERSION: i64 = 0;

/// Window length: one week
pub const COUNTME_WINDOW: i64 = 7 * 24 * 60 * 60;

/// Window alignment: windows start on Mondays (UTC)
pub const COUNTME_OFFSET: i64 = 345_600;

/// Upper bound of the random request budget within a window
pub const COUNTME_BUDGET: i64 = 4;

/// Bucket boundaries in windows since the first count
pub const COUNTME_BUCKETS: [i64; 3] = [2, 5, 25];

/// Cookie file name in the repository's persist directory
pub const COUNTME_COOKIE: &str = "countme";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountmeCookie {
    pub version: i64,
    pub epoch: i64,
    pub window: i64,
    pub budget: i64,
}

impl Default for CountmeCookie {
    fn default() -> Self {
        Self {
            version: COUNTME_VERSION,
            epoch: 0,
            window: COUNTME_OFFSET,
            budget: -1,
        }
    }
}

impl CountmeCookie {
    /// Parse cookie text; `None` for other versions or damaged content
    pub fn parse(content: &str) -> Option<Self> {
        let fields: Vec<i64> = content
            .split_whitespace()
            .map(|f| f.parse().ok())
            .collect::<Option<_>>()?;
        let [version, epoch, window, budget] = fields[..] else {
            return None;
        };
        (version == COUNTME_VERSION).then_some(Self {
            version,
            epoch,
            window,
            budget,
        })
    }

    /// Load the cookie, starting fresh if it is missing or unusable
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|| {
                debug!("Ignoring unusable countme cookie {}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(
            path,
            format!("{} {} {} {}", COUNTME_VERSION, self.epoch, self.window, self.budget),
        )
        .map_err(|e| Error::Filesystem(format!("Cannot write {}: {e}", path.display())))
    }

    /// Account for one request at time `now`
    ///
    /// Returns the bucket to report if this request is the one counted
    /// in the current window.
    pub fn record_request<R: Rng>(&mut self, now: i64, rng: &mut R) -> Option<u32> {
        let delta = now - self.window;
        if delta < COUNTME_WINDOW {
            trace!("countme: still inside the counted window");
            return None;
        }

        if self.budget < 0 {
            self.budget = rng.gen_range(1..=COUNTME_BUDGET);
        }
        self.budget -= 1;
        if self.budget > 0 {
            return None;
        }

        self.window = now - delta % COUNTME_WINDOW;
        if self.epoch == 0 {
            self.epoch = self.window;
        }
        let step = (self.window - self.epoch) / COUNTME_WINDOW;
        let bucket = COUNTME_BUCKETS
            .iter()
            .position(|&boundary| step < boundary)
            .unwrap_or(COUNTME_BUCKETS.len())
            + 1;
        self.budget = -1;

        Some(bucket as u32)
    }
}
