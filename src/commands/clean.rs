// src/commands/clean.rs
//! Cache cleanup

use crate::cli::CleanTarget;
use anyhow::Result;
use reposync::Config;
use reposync::repository::cache::ATTRIBUTE_EXPIRED;
use reposync::repository::{CacheLock, RemoveStatistics, RepoCache};
use tracing::{info, warn};

/// Remove or expire cached data of every repository cache on disk
pub fn cmd_clean(config: &Config, what: CleanTarget) -> Result<()> {
    let cachedir = &config.main.cachedir;
    let _lock = CacheLock::acquire(cachedir)?;
    let caches = RepoCache::list(cachedir)?;
    info!("Cleaning {:?} in {} caches", what, caches.len());

    if what == CleanTarget::ExpireCache {
        let mut expired = 0;
        for cache in &caches {
            match cache.write_attribute(ATTRIBUTE_EXPIRED, "1") {
                Ok(()) => expired += 1,
                Err(e) => warn!("Cannot expire {}: {}", cache.path().display(), e),
            }
        }
        println!("Cache was expired for {expired} repositories.");
        return Ok(());
    }

    let mut stats = RemoveStatistics::default();
    for cache in &caches {
        stats += match what {
            CleanTarget::Metadata => cache.remove_metadata() + cache.remove_binary_indices(),
            CleanTarget::Packages => cache.remove_packages(),
            CleanTarget::Dbcache => cache.remove_binary_indices(),
            CleanTarget::All => cache.remove_all(),
            CleanTarget::ExpireCache => RemoveStatistics::default(),
        };
    }

    println!(
        "Removed {} files, {} directories. {} errors occurred.",
        stats.files_removed, stats.dirs_removed, stats.errors
    );
    Ok(())
}
