// src/repository/repo.rs

//! A configured repository together with its cache and downloader

use crate::config::{ExpirePolicy, RepositoryConfig};
use crate::error::{Error, Result};
use crate::index::IndexKind;
use crate::repository::cache::{ATTRIBUTE_EXPIRED, RepoCache};
use crate::repository::downloader::{LocalMetadata, RepoDownloader, SyncContext};
use crate::repository::loader::LoadJob;
use crate::repository::parsers::repomd::DistroTag;
use filetime::FileTime;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct Repo {
    config: RepositoryConfig,
    cache: RepoCache,
    downloader: RepoDownloader,
    context: Arc<SyncContext>,
    expired: bool,
    local: Option<LocalMetadata>,
}

impl Repo {
    pub fn new(config: RepositoryConfig, context: Arc<SyncContext>) -> Self {
        let cache = RepoCache::for_repo(&context.main.cachedir, &config);
        let downloader = RepoDownloader::new(config.clone(), cache.clone(), Arc::clone(&context));
        Self {
            config,
            cache,
            downloader,
            context,
            expired: false,
            local: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn cache(&self) -> &RepoCache {
        &self.cache
    }

    pub fn downloader(&self) -> &RepoDownloader {
        &self.downloader
    }

    /// Metadata read by the last successful `read_metadata_cache`
    pub fn local(&self) -> Option<&LocalMetadata> {
        self.local.as_ref()
    }

    /// Load the cached metadata and recompute expiry
    pub fn read_metadata_cache(&mut self) -> Result<()> {
        self.local = None;
        let local = self.downloader.load_local()?;
        self.local = Some(local);
        self.recompute_expired();
        Ok(())
    }

    pub fn recompute_expired(&mut self) {
        self.expired = self.cache.has_attribute(ATTRIBUTE_EXPIRED)
            || is_expired_by_age(self.config.metadata_expire, self.get_age());
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Age of the cached metadata, `None` without a cache
    pub fn get_age(&self) -> Option<Duration> {
        self.local.as_ref()?.age()
    }

    /// Mark the cache expired until the next successful refresh
    pub fn expire(&mut self) -> Result<()> {
        self.cache.write_attribute(ATTRIBUTE_EXPIRED, "1")?;
        self.expired = true;
        Ok(())
    }

    /// Record that the cache matches upstream as of now
    pub fn mark_fresh(&mut self) -> Result<()> {
        if let Some(primary) = self.local.as_ref().and_then(LocalMetadata::primary_path) {
            filetime::set_file_mtime(primary, FileTime::now()).map_err(|e| {
                Error::Filesystem(format!("Cannot touch {}: {e}", primary.display()))
            })?;
        }
        self.cache.clear_attribute(ATTRIBUTE_EXPIRED)?;
        self.expired = false;
        Ok(())
    }

    /// Copy the privileged system cache into this cache
    ///
    /// Only for unprivileged runs, and only when the system cache is
    /// usable, not expired and newer than what we have. Returns whether
    /// a copy was made.
    pub fn clone_root_metadata(&mut self) -> Result<bool> {
        let main = &self.context.main;
        if self.context.is_root || main.system_cachedir == main.cachedir {
            return Ok(false);
        }

        let root_cache = RepoCache::for_repo(&main.system_cachedir, &self.config);
        let Ok(root_local) = LocalMetadata::load(&root_cache, &self.config) else {
            return Ok(false);
        };
        if root_cache.has_attribute(ATTRIBUTE_EXPIRED)
            || is_expired_by_age(self.config.metadata_expire, root_local.age())
        {
            debug!("System cache of {} is expired", self.config.id);
            return Ok(false);
        }
        if let Some(ours) = &self.local {
            if ours.max_timestamp() >= root_local.max_timestamp() {
                return Ok(false);
            }
        }

        info!("Using system cache for {}", self.config.id);
        self.cache.clone_from(&root_cache)?;
        Ok(true)
    }

    pub fn get_max_timestamp(&self) -> Option<i64> {
        self.local.as_ref().map(LocalMetadata::max_timestamp)
    }

    pub fn get_revision(&self) -> Option<&str> {
        self.local.as_ref()?.revision()
    }

    pub fn get_content_tags(&self) -> &[String] {
        self.local.as_ref().map(LocalMetadata::content_tags).unwrap_or_default()
    }

    pub fn get_distro_tags(&self) -> &[DistroTag] {
        self.local.as_ref().map(LocalMetadata::distro_tags).unwrap_or_default()
    }

    /// Describe what the loader must build for this repository
    pub fn load_job(&self) -> Result<LoadJob> {
        let local = self.local.as_ref().ok_or_else(|| {
            Error::CacheCorruption(format!("No metadata loaded for \"{}\"", self.config.id))
        })?;

        let mut metadata = BTreeMap::new();
        if let Some(primary) = local.primary_path() {
            metadata.insert(IndexKind::Main, primary.to_path_buf());
        }
        for kind in IndexKind::EXTENSIONS {
            if !self.context.main.wants_metadata(kind.config_name()) {
                continue;
            }
            if let Some(path) = local.path_of(kind) {
                metadata.insert(kind, path.to_path_buf());
            }
        }

        Ok(LoadJob {
            repo_id: self.config.id.clone(),
            priority: self.config.priority,
            cost: self.config.cost,
            repomd_path: local.repomd_path.clone(),
            metadata,
            solv_dir: self.cache.solv_dir(),
            build_cache: self.config.build_cache,
        })
    }
}

fn is_expired_by_age(policy: ExpirePolicy, age: Option<Duration>) -> bool {
    match (policy, age) {
        (ExpirePolicy::Never, _) => false,
        (_, None) => true,
        (policy, Some(age)) => policy.is_expired(age),
    }
}
