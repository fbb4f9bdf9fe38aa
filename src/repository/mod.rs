// src/repository/mod.rs

//! Repository metadata synchronization
//!
//! This module provides functionality for:
//! - Per-repository cache directories and their housekeeping
//! - Downloading and verifying rpm-md metadata from mirrors
//! - Sync checks against upstream without a full download
//! - Anonymous usage counting (countme)
//! - Loading caches into the in-memory index on a dedicated thread

pub mod cache;
pub mod countme;
pub mod downloader;
pub mod gpg;
mod loader;
mod lock;
pub mod parsers;
mod repo;
mod sync;
pub mod transport;

pub use cache::{RemoveStatistics, RepoCache, derive_cache_id, repoid_from_cache_dir};
pub use downloader::{LocalMetadata, MetadataSource, RepoDownloader, SourceKind, SyncContext};
pub use gpg::{GpgKeyring, SignatureVerifier};
pub use loader::{LoadJob, load_repo};
pub use lock::CacheLock;
pub use repo::Repo;
pub use sync::{
    Attempt, CancelToken, FailureStage, RepoFailure, RepoOutcome, RepoSynchronizer, Resolution,
    SkipReason, SyncReport, SyncState,
};
pub use transport::{HttpTransport, TransferTarget, Transport};
