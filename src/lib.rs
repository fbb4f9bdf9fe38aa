// src/lib.rs

//! Reposync
//!
//! Synchronizes rpm-md repository metadata into a local cache and loads
//! it into an in-memory package index.
//!
//! # Architecture
//!
//! - Cache directories per repository, named `<repoid>-<hash>`
//! - Three passes per run: cache check, sync check, download
//! - Signature failures get one retry after importing repository keys
//! - Binary index files keyed to the `repomd.xml` they were built from
//! - One loader thread owns the index while downloads run in parallel

pub mod compression;
pub mod config;
mod error;
pub mod hash;
pub mod index;
pub mod progress;
pub mod repository;

pub use config::{Config, MainConfig, RepositoryConfig};
pub use error::{Error, ErrorKind, Result};
pub use index::{IndexPool, RepoIndex};
pub use repository::{RepoSynchronizer, SyncContext, SyncReport};
