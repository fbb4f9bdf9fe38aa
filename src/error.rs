// src/error.rs

//! Error types for repository synchronization
//!
//! Every fallible operation in the library returns [`Result`]. Errors
//! carry a human readable message; [`Error::kind`] classifies them so the
//! synchronizer can decide between skipping a repository, retrying it
//! after a key import, or aborting the whole batch.

use std::fmt;
use thiserror::Error;

/// Library result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the synchronization pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network or mirror failure reaching a source
    #[error("Transport error: {0}")]
    Transport(String),

    /// Downloaded content failed trust verification
    #[error("Signature verification failed: {0}")]
    Signature(String),

    /// Importing a signing key failed
    #[error("Key import failed: {0}")]
    KeyImport(String),

    /// On-disk cache present but unreadable
    #[error("Corrupt cache: {0}")]
    CacheCorruption(String),

    /// Missing source, cache-only without cache, bad option values
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Cache directory unreadable or unwritable
    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to initialize {0}")]
    Init(String),

    /// A repository-level failure wrapping the underlying cause
    #[error("{message}: {source}")]
    Repo {
        repo_id: String,
        message: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Synchronization was cancelled before it started")]
    Cancelled,

    #[error("Index loader thread panicked: {0}")]
    LoaderPanicked(String),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Signature,
    KeyImport,
    CacheCorruption,
    Configuration,
    Filesystem,
    Parse,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transport => "transport failure",
            Self::Signature => "signature failure",
            Self::KeyImport => "key import failure",
            Self::CacheCorruption => "corrupt cache",
            Self::Configuration => "configuration error",
            Self::Filesystem => "filesystem error",
            Self::Parse => "parse error",
            Self::Other => "error",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Wrap this error with repository context
    pub fn in_repo(self, repo_id: &str, message: impl Into<String>) -> Self {
        Self::Repo {
            repo_id: repo_id.to_string(),
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// Classify the error, looking through repository wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Repo { source, .. } => source.kind(),
            Self::Transport(_) => ErrorKind::Transport,
            Self::Signature(_) => ErrorKind::Signature,
            Self::KeyImport(_) => ErrorKind::KeyImport,
            Self::CacheCorruption(_) => ErrorKind::CacheCorruption,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Filesystem(_) | Self::Io(_) => ErrorKind::Filesystem,
            Self::Parse(_) | Self::ChecksumMismatch { .. } => ErrorKind::Parse,
            Self::Init(_) | Self::Cancelled | Self::LoaderPanicked(_) => ErrorKind::Other,
        }
    }

    /// True for failures that a key import might fix
    pub fn is_signature(&self) -> bool {
        self.kind() == ErrorKind::Signature
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Parse(format!("XML error: {e}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Configuration(format!("Invalid configuration: {e}"))
    }
}

impl From<crate::compression::CompressionError> for Error {
    fn from(e: crate::compression::CompressionError) -> Self {
        Error::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_looks_through_repo_wrapper() {
        let err = Error::Signature("bad repomd.xml.asc".to_string())
            .in_repo("fedora", "Failed to download metadata");
        assert_eq!(err.kind(), ErrorKind::Signature);
        assert!(err.is_signature());
        assert!(err.to_string().contains("Failed to download metadata"));
        assert!(err.to_string().contains("bad repomd.xml.asc"));
    }

    #[test]
    fn test_io_is_filesystem() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope").into();
        assert_eq!(err.kind(), ErrorKind::Filesystem);
        assert!(!err.is_signature());
    }
}
