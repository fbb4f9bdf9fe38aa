// src/index/mod.rs

//! In-memory package index built from repository metadata
//!
//! A repository contributes a main index (packages from `primary.xml`)
//! and optional extension indices, one per extra metadata type. Each kind
//! is persisted separately by [`codec`] so that enabling an extra
//! metadata type later does not invalidate the main index.

pub mod codec;
mod pool;

pub use pool::{IndexPool, IndexSource, RepoIndex};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of binary index kept per repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndexKind {
    Main,
    Filelists,
    Other,
    Presto,
    Updateinfo,
    Comps,
}

impl IndexKind {
    /// Extension kinds, in load order
    pub const EXTENSIONS: [IndexKind; 5] = [
        IndexKind::Filelists,
        IndexKind::Other,
        IndexKind::Presto,
        IndexKind::Updateinfo,
        IndexKind::Comps,
    ];

    /// Record types in `repomd.xml` that provide this kind, most preferred first
    pub fn repomd_types(&self) -> &'static [&'static str] {
        match self {
            Self::Main => &["primary"],
            Self::Filelists => &["filelists"],
            Self::Other => &["other"],
            Self::Presto => &["prestodelta"],
            Self::Updateinfo => &["updateinfo"],
            Self::Comps => &["group_gz", "group"],
        }
    }

    /// Name used in `optional_metadata_types`
    pub fn config_name(&self) -> &'static str {
        match self {
            Self::Main => "primary",
            Self::Filelists => "filelists",
            Self::Other => "other",
            Self::Presto => "presto",
            Self::Updateinfo => "updateinfo",
            Self::Comps => "comps",
        }
    }

    /// Binary index file name for a repository
    pub fn file_name(&self, repo_id: &str) -> String {
        match self {
            Self::Main => format!("{repo_id}.solv"),
            Self::Filelists => format!("{repo_id}-filelists.solvx"),
            Self::Other => format!("{repo_id}-other.solvx"),
            Self::Presto => format!("{repo_id}-presto.solvx"),
            Self::Updateinfo => format!("{repo_id}-updateinfo.solvx"),
            Self::Comps => format!("{repo_id}-group.solvx"),
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

/// A dependency entry (`rpm:entry`)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub flags: Option<String>,
    pub epoch: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let (Some(flags), Some(version)) = (&self.flags, &self.version) {
            let op = match flags.as_str() {
                "EQ" => "=",
                "LT" => "<",
                "LE" => "<=",
                "GT" => ">",
                "GE" => ">=",
                other => other,
            };
            write!(f, " {op} ")?;
            if let Some(epoch) = self.epoch.as_deref().filter(|e| *e != "0") {
                write!(f, "{epoch}:")?;
            }
            write!(f, "{version}")?;
            if let Some(release) = &self.release {
                write!(f, "-{release}")?;
            }
        }
        Ok(())
    }
}

/// A package from `primary.xml`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub arch: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    /// Package checksum, also its `pkgid` in the other metadata files
    pub pkgid: String,
    pub summary: String,
    pub location: String,
    pub size: u64,
    pub provides: Vec<Dependency>,
    pub requires: Vec<Dependency>,
    pub conflicts: Vec<Dependency>,
    pub obsoletes: Vec<Dependency>,
    /// The subset of files listed in primary
    pub files: Vec<String>,
}

impl Package {
    /// `name-[epoch:]version-release.arch`
    pub fn nevra(&self) -> String {
        if self.epoch == 0 {
            format!("{}-{}-{}.{}", self.name, self.version, self.release, self.arch)
        } else {
            format!(
                "{}-{}:{}-{}.{}",
                self.name, self.epoch, self.version, self.release, self.arch
            )
        }
    }
}

/// Full file list of one package (`filelists.xml`)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileList {
    pub pkgid: String,
    pub name: String,
    pub arch: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub author: String,
    pub date: i64,
    pub text: String,
}

/// Changelog of one package (`other.xml`)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PackageChangelog {
    pub pkgid: String,
    pub name: String,
    pub entries: Vec<ChangelogEntry>,
}

/// A delta rpm from `prestodelta.xml`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Delta {
    pub name: String,
    pub arch: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub old_epoch: u32,
    pub old_version: String,
    pub old_release: String,
    pub filename: String,
    pub size: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdvisoryPackage {
    pub name: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub filename: String,
}

/// An update advisory from `updateinfo.xml`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Advisory {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub severity: String,
    pub issued: String,
    pub packages: Vec<AdvisoryPackage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupPackage {
    pub name: String,
    /// mandatory, default, optional or conditional
    pub kind: String,
}

/// A package group from comps
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: String,
    pub default: bool,
    pub uservisible: bool,
    pub packages: Vec<GroupPackage>,
}
