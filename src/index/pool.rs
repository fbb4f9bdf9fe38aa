// src/index/pool.rs

//! The loaded set of repository indices

use super::{Advisory, Delta, FileList, Group, IndexKind, Package, PackageChangelog};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::marker::PhantomData;

/// Where an index kind came from during loading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    /// Trusted binary index file
    Cache,
    /// Parsed from raw metadata
    Parsed,
}

/// Index data of one repository
#[derive(Debug, Clone, Default)]
pub struct RepoIndex {
    pub repo_id: String,
    pub priority: i32,
    pub cost: i32,
    pub packages: Vec<Package>,
    pub filelists: Vec<FileList>,
    pub changelogs: Vec<PackageChangelog>,
    pub deltas: Vec<Delta>,
    pub advisories: Vec<Advisory>,
    pub groups: Vec<Group>,
    pub sources: BTreeMap<IndexKind, IndexSource>,
}

impl RepoIndex {
    pub fn new(repo_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            ..Default::default()
        }
    }

    /// How the given kind was loaded, if it was loaded at all
    pub fn source(&self, kind: IndexKind) -> Option<IndexSource> {
        self.sources.get(&kind).copied()
    }

    pub fn find(&self, name: &str) -> impl Iterator<Item = &Package> {
        self.packages.iter().filter(move |p| p.name == name)
    }

    /// Full file list of a package, falling back to primary's subset
    pub fn files_of<'a>(&'a self, package: &'a Package) -> &'a [String] {
        self.filelists
            .iter()
            .find(|f| f.pkgid == package.pkgid)
            .map(|f| f.files.as_slice())
            .unwrap_or(&package.files)
    }
}

/// Single-owner collection of repository indices
///
/// The pool is `Send` so it can be handed to the loader thread and
/// returned by its join, but not `Sync`: only one thread touches it at
/// a time.
#[derive(Debug, Default)]
pub struct IndexPool {
    repos: Vec<RepoIndex>,
    _not_sync: PhantomData<Cell<()>>,
}

impl IndexPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a repository, replacing any index with the same id
    pub fn insert(&mut self, index: RepoIndex) {
        if let Some(existing) = self.repos.iter_mut().find(|r| r.repo_id == index.repo_id) {
            *existing = index;
        } else {
            self.repos.push(index);
        }
    }

    pub fn remove(&mut self, repo_id: &str) -> Option<RepoIndex> {
        let pos = self.repos.iter().position(|r| r.repo_id == repo_id)?;
        Some(self.repos.remove(pos))
    }

    pub fn repo(&self, repo_id: &str) -> Option<&RepoIndex> {
        self.repos.iter().find(|r| r.repo_id == repo_id)
    }

    /// Repositories in load order
    pub fn repos(&self) -> &[RepoIndex] {
        &self.repos
    }

    pub fn repo_ids(&self) -> Vec<&str> {
        self.repos.iter().map(|r| r.repo_id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    pub fn package_count(&self) -> usize {
        self.repos.iter().map(|r| r.packages.len()).sum()
    }

    /// All packages with their repository id
    pub fn packages(&self) -> impl Iterator<Item = (&str, &Package)> {
        self.repos
            .iter()
            .flat_map(|r| r.packages.iter().map(move |p| (r.repo_id.as_str(), p)))
    }

    /// Packages named `name`, best repository priority first
    pub fn find(&self, name: &str) -> Vec<(&str, &Package)> {
        let mut found: Vec<(i32, i32, &str, &Package)> = self
            .repos
            .iter()
            .flat_map(|r| {
                r.find(name)
                    .map(move |p| (r.priority, r.cost, r.repo_id.as_str(), p))
            })
            .collect();
        found.sort_by_key(|(priority, cost, _, _)| (*priority, *cost));
        found.into_iter().map(|(_, _, repo, p)| (repo, p)).collect()
    }

    /// Packages providing `capability` by name, or owning it as a file
    pub fn what_provides(&self, capability: &str) -> Vec<(&str, &Package)> {
        self.repos
            .iter()
            .flat_map(|r| {
                r.packages
                    .iter()
                    .filter(move |p| {
                        p.name == capability
                            || p.provides.iter().any(|d| d.name == capability)
                            || (capability.starts_with('/')
                                && r.files_of(p).iter().any(|f| f == capability))
                    })
                    .map(move |p| (r.repo_id.as_str(), p))
            })
            .collect()
    }

    /// Advisories across all repositories
    pub fn advisories(&self) -> impl Iterator<Item = (&str, &Advisory)> {
        self.repos
            .iter()
            .flat_map(|r| r.advisories.iter().map(move |a| (r.repo_id.as_str(), a)))
    }

    pub fn group(&self, id: &str) -> Option<(&str, &Group)> {
        self.repos.iter().find_map(|r| {
            r.groups
                .iter()
                .find(|g| g.id == id)
                .map(|g| (r.repo_id.as_str(), g))
        })
    }
}
