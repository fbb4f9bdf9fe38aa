// src/config.rs
//! Configuration file parsing
//!
//! Supports TOML configuration files with the following sections:
//! - [main] - Cache locations, expiry, download and verification defaults
//! - [vars] - Substitutions for `$name` / `${name}` in URLs and names
//! - [repos.<id>] - Repository definitions
//!
//! Repository definitions may also live in `*.toml` files inside the
//! directories listed in `main.reposdir`. Options a repository leaves
//! unset fall back to the `[main]` value.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default cache root
pub const DEFAULT_CACHEDIR: &str = "/var/cache/reposync";

/// Default persistent state root (countme cookies, keyrings)
pub const DEFAULT_PERSISTDIR: &str = "/var/lib/reposync";

/// Default metadata lifetime: 48 hours
pub const DEFAULT_METADATA_EXPIRE: Duration = Duration::from_secs(48 * 60 * 60);

/// Metadata types downloaded when `optional_metadata_types` is unset
pub const DEFAULT_OPTIONAL_METADATA: &[&str] = &["comps", "updateinfo"];

/// How long downloaded metadata stays valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawExpire")]
pub enum ExpirePolicy {
    /// Never expires by age; only an explicit expire marks it stale
    Never,
    After(Duration),
}

impl Default for ExpirePolicy {
    fn default() -> Self {
        Self::After(DEFAULT_METADATA_EXPIRE)
    }
}

impl ExpirePolicy {
    /// Parse `"never"`, `-1`, plain seconds, or a number with an
    /// `s`/`m`/`h`/`d` suffix
    pub fn parse(value: &str) -> std::result::Result<Self, String> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("never") || value == "-1" {
            return Ok(Self::Never);
        }
        let Some(last) = value.chars().last() else {
            return Err("empty metadata_expire value".to_string());
        };

        let (digits, multiplier) = if last.is_ascii_digit() {
            (value, 1)
        } else {
            let multiplier = match last.to_ascii_lowercase() {
                's' => 1,
                'm' => 60,
                'h' => 60 * 60,
                'd' => 60 * 60 * 24,
                _ => return Err(format!("unknown unit '{last}' in \"{value}\"")),
            };
            (&value[..value.len() - last.len_utf8()], multiplier)
        };

        let amount: u64 = digits
            .trim()
            .parse()
            .map_err(|_| format!("invalid metadata_expire value \"{value}\""))?;
        let secs = amount
            .checked_mul(multiplier)
            .ok_or_else(|| format!("metadata_expire value \"{value}\" is too large"))?;
        Ok(Self::After(Duration::from_secs(secs)))
    }

    /// True when metadata of the given age must be refreshed
    pub fn is_expired(&self, age: Duration) -> bool {
        match self {
            Self::Never => false,
            Self::After(ttl) => age > *ttl,
        }
    }
}

impl fmt::Display for ExpirePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => write!(f, "never"),
            Self::After(ttl) => write!(f, "{}s", ttl.as_secs()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawExpire {
    Seconds(i64),
    Text(String),
}

impl TryFrom<RawExpire> for ExpirePolicy {
    type Error = String;

    fn try_from(raw: RawExpire) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawExpire::Seconds(-1) => Ok(Self::Never),
            RawExpire::Seconds(n) if n >= 0 => Ok(Self::After(Duration::from_secs(n as u64))),
            RawExpire::Seconds(n) => Err(format!("invalid metadata_expire value {n}")),
            RawExpire::Text(s) => Self::parse(&s),
        }
    }
}

/// Whether network access is allowed while loading repositories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStrategy {
    /// Refresh expired metadata
    #[default]
    Normal,
    /// Use any existing cache, expired or not; download only when missing
    Lazy,
    /// Only existing cache may be used
    CacheOnly,
}

/// `[main]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MainConfig {
    #[serde(default = "default_cachedir")]
    pub cachedir: PathBuf,

    /// Cache populated by root; cloned by unprivileged runs
    #[serde(default = "default_cachedir")]
    pub system_cachedir: PathBuf,

    #[serde(default = "default_persistdir")]
    pub persistdir: PathBuf,

    #[serde(default)]
    pub metadata_expire: ExpirePolicy,

    #[serde(default)]
    pub skip_if_unavailable: bool,

    #[serde(default)]
    pub repo_gpgcheck: bool,

    /// Import configured keys and retry repositories failing verification
    #[serde(default = "default_true")]
    pub import_keys: bool,

    #[serde(default)]
    pub countme: bool,

    #[serde(default = "default_true")]
    pub build_cache: bool,

    #[serde(default)]
    pub cacheonly: bool,

    #[serde(default)]
    pub sync_strategy: SyncStrategy,

    #[serde(default = "default_parallel")]
    pub max_parallel_downloads: usize,

    /// Mirrors tried per file (0 = all)
    #[serde(default)]
    pub max_mirror_tries: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_optional_metadata")]
    pub optional_metadata_types: Vec<String>,

    #[serde(default)]
    pub reposdir: Vec<PathBuf>,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            cachedir: default_cachedir(),
            system_cachedir: default_cachedir(),
            persistdir: default_persistdir(),
            metadata_expire: ExpirePolicy::default(),
            skip_if_unavailable: false,
            repo_gpgcheck: false,
            import_keys: true,
            countme: false,
            build_cache: true,
            cacheonly: false,
            sync_strategy: SyncStrategy::Normal,
            max_parallel_downloads: default_parallel(),
            max_mirror_tries: 0,
            timeout: default_timeout(),
            optional_metadata_types: default_optional_metadata(),
            reposdir: Vec::new(),
        }
    }
}

impl MainConfig {
    /// Effective strategy, with `cacheonly = true` taking precedence
    pub fn strategy(&self) -> SyncStrategy {
        if self.cacheonly {
            SyncStrategy::CacheOnly
        } else {
            self.sync_strategy
        }
    }

    pub fn wants_metadata(&self, kind: &str) -> bool {
        self.optional_metadata_types.iter().any(|t| t == kind)
    }
}

fn default_cachedir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHEDIR)
}

fn default_persistdir() -> PathBuf {
    PathBuf::from(DEFAULT_PERSISTDIR)
}

fn default_true() -> bool {
    true
}

fn default_parallel() -> usize {
    3
}

fn default_timeout() -> u64 {
    30
}

fn default_optional_metadata() -> Vec<String> {
    DEFAULT_OPTIONAL_METADATA.iter().map(|s| s.to_string()).collect()
}

fn default_priority() -> i32 {
    99
}

fn default_cost() -> i32 {
    1000
}

/// `[repos.<id>]` section as written in the file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RepoSection {
    name: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default, deserialize_with = "string_or_list")]
    baseurl: Vec<String>,
    mirrorlist: Option<String>,
    metalink: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    gpgkey: Vec<String>,
    repo_gpgcheck: Option<bool>,
    metadata_expire: Option<ExpirePolicy>,
    skip_if_unavailable: Option<bool>,
    build_cache: Option<bool>,
    countme: Option<bool>,
    #[serde(default = "default_priority")]
    priority: i32,
    #[serde(default = "default_cost")]
    cost: i32,
}

fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Fully resolved repository configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryConfig {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub baseurl: Vec<String>,
    pub mirrorlist: Option<String>,
    pub metalink: Option<String>,
    pub gpgkey: Vec<String>,
    pub repo_gpgcheck: bool,
    pub metadata_expire: ExpirePolicy,
    pub skip_if_unavailable: bool,
    pub build_cache: bool,
    pub countme: bool,
    pub priority: i32,
    pub cost: i32,
}

impl RepositoryConfig {
    /// A minimal enabled repository inheriting `main` defaults
    pub fn new(id: impl Into<String>, main: &MainConfig) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            enabled: true,
            baseurl: Vec::new(),
            mirrorlist: None,
            metalink: None,
            gpgkey: Vec::new(),
            repo_gpgcheck: main.repo_gpgcheck,
            metadata_expire: main.metadata_expire,
            skip_if_unavailable: main.skip_if_unavailable,
            build_cache: main.build_cache,
            countme: main.countme,
            priority: default_priority(),
            cost: default_cost(),
        }
    }

    /// Check the repository can be synchronized at all
    pub fn verify(&self) -> Result<()> {
        validate_repo_id(&self.id)?;
        if self.baseurl.is_empty() && self.mirrorlist.is_none() && self.metalink.is_none() {
            return Err(Error::Configuration(format!(
                "Repository \"{}\" has no source (baseurl, mirrorlist or metalink) set",
                self.id
            )));
        }
        Ok(())
    }

    /// True for repositories whose only sources are local paths
    pub fn is_local(&self) -> bool {
        self.metalink.is_none()
            && self.mirrorlist.is_none()
            && !self.baseurl.is_empty()
            && self.baseurl.iter().all(|u| u.starts_with("file:") || u.starts_with('/'))
    }
}

/// Check a repository id only uses `[A-Za-z0-9-_.:]`
pub fn validate_repo_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::Configuration("Empty repository id".to_string()));
    }
    if let Some((pos, c)) = id
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
    {
        return Err(Error::Configuration(format!(
            "Invalid repository id \"{id}\": unsupported character '{c}' at position {}",
            pos + 1
        )));
    }
    Ok(())
}

/// Replace `$name` and `${name}` with values from `vars`
///
/// Unknown variables are left untouched.
pub fn substitute(input: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match vars.get(name) {
            Some(value) if !name.is_empty() => {
                out.push_str(value);
                rest = &after[consumed..];
            }
            _ => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    main: MainConfig,
    #[serde(default)]
    vars: BTreeMap<String, String>,
    #[serde(default)]
    repos: BTreeMap<String, RepoSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RepoFile {
    #[serde(default)]
    repos: BTreeMap<String, RepoSection>,
}

/// Loaded configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub main: MainConfig,
    pub vars: BTreeMap<String, String>,
    pub repos: Vec<RepositoryConfig>,
}

impl Config {
    /// Load a configuration file and every `*.toml` file in `reposdir`
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {e}", path.display()))
        })?;
        let mut config = Self::parse(&content)?;

        for dir in config.main.reposdir.clone() {
            config.load_repos_dir(&dir)?;
        }
        Ok(config)
    }

    /// Parse configuration text (repository directories are not read)
    pub fn parse(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        let mut config = Self {
            main: file.main,
            vars: file.vars,
            repos: Vec::new(),
        };
        config.add_sections(file.repos)?;
        Ok(config)
    }

    fn load_repos_dir(&mut self, dir: &Path) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Repository directory {} does not exist", dir.display());
                return Ok(());
            }
            Err(e) => {
                return Err(Error::Configuration(format!(
                    "Cannot read repository directory {}: {e}",
                    dir.display()
                )));
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        files.sort();

        for file in files {
            debug!("Loading repositories from {}", file.display());
            let content = fs::read_to_string(&file)?;
            let parsed: RepoFile = toml::from_str(&content).map_err(|e| {
                Error::Configuration(format!("Invalid repository file {}: {e}", file.display()))
            })?;
            self.add_sections(parsed.repos)?;
        }
        Ok(())
    }

    fn add_sections(&mut self, sections: BTreeMap<String, RepoSection>) -> Result<()> {
        for (id, section) in sections {
            if self.repos.iter().any(|r| r.id == id) {
                return Err(Error::Configuration(format!(
                    "Repository \"{id}\" is defined more than once"
                )));
            }
            let repo = self.resolve(id, section);
            repo.verify()?;
            self.repos.push(repo);
        }
        Ok(())
    }

    fn resolve(&self, id: String, section: RepoSection) -> RepositoryConfig {
        let main = &self.main;
        let vars = &self.vars;
        RepositoryConfig {
            name: substitute(section.name.as_deref().unwrap_or(&id), vars),
            enabled: section.enabled,
            baseurl: section.baseurl.iter().map(|u| substitute(u, vars)).collect(),
            mirrorlist: section.mirrorlist.map(|u| substitute(&u, vars)),
            metalink: section.metalink.map(|u| substitute(&u, vars)),
            gpgkey: section.gpgkey.iter().map(|u| substitute(u, vars)).collect(),
            repo_gpgcheck: section.repo_gpgcheck.unwrap_or(main.repo_gpgcheck),
            metadata_expire: section.metadata_expire.unwrap_or(main.metadata_expire),
            skip_if_unavailable: section
                .skip_if_unavailable
                .unwrap_or(main.skip_if_unavailable),
            build_cache: section.build_cache.unwrap_or(main.build_cache),
            countme: section.countme.unwrap_or(main.countme),
            priority: section.priority,
            cost: section.cost,
            id,
        }
    }

    pub fn enabled_repos(&self) -> impl Iterator<Item = &RepositoryConfig> {
        self.repos.iter().filter(|r| r.enabled)
    }

    pub fn repo(&self, id: &str) -> Option<&RepositoryConfig> {
        self.repos.iter().find(|r| r.id == id)
    }
}
