// src/repository/downloader.rs

//! Per-repository metadata transfer
//!
//! [`RepoDownloader`] answers three questions for one repository:
//! - is the cached metadata still what upstream publishes (`is_in_sync`)
//! - fetch fresh metadata into the cache (`download_metadata`)
//! - what does the cache currently hold (`load_local`, no network)
//!
//! Downloads land in a temporary directory inside the cache directory
//! and are moved into place only once every file has been retrieved and
//! verified, so a failed download never touches a good cache.

use crate::config::{MainConfig, RepositoryConfig};
use crate::error::{Error, Result};
use crate::hash;
use crate::index::IndexKind;
use crate::index::codec::{self, CacheValidity};
use crate::progress::{LogCallbacks, TransferCallbacks};
use crate::repository::cache::{CACHE_METADATA_DIR, CACHE_METALINK_FILE, CACHE_MIRRORLIST_FILE, RepoCache};
use crate::repository::countme::{COUNTME_COOKIE, CountmeCookie};
use crate::repository::gpg::SignatureVerifier;
use crate::repository::parsers::mirrors::{Metalink, parse_mirrorlist};
use crate::repository::parsers::repomd::{DistroTag, Repomd};
use crate::repository::transport::{TransferTarget, Transport, local_path};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Location of the descriptor relative to a mirror base URL
pub const REPOMD_PATH: &str = "repodata/repomd.xml";

/// Detached signature suffix
const SIGNATURE_SUFFIX: &str = ".asc";

/// Keyring directory inside the repository persist directory
const KEYRING_DIR: &str = "pubring";

/// Shared collaborators of a synchronization run
pub struct SyncContext {
    pub main: MainConfig,
    pub transport: Arc<dyn Transport>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub callbacks: Arc<dyn TransferCallbacks>,
    /// Running with elevated privilege
    pub is_root: bool,
}

impl SyncContext {
    pub fn new(
        main: MainConfig,
        transport: Arc<dyn Transport>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            main,
            transport,
            verifier,
            callbacks: Arc::new(LogCallbacks),
            is_root: nix::unistd::geteuid().is_root(),
        }
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn TransferCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }
}

/// Kind of the primary source of a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Metalink,
    Mirrorlist,
    Baseurl,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Metalink => "metalink",
            Self::Mirrorlist => "mirrorlist",
            Self::Baseurl => "baseurl",
        })
    }
}

/// The source metadata is retrieved from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataSource {
    pub kind: SourceKind,
    pub location: String,
}

impl MetadataSource {
    /// Resolve the source: metalink, then mirrorlist, then base URLs
    ///
    /// A mirrorlist URL mentioning "metalink" is a metalink.
    pub fn of(config: &RepositoryConfig) -> Result<Self> {
        if let Some(metalink) = &config.metalink {
            return Ok(Self {
                kind: SourceKind::Metalink,
                location: metalink.clone(),
            });
        }
        if let Some(mirrorlist) = &config.mirrorlist {
            let kind = if mirrorlist.contains("metalink") {
                SourceKind::Metalink
            } else {
                SourceKind::Mirrorlist
            };
            return Ok(Self {
                kind,
                location: mirrorlist.clone(),
            });
        }
        if !config.baseurl.is_empty() {
            return Ok(Self {
                kind: SourceKind::Baseurl,
                location: config.baseurl.join(", "),
            });
        }
        Err(Error::Configuration(format!(
            "No valid source (baseurl, mirrorlist or metalink) found for repository \"{}\"",
            config.id
        )))
    }

    /// Name of the cached mirror document, if the source has one
    fn document_name(&self) -> Option<&'static str> {
        match self.kind {
            SourceKind::Metalink => Some(CACHE_METALINK_FILE),
            SourceKind::Mirrorlist => Some(CACHE_MIRRORLIST_FILE),
            SourceKind::Baseurl => None,
        }
    }
}

/// Mirror list resolved for one transfer
struct ResolvedMirrors {
    mirrors: Vec<String>,
    metalink: Option<Metalink>,
}

/// What the cache currently holds for a repository
#[derive(Debug, Clone)]
pub struct LocalMetadata {
    pub repomd_path: PathBuf,
    pub repomd: Repomd,
    /// repomd record type -> cached file, for files present on disk
    pub metadata_paths: BTreeMap<String, PathBuf>,
    /// Mirrors from the cached metalink/mirrorlist, else the base URLs
    pub mirrors: Vec<String>,
}

impl LocalMetadata {
    /// Parse the metadata cached in `cache`
    pub fn load(cache: &RepoCache, config: &RepositoryConfig) -> Result<Self> {
        let repomd_path = cache.repomd_path();
        let repomd = Repomd::from_file(&repomd_path).map_err(|e| {
            Error::CacheCorruption(format!("Cannot read {}: {e}", repomd_path.display()))
        })?;

        let mut metadata_paths = BTreeMap::new();
        for record in &repomd.records {
            let Ok(relative) = safe_relative(&record.location_href) else {
                warn!("Ignoring record {} with unsafe location", record.kind);
                continue;
            };
            let path = cache.path().join(relative);
            if path.is_file() {
                metadata_paths.insert(record.kind.clone(), path);
            }
        }
        if !metadata_paths.contains_key("primary") {
            return Err(Error::CacheCorruption(format!(
                "No primary metadata cached in {}",
                cache.path().display()
            )));
        }

        let mut mirrors = cached_mirrors(cache);
        if mirrors.is_empty() {
            mirrors = config.baseurl.clone();
        }

        Ok(Self {
            repomd_path,
            repomd,
            metadata_paths,
            mirrors,
        })
    }

    pub fn revision(&self) -> Option<&str> {
        self.repomd.revision.as_deref()
    }

    pub fn content_tags(&self) -> &[String] {
        &self.repomd.content_tags
    }

    pub fn distro_tags(&self) -> &[DistroTag] {
        &self.repomd.distro_tags
    }

    pub fn max_timestamp(&self) -> i64 {
        self.repomd.max_timestamp()
    }

    /// Cached file providing an index kind
    pub fn path_of(&self, kind: IndexKind) -> Option<&Path> {
        kind.repomd_types()
            .iter()
            .find_map(|t| self.metadata_paths.get(*t))
            .map(PathBuf::as_path)
    }

    pub fn primary_path(&self) -> Option<&Path> {
        self.path_of(IndexKind::Main)
    }

    /// Time since the primary file was last refreshed
    pub fn age(&self) -> Option<Duration> {
        let modified = fs::metadata(self.primary_path()?).ok()?.modified().ok()?;
        Some(SystemTime::now().duration_since(modified).unwrap_or_default())
    }
}

fn cached_mirrors(cache: &RepoCache) -> Vec<String> {
    if let Ok(file) = File::open(cache.metalink_path()) {
        match Metalink::parse(BufReader::new(file)) {
            Ok(metalink) => return metalink.mirror_urls(),
            Err(e) => debug!("Ignoring cached metalink: {}", e),
        }
    }
    fs::read_to_string(cache.mirrorlist_path())
        .map(|content| parse_mirrorlist(&content))
        .unwrap_or_default()
}

/// Check a repomd location stays inside the repository tree
fn safe_relative(href: &str) -> Result<&Path> {
    let path = Path::new(href);
    if href.is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(Error::Parse(format!("Unsafe metadata location \"{href}\"")));
    }
    Ok(path)
}

/// Append `name=value` to the query of `url`
fn append_query(url: &str, name: &str, value: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().append_pair(name, value);
            parsed.to_string()
        }
        Err(e) => {
            warn!("Cannot add {} to {}: {}", name, url, e);
            url.to_string()
        }
    }
}

/// Replace `dest` (file or directory) with `src`
fn replace_path(src: &Path, dest: &Path) -> Result<()> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(dest)?,
        Ok(_) => fs::remove_file(dest)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::rename(src, dest).map_err(|e| {
        Error::Filesystem(format!("Cannot move {} to {}: {e}", src.display(), dest.display()))
    })
}

/// Transfers metadata for one repository
pub struct RepoDownloader {
    config: RepositoryConfig,
    cache: RepoCache,
    context: Arc<SyncContext>,
}

impl RepoDownloader {
    pub fn new(config: RepositoryConfig, cache: RepoCache, context: Arc<SyncContext>) -> Self {
        Self {
            config,
            cache,
            context,
        }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// `<persistdir>/repos/<cache-id>`
    pub fn persist_dir(&self) -> PathBuf {
        let cache_id = self
            .cache
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config.id.clone());
        self.context.main.persistdir.join("repos").join(cache_id)
    }

    pub fn keyring_dir(&self) -> PathBuf {
        self.persist_dir().join(KEYRING_DIR)
    }

    pub fn countme_cookie_path(&self) -> PathBuf {
        self.persist_dir().join(COUNTME_COOKIE)
    }

    pub fn source(&self) -> Result<MetadataSource> {
        MetadataSource::of(&self.config)
    }

    fn countme_enabled(&self) -> bool {
        self.config.countme
            && self.context.is_root
            && !self.config.is_local()
            && (self.config.metalink.is_some() || self.config.mirrorlist.is_some())
    }

    /// Add the usage flag to a mirror document URL when this request is
    /// the one counted in the current window
    pub fn add_countme_flag(&self, url: &str) -> String {
        if !self.countme_enabled() {
            return url.to_string();
        }

        let path = self.countme_cookie_path();
        let mut cookie = CountmeCookie::load(&path);
        let before = cookie;
        let bucket = cookie.record_request(chrono::Utc::now().timestamp(), &mut rand::thread_rng());

        if cookie != before {
            if let Err(e) = cookie.save(&path) {
                warn!("Cannot save countme cookie for {}: {}", self.config.id, e);
            }
        }

        match bucket {
            Some(bucket) => {
                debug!("countme: reporting bucket {} for {}", bucket, self.config.id);
                append_query(url, "countme", &bucket.to_string())
            }
            None => url.to_string(),
        }
    }

    fn temp_dir(&self, parent: &Path, prefix: &str) -> Result<tempfile::TempDir> {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Filesystem(format!("Cannot create {}: {e}", parent.display())))?;
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(parent)
            .map_err(|e| {
                Error::Filesystem(format!("Cannot create temporary directory in {}: {e}", parent.display()))
            })
    }

    /// Fetch the mirror document (if any) into `workdir` and build the
    /// mirror list, falling back to the base URLs
    fn resolve_mirrors(&self, source: &MetadataSource, workdir: &Path) -> Result<ResolvedMirrors> {
        let mut resolved = ResolvedMirrors {
            mirrors: Vec::new(),
            metalink: None,
        };

        if let Some(document) = source.document_name() {
            let dest = workdir.join(document);
            let url = self.add_countme_flag(&source.location);
            self.context
                .transport
                .fetch(&url, &dest, self.context.callbacks.as_ref())?;

            if source.kind == SourceKind::Metalink {
                let metalink = Metalink::parse(BufReader::new(File::open(&dest)?))?;
                resolved.mirrors = metalink.mirror_urls();
                resolved.metalink = Some(metalink);
            } else {
                resolved.mirrors = parse_mirrorlist(&fs::read_to_string(&dest)?);
            }
            debug!(
                "{}: {} mirrors from {}",
                self.config.id,
                resolved.mirrors.len(),
                source.kind
            );
        }

        resolved.mirrors.extend(self.config.baseurl.iter().cloned());
        if resolved.mirrors.is_empty() {
            return Err(Error::Transport(format!(
                "No usable mirrors for repository \"{}\"",
                self.config.id
            )));
        }
        Ok(resolved)
    }

    fn target<'a>(&self, mirrors: &'a [String], path: &'a str, description: &'a str) -> TransferTarget<'a> {
        TransferTarget {
            mirrors,
            path,
            max_mirror_tries: self.context.main.max_mirror_tries,
            description,
        }
    }

    /// Fetch and check the detached signature of a retrieved repomd.xml
    fn verify_repomd_signature(&self, mirrors: &[String], repomd: &Path) -> Result<()> {
        let signature_path = PathBuf::from(format!("{}{SIGNATURE_SUFFIX}", repomd.display()));
        let remote = format!("{REPOMD_PATH}{SIGNATURE_SUFFIX}");
        let description = format!("{}: repomd.xml{SIGNATURE_SUFFIX}", self.config.id);

        self.context
            .transport
            .fetch_target(
                &self.target(mirrors, &remote, &description),
                &signature_path,
                self.context.callbacks.as_ref(),
            )
            .map_err(|e| {
                Error::Signature(format!("Cannot retrieve signature of repomd.xml: {e}"))
            })?;

        let data = fs::read(repomd)?;
        let signature = fs::read(&signature_path)?;
        self.context
            .verifier
            .verify_detached(&self.keyring_dir(), &data, &signature)
            .map_err(|e| match e {
                Error::Signature(msg) => {
                    Error::Signature(format!("repomd.xml of \"{}\": {msg}", self.config.id))
                }
                other => other,
            })
    }

    /// Fetch repomd.xml from the mirrors into `dest`, verifying it
    fn fetch_repomd(&self, resolved: &ResolvedMirrors, dest: &Path) -> Result<()> {
        let description = format!("{}: repomd.xml", self.config.id);
        self.context.transport.fetch_target(
            &self.target(&resolved.mirrors, REPOMD_PATH, &description),
            dest,
            self.context.callbacks.as_ref(),
        )?;

        if let Some(metalink) = &resolved.metalink {
            metalink.verify_repomd(dest)?;
        }
        if self.config.repo_gpgcheck {
            self.verify_repomd_signature(&resolved.mirrors, dest)?;
        }
        Ok(())
    }

    /// Check whether the cached metadata matches upstream without
    /// downloading the full metadata
    pub fn is_in_sync(&self) -> Result<bool> {
        let source = self.source()?;
        let local_repomd = self.cache.repomd_path();
        if !local_repomd.is_file() {
            return Ok(false);
        }

        let workdir = self.temp_dir(self.cache.path(), "sync-check.")?;

        if source.kind == SourceKind::Metalink {
            let dest = workdir.path().join(CACHE_METALINK_FILE);
            let url = self.add_countme_flag(&source.location);
            self.context
                .transport
                .fetch(&url, &dest, self.context.callbacks.as_ref())?;
            let metalink = Metalink::parse(BufReader::new(File::open(&dest)?))?;

            if metalink.recognized_hashes().is_empty() {
                debug!("{}: metalink has no usable repomd.xml hash", self.config.id);
                return Ok(false);
            }
            // Alternates are older revisions, never in sync
            let in_sync = metalink.matches_repomd(&local_repomd)?;
            if !in_sync {
                debug!("{}: repomd.xml differs from metalink", self.config.id);
            }
            return Ok(in_sync);
        }

        let resolved = self.resolve_mirrors(&source, workdir.path())?;
        let remote_repomd = workdir.path().join("repomd.xml");
        self.fetch_repomd(&resolved, &remote_repomd)?;

        let local = codec::checksum_file(&local_repomd)?;
        let remote = codec::checksum_file(&remote_repomd)?;
        Ok(CacheValidity::of_checksums(&local, &remote).is_valid())
    }

    /// Download fresh metadata and move it into `destdir`
    pub fn download_metadata(&self, destdir: &Path) -> Result<()> {
        let source = self.source()?;
        self.download_into(&source, destdir).map_err(|e| {
            let message = format!(
                "Failed to download metadata ({}: \"{}\") for repository \"{}\"",
                source.kind, source.location, self.config.id
            );
            e.in_repo(&self.config.id, message)
        })
    }

    fn download_into(&self, source: &MetadataSource, destdir: &Path) -> Result<()> {
        info!("Downloading metadata for {} from {}", self.config.id, source.kind);
        let workdir = self.temp_dir(destdir, "tmpdir.")?;
        let staging = workdir.path();

        let resolved = self.resolve_mirrors(source, staging)?;
        let repomd_path = staging.join(REPOMD_PATH);
        self.fetch_repomd(&resolved, &repomd_path)?;

        let repomd = Repomd::from_file(&repomd_path)?;
        let primary = repomd
            .record("primary")
            .ok_or_else(|| Error::Parse("repomd.xml has no primary record".to_string()))?;
        let mut records = vec![primary];
        for kind in IndexKind::EXTENSIONS {
            if !self.context.main.wants_metadata(kind.config_name()) {
                continue;
            }
            if let Some(record) = repomd.first_record(kind.repomd_types()) {
                records.push(record);
            }
        }

        for record in records {
            let relative = safe_relative(&record.location_href)?;
            let dest = staging.join(relative);
            let description = format!("{}: {}", self.config.id, record.kind);
            self.context.transport.fetch_target(
                &self.target(&resolved.mirrors, &record.location_href, &description),
                &dest,
                self.context.callbacks.as_ref(),
            )?;
            hash::verify_file(&dest, &record.hash()?)?;
        }

        // Everything verified; replace the previous metadata
        let mut items = vec![CACHE_METADATA_DIR];
        items.extend(source.document_name());
        for item in items {
            let src = staging.join(item);
            if src.exists() {
                replace_path(&src, &destdir.join(item))?;
            }
        }
        Ok(())
    }

    /// Parse what is cached; no network access
    pub fn load_local(&self) -> Result<LocalMetadata> {
        LocalMetadata::load(&self.cache, &self.config)
    }

    /// Configured key locations: local files and remote URLs
    pub fn key_locations(&self) -> (Vec<PathBuf>, Vec<String>) {
        let mut local = Vec::new();
        let mut remote = Vec::new();
        for key in &self.config.gpgkey {
            match local_path(key) {
                Some(path) => local.push(path),
                None => remote.push(key.clone()),
            }
        }
        (local, remote)
    }

    /// Import the repository's signing keys into its keyring
    ///
    /// Local key files are read directly; remote keys are looked up in
    /// `downloaded`, fetched beforehand in one batch. Returns the number
    /// of keys imported; importing none is an error.
    pub fn import_repo_keys(&self, downloaded: &HashMap<String, Vec<u8>>) -> Result<usize> {
        if self.config.gpgkey.is_empty() {
            return Err(Error::KeyImport(format!(
                "No keys configured for repository \"{}\"",
                self.config.id
            )));
        }

        let keyring = self.keyring_dir();
        let mut imported = 0;
        for key in &self.config.gpgkey {
            let data = match local_path(key) {
                Some(path) => match fs::read(&path) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("Cannot read key {}: {}", path.display(), e);
                        continue;
                    }
                },
                None => match downloaded.get(key) {
                    Some(data) => data.clone(),
                    None => {
                        warn!("Key {} was not downloaded", key);
                        continue;
                    }
                },
            };

            match self.context.verifier.import_key(&keyring, &data, key) {
                Ok(fingerprints) => imported += fingerprints.len(),
                Err(e) => warn!("Cannot import key {} for {}: {}", key, self.config.id, e),
            }
        }

        if imported == 0 {
            return Err(Error::KeyImport(format!(
                "No key could be imported for repository \"{}\"",
                self.config.id
            )));
        }
        Ok(imported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use crate::progress::SilentCallbacks;
    use crate::repository::transport::HttpTransport;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::TempDir;

    struct NoVerify;

    impl SignatureVerifier for NoVerify {
        fn import_key(&self, _: &Path, _: &[u8], source: &str) -> Result<Vec<String>> {
            Ok(vec![source.to_string()])
        }
        fn verify_detached(&self, _: &Path, _: &[u8], _: &[u8]) -> Result<()> {
            Err(Error::Signature("not trusted".to_string()))
        }
        fn has_keys(&self, _: &Path) -> bool {
            false
        }
    }

    const PRIMARY: &str = r#"<metadata packages="1">
<package type="rpm"><name>hello</name><arch>x86_64</arch>
<version epoch="0" ver="1" rel="1"/><checksum type="sha256" pkgid="YES">abc</checksum>
<location href="Packages/hello-1-1.x86_64.rpm"/><size package="10"/></package></metadata>"#;

    /// Write a minimal upstream tree, returning its directory
    fn upstream(dir: &Path) -> PathBuf {
        let root = dir.join("upstream");
        fs::create_dir_all(root.join("repodata")).unwrap();

        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(PRIMARY.as_bytes()).unwrap();
        let primary = gz.finish().unwrap();
        fs::write(root.join("repodata/primary.xml.gz"), &primary).unwrap();

        let repomd = format!(
            r#"<repomd><revision>7</revision>
<data type="primary"><checksum type="sha256">{}</checksum>
<location href="repodata/primary.xml.gz"/><timestamp>1700000000</timestamp><size>{}</size></data>
</repomd>"#,
            hash::sha256(&primary),
            primary.len()
        );
        fs::write(root.join(REPOMD_PATH), repomd).unwrap();
        root
    }

    fn downloader(dir: &TempDir, baseurl: &Path) -> RepoDownloader {
        let mut main = MainConfig::default();
        main.cachedir = dir.path().join("cache");
        main.persistdir = dir.path().join("persist");
        let mut config = RepositoryConfig::new("updates", &main);
        config.baseurl = vec![format!("file://{}", baseurl.display())];

        let context = SyncContext::new(main, Arc::new(HttpTransport::new().unwrap()), Arc::new(NoVerify))
            .with_callbacks(Arc::new(SilentCallbacks))
            .with_root(false);
        let cache = RepoCache::for_repo(&context.main.cachedir, &config);
        RepoDownloader::new(config, cache, Arc::new(context))
    }

    #[test]
    fn test_source_precedence() {
        let main = MainConfig::default();
        let mut config = RepositoryConfig::new("fedora", &main);
        let err = MetadataSource::of(&config).unwrap_err();
        assert!(err.to_string().contains("No valid source"));

        config.baseurl = vec!["https://a/".to_string(), "https://b/".to_string()];
        assert_eq!(MetadataSource::of(&config).unwrap().location, "https://a/, https://b/");

        config.mirrorlist = Some("https://mirrors/metalink?repo=f41".to_string());
        assert_eq!(MetadataSource::of(&config).unwrap().kind, SourceKind::Metalink);

        config.mirrorlist = Some("https://mirrors/list".to_string());
        assert_eq!(MetadataSource::of(&config).unwrap().kind, SourceKind::Mirrorlist);
    }

    #[test]
    fn test_safe_relative() {
        assert!(safe_relative("repodata/primary.xml.gz").is_ok());
        assert!(safe_relative("../etc/passwd").is_err());
        assert!(safe_relative("/etc/passwd").is_err());
        assert!(safe_relative("").is_err());
    }

    #[test]
    fn test_append_query() {
        assert_eq!(
            append_query("https://m/metalink?repo=f41", "countme", "2"),
            "https://m/metalink?repo=f41&countme=2"
        );
    }

    #[test]
    fn test_download_and_load_local() {
        let dir = TempDir::new().unwrap();
        let root = upstream(dir.path());
        let dl = downloader(&dir, &root);

        assert!(matches!(dl.load_local(), Err(Error::CacheCorruption(_))));
        assert!(!dl.is_in_sync().unwrap());

        dl.download_metadata(dl.cache.path()).unwrap();
        let local = dl.load_local().unwrap();
        assert_eq!(local.revision(), Some("7"));
        assert_eq!(local.max_timestamp(), 1700000000);
        assert!(local.primary_path().unwrap().ends_with("repodata/primary.xml.gz"));
        assert_eq!(local.mirrors, dl.config().baseurl);

        // Staging directories are gone
        let leftovers: Vec<_> = fs::read_dir(dl.cache.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("tmpdir."))
            .collect();
        assert!(leftovers.is_empty());

        assert!(dl.is_in_sync().unwrap());
        fs::write(root.join(REPOMD_PATH), "<repomd><revision>8</revision></repomd>").unwrap();
        assert!(!dl.is_in_sync().unwrap());
    }

    #[test]
    fn test_failed_download_keeps_previous_cache() {
        let dir = TempDir::new().unwrap();
        let root = upstream(dir.path());
        let dl = downloader(&dir, &root);
        dl.download_metadata(dl.cache.path()).unwrap();
        let before = fs::read(dl.cache.repomd_path()).unwrap();

        // Upstream now points at a primary with the wrong checksum
        let repomd = fs::read_to_string(root.join(REPOMD_PATH)).unwrap();
        let broken = repomd.replace("<revision>7</revision>", "<revision>8</revision>");
        let broken = broken.replace(&hash::sha256(&fs::read(root.join("repodata/primary.xml.gz")).unwrap()), &"0".repeat(64));
        fs::write(root.join(REPOMD_PATH), broken).unwrap();

        let err = dl.download_metadata(dl.cache.path()).unwrap_err();
        assert!(err.to_string().starts_with("Failed to download metadata (baseurl: \"file://"));
        assert_eq!(fs::read(dl.cache.repomd_path()).unwrap(), before);
    }

    #[test]
    fn test_signature_failure_is_classified() {
        let dir = TempDir::new().unwrap();
        let root = upstream(dir.path());
        fs::write(root.join("repodata/repomd.xml.asc"), "sig").unwrap();
        let mut dl = downloader(&dir, &root);
        dl.config.repo_gpgcheck = true;

        let err = dl.download_metadata(dl.cache.path()).unwrap_err();
        assert!(err.is_signature());
        assert!(!dl.cache.repomd_path().exists());
    }

    #[test]
    fn test_metalink_sync_check() {
        let dir = TempDir::new().unwrap();
        let root = upstream(dir.path());
        let mut dl = downloader(&dir, &root);
        dl.download_metadata(dl.cache.path()).unwrap();

        let local = fs::read(dl.cache.repomd_path()).unwrap();
        let metalink_path = dir.path().join("metalink.xml");
        let write_metalink = |sha256: &str| {
            fs::write(
                &metalink_path,
                format!(
                    r#"<metalink><files><file name="repomd.xml">
<verification><hash type="md5">ignored</hash><hash type="sha256">{sha256}</hash></verification>
<resources><url protocol="file" preference="100">file://{}/repodata/repomd.xml</url></resources>
</file></files></metalink>"#,
                    root.display()
                ),
            )
            .unwrap();
        };
        dl.config.metalink = Some(format!("file://{}", metalink_path.display()));

        write_metalink(&hash::hash_bytes(HashAlgorithm::Sha256, &local).value);
        assert!(dl.is_in_sync().unwrap());

        write_metalink(&"f".repeat(64));
        assert!(!dl.is_in_sync().unwrap());
    }

    /// Point `dl` at a metalink for `root` carrying the given verification
    /// hashes and alternates
    fn use_metalink(dl: &mut RepoDownloader, dir: &TempDir, root: &Path, hashes: &str, alternates: &str) {
        let metalink_path = dir.path().join("metalink.xml");
        fs::write(
            &metalink_path,
            format!(
                r#"<metalink xmlns:mm0="http://fedorahosted.org/mirrormanager"><files><file name="repomd.xml">
<mm0:timestamp>1700000000</mm0:timestamp><verification>{hashes}</verification>
<mm0:alternates>{alternates}</mm0:alternates>
<resources><url protocol="file" preference="100">file://{}/repodata/repomd.xml</url></resources>
</file></files></metalink>"#,
                root.display()
            ),
        )
        .unwrap();
        dl.config.metalink = Some(format!("file://{}", metalink_path.display()));
    }

    fn alternate(sha256: &str) -> String {
        format!(
            r#"<mm0:alternate><mm0:timestamp>1600000000</mm0:timestamp><size>10</size>
<verification><hash type="sha256">{sha256}</hash></verification></mm0:alternate>"#
        )
    }

    #[test]
    fn test_metalink_alternates_do_not_constrain_current() {
        let dir = TempDir::new().unwrap();
        let root = upstream(dir.path());
        let mut dl = downloader(&dir, &root);
        let upstream_repomd = fs::read(root.join(REPOMD_PATH)).unwrap();
        let sha256 = hash::hash_bytes(HashAlgorithm::Sha256, &upstream_repomd).value;

        use_metalink(
            &mut dl,
            &dir,
            &root,
            &format!(r#"<hash type="sha256">{sha256}</hash>"#),
            &alternate(&"a".repeat(64)),
        );
        dl.download_metadata(dl.cache.path()).unwrap();
        assert!(dl.is_in_sync().unwrap());
    }

    #[test]
    fn test_repomd_matching_an_alternate_is_accepted() {
        let dir = TempDir::new().unwrap();
        let root = upstream(dir.path());
        let mut dl = downloader(&dir, &root);
        let upstream_repomd = fs::read(root.join(REPOMD_PATH)).unwrap();
        let sha256 = hash::hash_bytes(HashAlgorithm::Sha256, &upstream_repomd).value;

        // The mirror still serves the previous revision
        use_metalink(
            &mut dl,
            &dir,
            &root,
            &format!(r#"<hash type="sha256">{}</hash>"#, "b".repeat(64)),
            &alternate(&sha256),
        );
        dl.download_metadata(dl.cache.path()).unwrap();
        assert!(dl.cache.repomd_path().is_file());
        // but it is not the current revision
        assert!(!dl.is_in_sync().unwrap());
    }

    #[test]
    fn test_all_metalink_hashes_must_match() {
        let dir = TempDir::new().unwrap();
        let root = upstream(dir.path());
        let mut dl = downloader(&dir, &root);
        dl.download_metadata(dl.cache.path()).unwrap();
        let before = fs::read(dl.cache.repomd_path()).unwrap();
        let sha256 = hash::hash_bytes(HashAlgorithm::Sha256, &before).value;

        use_metalink(
            &mut dl,
            &dir,
            &root,
            &format!(
                r#"<hash type="sha256">{sha256}</hash><hash type="sha512">{}</hash>"#,
                "c".repeat(128)
            ),
            "",
        );
        assert!(!dl.is_in_sync().unwrap());

        let err = dl.download_metadata(dl.cache.path()).unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));
        assert_eq!(fs::read(dl.cache.repomd_path()).unwrap(), before);
    }

    #[test]
    fn test_import_repo_keys() {
        let dir = TempDir::new().unwrap();
        let root = upstream(dir.path());
        let mut dl = downloader(&dir, &root);
        assert!(matches!(dl.import_repo_keys(&HashMap::new()), Err(Error::KeyImport(_))));

        let key = dir.path().join("RPM-GPG-KEY");
        fs::write(&key, "key").unwrap();
        dl.config.gpgkey = vec![
            format!("file://{}", key.display()),
            "https://example.org/key".to_string(),
            "https://example.org/missing".to_string(),
        ];
        let (local, remote) = dl.key_locations();
        assert_eq!(local, vec![key.clone()]);
        assert_eq!(remote.len(), 2);

        let mut downloaded = HashMap::new();
        downloaded.insert("https://example.org/key".to_string(), b"remote".to_vec());
        assert_eq!(dl.import_repo_keys(&downloaded).unwrap(), 2);
    }

    #[test]
    fn test_countme_requires_root_and_mirrors() {
        let dir = TempDir::new().unwrap();
        let root = upstream(dir.path());
        let mut dl = downloader(&dir, &root);
        dl.config.countme = true;
        dl.config.metalink = Some("https://mirrors.example.org/metalink?repo=x".to_string());

        // Not root: URL untouched, no cookie
        let url = dl.add_countme_flag("https://mirrors.example.org/metalink?repo=x");
        assert_eq!(url, "https://mirrors.example.org/metalink?repo=x");
        assert!(!dl.countme_cookie_path().exists());

        let context = SyncContext::new(
            dl.context.main.clone(),
            dl.context.transport.clone(),
            dl.context.verifier.clone(),
        )
        .with_root(true);
        dl.context = Arc::new(context);

        let flagged: Vec<String> = (0..4)
            .map(|_| dl.add_countme_flag("https://mirrors.example.org/metalink?repo=x"))
            .filter(|u| u.contains("countme="))
            .collect();
        assert_eq!(flagged, vec!["https://mirrors.example.org/metalink?repo=x&countme=1"]);
        assert!(dl.countme_cookie_path().is_file());
    }
}
