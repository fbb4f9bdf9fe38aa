// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use reposync::hash;
use reposync::progress::{SilentCallbacks, TransferCallbacks};
use reposync::repository::{HttpTransport, SignatureVerifier, SyncContext, Transport};
use reposync::{Error, MainConfig, RepositoryConfig, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Content of a detached signature the mock verifier accepts
pub const GOOD_SIGNATURE: &[u8] = b"good-signature";

/// File name of the signing key in fixture repositories
pub const KEY_FILE: &str = "RPM-GPG-KEY-fixture";

/// An upstream rpm-md repository on the local filesystem
pub struct FixtureRepo {
    pub root: PathBuf,
}

impl FixtureRepo {
    /// Create a repository publishing `packages` at revision `revision`
    pub fn new(dir: &Path, name: &str, revision: u32, packages: &[&str]) -> Self {
        let repo = Self {
            root: dir.join("upstream").join(name),
        };
        repo.publish(revision, packages);
        repo
    }

    /// `file://` URL of the repository
    pub fn url(&self) -> String {
        format!("file://{}", self.root.display())
    }

    pub fn key_url(&self) -> String {
        format!("file://{}", self.root.join(KEY_FILE).display())
    }

    /// Replace the published metadata
    pub fn publish(&self, revision: u32, packages: &[&str]) {
        let repodata = self.root.join("repodata");
        let _ = fs::remove_dir_all(&repodata);
        fs::create_dir_all(&repodata).unwrap();

        let mut xml = format!(r#"<metadata packages="{}">"#, packages.len());
        for name in packages {
            xml.push_str(&format!(
                r#"<package type="rpm"><name>{name}</name><arch>x86_64</arch>
<version epoch="0" ver="1.{revision}" rel="1"/><checksum type="sha256" pkgid="YES">{name}-{revision}</checksum>
<summary>The {name} package</summary><location href="Packages/{name}-1.{revision}-1.x86_64.rpm"/>
<size package="100"/></package>"#
            ));
        }
        xml.push_str("</metadata>");

        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(xml.as_bytes()).unwrap();
        let primary = gz.finish().unwrap();
        let primary_name = format!("{revision}-primary.xml.gz");
        fs::write(repodata.join(&primary_name), &primary).unwrap();

        let timestamp = 1_700_000_000 + u64::from(revision);
        let repomd = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo"><revision>{revision}</revision>
<data type="primary"><checksum type="sha256">{}</checksum>
<location href="repodata/{primary_name}"/><timestamp>{timestamp}</timestamp><size>{}</size></data>
</repomd>"#,
            hash::sha256(&primary),
            primary.len()
        );
        fs::write(repodata.join("repomd.xml"), repomd).unwrap();
    }

    /// Publish a detached signature and the key that makes it valid
    pub fn sign(&self) {
        fs::write(self.root.join("repodata/repomd.xml.asc"), GOOD_SIGNATURE).unwrap();
        fs::write(self.root.join(KEY_FILE), "fixture key").unwrap();
    }

    pub fn repomd(&self) -> Vec<u8> {
        fs::read(self.root.join("repodata/repomd.xml")).unwrap()
    }

    /// Make the repository unreachable
    pub fn remove(&self) {
        fs::remove_dir_all(&self.root).unwrap();
    }
}

/// Transport that records every URL before delegating to the real one
pub struct CountingTransport {
    inner: HttpTransport,
    requests: Mutex<Vec<String>>,
}

impl CountingTransport {
    pub fn new() -> Self {
        Self {
            inner: HttpTransport::new().unwrap(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests whose URL ends with `suffix`
    pub fn count_ending_with(&self, suffix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.ends_with(suffix))
            .count()
    }

    pub fn reset(&self) {
        self.requests.lock().unwrap().clear();
    }

    fn record(&self, url: &str) {
        self.requests.lock().unwrap().push(url.to_string());
    }
}

impl Transport for CountingTransport {
    fn fetch(&self, url: &str, dest: &Path, callbacks: &dyn TransferCallbacks) -> Result<u64> {
        self.record(url);
        self.inner.fetch(url, dest, callbacks)
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.record(url);
        self.inner.fetch_bytes(url)
    }
}

/// Verifier trusting [`GOOD_SIGNATURE`] once any key was imported
pub struct MockVerifier {
    imports: AtomicUsize,
    /// Imported keys make signatures valid
    pub trust_imported: bool,
}

impl MockVerifier {
    pub fn new() -> Self {
        Self {
            imports: AtomicUsize::new(0),
            trust_imported: true,
        }
    }

    /// A verifier that accepts keys but never trusts a signature
    pub fn distrustful() -> Self {
        Self {
            imports: AtomicUsize::new(0),
            trust_imported: false,
        }
    }

    pub fn imports(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }
}

impl SignatureVerifier for MockVerifier {
    fn import_key(&self, keyring: &Path, _key_data: &[u8], source: &str) -> Result<Vec<String>> {
        fs::create_dir_all(keyring)?;
        fs::write(keyring.join("imported.pgp"), source)?;
        self.imports.fetch_add(1, Ordering::SeqCst);
        Ok(vec![source.to_string()])
    }

    fn verify_detached(&self, keyring: &Path, _data: &[u8], signature: &[u8]) -> Result<()> {
        if self.trust_imported && self.has_keys(keyring) && signature == GOOD_SIGNATURE {
            Ok(())
        } else {
            Err(Error::Signature("no trusted key for signature".to_string()))
        }
    }

    fn has_keys(&self, keyring: &Path) -> bool {
        keyring.join("imported.pgp").is_file()
    }
}

/// Everything a pipeline test needs, rooted in one temp dir
pub struct TestEnv {
    pub dir: TempDir,
    pub main: MainConfig,
    pub transport: Arc<CountingTransport>,
    pub verifier: Arc<MockVerifier>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_verifier(MockVerifier::new())
    }

    pub fn with_verifier(verifier: MockVerifier) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut main = MainConfig::default();
        main.cachedir = dir.path().join("cache");
        main.system_cachedir = dir.path().join("system-cache");
        main.persistdir = dir.path().join("persist");
        main.optional_metadata_types.clear();
        Self {
            dir,
            main,
            transport: Arc::new(CountingTransport::new()),
            verifier: Arc::new(verifier),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A privileged context sharing this environment's mocks
    pub fn context(&self) -> Arc<SyncContext> {
        self.build_context(true)
    }

    /// An unprivileged context, allowed to clone the system cache
    pub fn user_context(&self) -> Arc<SyncContext> {
        self.build_context(false)
    }

    fn build_context(&self, is_root: bool) -> Arc<SyncContext> {
        let transport: Arc<dyn Transport> = self.transport.clone();
        let verifier: Arc<dyn SignatureVerifier> = self.verifier.clone();
        Arc::new(
            SyncContext::new(self.main.clone(), transport, verifier)
                .with_callbacks(Arc::new(SilentCallbacks))
                .with_root(is_root),
        )
    }

    /// An enabled repository fetching from `fixture`
    pub fn repo(&self, id: &str, fixture: &FixtureRepo) -> RepositoryConfig {
        let mut config = RepositoryConfig::new(id, &self.main);
        config.baseurl = vec![fixture.url()];
        config
    }
}
