// src/repository/loader.rs

//! Building a repository's in-memory index
//!
//! Each index kind is taken from its binary index file when that file
//! was written for the current `repomd.xml`; otherwise the raw metadata
//! is parsed and, with `build_cache`, the binary index is rewritten.

use crate::compression;
use crate::error::{Error, Result};
use crate::index::codec::{self, Checksum};
use crate::index::{IndexKind, IndexSource, RepoIndex};
use crate::repository::parsers::extensions::{
    parse_comps, parse_filelists, parse_other, parse_prestodelta, parse_updateinfo,
};
use crate::repository::parsers::primary::parse_primary;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Everything the loader thread needs to build one repository
#[derive(Debug, Clone)]
pub struct LoadJob {
    pub repo_id: String,
    pub priority: i32,
    pub cost: i32,
    pub repomd_path: PathBuf,
    /// Raw metadata file per index kind; `Main` is required
    pub metadata: BTreeMap<IndexKind, PathBuf>,
    pub solv_dir: PathBuf,
    pub build_cache: bool,
}

struct KindLoader<'a> {
    job: &'a LoadJob,
    checksum: Checksum,
    sources: BTreeMap<IndexKind, IndexSource>,
}

impl KindLoader<'_> {
    fn load<T, F>(&mut self, kind: IndexKind, raw: &Path, parse: F) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Box<dyn BufRead>) -> Result<Vec<T>>,
    {
        let solv = self.job.solv_dir.join(kind.file_name(&self.job.repo_id));
        if let Some(items) = codec::try_load::<Vec<T>>(&solv, &self.checksum) {
            self.sources.insert(kind, IndexSource::Cache);
            return Ok(items);
        }

        debug!("Parsing {} metadata for {}", kind, self.job.repo_id);
        let items = parse(compression::open_metadata(raw)?)?;
        if self.job.build_cache {
            if let Err(e) = codec::write(&items, &solv, &self.checksum) {
                warn!("Cannot write binary index {}: {}", solv.display(), e);
            }
        }
        self.sources.insert(kind, IndexSource::Parsed);
        Ok(items)
    }
}

/// Build the index of one repository
pub fn load_repo(job: &LoadJob) -> Result<RepoIndex> {
    let primary = job.metadata.get(&IndexKind::Main).ok_or_else(|| {
        Error::CacheCorruption(format!("No primary metadata for \"{}\"", job.repo_id))
    })?;

    let mut loader = KindLoader {
        job,
        checksum: codec::checksum_file(&job.repomd_path)?,
        sources: BTreeMap::new(),
    };

    let mut index = RepoIndex::new(&job.repo_id);
    index.priority = job.priority;
    index.cost = job.cost;
    index.packages = loader.load(IndexKind::Main, primary, parse_primary)?;

    for kind in IndexKind::EXTENSIONS {
        let Some(raw) = job.metadata.get(&kind) else {
            continue;
        };
        // A broken extension does not make the repository unusable
        let loaded = match kind {
            IndexKind::Filelists => loader
                .load(kind, raw, parse_filelists)
                .map(|v| index.filelists = v),
            IndexKind::Other => loader.load(kind, raw, parse_other).map(|v| index.changelogs = v),
            IndexKind::Presto => loader.load(kind, raw, parse_prestodelta).map(|v| index.deltas = v),
            IndexKind::Updateinfo => loader
                .load(kind, raw, parse_updateinfo)
                .map(|v| index.advisories = v),
            IndexKind::Comps => loader.load(kind, raw, parse_comps).map(|v| index.groups = v),
            IndexKind::Main => Ok(()),
        };
        if let Err(e) = loaded {
            warn!("Cannot load {} metadata of {}: {}", kind, job.repo_id, e);
        }
    }

    index.sources = loader.sources;
    debug!("Loaded {} packages from {}", index.packages.len(), job.repo_id);
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const PRIMARY: &str = r#"<metadata packages="2">
<package type="rpm"><name>hello</name><arch>x86_64</arch><version epoch="0" ver="1" rel="1"/>
<location href="Packages/hello.rpm"/></package>
<package type="rpm"><name>world</name><arch>noarch</arch><version epoch="0" ver="2" rel="1"/>
<location href="Packages/world.rpm"/></package>
</metadata>"#;

    const UPDATEINFO: &str = r#"<updates><update type="bugfix"><id>FIX-1</id></update></updates>"#;

    fn job(dir: &TempDir) -> LoadJob {
        let repodata = dir.path().join("repodata");
        fs::create_dir_all(&repodata).unwrap();
        fs::write(repodata.join("repomd.xml"), "<repomd/>").unwrap();
        fs::write(repodata.join("primary.xml"), PRIMARY).unwrap();
        fs::write(repodata.join("updateinfo.xml"), UPDATEINFO).unwrap();

        let mut metadata = BTreeMap::new();
        metadata.insert(IndexKind::Main, repodata.join("primary.xml"));
        metadata.insert(IndexKind::Updateinfo, repodata.join("updateinfo.xml"));
        LoadJob {
            repo_id: "updates".to_string(),
            priority: 10,
            cost: 500,
            repomd_path: repodata.join("repomd.xml"),
            metadata,
            solv_dir: dir.path().join("solv"),
            build_cache: true,
        }
    }

    #[test]
    fn test_parse_then_cache() {
        let dir = TempDir::new().unwrap();
        let job = job(&dir);

        let first = load_repo(&job).unwrap();
        assert_eq!(first.packages.len(), 2);
        assert_eq!(first.advisories[0].id, "FIX-1");
        assert_eq!(first.priority, 10);
        assert_eq!(first.source(IndexKind::Main), Some(IndexSource::Parsed));
        assert!(job.solv_dir.join("updates.solv").is_file());
        assert!(job.solv_dir.join("updates-updateinfo.solvx").is_file());

        let header = codec::read_header(&job.solv_dir.join("updates.solv")).unwrap().unwrap();
        assert_eq!(header.checksum, codec::checksum_file(&job.repomd_path).unwrap());

        // Raw primary no longer needed while the index is current
        fs::write(&job.metadata[&IndexKind::Main], "garbage").unwrap();
        let second = load_repo(&job).unwrap();
        assert_eq!(second.source(IndexKind::Main), Some(IndexSource::Cache));
        assert_eq!(second.packages, first.packages);
    }

    #[test]
    fn test_changed_repomd_reparses() {
        let dir = TempDir::new().unwrap();
        let job = job(&dir);
        load_repo(&job).unwrap();

        fs::write(&job.repomd_path, "<repomd><revision>2</revision></repomd>").unwrap();
        let index = load_repo(&job).unwrap();
        assert_eq!(index.source(IndexKind::Main), Some(IndexSource::Parsed));
    }

    #[test]
    fn test_without_build_cache() {
        let dir = TempDir::new().unwrap();
        let mut job = job(&dir);
        job.build_cache = false;
        load_repo(&job).unwrap();
        assert!(!job.solv_dir.exists());
    }

    #[test]
    fn test_missing_extension_is_skipped() {
        let dir = TempDir::new().unwrap();
        let job = job(&dir);
        fs::remove_file(&job.metadata[&IndexKind::Updateinfo]).unwrap();

        let index = load_repo(&job).unwrap();
        assert_eq!(index.packages.len(), 2);
        assert!(index.advisories.is_empty());
        assert_eq!(index.source(IndexKind::Updateinfo), None);
    }

    #[test]
    fn test_missing_primary_fails() {
        let dir = TempDir::new().unwrap();
        let job = job(&dir);
        fs::remove_file(&job.metadata[&IndexKind::Main]).unwrap();
        assert!(load_repo(&job).is_err());
    }
}
