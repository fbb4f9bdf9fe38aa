// src/index/codec.rs

//! Versioned binary index files
//!
//! File layout (little-endian):
//!
//! ```text
//! offset  size  field
//! 0       4     magic "\0rsi"
//! 4       4     format version "\01.0"
//! 8       8     index library version, NUL right-padded
//! 16      32    checksum of the source repomd.xml
//! 48      8     body length
//! 56      n     CBOR body
//! 56+n    4     CRC32 of the body
//! ```
//!
//! A file is trusted only when every header field matches the running
//! build and the checksum matches the repomd.xml it is loaded against.
//! Anything else is a cache miss, never an error.

use crate::error::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::fs::{self, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

pub const INDEX_MAGIC: [u8; 4] = *b"\0rsi";
pub const INDEX_FORMAT_VERSION: [u8; 4] = *b"\x001.0";

/// Version of the code that produces index bodies
pub const INDEX_LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix hashed ahead of the source document
pub const CHECKSUM_IDENT: &[u8; 4] = b"H000";

pub const HEADER_LEN: usize = 48;
const BODY_LEN_FIELD: usize = 8;
const CRC_FIELD: usize = 4;

/// Permissions of written index files
const INDEX_FILE_MODE: u32 = 0o644;

/// SHA-256 content checksum
pub type Checksum = [u8; 32];

/// Result of comparing a stored header against expectations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheValidity {
    Valid,
    /// Built by this version, but from different content
    Stale,
    /// Not produced by this build; names the mismatched field
    Corrupt(&'static str),
}

impl CacheValidity {
    /// Compare a stored checksum against the expected one
    pub fn of_checksums(stored: &Checksum, expected: &Checksum) -> Self {
        if stored == expected {
            Self::Valid
        } else {
            Self::Stale
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Fixed-size header of an index file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub magic: [u8; 4],
    pub format_version: [u8; 4],
    pub library_version: [u8; 8],
    pub checksum: Checksum,
}

impl IndexHeader {
    /// Header this build writes for `checksum`
    pub fn current(checksum: Checksum) -> Self {
        Self {
            magic: INDEX_MAGIC,
            format_version: INDEX_FORMAT_VERSION,
            library_version: library_version_tag(),
            checksum,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic);
        out[4..8].copy_from_slice(&self.format_version);
        out[8..16].copy_from_slice(&self.library_version);
        out[16..48].copy_from_slice(&self.checksum);
        out
    }

    /// Parse a header; `None` if `data` is too short
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let data = data.get(..HEADER_LEN)?;
        let mut header = Self {
            magic: [0; 4],
            format_version: [0; 4],
            library_version: [0; 8],
            checksum: [0; 32],
        };
        header.magic.copy_from_slice(&data[0..4]);
        header.format_version.copy_from_slice(&data[4..8]);
        header.library_version.copy_from_slice(&data[8..16]);
        header.checksum.copy_from_slice(&data[16..48]);
        Some(header)
    }
}

/// Library version tag: the version string, NUL right-padded to 8 bytes
fn library_version_tag() -> [u8; 8] {
    let mut tag = [0u8; 8];
    let bytes = INDEX_LIBRARY_VERSION.as_bytes();
    let len = bytes.len().min(tag.len());
    tag[..len].copy_from_slice(&bytes[..len]);
    tag
}

/// Decide whether a stored header can be trusted for `expected`
pub fn validate(header: &IndexHeader, expected: &Checksum) -> CacheValidity {
    if header.magic != INDEX_MAGIC {
        return CacheValidity::Corrupt("magic");
    }
    if header.format_version != INDEX_FORMAT_VERSION {
        return CacheValidity::Corrupt("format version");
    }
    if header.library_version != library_version_tag() {
        return CacheValidity::Corrupt("library version");
    }
    CacheValidity::of_checksums(&header.checksum, expected)
}

/// Checksum a source metadata stream
pub fn checksum<R: Read>(reader: &mut R) -> io::Result<Checksum> {
    let mut hasher = Sha256::new();
    hasher.update(CHECKSUM_IDENT);

    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Checksum a source metadata file
pub fn checksum_file(path: &Path) -> Result<Checksum> {
    let mut file = fs::File::open(path)
        .map_err(|e| Error::CacheCorruption(format!("Cannot open {}: {e}", path.display())))?;
    Ok(checksum(&mut file)?)
}

/// Read only the header of an index file
pub fn read_header(path: &Path) -> Result<Option<IndexHeader>> {
    let mut file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = [0u8; HEADER_LEN];
    match file.read_exact(&mut buf) {
        Ok(()) => Ok(IndexHeader::from_bytes(&buf)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Load an index if the file at `path` is trustworthy for `expected`
pub fn try_load<T: DeserializeOwned>(path: &Path, expected: &Checksum) -> Option<T> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Cannot read binary index {}: {}", path.display(), e);
            }
            return None;
        }
    };

    let Some(header) = IndexHeader::from_bytes(&data) else {
        warn!("Binary index {} is truncated", path.display());
        return None;
    };

    match validate(&header, expected) {
        CacheValidity::Valid => {}
        CacheValidity::Stale => {
            debug!("Binary index {}: checksum mismatch", path.display());
            return None;
        }
        CacheValidity::Corrupt(field) => {
            warn!("Binary index {}: {} mismatch", path.display(), field);
            return None;
        }
    }

    let body = match split_body(&data[HEADER_LEN..]) {
        Some(body) => body,
        None => {
            warn!("Binary index {}: damaged body", path.display());
            return None;
        }
    };

    match ciborium::from_reader(body) {
        Ok(value) => {
            trace!("Loaded binary index {}", path.display());
            Some(value)
        }
        Err(e) => {
            warn!("Binary index {}: cannot decode body: {}", path.display(), e);
            None
        }
    }
}

/// Extract the CBOR payload, checking its length and CRC
fn split_body(rest: &[u8]) -> Option<&[u8]> {
    let len_bytes: [u8; BODY_LEN_FIELD] = rest.get(..BODY_LEN_FIELD)?.try_into().ok()?;
    let len = usize::try_from(u64::from_le_bytes(len_bytes)).ok()?;

    let body_end = BODY_LEN_FIELD.checked_add(len)?;
    let body = rest.get(BODY_LEN_FIELD..body_end)?;
    let crc_bytes: [u8; CRC_FIELD] = rest.get(body_end..body_end + CRC_FIELD)?.try_into().ok()?;
    if rest.len() != body_end + CRC_FIELD {
        return None;
    }

    (crc32fast::hash(body) == u32::from_le_bytes(crc_bytes)).then_some(body)
}

/// Atomically write `value` as an index for `checksum`
///
/// The file is written to a temporary file in the destination directory
/// and renamed over `path`, so readers see either the old or the new
/// complete file.
pub fn write<T: Serialize>(value: &T, path: &Path, checksum: &Checksum) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Filesystem(format!("No parent directory for {}", path.display())))?;
    fs::create_dir_all(dir)
        .map_err(|e| Error::Filesystem(format!("Cannot create {}: {e}", dir.display())))?;

    let mut body = Vec::new();
    ciborium::into_writer(value, &mut body)
        .map_err(|e| Error::Filesystem(format!("Cannot encode binary index: {e}")))?;

    let mut temp = NamedTempFile::new_in(dir)
        .map_err(|e| Error::Filesystem(format!("Cannot create temporary file in {}: {e}", dir.display())))?;
    {
        let file = temp.as_file_mut();
        file.write_all(&IndexHeader::current(*checksum).to_bytes())?;
        file.write_all(&(body.len() as u64).to_le_bytes())?;
        file.write_all(&body)?;
        file.write_all(&crc32fast::hash(&body).to_le_bytes())?;
        file.set_permissions(Permissions::from_mode(INDEX_FILE_MODE))?;
        file.sync_all()?;
    }

    temp.persist(path).map_err(|e| {
        Error::Filesystem(format!("Cannot move binary index into {}: {}", path.display(), e.error))
    })?;
    debug!("Wrote binary index {}", path.display());
    Ok(())
}
