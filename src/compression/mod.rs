// src/compression/mod.rs
//! Transparent decompression of repository metadata files
//!
//! rpm-md records are published as `.gz`, `.xz`, `.zst` or plain XML.
//! The format is detected from the file's magic bytes, falling back to
//! the extension for files too short to carry a magic number.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tracing::trace;

/// Compression-related errors
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Failed to open {path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("Failed to create {format} decoder: {source}")]
    DecoderCreation {
        format: &'static str,
        source: io::Error,
    },
}

/// Supported compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    None,
    Gzip,
    Xz,
    Zstd,
}

impl CompressionFormat {
    /// Detect compression format from file extension
    pub fn from_extension(path: &str) -> Self {
        if path.ends_with(".gz") {
            Self::Gzip
        } else if path.ends_with(".xz") {
            Self::Xz
        } else if path.ends_with(".zst") || path.ends_with(".zstd") {
            Self::Zstd
        } else {
            Self::None
        }
    }

    /// Detect compression format from magic bytes
    ///
    /// - Gzip: `1f 8b`
    /// - XZ: `fd 37 7a 58 5a 00`
    /// - Zstd: `28 b5 2f fd`
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
            Self::Xz
        } else if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Self::Zstd
        } else {
            Self::None
        }
    }
}

/// Create a decompressing reader for the given format
pub fn create_decoder<'a, R: Read + 'a>(
    reader: R,
    format: CompressionFormat,
) -> Result<Box<dyn Read + 'a>, CompressionError> {
    match format {
        CompressionFormat::None => Ok(Box::new(reader)),
        CompressionFormat::Gzip => Ok(Box::new(flate2::read::MultiGzDecoder::new(reader))),
        CompressionFormat::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
        CompressionFormat::Zstd => {
            let decoder = zstd::Decoder::new(reader).map_err(|e| CompressionError::DecoderCreation {
                format: "zstd",
                source: e,
            })?;
            Ok(Box::new(decoder))
        }
    }
}

/// Open a metadata file and return a buffered, decompressed reader
pub fn open_metadata(path: &Path) -> Result<Box<dyn BufRead>, CompressionError> {
    let file = File::open(path).map_err(|e| CompressionError::Open {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);

    let peeked = reader.fill_buf().map_err(|e| CompressionError::Open {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut format = CompressionFormat::from_magic_bytes(peeked);
    if format == CompressionFormat::None && peeked.len() < 6 {
        format = CompressionFormat::from_extension(&path.to_string_lossy());
    }

    trace!("{} is {:?} compressed", path.display(), format);
    let decoder = create_decoder(reader, format)?;
    Ok(Box::new(BufReader::new(decoder)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // Minimal gzip of "hello"
    const GZIP_HELLO: &[u8] = &[
        0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xcb, 0x48, 0xcd, 0xc9, 0xc9,
        0x07, 0x00, 0x86, 0xa6, 0x10, 0x36, 0x05, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn test_format_from_extension() {
        assert_eq!(CompressionFormat::from_extension("primary.xml.gz"), CompressionFormat::Gzip);
        assert_eq!(CompressionFormat::from_extension("primary.xml.xz"), CompressionFormat::Xz);
        assert_eq!(CompressionFormat::from_extension("primary.xml.zst"), CompressionFormat::Zstd);
        assert_eq!(CompressionFormat::from_extension("repomd.xml"), CompressionFormat::None);
    }

    #[test]
    fn test_format_from_magic_bytes() {
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0x1f, 0x8b, 0x08, 0x00]),
            CompressionFormat::Gzip
        );
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]),
            CompressionFormat::Xz
        );
        assert_eq!(
            CompressionFormat::from_magic_bytes(&[0x28, 0xb5, 0x2f, 0xfd]),
            CompressionFormat::Zstd
        );
        assert_eq!(CompressionFormat::from_magic_bytes(b"<?xml"), CompressionFormat::None);
        assert_eq!(CompressionFormat::from_magic_bytes(&[0x1f]), CompressionFormat::None);
    }

    #[test]
    fn test_gzip_decoder() {
        let mut out = Vec::new();
        create_decoder(GZIP_HELLO, CompressionFormat::Gzip)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn test_open_metadata_detects_by_content() {
        let dir = tempfile::tempdir().unwrap();

        // Misleading extension: content wins
        let gz = dir.path().join("primary.xml");
        std::fs::write(&gz, GZIP_HELLO).unwrap();
        let mut out = String::new();
        open_metadata(&gz).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");

        let zst = dir.path().join("other.xml.zst");
        let mut encoder = zstd::Encoder::new(Vec::new(), 3).unwrap();
        encoder.write_all(b"<otherdata/>").unwrap();
        std::fs::write(&zst, encoder.finish().unwrap()).unwrap();
        let mut out = String::new();
        open_metadata(&zst).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "<otherdata/>");

        let plain = dir.path().join("repomd.xml");
        std::fs::write(&plain, "<repomd/>").unwrap();
        let mut out = String::new();
        open_metadata(&plain).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "<repomd/>");
    }

    #[test]
    fn test_open_missing_file() {
        let err = open_metadata(Path::new("/nonexistent/primary.xml.gz")).err().unwrap();
        assert!(matches!(err, CompressionError::Open { .. }));
    }
}
