// src/repository/parsers/mirrors.rs

//! Metalink and mirrorlist documents

use super::{XmlNode, parse_number, walk_xml};
use crate::error::{Error, Result};
use crate::hash::{self, Hash};
use std::io::BufRead;
use std::path::Path;
use tracing::debug;

/// Suffix stripped from metalink URLs to get a mirror's base URL
const REPOMD_SUFFIX: &str = "repodata/repomd.xml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetalinkUrl {
    pub url: String,
    pub protocol: Option<String>,
    pub preference: u32,
}

/// A previous `repomd.xml` that mirrors may still serve
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetalinkAlternate {
    pub timestamp: i64,
    pub size: u64,
    pub hashes: Vec<(String, String)>,
}

/// The `repomd.xml` entry of a metalink
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metalink {
    pub timestamp: i64,
    pub size: u64,
    /// (algorithm name, hex digest) in document order
    pub hashes: Vec<(String, String)>,
    pub alternates: Vec<MetalinkAlternate>,
    pub urls: Vec<MetalinkUrl>,
}

impl Metalink {
    pub fn parse<R: BufRead>(source: R) -> Result<Self> {
        let mut metalink = Metalink::default();
        let mut in_repomd = false;
        let mut found = false;
        let mut in_alternates = false;
        let mut current = MetalinkAlternate::default();
        let mut alternate: Option<MetalinkAlternate> = None;
        let mut hash_type: Option<String> = None;
        let mut url: Option<(Option<String>, u32)> = None;

        walk_xml(source, |node| {
            match node {
                XmlNode::Start(e) => match e.name() {
                    b"file" => {
                        in_repomd = e.attr("name")?.as_deref() == Some("repomd.xml");
                        found |= in_repomd;
                    }
                    b"alternates" if in_repomd => in_alternates = true,
                    b"alternate" if in_alternates => alternate = Some(MetalinkAlternate::default()),
                    b"hash" if in_repomd => hash_type = e.attr("type")?,
                    b"url" if in_repomd && !in_alternates => {
                        let preference = parse_number(e.attr("preference")?.as_deref())?;
                        url = Some((e.attr("protocol")?, preference));
                    }
                    _ => {}
                },
                XmlNode::End { name, text } if in_repomd => match name {
                    b"file" => in_repomd = false,
                    b"alternates" => in_alternates = false,
                    b"alternate" => metalink.alternates.extend(alternate.take()),
                    b"timestamp" | b"size" | b"hash" => {
                        // Fields of an alternate describe an older repomd.xml
                        let entry = match alternate.as_mut() {
                            Some(alt) => alt,
                            None if in_alternates => return Ok(()),
                            None => &mut current,
                        };
                        match name {
                            b"timestamp" => entry.timestamp = parse_number(Some(text))?,
                            b"size" => entry.size = parse_number(Some(text))?,
                            _ => {
                                if let Some(kind) = hash_type.take() {
                                    entry.hashes.push((kind, text.trim().to_string()));
                                }
                            }
                        }
                    }
                    b"url" => {
                        if let Some((protocol, preference)) = url.take() {
                            metalink.urls.push(MetalinkUrl {
                                url: text.trim().to_string(),
                                protocol,
                                preference,
                            });
                        }
                    }
                    _ => {}
                },
                XmlNode::End { .. } => {}
            }
            Ok(())
        })?;

        if !found {
            return Err(Error::Parse("metalink has no entry for repomd.xml".to_string()));
        }
        metalink.timestamp = current.timestamp;
        metalink.size = current.size;
        metalink.hashes = current.hashes;
        Ok(metalink)
    }

    /// Hashes of algorithms this crate can verify
    pub fn recognized_hashes(&self) -> Vec<Hash> {
        recognized(&self.hashes)
    }

    /// Whether `path` matches every recognized hash of the current
    /// repomd.xml; false when there is none to compare
    pub fn matches_repomd(&self, path: &Path) -> Result<bool> {
        all_match(&self.recognized_hashes(), path)
    }

    /// Check a freshly fetched repomd.xml
    ///
    /// Every recognized hash of the current entry must match. Mirrors
    /// lagging behind may serve an alternate instead, accepted when all
    /// of that alternate's recognized hashes match.
    pub fn verify_repomd(&self, path: &Path) -> Result<()> {
        let mut mismatch = None;
        for expected in self.recognized_hashes() {
            if let Err(e) = hash::verify_file(path, &expected) {
                mismatch = Some(e);
                break;
            }
        }
        let Some(err) = mismatch else {
            return Ok(());
        };

        for alternate in &self.alternates {
            if all_match(&recognized(&alternate.hashes), path)? {
                debug!("repomd.xml matches the alternate from {}", alternate.timestamp);
                return Ok(());
            }
        }
        Err(err)
    }

    /// Mirror base URLs, most preferred first
    pub fn mirror_urls(&self) -> Vec<String> {
        let mut urls: Vec<&MetalinkUrl> = self
            .urls
            .iter()
            .filter(|u| {
                matches!(
                    u.protocol.as_deref(),
                    None | Some("http") | Some("https") | Some("ftp") | Some("file")
                )
            })
            .collect();
        urls.sort_by(|a, b| b.preference.cmp(&a.preference));
        urls.into_iter()
            .map(|u| u.url.strip_suffix(REPOMD_SUFFIX).unwrap_or(&u.url).to_string())
            .collect()
    }
}

fn recognized(hashes: &[(String, String)]) -> Vec<Hash> {
    hashes
        .iter()
        .filter_map(|(kind, value)| match Hash::from_metadata(kind, value) {
            Ok(hash) => Some(hash),
            Err(e) => {
                debug!("Ignoring metalink hash {}: {}", kind, e);
                None
            }
        })
        .collect()
}

fn all_match(expected: &[Hash], path: &Path) -> Result<bool> {
    if expected.is_empty() {
        return Ok(false);
    }
    for wanted in expected {
        if !hash::hash_file(wanted.algorithm, path)?.matches(wanted) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Parse a plain-text mirrorlist: one URL per line, `#` comments
pub fn parse_mirrorlist(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.strip_suffix(REPOMD_SUFFIX).unwrap_or(l).to_string())
        .collect()
}
