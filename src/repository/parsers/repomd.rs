// src/repository/parsers/repomd.rs

//! `repomd.xml`, the repository metadata descriptor

use super::{XmlNode, parse_number, walk_xml};
use crate::error::{Error, Result};
use crate::hash::Hash;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A `<distro>` tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistroTag {
    pub cpeid: Option<String>,
    pub tag: String,
}

/// One `<data type="...">` record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepomdRecord {
    pub kind: String,
    pub location_href: String,
    pub checksum_type: String,
    pub checksum: String,
    pub timestamp: i64,
    pub size: u64,
}

impl RepomdRecord {
    /// Checksum of the record's file as published
    pub fn hash(&self) -> Result<Hash> {
        Hash::from_metadata(&self.checksum_type, &self.checksum).map_err(|e| {
            Error::Parse(format!("Record \"{}\" in repomd.xml: {e}", self.kind))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Repomd {
    pub revision: Option<String>,
    pub content_tags: Vec<String>,
    pub distro_tags: Vec<DistroTag>,
    pub records: Vec<RepomdRecord>,
}

impl Repomd {
    pub fn parse<R: BufRead>(source: R) -> Result<Self> {
        let mut repomd = Repomd::default();
        let mut record: Option<RepomdRecord> = None;
        let mut in_tags = false;
        let mut pending_cpeid: Option<String> = None;
        let mut saw_root = false;

        walk_xml(source, |node| {
            match node {
                XmlNode::Start(e) => match e.name() {
                    b"repomd" => saw_root = true,
                    b"tags" => in_tags = true,
                    b"data" => {
                        record = Some(RepomdRecord {
                            kind: e.attr_or_default("type")?,
                            ..Default::default()
                        });
                    }
                    b"distro" if in_tags => pending_cpeid = e.attr("cpeid")?,
                    b"checksum" => {
                        if let Some(r) = record.as_mut() {
                            r.checksum_type = e.attr_or_default("type")?;
                        }
                    }
                    b"location" => {
                        if let Some(r) = record.as_mut() {
                            r.location_href = e.attr_or_default("href")?;
                        }
                    }
                    _ => {}
                },
                XmlNode::End { name, text } => match name {
                    b"tags" => in_tags = false,
                    b"revision" if record.is_none() => {
                        repomd.revision = Some(text.to_string());
                    }
                    b"content" if in_tags => repomd.content_tags.push(text.to_string()),
                    b"distro" if in_tags => repomd.distro_tags.push(DistroTag {
                        cpeid: pending_cpeid.take(),
                        tag: text.to_string(),
                    }),
                    b"checksum" => {
                        if let Some(r) = record.as_mut() {
                            r.checksum = text.to_string();
                        }
                    }
                    b"timestamp" => {
                        if let Some(r) = record.as_mut() {
                            r.timestamp = parse_number(Some(text))?;
                        }
                    }
                    b"size" => {
                        if let Some(r) = record.as_mut() {
                            r.size = parse_number(Some(text))?;
                        }
                    }
                    b"data" => {
                        if let Some(r) = record.take() {
                            repomd.records.push(r);
                        }
                    }
                    _ => {}
                },
            }
            Ok(())
        })?;

        if !saw_root {
            return Err(Error::Parse("repomd.xml has no <repomd> element".to_string()));
        }
        Ok(repomd)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file))
    }

    pub fn record(&self, kind: &str) -> Option<&RepomdRecord> {
        self.records.iter().find(|r| r.kind == kind)
    }

    /// First record present among `kinds`
    pub fn first_record(&self, kinds: &[&str]) -> Option<&RepomdRecord> {
        kinds.iter().find_map(|k| self.record(k))
    }

    /// Newest timestamp of all records
    pub fn max_timestamp(&self) -> i64 {
        self.records.iter().map(|r| r.timestamp).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPOMD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
  <revision>1712345678</revision>
  <tags>
    <content>binary-x86_64</content>
    <distro cpeid="cpe:/o:fedoraproject:fedora:41">Fedora 41</distro>
  </tags>
  <data type="primary">
    <checksum type="sha256">5e1bd6ad1d8b4a1a1a7f0e2f1c7e0b1d5e1bd6ad1d8b4a1a1a7f0e2f1c7e0b1d</checksum>
    <open-checksum type="sha256">aaaa</open-checksum>
    <location href="repodata/abc-primary.xml.gz"/>
    <timestamp>1712345000</timestamp>
    <size>1234</size>
    <open-size>9999</open-size>
  </data>
  <data type="group_gz">
    <checksum type="sha1">da39a3ee5e6b4b0d3255bfef95601890afd80709</checksum>
    <location href="repodata/comps.xml.gz"/>
    <timestamp>1712345999</timestamp>
  </data>
</repomd>"#;

    #[test]
    fn test_parse_repomd() {
        let repomd = Repomd::parse(REPOMD.as_bytes()).unwrap();
        assert_eq!(repomd.revision.as_deref(), Some("1712345678"));
        assert_eq!(repomd.content_tags, vec!["binary-x86_64"]);
        assert_eq!(
            repomd.distro_tags,
            vec![DistroTag {
                cpeid: Some("cpe:/o:fedoraproject:fedora:41".into()),
                tag: "Fedora 41".into()
            }]
        );
        assert_eq!(repomd.records.len(), 2);

        let primary = repomd.record("primary").unwrap();
        assert_eq!(primary.location_href, "repodata/abc-primary.xml.gz");
        assert_eq!(primary.checksum_type, "sha256");
        // open-checksum must not overwrite checksum
        assert!(primary.checksum.starts_with("5e1bd6"));
        assert_eq!(primary.size, 1234);
        assert!(primary.hash().is_ok());

        assert_eq!(repomd.max_timestamp(), 1712345999);
        assert_eq!(
            repomd.first_record(&["group_gz", "group"]).unwrap().kind,
            "group_gz"
        );
        // sha1 is not trusted
        assert!(repomd.record("group_gz").unwrap().hash().is_err());
    }

    #[test]
    fn test_not_a_repomd() {
        assert!(Repomd::parse("<html><body/></html>".as_bytes()).is_err());
        assert!(Repomd::parse("garbage".as_bytes()).is_err());
    }
}
