// src/repository/parsers/primary.rs

//! `primary.xml`: packages, versions and dependencies

use super::{XmlNode, parse_number, walk_xml};
use crate::error::Result;
use crate::index::{Dependency, Package};
use std::io::BufRead;

#[derive(Clone, Copy, PartialEq, Eq)]
enum DepList {
    Provides,
    Requires,
    Conflicts,
    Obsoletes,
}

/// Parse every `<package>` in a primary document
pub fn parse_primary<R: BufRead>(source: R) -> Result<Vec<Package>> {
    let mut packages = Vec::new();
    let mut current: Option<Package> = None;
    let mut dep_list: Option<DepList> = None;
    let mut pkgid_checksum = false;

    walk_xml(source, |node| {
        match node {
            XmlNode::Start(e) => {
                if e.name() == b"package" {
                    current = Some(Package::default());
                    return Ok(());
                }
                let Some(pkg) = current.as_mut() else {
                    return Ok(());
                };
                match e.name() {
                    b"version" => {
                        pkg.epoch = parse_number(e.attr("epoch")?.as_deref())?;
                        pkg.version = e.attr_or_default("ver")?;
                        pkg.release = e.attr_or_default("rel")?;
                    }
                    b"checksum" => {
                        pkgid_checksum = e.attr("pkgid")?.as_deref() == Some("YES");
                    }
                    b"size" => pkg.size = e.attr_u64("package")?,
                    b"location" => pkg.location = e.attr_or_default("href")?,
                    b"provides" => dep_list = Some(DepList::Provides),
                    b"requires" => dep_list = Some(DepList::Requires),
                    b"conflicts" => dep_list = Some(DepList::Conflicts),
                    b"obsoletes" => dep_list = Some(DepList::Obsoletes),
                    b"entry" => {
                        let dep = Dependency {
                            name: e.attr_or_default("name")?,
                            flags: e.attr("flags")?,
                            epoch: e.attr("epoch")?,
                            version: e.attr("ver")?,
                            release: e.attr("rel")?,
                        };
                        match dep_list {
                            Some(DepList::Provides) => pkg.provides.push(dep),
                            Some(DepList::Requires) => pkg.requires.push(dep),
                            Some(DepList::Conflicts) => pkg.conflicts.push(dep),
                            Some(DepList::Obsoletes) => pkg.obsoletes.push(dep),
                            None => {}
                        }
                    }
                    _ => {}
                }
            }
            XmlNode::End { name, text } => {
                if name == b"package" {
                    if let Some(pkg) = current.take() {
                        packages.push(pkg);
                    }
                    return Ok(());
                }
                let Some(pkg) = current.as_mut() else {
                    return Ok(());
                };
                match name {
                    b"name" => pkg.name = text.to_string(),
                    b"arch" => pkg.arch = text.to_string(),
                    b"summary" => pkg.summary = text.to_string(),
                    b"checksum" => {
                        // Only the pkgid checksum identifies the package
                        if pkgid_checksum || pkg.pkgid.is_empty() {
                            pkg.pkgid = text.to_string();
                        }
                    }
                    b"file" => pkg.files.push(text.to_string()),
                    b"provides" | b"requires" | b"conflicts" | b"obsoletes" => dep_list = None,
                    _ => {}
                }
            }
        }
        Ok(())
    })?;

    Ok(packages)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMARY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="2">
<package type="rpm">
  <name>hello</name>
  <arch>x86_64</arch>
  <version epoch="0" ver="2.12.1" rel="4.fc41"/>
  <checksum type="sha256" pkgid="YES">1111111111111111111111111111111111111111111111111111111111111111</checksum>
  <summary>Prints a familiar, friendly greeting</summary>
  <description>The GNU Hello program &amp; friends.</description>
  <size package="87654" installed="200000" archive="201000"/>
  <location href="Packages/h/hello-2.12.1-4.fc41.x86_64.rpm"/>
  <format>
    <rpm:license>GPL-3.0-or-later</rpm:license>
    <rpm:provides>
      <rpm:entry name="hello" flags="EQ" epoch="0" ver="2.12.1" rel="4.fc41"/>
      <rpm:entry name="hello(x86-64)" flags="EQ" epoch="0" ver="2.12.1" rel="4.fc41"/>
    </rpm:provides>
    <rpm:requires>
      <rpm:entry name="libc.so.6()(64bit)"/>
      <rpm:entry name="info" pre="1"/>
    </rpm:requires>
    <rpm:obsoletes>
      <rpm:entry name="hello-old" flags="LT" epoch="0" ver="2.0"/>
    </rpm:obsoletes>
    <file>/usr/bin/hello</file>
  </format>
</package>
<package type="rpm">
  <name>hello-doc</name>
  <arch>noarch</arch>
  <version epoch="1" ver="2.12.1" rel="4.fc41"/>
  <checksum type="sha256" pkgid="YES">2222222222222222222222222222222222222222222222222222222222222222</checksum>
  <summary>Docs</summary>
  <location href="Packages/h/hello-doc-2.12.1-4.fc41.noarch.rpm"/>
  <format/>
</package>
</metadata>"#;

    #[test]
    fn test_parse_primary() {
        let packages = parse_primary(PRIMARY.as_bytes()).unwrap();
        assert_eq!(packages.len(), 2);

        let hello = &packages[0];
        assert_eq!(hello.nevra(), "hello-2.12.1-4.fc41.x86_64");
        assert_eq!(hello.pkgid, "1".repeat(64));
        assert_eq!(hello.size, 87654);
        assert_eq!(hello.location, "Packages/h/hello-2.12.1-4.fc41.x86_64.rpm");
        assert_eq!(hello.provides.len(), 2);
        assert_eq!(hello.requires.len(), 2);
        assert_eq!(hello.requires[0].name, "libc.so.6()(64bit)");
        assert_eq!(hello.requires[0].flags, None);
        assert_eq!(hello.obsoletes[0].to_string(), "hello-old < 2.0");
        assert!(hello.conflicts.is_empty());
        assert_eq!(hello.files, vec!["/usr/bin/hello"]);

        let doc = &packages[1];
        assert_eq!(doc.epoch, 1);
        assert_eq!(doc.nevra(), "hello-doc-1:2.12.1-4.fc41.noarch");
        assert!(doc.files.is_empty());
    }

    #[test]
    fn test_empty_primary() {
        let xml = r#"<metadata packages="0"></metadata>"#;
        assert!(parse_primary(xml.as_bytes()).unwrap().is_empty());
    }
}
