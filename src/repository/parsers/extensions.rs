// src/repository/parsers/extensions.rs

//! Optional metadata: filelists, other (changelogs), prestodelta,
//! updateinfo and comps groups

use super::{XmlNode, parse_number, walk_xml};
use crate::error::Result;
use crate::index::{
    Advisory, AdvisoryPackage, ChangelogEntry, Delta, FileList, Group, GroupPackage,
    PackageChangelog,
};
use std::io::BufRead;

pub fn parse_filelists<R: BufRead>(source: R) -> Result<Vec<FileList>> {
    let mut lists = Vec::new();
    let mut current: Option<FileList> = None;

    walk_xml(source, |node| {
        match node {
            XmlNode::Start(e) if e.name() == b"package" => {
                current = Some(FileList {
                    pkgid: e.attr_or_default("pkgid")?,
                    name: e.attr_or_default("name")?,
                    arch: e.attr_or_default("arch")?,
                    files: Vec::new(),
                });
            }
            XmlNode::End { name: b"file", text } => {
                if let Some(list) = current.as_mut() {
                    list.files.push(text.to_string());
                }
            }
            XmlNode::End { name: b"package", .. } => lists.extend(current.take()),
            _ => {}
        }
        Ok(())
    })?;

    Ok(lists)
}

pub fn parse_other<R: BufRead>(source: R) -> Result<Vec<PackageChangelog>> {
    let mut changelogs = Vec::new();
    let mut current: Option<PackageChangelog> = None;
    let mut entry: Option<ChangelogEntry> = None;

    walk_xml(source, |node| {
        match node {
            XmlNode::Start(e) => match e.name() {
                b"package" => {
                    current = Some(PackageChangelog {
                        pkgid: e.attr_or_default("pkgid")?,
                        name: e.attr_or_default("name")?,
                        entries: Vec::new(),
                    });
                }
                b"changelog" => {
                    entry = Some(ChangelogEntry {
                        author: e.attr_or_default("author")?,
                        date: parse_number(e.attr("date")?.as_deref())?,
                        text: String::new(),
                    });
                }
                _ => {}
            },
            XmlNode::End { name: b"changelog", text } => {
                if let (Some(pkg), Some(mut log)) = (current.as_mut(), entry.take()) {
                    log.text = text.to_string();
                    pkg.entries.push(log);
                }
            }
            XmlNode::End { name: b"package", .. } => changelogs.extend(current.take()),
            _ => {}
        }
        Ok(())
    })?;

    Ok(changelogs)
}

pub fn parse_prestodelta<R: BufRead>(source: R) -> Result<Vec<Delta>> {
    let mut deltas = Vec::new();
    let mut package: Option<Delta> = None;
    let mut current: Option<Delta> = None;

    walk_xml(source, |node| {
        match node {
            XmlNode::Start(e) => match e.name() {
                b"newpackage" => {
                    package = Some(Delta {
                        name: e.attr_or_default("name")?,
                        arch: e.attr_or_default("arch")?,
                        epoch: parse_number(e.attr("epoch")?.as_deref())?,
                        version: e.attr_or_default("version")?,
                        release: e.attr_or_default("release")?,
                        ..Default::default()
                    });
                }
                b"delta" => {
                    if let Some(base) = package.as_ref() {
                        current = Some(Delta {
                            old_epoch: parse_number(e.attr("oldepoch")?.as_deref())?,
                            old_version: e.attr_or_default("oldversion")?,
                            old_release: e.attr_or_default("oldrelease")?,
                            ..base.clone()
                        });
                    }
                }
                _ => {}
            },
            XmlNode::End { name, text } => {
                if let Some(delta) = current.as_mut() {
                    match name {
                        b"filename" => delta.filename = text.to_string(),
                        b"size" => delta.size = parse_number(Some(text))?,
                        b"checksum" => delta.checksum = text.to_string(),
                        _ => {}
                    }
                }
                match name {
                    b"delta" => deltas.extend(current.take()),
                    b"newpackage" => package = None,
                    _ => {}
                }
            }
        }
        Ok(())
    })?;

    Ok(deltas)
}

pub fn parse_updateinfo<R: BufRead>(source: R) -> Result<Vec<Advisory>> {
    let mut advisories = Vec::new();
    let mut current: Option<Advisory> = None;
    let mut package: Option<AdvisoryPackage> = None;

    walk_xml(source, |node| {
        match node {
            XmlNode::Start(e) => match e.name() {
                b"update" => {
                    current = Some(Advisory {
                        kind: e.attr_or_default("type")?,
                        ..Default::default()
                    });
                }
                b"issued" => {
                    if let Some(adv) = current.as_mut() {
                        adv.issued = e.attr_or_default("date")?;
                    }
                }
                b"package" if current.is_some() => {
                    package = Some(AdvisoryPackage {
                        name: e.attr_or_default("name")?,
                        epoch: parse_number(e.attr("epoch")?.as_deref())?,
                        version: e.attr_or_default("version")?,
                        release: e.attr_or_default("release")?,
                        arch: e.attr_or_default("arch")?,
                        filename: String::new(),
                    });
                }
                _ => {}
            },
            XmlNode::End { name, text } => {
                let Some(adv) = current.as_mut() else {
                    return Ok(());
                };
                match name {
                    b"id" => adv.id = text.to_string(),
                    b"title" => adv.title = text.to_string(),
                    b"severity" => adv.severity = text.to_string(),
                    b"filename" => {
                        if let Some(pkg) = package.as_mut() {
                            pkg.filename = text.to_string();
                        }
                    }
                    b"package" => adv.packages.extend(package.take()),
                    b"update" => advisories.extend(current.take()),
                    _ => {}
                }
            }
        }
        Ok(())
    })?;

    Ok(advisories)
}

pub fn parse_comps<R: BufRead>(source: R) -> Result<Vec<Group>> {
    let mut groups = Vec::new();
    let mut current: Option<Group> = None;
    let mut translated = false;
    let mut req_kind = String::new();

    walk_xml(source, |node| {
        match node {
            XmlNode::Start(e) => match e.name() {
                b"group" => {
                    current = Some(Group {
                        uservisible: true,
                        ..Default::default()
                    });
                }
                b"name" | b"description" => translated = e.attr("lang")?.is_some(),
                b"packagereq" => {
                    req_kind = e.attr("type")?.unwrap_or_else(|| "mandatory".to_string());
                }
                _ => {}
            },
            XmlNode::End { name, text } => {
                let Some(group) = current.as_mut() else {
                    return Ok(());
                };
                match name {
                    b"id" => group.id = text.to_string(),
                    b"name" if !translated => group.name = text.to_string(),
                    b"description" if !translated => group.description = text.to_string(),
                    b"default" => group.default = text.trim() == "true",
                    b"uservisible" => group.uservisible = text.trim() == "true",
                    b"packagereq" => group.packages.push(GroupPackage {
                        name: text.to_string(),
                        kind: std::mem::take(&mut req_kind),
                    }),
                    b"group" => groups.extend(current.take()),
                    _ => {}
                }
            }
        }
        Ok(())
    })?;

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filelists() {
        let xml = r#"<filelists packages="1">
<package pkgid="abc" name="hello" arch="x86_64">
  <version epoch="0" ver="1" rel="1"/>
  <file>/usr/bin/hello</file>
  <file type="dir">/usr/share/doc/hello</file>
</package></filelists>"#;
        let lists = parse_filelists(xml.as_bytes()).unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].pkgid, "abc");
        assert_eq!(lists[0].files, vec!["/usr/bin/hello", "/usr/share/doc/hello"]);
    }

    #[test]
    fn test_other() {
        let xml = r#"<otherdata packages="1">
<package pkgid="abc" name="hello" arch="x86_64">
  <version epoch="0" ver="1" rel="1"/>
  <changelog author="Jane &lt;jane@example.org&gt; - 1-1" date="1700000000">- Initial build</changelog>
  <changelog author="Jane &lt;jane@example.org&gt; - 1-2" date="1700100000">- Rebuilt</changelog>
</package></otherdata>"#;
        let logs = parse_other(xml.as_bytes()).unwrap();
        assert_eq!(logs[0].entries.len(), 2);
        assert_eq!(logs[0].entries[0].author, "Jane <jane@example.org> - 1-1");
        assert_eq!(logs[0].entries[1].date, 1700100000);
        assert_eq!(logs[0].entries[1].text, "- Rebuilt");
    }

    #[test]
    fn test_prestodelta() {
        let xml = r#"<prestodelta>
<newpackage name="hello" epoch="0" version="2" release="1" arch="x86_64">
  <delta oldepoch="0" oldversion="1" oldrelease="1">
    <filename>drpms/hello-1-1_2-1.x86_64.drpm</filename>
    <sequence>hello-1-1-abc</sequence>
    <size>4096</size>
    <checksum type="sha256">ffff</checksum>
  </delta>
  <delta oldepoch="0" oldversion="1" oldrelease="0">
    <filename>drpms/hello-1-0_2-1.x86_64.drpm</filename>
    <size>8192</size>
  </delta>
</newpackage></prestodelta>"#;
        let deltas = parse_prestodelta(xml.as_bytes()).unwrap();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].name, "hello");
        assert_eq!(deltas[0].version, "2");
        assert_eq!(deltas[0].old_version, "1");
        assert_eq!(deltas[0].size, 4096);
        assert_eq!(deltas[0].checksum, "ffff");
        assert_eq!(deltas[1].old_release, "0");
        assert!(deltas[1].checksum.is_empty());
    }

    #[test]
    fn test_updateinfo() {
        let xml = r#"<updates>
<update from="updates@example.org" status="stable" type="security" version="2.0">
  <id>FEDORA-2024-0001</id>
  <title>hello security update</title>
  <issued date="2024-03-01 00:00:00"/>
  <severity>Important</severity>
  <pkglist><collection short="F41"><name>Fedora 41</name>
    <package name="hello" version="2" release="1" epoch="0" arch="x86_64" src="hello-2-1.src.rpm">
      <filename>hello-2-1.x86_64.rpm</filename>
    </package>
  </collection></pkglist>
</update></updates>"#;
        let advisories = parse_updateinfo(xml.as_bytes()).unwrap();
        assert_eq!(advisories.len(), 1);
        let adv = &advisories[0];
        assert_eq!(adv.id, "FEDORA-2024-0001");
        assert_eq!(adv.kind, "security");
        assert_eq!(adv.severity, "Important");
        assert_eq!(adv.issued, "2024-03-01 00:00:00");
        assert_eq!(adv.packages.len(), 1);
        assert_eq!(adv.packages[0].filename, "hello-2-1.x86_64.rpm");
    }

    #[test]
    fn test_comps() {
        let xml = r#"<comps>
<group>
  <id>core</id>
  <name>Core</name>
  <name xml:lang="de">Kern</name>
  <description>Smallest possible installation</description>
  <default>false</default>
  <uservisible>false</uservisible>
  <packagelist>
    <packagereq type="mandatory">bash</packagereq>
    <packagereq type="optional">zsh</packagereq>
    <packagereq>coreutils</packagereq>
  </packagelist>
</group>
<category><id>base</id><name>Base</name></category>
</comps>"#;
        let groups = parse_comps(xml.as_bytes()).unwrap();
        assert_eq!(groups.len(), 1);
        let core = &groups[0];
        assert_eq!(core.id, "core");
        assert_eq!(core.name, "Core");
        assert!(!core.uservisible);
        assert_eq!(core.packages.len(), 3);
        assert_eq!(core.packages[1].kind, "optional");
        assert_eq!(core.packages[2].kind, "mandatory");
    }
}
