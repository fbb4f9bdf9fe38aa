// src/repository/parsers/mod.rs

//! Streaming parsers for rpm-md metadata documents
//!
//! Every parser is driven by [`walk_xml`], which turns quick-xml events
//! into start/end callbacks with the accumulated element text, so large
//! documents like `primary.xml` are never held in memory as a tree.

pub mod extensions;
pub mod mirrors;
pub mod primary;
pub mod repomd;

use crate::error::{Error, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::io::BufRead;

/// An opening tag
pub(crate) struct Element<'a> {
    inner: &'a BytesStart<'a>,
}

impl Element<'_> {
    /// Local name, without namespace prefix
    pub fn name(&self) -> &[u8] {
        self.inner.local_name().into_inner()
    }

    /// Unescaped attribute value by local name
    pub fn attr(&self, key: &str) -> Result<Option<String>> {
        for attr in self.inner.attributes() {
            let attr = attr.map_err(|e| Error::Parse(format!("Malformed attribute: {e}")))?;
            if attr.key.local_name().as_ref() == key.as_bytes() {
                return Ok(Some(attr.unescape_value()?.into_owned()));
            }
        }
        Ok(None)
    }

    pub fn attr_or_default(&self, key: &str) -> Result<String> {
        Ok(self.attr(key)?.unwrap_or_default())
    }

    /// Numeric attribute, 0 when absent or empty
    pub fn attr_u64(&self, key: &str) -> Result<u64> {
        parse_number(self.attr(key)?.as_deref())
    }
}

pub(crate) fn parse_number<T>(value: Option<&str>) -> Result<T>
where
    T: std::str::FromStr + Default,
{
    match value.map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(v) => v
            .parse()
            .map_err(|_| Error::Parse(format!("Invalid number \"{v}\""))),
    }
}

pub(crate) enum XmlNode<'a> {
    Start(Element<'a>),
    /// Closing tag with the text collected since the last tag
    End { name: &'a [u8], text: &'a str },
}

/// Stream an XML document through `visit`
pub(crate) fn walk_xml<R, F>(source: R, mut visit: F) -> Result<()>
where
    R: BufRead,
    F: FnMut(XmlNode<'_>) -> Result<()>,
{
    let mut reader = Reader::from_reader(source);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                text.clear();
                visit(XmlNode::Start(Element { inner: &e }))?;
            }
            Event::Empty(e) => {
                text.clear();
                visit(XmlNode::Start(Element { inner: &e }))?;
                visit(XmlNode::End {
                    name: e.local_name().into_inner(),
                    text: "",
                })?;
            }
            Event::End(e) => {
                visit(XmlNode::End {
                    name: e.local_name().into_inner(),
                    text: &text,
                })?;
                text.clear();
            }
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_collects_text_and_attrs() {
        let xml = r#"<root><a x="1&amp;2">hello &lt;world&gt;</a><b/><c><![CDATA[raw <text>]]></c></root>"#;
        let mut seen = Vec::new();
        walk_xml(xml.as_bytes(), |node| {
            match node {
                XmlNode::Start(e) if e.name() == b"a" => {
                    seen.push(format!("a@x={}", e.attr("x")?.unwrap()));
                }
                XmlNode::End { name, text } => {
                    seen.push(format!("{}={}", String::from_utf8_lossy(name), text));
                }
                _ => {}
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(
            seen,
            vec!["a@x=1&2", "a=hello <world>", "b=", "c=raw <text>", "root="]
        );
    }

    #[test]
    fn test_malformed_xml_is_parse_error() {
        let err = walk_xml("<root><a></b></root>".as_bytes(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number::<u64>(None).unwrap(), 0);
        assert_eq!(parse_number::<u64>(Some(" 42 ")).unwrap(), 42);
        assert!(parse_number::<u64>(Some("x")).is_err());
    }
}
