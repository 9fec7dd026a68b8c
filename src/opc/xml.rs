//! Owned XML element tree used as the payload of XML parts.
//!
//! The tree is deliberately schema-agnostic: it only checks that a part is
//! well-formed and gives it back in a canonical serialization. Text and
//! attribute values are stored in their escaped (on-the-wire) form so that
//! entity and character references survive a round trip byte for byte.

use crate::common::xml::escape_xml;
use crate::opc::error::{OpcError, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::borrow::Cow;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A node inside an element (or around the root element).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    /// Character data in escaped form
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
}

/// An XML element with its attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// Qualified name, including any namespace prefix
    name: String,
    /// Attributes in document order, values in escaped form
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        match self.name.rfind(':') {
            Some(pos) => &self.name[pos + 1..],
            None => &self.name,
        }
    }

    /// Attribute value, unescaped.
    pub fn attribute(&self, key: &str) -> Option<Cow<'_, str>> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, raw)| unescape_lossy(raw))
    }

    /// Set an attribute from an unescaped value, replacing any existing one.
    pub fn set_attribute(&mut self, key: &str, value: &str) {
        let escaped = escape_xml(value);
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = escaped,
            None => self.attributes.push((key.to_string(), escaped)),
        }
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        let idx = self.attributes.iter().position(|(k, _)| k == key)?;
        let (_, raw) = self.attributes.remove(idx);
        Some(unescape_lossy(&raw).into_owned())
    }

    /// Attributes as (name, escaped value) pairs, in document order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[inline]
    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    #[inline]
    pub fn children_mut(&mut self) -> &mut Vec<XmlNode> {
        &mut self.children
    }

    /// Child elements only, skipping text and other nodes.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            _ => None,
        })
    }

    /// First child element with the given local name.
    pub fn find_child(&self, local_name: &str) -> Option<&XmlElement> {
        self.child_elements().find(|el| el.local_name() == local_name)
    }

    pub fn push_child(&mut self, node: XmlNode) {
        self.children.push(node);
    }

    /// Append a child element and return a handle to it.
    pub fn push_element(&mut self, element: XmlElement) -> &mut XmlElement {
        self.children.push(XmlNode::Element(element));
        match self.children.last_mut() {
            Some(XmlNode::Element(el)) => el,
            _ => unreachable!("an element was just pushed"),
        }
    }

    /// Append unescaped text.
    pub fn push_text(&mut self, text: &str) {
        self.push_raw_text(&escape_xml(text));
    }

    /// Concatenated, unescaped text of this element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                XmlNode::Text(raw) => out.push_str(&unescape_lossy(raw)),
                XmlNode::CData(data) => out.push_str(data),
                XmlNode::Element(el) => el.collect_text(out),
                _ => {},
            }
        }
    }

    /// Append already-escaped text, merging with a preceding text node.
    fn push_raw_text(&mut self, raw: &str) {
        if let Some(XmlNode::Text(last)) = self.children.last_mut() {
            last.push_str(raw);
        } else {
            self.children.push(XmlNode::Text(raw.to_string()));
        }
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let name = std::str::from_utf8(start.name().as_ref())?.to_string();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
            let value = std::str::from_utf8(&attr.value)?;
            // Values from single-quoted attributes may hold a bare '"'
            let value = if value.contains('"') {
                value.replace('"', "&quot;")
            } else {
                value.to_string()
            };
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
        })
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, raw) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(raw);
            out.push('"');
        }

        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }

        out.push('>');
        for child in &self.children {
            child.write_to(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

impl XmlNode {
    fn write_to(&self, out: &mut String) {
        match self {
            XmlNode::Element(el) => el.write_to(out),
            XmlNode::Text(raw) => out.push_str(raw),
            XmlNode::CData(data) => {
                out.push_str("<![CDATA[");
                out.push_str(data);
                out.push_str("]]>");
            },
            XmlNode::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            },
            XmlNode::ProcessingInstruction(content) => {
                out.push_str("<?");
                out.push_str(content);
                out.push_str("?>");
            },
        }
    }
}

/// A well-formed XML document: one root element plus any comments and
/// processing instructions around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    prolog: Vec<XmlNode>,
    root: XmlElement,
    epilog: Vec<XmlNode>,
}

impl XmlDocument {
    pub fn new(root: XmlElement) -> Self {
        Self {
            prolog: Vec::new(),
            root,
            epilog: Vec::new(),
        }
    }

    #[inline]
    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    #[inline]
    pub fn root_mut(&mut self) -> &mut XmlElement {
        &mut self.root
    }

    /// Parse a document from UTF-8 bytes.
    ///
    /// # Errors
    /// Returns [`OpcError::Xml`] if the bytes are not well-formed XML with
    /// exactly one root element, contain non-whitespace text outside the root,
    /// or carry a DTD.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let mut reader = Reader::from_reader(bytes);
        let mut buf = Vec::new();

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                OpcError::Xml(format!("at byte {}: {}", reader.error_position(), e))
            })?;

            match event {
                Event::Decl(_) => {},
                Event::DocType(_) => {
                    return Err(OpcError::Xml("DTD declarations are not allowed".to_string()));
                },
                Event::Start(e) => stack.push(XmlElement::from_start(&e)?),
                Event::Empty(e) => {
                    let element = XmlElement::from_start(&e)?;
                    Self::attach(&mut stack, &mut root, element)?;
                },
                Event::End(_) => {
                    // quick-xml has already matched the end name
                    let element = stack
                        .pop()
                        .ok_or_else(|| OpcError::Xml("unexpected end tag".to_string()))?;
                    Self::attach(&mut stack, &mut root, element)?;
                },
                Event::Text(t) => {
                    let raw = std::str::from_utf8(t.as_ref())?;
                    match stack.last_mut() {
                        Some(parent) => parent.push_raw_text(raw),
                        None if raw.trim().is_empty() => {},
                        None => {
                            return Err(OpcError::Xml("text outside the root element".to_string()));
                        },
                    }
                },
                Event::GeneralRef(r) => {
                    let name = std::str::from_utf8(r.as_ref())?;
                    match stack.last_mut() {
                        Some(parent) => parent.push_raw_text(&format!("&{};", name)),
                        None => {
                            return Err(OpcError::Xml(
                                "entity reference outside the root element".to_string(),
                            ));
                        },
                    }
                },
                Event::CData(c) => {
                    let data = std::str::from_utf8(c.as_ref())?.to_string();
                    match stack.last_mut() {
                        Some(parent) => parent.push_child(XmlNode::CData(data)),
                        None => {
                            return Err(OpcError::Xml("CDATA outside the root element".to_string()));
                        },
                    }
                },
                Event::Comment(c) => {
                    let node = XmlNode::Comment(std::str::from_utf8(c.as_ref())?.to_string());
                    Self::place_misc(&mut stack, &root, &mut prolog, &mut epilog, node);
                },
                Event::PI(p) => {
                    let node =
                        XmlNode::ProcessingInstruction(std::str::from_utf8(p.as_ref())?.to_string());
                    Self::place_misc(&mut stack, &root, &mut prolog, &mut epilog, node);
                },
                Event::Eof => break,
            }
            buf.clear();
        }

        if let Some(open) = stack.last() {
            return Err(OpcError::Xml(format!("unclosed element <{}>", open.name())));
        }
        let root = root.ok_or_else(|| OpcError::Xml("no root element".to_string()))?;

        Ok(Self {
            prolog,
            root,
            epilog,
        })
    }

    fn attach(
        stack: &mut [XmlElement],
        root: &mut Option<XmlElement>,
        element: XmlElement,
    ) -> Result<()> {
        if let Some(parent) = stack.last_mut() {
            parent.push_child(XmlNode::Element(element));
        } else if root.is_none() {
            *root = Some(element);
        } else {
            return Err(OpcError::Xml(format!(
                "second root element <{}>",
                element.name()
            )));
        }
        Ok(())
    }

    fn place_misc(
        stack: &mut [XmlElement],
        root: &Option<XmlElement>,
        prolog: &mut Vec<XmlNode>,
        epilog: &mut Vec<XmlNode>,
        node: XmlNode,
    ) {
        match stack.last_mut() {
            Some(parent) => parent.push_child(node),
            None if root.is_none() => prolog.push(node),
            None => epilog.push(node),
        }
    }

    /// Canonical serialization: a standalone UTF-8 declaration followed by the
    /// document, with childless elements self-closed.
    pub fn to_xml_string(&self) -> String {
        let mut out = String::with_capacity(1024);
        out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        out.push('\n');
        for node in &self.prolog {
            node.write_to(&mut out);
        }
        self.root.write_to(&mut out);
        for node in &self.epilog {
            node.write_to(&mut out);
        }
        out
    }

    #[inline]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_xml_string().into_bytes()
    }
}

fn unescape_lossy(raw: &str) -> Cow<'_, str> {
    quick_xml::escape::unescape(raw).unwrap_or(Cow::Borrowed(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_query() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body><w:p><w:r><w:t xml:space="preserve">Fish &amp; Chips</w:t></w:r></w:p></w:body>
</w:document>"#;

        let doc = XmlDocument::parse(xml).unwrap();
        assert_eq!(doc.root().name(), "w:document");
        assert_eq!(doc.root().local_name(), "document");

        let body = doc.root().find_child("body").unwrap();
        assert_eq!(body.text(), "Fish & Chips");
        let t = body
            .find_child("p")
            .and_then(|p| p.find_child("r"))
            .and_then(|r| r.find_child("t"))
            .unwrap();
        assert_eq!(t.attribute("xml:space").as_deref(), Some("preserve"));
    }

    #[test]
    fn test_canonical_serialization_is_stable() {
        let xml = br#"<root a='x "q"' b="1"><!-- note --><empty></empty><t>a &lt; b &#169;</t><![CDATA[<raw>]]></root>"#;

        let doc = XmlDocument::parse(xml).unwrap();
        assert_eq!(doc.root().attribute("a").as_deref(), Some(r#"x "q""#));
        let first = doc.to_bytes();
        let reparsed = XmlDocument::parse(&first).unwrap();
        assert_eq!(reparsed, doc);
        assert_eq!(reparsed.to_bytes(), first);

        let text = String::from_utf8(first).unwrap();
        assert!(text.starts_with(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#));
        assert!(text.contains(r#"a="x &quot;q&quot;""#));
        assert!(text.contains("<empty/>"));
        assert!(text.contains("<t>a &lt; b &#169;</t>"));
        assert!(text.contains("<![CDATA[<raw>]]>"));
        assert!(text.contains("<!-- note -->"));
    }

    #[test]
    fn test_bom_is_accepted() {
        let mut xml = UTF8_BOM.to_vec();
        xml.extend_from_slice(b"<root/>");
        assert_eq!(XmlDocument::parse(&xml).unwrap().root().name(), "root");
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(XmlDocument::parse(b"").is_err());
        assert!(XmlDocument::parse(b"<a><b></a>").is_err());
        assert!(XmlDocument::parse(b"<a>").is_err());
        assert!(XmlDocument::parse(b"<a/><b/>").is_err());
        assert!(XmlDocument::parse(b"stray<a/>").is_err());
        assert!(XmlDocument::parse(b"<a x=\"1\" x=\"2\"/>").is_err());
        assert!(XmlDocument::parse(b"<!DOCTYPE a><a/>").is_err());
        assert!(XmlDocument::parse(b"\xff\xfe<\x00a\x00/\x00>\x00").is_err());
    }

    #[test]
    fn test_build_tree() {
        let mut root = XmlElement::new("Properties");
        root.set_attribute("xmlns", "urn:test");
        let title = root.push_element(XmlElement::new("Title"));
        title.push_text("R&D <notes>");

        let doc = XmlDocument::new(root);
        let xml = doc.to_xml_string();
        assert!(xml.ends_with(r#"<Properties xmlns="urn:test"><Title>R&amp;D &lt;notes&gt;</Title></Properties>"#));

        let reparsed = XmlDocument::parse(xml.as_bytes()).unwrap();
        assert_eq!(reparsed.root().find_child("Title").unwrap().text(), "R&D <notes>");
    }
}
