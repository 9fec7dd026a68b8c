//! Content type registry for OPC packages.
//!
//! Implements the OPC content type discovery algorithm using the Default and
//! Override elements of `[Content_Types].xml`. Every registered type is
//! classified into a [`PayloadKind`] once, at registration time, so the
//! payload family of a part never has to be discovered later.

use crate::common::xml::escape_xml;
use crate::opc::constants::{content_type as ct, namespace};
use crate::opc::error::{OpcError, Result};
use crate::opc::packuri::PartName;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::BTreeMap;
use std::fmt;

/// Structural family of a part's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Well-formed XML, held as an element tree
    Xml,
    /// Opaque bytes, passed through untouched
    Binary,
}

impl PayloadKind {
    /// Classify a media type string.
    ///
    /// `*/xml` and `*+xml` types are XML, everything else is binary.
    #[inline]
    pub fn for_media_type(media_type: &str) -> Self {
        let essence = media_type.split(';').next().unwrap_or(media_type).trim();
        if essence.ends_with("+xml") || essence.ends_with("/xml") {
            PayloadKind::Xml
        } else {
            PayloadKind::Binary
        }
    }

    /// Short human-readable name, used in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadKind::Xml => "XML",
            PayloadKind::Binary => "binary",
        }
    }
}

/// A MIME-like content type together with its payload family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentType {
    media_type: String,
    kind: PayloadKind,
}

impl ContentType {
    pub fn new<S: Into<String>>(media_type: S) -> Self {
        let media_type = media_type.into();
        let kind = PayloadKind::for_media_type(&media_type);
        Self { media_type, kind }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.media_type
    }

    #[inline]
    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    #[inline]
    pub fn is_xml(&self) -> bool {
        self.kind == PayloadKind::Xml
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.media_type)
    }
}

impl From<&str> for ContentType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContentType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl PartialEq<str> for ContentType {
    fn eq(&self, other: &str) -> bool {
        self.media_type == other
    }
}

impl PartialEq<&str> for ContentType {
    fn eq(&self, other: &&str) -> bool {
        self.media_type == *other
    }
}

/// Content type map for looking up content types by part name or extension.
///
/// Defaults are keyed by lower-cased extension. Overrides are keyed by exact
/// part name. Both are kept sorted so serialization is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentTypeMap {
    /// Maps lower-cased file extensions to default content types
    defaults: BTreeMap<String, ContentType>,

    /// Maps specific partnames to override content types
    overrides: BTreeMap<PartName, ContentType>,
}

impl ContentTypeMap {
    /// Create a new empty content type map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a map holding the defaults every package needs (`rels`, `xml`).
    pub fn with_standard_defaults() -> Self {
        let mut map = Self::new();
        map.add_default("rels", ct::OPC_RELATIONSHIPS);
        map.add_default("xml", ct::XML);
        map
    }

    /// Parse content types from `[Content_Types].xml`.
    ///
    /// # Errors
    /// Returns [`OpcError::MalformedContentTypes`] if the XML is not
    /// well-formed, the root is not `Types`, or a Default/Override entry is
    /// missing an attribute or names an invalid part.
    pub fn from_xml(xml: &[u8]) -> Result<Self> {
        let malformed = |msg: String| OpcError::MalformedContentTypes(msg);

        let mut map = Self::new();
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut saw_root = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) if !saw_root => {
                    if e.local_name().as_ref() != b"Types" {
                        return Err(malformed(format!(
                            "unexpected root element '{}'",
                            String::from_utf8_lossy(e.local_name().as_ref())
                        )));
                    }
                    saw_root = true;
                },
                Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                    if matches!(e.local_name().as_ref(), b"Default" | b"Override") =>
                {
                    let is_default = e.local_name().as_ref() == b"Default";

                    let mut key = None;
                    let mut content_type = None;
                    for attr in e.attributes() {
                        let attr = attr.map_err(|e| malformed(e.to_string()))?;
                        let value = attr
                            .unescape_value()
                            .map_err(|e| malformed(e.to_string()))?
                            .to_string();
                        match attr.key.as_ref() {
                            b"Extension" if is_default => key = Some(value),
                            b"PartName" if !is_default => key = Some(value),
                            b"ContentType" => content_type = Some(value),
                            _ => {},
                        }
                    }

                    let (key, content_type) = match (key, content_type) {
                        (Some(k), Some(c)) => (k, c),
                        _ => {
                            return Err(malformed(format!(
                                "{} entry is missing a required attribute",
                                if is_default { "Default" } else { "Override" }
                            )));
                        },
                    };

                    if is_default {
                        map.add_default(&key, content_type);
                    } else {
                        let partname = PartName::new(&key).map_err(|e| malformed(e.to_string()))?;
                        map.add_override(partname, content_type);
                    }
                },
                Ok(Event::Eof) => break,
                Err(e) => return Err(malformed(e.to_string())),
                _ => {},
            }
            buf.clear();
        }

        if !saw_root {
            return Err(malformed("no Types element".to_string()));
        }

        Ok(map)
    }

    /// Add (or replace) a default content type mapping for a file extension.
    pub fn add_default<C: Into<ContentType>>(&mut self, extension: &str, content_type: C) {
        self.defaults
            .insert(extension.to_ascii_lowercase(), content_type.into());
    }

    /// Remove the default for an extension, returning it if present.
    pub fn remove_default(&mut self, extension: &str) -> Option<ContentType> {
        self.defaults.remove(&extension.to_ascii_lowercase())
    }

    /// Add (or replace) an override content type mapping for a specific partname.
    pub fn add_override<C: Into<ContentType>>(&mut self, partname: PartName, content_type: C) {
        self.overrides.insert(partname, content_type.into());
    }

    /// Remove the override for a partname, returning it if present.
    pub fn remove_override(&mut self, partname: &PartName) -> Option<ContentType> {
        self.overrides.remove(partname)
    }

    /// Record a part's content type in the least specific way that resolves.
    ///
    /// Nothing is added when the extension default already yields the same
    /// type; otherwise an override for this exact partname is added.
    pub fn register_part(&mut self, partname: &PartName, content_type: &ContentType) {
        let ext = partname.ext().to_ascii_lowercase();
        if self.defaults.get(&ext) == Some(content_type) {
            self.overrides.remove(partname);
        } else {
            self.overrides.insert(partname.clone(), content_type.clone());
        }
    }

    /// Get the content type for a partname.
    ///
    /// First checks for an override, then falls back to the default
    /// based on the lower-cased file extension.
    pub fn resolve(&self, partname: &PartName) -> Result<&ContentType> {
        if let Some(ct) = self.overrides.get(partname) {
            return Ok(ct);
        }

        let ext = partname.ext().to_ascii_lowercase();
        self.defaults
            .get(&ext)
            .ok_or_else(|| OpcError::UnknownContentType(partname.to_string()))
    }

    /// Default entries, sorted by extension.
    pub fn defaults(&self) -> impl Iterator<Item = (&str, &ContentType)> {
        self.defaults.iter().map(|(ext, ct)| (ext.as_str(), ct))
    }

    /// Override entries, sorted by part name.
    pub fn overrides(&self) -> impl Iterator<Item = (&PartName, &ContentType)> {
        self.overrides.iter()
    }

    /// Generate the XML for `[Content_Types].xml`.
    ///
    /// The relationships default is always emitted, since every package has
    /// at least the root relationships part.
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(4096);

        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<Types xmlns="{}">"#, namespace::OPC_CONTENT_TYPES));
        xml.push('\n');

        let rels_default = ContentType::new(ct::OPC_RELATIONSHIPS);
        let mut defaults: Vec<(&str, &ContentType)> = self.defaults().collect();
        if !self.defaults.contains_key("rels") {
            defaults.push(("rels", &rels_default));
            defaults.sort_by_key(|(ext, _)| *ext);
        }

        for (ext, content_type) in defaults {
            xml.push_str(&format!(
                r#"  <Default Extension="{}" ContentType="{}"/>"#,
                escape_xml(ext),
                escape_xml(content_type.as_str())
            ));
            xml.push('\n');
        }

        for (partname, content_type) in &self.overrides {
            xml.push_str(&format!(
                r#"  <Override PartName="{}" ContentType="{}"/>"#,
                escape_xml(partname.as_str()),
                escape_xml(content_type.as_str())
            ));
            xml.push('\n');
        }

        xml.push_str("</Types>");

        xml
    }
}
