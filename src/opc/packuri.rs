use crate::opc::error::{OpcError, Result};
/// Part names and relationship owners.
///
/// A [`PartName`] is the address of a part inside an OPC package. It is
/// validated and normalised once, on construction, and from then on is an
/// immutable value used as a map key everywhere in the package.
use std::fmt;
use std::str::FromStr;

/// The package pseudo-partname, representing the package itself
pub const PACKAGE_URI: &str = "/";

/// Archive member name of the content types stream
pub const CONTENT_TYPES_MEMBER: &str = "[Content_Types].xml";

/// Archive member name of the package-level relationships stream
pub const PACKAGE_RELS_MEMBER: &str = "_rels/.rels";

/// Name of the reserved directory holding relationship parts
const RELS_DIR: &str = "_rels";

/// A validated, normalised part name (e.g. `/word/document.xml`).
///
/// Part names always begin with a forward slash, have no empty segments and
/// no trailing slash. Equality and hashing follow the normalised form, and
/// comparison is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartName {
    /// The normalised part name string
    uri: String,
}

impl PartName {
    /// Create a new PartName from a string.
    ///
    /// Percent-escape hex digits are upper-cased; every other character is
    /// kept as given.
    ///
    /// # Errors
    /// Returns [`OpcError::InvalidPartName`] if the name is empty, does not
    /// start with `/`, has an empty, `.` or `..` segment, a segment ending in
    /// `.`, a trailing slash, a reserved character, or an encoded slash.
    pub fn new<S: AsRef<str>>(uri: S) -> Result<Self> {
        let raw = uri.as_ref();
        let invalid = |reason: &'static str| OpcError::InvalidPartName {
            name: raw.to_string(),
            reason,
        };

        if raw.is_empty() {
            return Err(invalid("part name is empty"));
        }
        if !raw.starts_with('/') {
            return Err(invalid("part name must begin with '/'"));
        }
        if raw.len() > 1 && raw.ends_with('/') {
            return Err(invalid("part name must not end with '/'"));
        }
        if raw == PACKAGE_URI {
            return Err(invalid("'/' names the package, not a part"));
        }

        let uri = Self::normalize_escapes(raw).map_err(invalid)?;

        for segment in uri[1..].split('/') {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }
            if segment == "." || segment == ".." {
                return Err(invalid("relative segment"));
            }
            if segment.ends_with('.') {
                return Err(invalid("segment must not end with '.'"));
            }
        }

        Ok(PartName { uri })
    }

    /// Create a PartName from a relative reference and a base URI.
    ///
    /// This translates a relative reference (like "../styles.xml") onto a base URI
    /// (like "/word/sub") to produce an absolute PartName (like "/word/styles.xml").
    /// Absolute references (starting with `/`) ignore the base.
    pub fn from_rel_ref(base_uri: &str, relative_ref: &str) -> Result<Self> {
        let joined = if relative_ref.starts_with('/') {
            relative_ref.to_string()
        } else {
            Self::join_paths(base_uri, relative_ref)
        };
        Self::new(Self::normalize_path(&joined))
    }

    /// Create a PartName from an archive member name (no leading slash).
    pub fn from_membername(membername: &str) -> Result<Self> {
        Self::new(format!("/{}", membername))
    }

    /// Get the base URI (directory portion) of this PartName.
    ///
    /// For example, "/ppt/slides" for "/ppt/slides/slide1.xml" and "/" for
    /// a part at the top level.
    pub fn base_uri(&self) -> &str {
        match self.uri.rfind('/') {
            Some(0) | None => PACKAGE_URI,
            Some(pos) => &self.uri[..pos],
        }
    }

    /// Get the filename portion of this PartName.
    ///
    /// For example, "slide1.xml" for "/ppt/slides/slide1.xml".
    pub fn filename(&self) -> &str {
        match self.uri.rfind('/') {
            Some(pos) => &self.uri[pos + 1..],
            None => "",
        }
    }

    /// Get the extension portion of this PartName, as written.
    ///
    /// For example, "xml" for "/word/document.xml" (note: no leading period).
    /// Content-type lookups lower-case this before use.
    pub fn ext(&self) -> &str {
        let filename = self.filename();
        match filename.rfind('.') {
            Some(pos) => &filename[pos + 1..],
            None => "",
        }
    }

    /// Get the partname index for tuple partnames, or None for singleton partnames.
    ///
    /// For example, returns 21 for "/ppt/slides/slide21.xml" and None for "/ppt/presentation.xml".
    pub fn idx(&self) -> Option<u32> {
        let filename = self.filename();
        let stem = match filename.rfind('.') {
            Some(pos) => &filename[..pos],
            None => filename,
        };

        let digits = stem.bytes().rev().take_while(u8::is_ascii_digit).count();
        if digits == 0 || digits == stem.len() {
            return None;
        }
        atoi_simd::parse::<u32, false, false>(&stem.as_bytes()[stem.len() - digits..]).ok()
    }

    /// Get the membername (part name with leading slash stripped).
    ///
    /// This is the form used as the Zip file membername for the part.
    #[inline]
    pub fn membername(&self) -> &str {
        &self.uri[1..]
    }

    /// Get the relative reference from a base URI to this PartName.
    ///
    /// For example, PartName("/ppt/slideLayouts/slideLayout1.xml") would return
    /// "../slideLayouts/slideLayout1.xml" for base_uri "/ppt/slides".
    pub fn relative_ref(&self, base_uri: &str) -> String {
        if base_uri == PACKAGE_URI {
            return self.membername().to_string();
        }

        let from_parts: Vec<&str> = base_uri.split('/').filter(|s| !s.is_empty()).collect();
        let to_parts: Vec<&str> = self.uri.split('/').filter(|s| !s.is_empty()).collect();

        // The last target segment is the filename, never a shared directory
        let common = from_parts
            .iter()
            .zip(to_parts[..to_parts.len() - 1].iter())
            .take_while(|(a, b)| a == b)
            .count();

        let mut result = String::new();
        for _ in common..from_parts.len() {
            result.push_str("../");
        }
        result.push_str(&to_parts[common..].join("/"));
        result
    }

    /// Get the PartName of the relationships part belonging to this part.
    ///
    /// For example, "/word/_rels/document.xml.rels" for "/word/document.xml".
    pub fn rels_partname(&self) -> PartName {
        let base_uri = self.base_uri();
        let uri = if base_uri == PACKAGE_URI {
            format!("/{}/{}.rels", RELS_DIR, self.filename())
        } else {
            format!("{}/{}/{}.rels", base_uri, RELS_DIR, self.filename())
        };
        // Derived from an already-valid name, only ever appends segments
        PartName { uri }
    }

    /// Check whether this name addresses a relationships part.
    pub fn is_rels_part(&self) -> bool {
        self.ext().eq_ignore_ascii_case("rels")
            && self
                .base_uri()
                .rsplit('/')
                .next()
                .is_some_and(|dir| dir == RELS_DIR)
    }

    /// Get the full part name string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// Upper-case the hex digits of percent escapes and reject encoded
    /// separators, reserved characters and control characters.
    fn normalize_escapes(raw: &str) -> std::result::Result<String, &'static str> {
        let bytes = raw.as_bytes();
        let mut out = String::with_capacity(raw.len());
        let mut i = 0;

        while i < bytes.len() {
            let c = bytes[i];
            match c {
                b'%' => {
                    let hex = bytes
                        .get(i + 1..i + 3)
                        .filter(|h| h.iter().all(u8::is_ascii_hexdigit))
                        .ok_or("malformed percent escape")?;
                    let upper = [hex[0].to_ascii_uppercase(), hex[1].to_ascii_uppercase()];
                    if &upper == b"2F" || &upper == b"5C" {
                        return Err("encoded '/' or '\\'");
                    }
                    out.push('%');
                    out.push(upper[0] as char);
                    out.push(upper[1] as char);
                    i += 3;
                    continue;
                },
                b'\\' | b'?' | b'#' | b'[' | b']' => return Err("reserved character"),
                c if c.is_ascii_control() => return Err("control character"),
                _ => {},
            }
            // Multi-byte characters are copied through whole
            let width = raw[i..].chars().next().map_or(1, char::len_utf8);
            out.push_str(&raw[i..i + width]);
            i += width;
        }

        Ok(out)
    }

    /// Helper function to join two paths using forward slashes
    fn join_paths(base: &str, rel: &str) -> String {
        if base.ends_with('/') {
            format!("{}{}", base, rel)
        } else {
            format!("{}/{}", base, rel)
        }
    }

    /// Helper function to normalize a path (resolve ".." and ".")
    fn normalize_path(path: &str) -> String {
        let mut parts: Vec<&str> = Vec::new();

        for part in path.split('/') {
            match part {
                "" | "." => {},
                ".." => {
                    parts.pop();
                },
                _ => parts.push(part),
            }
        }

        format!("/{}", parts.join("/"))
    }
}

impl fmt::Display for PartName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

impl AsRef<str> for PartName {
    fn as_ref(&self) -> &str {
        &self.uri
    }
}

impl FromStr for PartName {
    type Err = OpcError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for PartName {
    type Error = OpcError;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// The owner of a relationship set: the package root or a specific part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelsOwner {
    /// The implicit top-level owner of the package relationships
    Package,
    /// A part with outgoing relationships
    Part(PartName),
}

impl RelsOwner {
    /// Base URI against which this owner's relative targets resolve.
    pub fn base_uri(&self) -> &str {
        match self {
            RelsOwner::Package => PACKAGE_URI,
            RelsOwner::Part(partname) => partname.base_uri(),
        }
    }

    /// Archive member name of this owner's relationships part.
    ///
    /// `_rels/.rels` for the package, `<dir>/_rels/<file>.rels` for a part.
    pub fn rels_membername(&self) -> String {
        match self {
            RelsOwner::Package => PACKAGE_RELS_MEMBER.to_string(),
            RelsOwner::Part(partname) => partname.rels_partname().membername().to_string(),
        }
    }

    /// Recover the owner from a relationships member name, if it is one.
    ///
    /// Inverse of [`RelsOwner::rels_membername`].
    pub fn from_rels_membername(membername: &str) -> Option<RelsOwner> {
        if membername == PACKAGE_RELS_MEMBER {
            return Some(RelsOwner::Package);
        }
        let (dir, file) = match membername.rsplit_once('/') {
            Some((dir, file)) => (dir, file),
            None => return None,
        };
        let source_file = file.strip_suffix(".rels")?;
        let parent = if dir == RELS_DIR {
            ""
        } else {
            dir.strip_suffix(RELS_DIR)?.strip_suffix('/')?
        };
        let source = if parent.is_empty() {
            format!("/{}", source_file)
        } else {
            format!("/{}/{}", parent, source_file)
        };
        PartName::new(source).ok().map(RelsOwner::Part)
    }

    /// The owning part name, or None for the package root.
    pub fn partname(&self) -> Option<&PartName> {
        match self {
            RelsOwner::Package => None,
            RelsOwner::Part(partname) => Some(partname),
        }
    }
}

impl fmt::Display for RelsOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelsOwner::Package => f.write_str(PACKAGE_URI),
            RelsOwner::Part(partname) => write!(f, "{}", partname),
        }
    }
}

impl From<PartName> for RelsOwner {
    fn from(partname: PartName) -> Self {
        RelsOwner::Part(partname)
    }
}

impl From<&PartName> for RelsOwner {
    fn from(partname: &PartName) -> Self {
        RelsOwner::Part(partname.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pn(s: &str) -> PartName {
        PartName::new(s).unwrap()
    }

    #[test]
    fn test_partname_new() {
        assert!(PartName::new("/word/document.xml").is_ok());
        assert!(PartName::new("word/document.xml").is_err());
        assert!(PartName::new("").is_err());
        assert!(PartName::new("/").is_err());
        assert!(PartName::new("/word//document.xml").is_err());
        assert!(PartName::new("/word/").is_err());
        assert!(PartName::new("/word/./document.xml").is_err());
        assert!(PartName::new("/word/../document.xml").is_err());
        assert!(PartName::new("/word/document.").is_err());
        assert!(PartName::new("/word\\document.xml").is_err());
        assert!(PartName::new("/word/doc?.xml").is_err());
        assert!(PartName::new("/[Content_Types].xml").is_err());
    }

    #[test]
    fn test_percent_escapes() {
        assert_eq!(pn("/media/a%2dB.png").as_str(), "/media/a%2DB.png");
        assert_eq!(pn("/media/a%2dB.png"), pn("/media/a%2DB.png"));
        assert!(PartName::new("/media/a%2fb.png").is_err());
        assert!(PartName::new("/media/a%5cb.png").is_err());
        assert!(PartName::new("/media/a%zzb.png").is_err());
        assert!(PartName::new("/media/a%2").is_err());
    }

    #[test]
    fn test_case_sensitive_equality() {
        assert_ne!(pn("/word/Document.xml"), pn("/word/document.xml"));
    }

    #[test]
    fn test_base_uri() {
        assert_eq!(pn("/ppt/slides/slide1.xml").base_uri(), "/ppt/slides");
        assert_eq!(pn("/content.xml").base_uri(), "/");
    }

    #[test]
    fn test_filename() {
        assert_eq!(pn("/ppt/slides/slide1.xml").filename(), "slide1.xml");
    }

    #[test]
    fn test_ext() {
        assert_eq!(pn("/word/document.xml").ext(), "xml");
        assert_eq!(pn("/media/IMAGE.PNG").ext(), "PNG");
        assert_eq!(pn("/word/noext").ext(), "");
    }

    #[test]
    fn test_idx() {
        assert_eq!(pn("/ppt/slides/slide21.xml").idx(), Some(21));
        assert_eq!(pn("/ppt/presentation.xml").idx(), None);
        assert_eq!(pn("/ppt/slides/21.xml").idx(), None);
    }

    #[test]
    fn test_membername() {
        assert_eq!(pn("/word/document.xml").membername(), "word/document.xml");
    }

    #[test]
    fn test_from_rel_ref() {
        assert_eq!(
            PartName::from_rel_ref("/word", "styles.xml").unwrap(),
            pn("/word/styles.xml")
        );
        assert_eq!(
            PartName::from_rel_ref("/ppt/slides", "../slideLayouts/slideLayout1.xml").unwrap(),
            pn("/ppt/slideLayouts/slideLayout1.xml")
        );
        assert_eq!(
            PartName::from_rel_ref("/", "word/document.xml").unwrap(),
            pn("/word/document.xml")
        );
        assert_eq!(
            PartName::from_rel_ref("/word", "/customXml/item1.xml").unwrap(),
            pn("/customXml/item1.xml")
        );
    }

    #[test]
    fn test_relative_ref() {
        let target = pn("/ppt/slideLayouts/slideLayout1.xml");
        assert_eq!(target.relative_ref("/ppt/slides"), "../slideLayouts/slideLayout1.xml");
        assert_eq!(target.relative_ref("/"), "ppt/slideLayouts/slideLayout1.xml");
        assert_eq!(pn("/word/styles.xml").relative_ref("/word"), "styles.xml");
        assert_eq!(pn("/word/word").relative_ref("/word/word"), "../word");
    }

    #[test]
    fn test_relative_ref_resolves_back() {
        let target = pn("/word/media/image1.png");
        for base in ["/", "/word", "/word/glossary", "/customXml"] {
            let reference = target.relative_ref(base);
            assert_eq!(PartName::from_rel_ref(base, &reference).unwrap(), target);
        }
    }

    #[test]
    fn test_rels_partname() {
        assert_eq!(
            pn("/word/document.xml").rels_partname(),
            pn("/word/_rels/document.xml.rels")
        );
        assert_eq!(pn("/content.xml").rels_partname(), pn("/_rels/content.xml.rels"));
        assert!(pn("/word/_rels/document.xml.rels").is_rels_part());
        assert!(!pn("/word/document.xml").is_rels_part());
    }

    #[test]
    fn test_rels_owner_membername_round_trip() {
        assert_eq!(RelsOwner::Package.rels_membername(), "_rels/.rels");
        assert_eq!(
            RelsOwner::from_rels_membername("_rels/.rels"),
            Some(RelsOwner::Package)
        );

        for name in ["/word/document.xml", "/content.xml", "/a/b/c/d.bin"] {
            let owner = RelsOwner::Part(pn(name));
            let member = owner.rels_membername();
            assert_eq!(RelsOwner::from_rels_membername(&member), Some(owner));
        }

        assert_eq!(RelsOwner::from_rels_membername("word/document.xml"), None);
        assert_eq!(RelsOwner::from_rels_membername("word/notrels/a.xml.rels"), None);
    }

    fn segment() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_%-]{0,3}[A-Za-z0-9_-]{1,8}(\\.[a-z]{1,4})?"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_normalized_form_is_idempotent(segments in prop::collection::vec(segment(), 1..5)) {
            let raw = format!("/{}", segments.join("/"));
            if let Ok(first) = PartName::new(&raw) {
                let second = PartName::new(first.as_str()).unwrap();
                prop_assert_eq!(first.to_string(), second.to_string());
                prop_assert_eq!(first, second);
            }
        }
    }
}
