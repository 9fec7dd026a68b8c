/// Options controlling how packages are loaded and saved.
use crate::opc::constants::relationship_type as rt;

/// Configuration options for loading a package.
///
/// # Examples
///
/// ```rust
/// use litchi_opc::opc::LoadOptions;
///
/// // Defaults: main document is mandatory, orphans are loaded, lenient
/// let options = LoadOptions::default();
///
/// // Or customize
/// let options = LoadOptions::new()
///     .with_strict(true)
///     .with_load_orphans(false);
/// ```
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Root relationship types whose target part must load
    pub mandatory_reltypes: Vec<String>,
    /// Whether entries unreachable from the root are loaded into the package
    pub load_orphans: bool,
    /// Whether any load warning fails the load
    pub strict: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            mandatory_reltypes: vec![rt::OFFICE_DOCUMENT.to_string()],
            load_orphans: true,
            strict: false,
        }
    }
}

impl LoadOptions {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of mandatory root relationship types.
    ///
    /// An empty set makes every part optional, which is useful for packages
    /// that are not office documents.
    #[inline]
    pub fn with_mandatory_reltypes<I, S>(mut self, reltypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mandatory_reltypes = reltypes.into_iter().map(Into::into).collect();
        self
    }

    /// Set whether orphan entries are loaded.
    ///
    /// Orphans are reported as warnings either way.
    #[inline]
    pub fn with_load_orphans(mut self, load: bool) -> Self {
        self.load_orphans = load;
        self
    }

    #[inline]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub(crate) fn is_mandatory(&self, reltype: &str) -> bool {
        self.mandatory_reltypes.iter().any(|t| t == reltype)
    }
}

/// Compression method used for archive entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Deflate, as written by office applications
    #[default]
    Deflated,
    /// No compression
    Stored,
}

impl From<Compression> for zip::CompressionMethod {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Deflated => zip::CompressionMethod::Deflated,
            Compression::Stored => zip::CompressionMethod::Stored,
        }
    }
}

/// Configuration options for saving a package.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub compression: Compression,
}

impl SaveOptions {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}
