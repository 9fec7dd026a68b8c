use crate::opc::constants::{content_type as ct, relationship_type as rt};
use crate::opc::error::{OpcError, Result};
use crate::opc::packuri::RelsOwner;
use crate::opc::xml::XmlDocument;
use crate::opc::{OpcPackage, Part};
/// Package implementation for Word documents.
use std::io::{Read, Seek};
use std::path::Path;

/// Content types a WordprocessingML main document part may carry.
const MAIN_DOCUMENT_TYPES: [&str; 3] = [
    ct::WML_DOCUMENT_MAIN,
    ct::WML_DOCUMENT_MACRO_ENABLED_MAIN,
    ct::WML_TEMPLATE_MAIN,
];

/// A Word (.docx) package.
///
/// Wraps an OPC package whose main document part is WordprocessingML. The
/// well-known parts are found by following relationships each time they are
/// asked for, so they always reflect the current relationship graph.
///
/// # Examples
///
/// ```rust,no_run
/// use litchi_opc::wml::WordprocessingPackage;
///
/// let pkg = WordprocessingPackage::open("document.docx")?;
/// let input = pkg.render_input()?;
/// println!("root: {}", input.main_document.root().name());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct WordprocessingPackage {
    /// The underlying OPC package
    opc: OpcPackage,
}

/// The resolved parts an external renderer needs.
#[derive(Debug, Clone, Copy)]
pub struct RenderInput<'a> {
    /// XML of the main document part
    pub main_document: &'a XmlDocument,
    /// XML of the style definitions part, if the document has one
    pub styles: Option<&'a XmlDocument>,
}

impl WordprocessingPackage {
    /// Content type of a whole .docx package, as used in MIME contexts.
    pub const CONTENT_TYPE: &'static str = ct::WML_DOCUMENT;

    /// Open a .docx package from a file path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_opc(OpcPackage::open(path)?)
    }

    /// Create a .docx package from a reader.
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        Self::from_opc(OpcPackage::from_reader(reader)?)
    }

    /// Wrap an OPC package after checking its main document part.
    ///
    /// # Errors
    /// Fails if the package has no single main document part, or with
    /// [`OpcError::InvalidContentType`] if that part is not WordprocessingML.
    pub fn from_opc(opc: OpcPackage) -> Result<Self> {
        let content_type = opc.main_document_part()?.content_type();
        if !MAIN_DOCUMENT_TYPES.contains(&content_type.as_str()) {
            return Err(OpcError::InvalidContentType {
                expected: ct::WML_DOCUMENT_MAIN.to_string(),
                got: content_type.to_string(),
            });
        }
        Ok(Self { opc })
    }

    #[inline]
    pub fn opc(&self) -> &OpcPackage {
        &self.opc
    }

    #[inline]
    pub fn opc_mut(&mut self) -> &mut OpcPackage {
        &mut self.opc
    }

    #[inline]
    pub fn into_opc(self) -> OpcPackage {
        self.opc
    }

    /// Validate and save to `path`, replacing it atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.opc.save(path)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.opc.to_bytes()
    }

    /// The main document part (`word/document.xml` in most files).
    #[inline]
    pub fn main_document_part(&self) -> Result<&Part> {
        self.opc.main_document_part()
    }

    /// The style definitions part related from the main document.
    pub fn style_definitions_part(&self) -> Result<Option<&Part>> {
        self.main_document_related(rt::STYLES)
    }

    /// The glossary document part related from the main document.
    pub fn glossary_document_part(&self) -> Result<Option<&Part>> {
        self.main_document_related(rt::GLOSSARY_DOCUMENT)
    }

    /// The core properties part (`docProps/core.xml`).
    pub fn core_properties_part(&self) -> Result<Option<&Part>> {
        optional(
            self.opc
                .part_by_reltype(&RelsOwner::Package, rt::CORE_PROPERTIES),
        )
    }

    /// The extended (application) properties part (`docProps/app.xml`).
    pub fn extended_properties_part(&self) -> Result<Option<&Part>> {
        optional(
            self.opc
                .part_by_reltype(&RelsOwner::Package, rt::EXTENDED_PROPERTIES),
        )
    }

    /// The main document and style definitions, resolved for a renderer.
    pub fn render_input(&self) -> Result<RenderInput<'_>> {
        let main = self.main_document_part()?;
        let styles = match self.style_definitions_part()? {
            Some(part) => Some(xml_of(part)?),
            None => None,
        };
        Ok(RenderInput {
            main_document: xml_of(main)?,
            styles,
        })
    }

    fn main_document_related(&self, reltype: &str) -> Result<Option<&Part>> {
        let main = self.main_document_part()?;
        optional(
            self.opc
                .part_by_reltype(&RelsOwner::from(main.partname()), reltype),
        )
    }
}

/// Treat a missing relationship as an absent part; other errors still fail.
fn optional(result: Result<&Part>) -> Result<Option<&Part>> {
    match result {
        Ok(part) => Ok(Some(part)),
        Err(OpcError::RelationshipNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn xml_of(part: &Part) -> Result<&XmlDocument> {
    part.xml().ok_or_else(|| OpcError::PayloadKindMismatch {
        partname: part.partname().to_string(),
        content_type: part.content_type().to_string(),
        expected: "XML",
        actual: "binary",
    })
}
