/// Open Packaging Conventions (OPC) implementation.
///
/// This module provides the package, part, relationship and content type
/// engine underlying Office Open XML documents. It includes support for:
///
/// - Part names and relationship owners
/// - Content type management
/// - ZIP-based physical packaging with atomic saves
/// - Best-effort loading with collected warnings
///
/// # Performance Features
///
/// - Uses `atoi_simd` for fast integer parsing
/// - Uses `quick-xml` for efficient XML parsing
/// - Uses `smallvec` for the typically short relationship lists of a part
pub mod constants;
pub mod content_types;
pub mod error;
pub mod options;
pub mod package;
pub mod packuri;
pub mod part;
pub mod phys_pkg;
pub mod pkgreader;
pub mod pkgwriter;
pub mod rel;
pub mod xml;

// Re-export commonly used types
pub use content_types::{ContentType, ContentTypeMap, PayloadKind};
pub use error::{IntegrityViolation, OpcError, Result};
pub use options::{Compression, LoadOptions, SaveOptions};
pub use package::{OpcPackage, RemovalPolicy};
pub use packuri::{PartName, RelsOwner};
pub use part::{Part, Payload};
pub use pkgreader::{LoadWarning, LoadedPackage, PackageReader, UnresolvedPart};
pub use pkgwriter::PackageWriter;
pub use rel::{RelTarget, Relationship, Relationships};
pub use xml::{XmlDocument, XmlElement, XmlNode};
