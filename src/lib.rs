//! Litchi OPC - the Open Packaging Conventions engine behind Office documents
//!
//! An Office Open XML file (.docx, .xlsx, .pptx) is a ZIP archive holding
//! named, typed parts connected by typed relationships. This crate loads such
//! an archive into an in-memory graph, lets callers edit it, and writes it
//! back without losing anything it does not understand.
//!
//! # Features
//!
//! - **Part names**: validated, normalised addresses usable as map keys
//! - **Content types**: Default/Override resolution from `[Content_Types].xml`
//! - **Relationships**: per-owner sets with ids that are never reused
//! - **Best-effort loading**: bad parts become warnings, a bad main part is fatal
//! - **Validated saving**: nothing is written for a package with dangling
//!   relationships, untyped parts or orphans; file saves are atomic
//!
//! # Example - Reading a DOCX file
//!
//! ```no_run
//! use litchi_opc::wml::WordprocessingPackage;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pkg = WordprocessingPackage::open("document.docx")?;
//! let main = pkg.main_document_part()?;
//! println!("{} ({})", main.partname(), main.content_type());
//!
//! if let Some(styles) = pkg.style_definitions_part()? {
//!     println!("styles at {}", styles.partname());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Editing a package
//!
//! ```no_run
//! use litchi_opc::opc::constants::{content_type as ct, relationship_type as rt};
//! use litchi_opc::opc::{OpcPackage, Part, Payload, RelsOwner};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pkg = OpcPackage::open("document.docx")?;
//! let document = pkg.main_document_part()?.partname().clone();
//!
//! let image_name = pkg.next_partname("/word/media/image%d.png")?;
//! let image = Part::new(image_name, ct::PNG, Payload::Binary(std::fs::read("logo.png")?))?;
//! let r_id = pkg.add_part(image, &RelsOwner::from(&document), rt::IMAGE)?;
//! println!("image related as {}", r_id);
//!
//! pkg.save("document.docx")?;
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod opc;
pub mod wml;

// Re-export commonly used types
pub use opc::{OpcError, OpcPackage, PackageReader, PackageWriter, PartName, Result};
pub use wml::WordprocessingPackage;
