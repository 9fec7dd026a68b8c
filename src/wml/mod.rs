/// WordprocessingML (.docx) packages.
///
/// A thin layer over [`crate::opc::OpcPackage`] that knows which
/// relationships lead to the well-known parts of a Word document.
pub mod package;

pub use package::{RenderInput, WordprocessingPackage};
