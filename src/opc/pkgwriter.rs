//! Package writer for OPC packages.
//!
//! This module serializes an [`OpcPackage`] to a ZIP archive. Every save is
//! preceded by [`OpcPackage::validate`]; a package with integrity violations
//! is never written, not even partially.

use crate::opc::error::{OpcError, Result};
use crate::opc::options::SaveOptions;
use crate::opc::package::OpcPackage;
use crate::opc::packuri::{CONTENT_TYPES_MEMBER, PACKAGE_RELS_MEMBER};
use crate::opc::phys_pkg::PhysPkgWriter;
use std::io::{BufWriter, Cursor, Seek, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Package writer that serializes an OPC package to a ZIP archive.
///
/// Entries are written in a fixed order:
/// - `[Content_Types].xml`
/// - `_rels/.rels` (package relationships)
/// - every part sorted by part name, each preceded by its own relationships
///   entry when it has any relationships
///
/// # Example
///
/// ```no_run
/// use litchi_opc::opc::{OpcPackage, PackageWriter, SaveOptions, Compression};
///
/// let pkg = OpcPackage::open("input.docx")?;
/// PackageWriter::new(SaveOptions::new().with_compression(Compression::Stored))
///     .write("output.docx", &pkg)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct PackageWriter {
    options: SaveOptions,
}

impl PackageWriter {
    pub fn new(options: SaveOptions) -> Self {
        Self { options }
    }

    /// Write an OPC package to a file, replacing it atomically.
    ///
    /// The archive is written to a temporary file in the destination
    /// directory and renamed over `path` only once complete. On any failure
    /// the temporary file is removed and an existing file at `path` is left
    /// untouched.
    pub fn write<P: AsRef<Path>>(&self, path: P, package: &OpcPackage) -> Result<()> {
        let path = path.as_ref();
        Self::check(package)?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temp = NamedTempFile::new_in(dir)?;
        let temp = self
            .write_entries(BufWriter::new(temp), package)?
            .into_inner()
            .map_err(|e| OpcError::Io(e.into_error()))?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| OpcError::Io(e.error))?;

        info!(path = %path.display(), parts = package.part_count(), "saved package");
        Ok(())
    }

    /// Write an OPC package to any seekable sink and return the sink.
    pub fn write_to_stream<W: Write + Seek>(&self, writer: W, package: &OpcPackage) -> Result<W> {
        Self::check(package)?;
        self.write_entries(writer, package)
    }

    /// Serialize an OPC package to bytes.
    pub fn to_bytes(&self, package: &OpcPackage) -> Result<Vec<u8>> {
        Ok(self
            .write_to_stream(Cursor::new(Vec::new()), package)?
            .into_inner())
    }

    fn check(package: &OpcPackage) -> Result<()> {
        if let Err(e) = package.validate() {
            warn!(error = %e, "package failed validation; nothing written");
            return Err(e);
        }
        Ok(())
    }

    fn write_entries<W: Write + Seek>(&self, writer: W, package: &OpcPackage) -> Result<W> {
        let mut phys_writer = PhysPkgWriter::new(writer, self.options.compression);

        Self::write_entry(
            &mut phys_writer,
            CONTENT_TYPES_MEMBER,
            package.content_types().to_xml().as_bytes(),
        )?;

        if !package.rels().is_empty() {
            Self::write_entry(
                &mut phys_writer,
                PACKAGE_RELS_MEMBER,
                package.rels().to_xml().as_bytes(),
            )?;
        }

        for part in package.iter_parts() {
            if let Some(rels) = part.rels()
                && !rels.is_empty()
            {
                let membername = rels.owner().rels_membername();
                Self::write_entry(&mut phys_writer, &membername, rels.to_xml().as_bytes())?;
            }
            Self::write_entry(&mut phys_writer, part.partname().membername(), &part.blob())?;
        }

        phys_writer.finish()
    }

    fn write_entry<W: Write + Seek>(
        phys_writer: &mut PhysPkgWriter<W>,
        membername: &str,
        blob: &[u8],
    ) -> Result<()> {
        phys_writer.write(membername, blob)?;
        debug!(membername, bytes = blob.len(), "wrote entry");
        Ok(())
    }
}
