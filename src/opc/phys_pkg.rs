//! Provides a general interface to a physical OPC package (ZIP file).
//!
//! This is the archive I/O primitive the loader and saver sit on. It knows
//! member names and bytes only; part names, content types and relationships
//! are layered on top by [`crate::opc::pkgreader`] and
//! [`crate::opc::pkgwriter`].

use crate::opc::error::{OpcError, Result};
use crate::opc::options::Compression;
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;
use zip::ZipArchive;
use zip::result::ZipError;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Upper bound on the buffer reserved up front for a member's bytes.
const MAX_PREALLOC: u64 = 1 << 20;

/// Physical package reader over a ZIP archive.
pub struct PhysPkgReader<R> {
    archive: ZipArchive<R>,
}

impl PhysPkgReader<BufReader<File>> {
    /// Open an OPC package file (.docx, .xlsx, .pptx, etc.).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> PhysPkgReader<R> {
    /// Wrap a seekable reader holding a ZIP archive.
    ///
    /// # Errors
    /// Returns [`OpcError::Zip`] if the central directory cannot be read.
    pub fn new(reader: R) -> Result<Self> {
        let archive = ZipArchive::new(reader)?;
        Ok(Self { archive })
    }

    /// Names of all file members, in archive order. Directory entries are skipped.
    pub fn member_names(&self) -> Vec<String> {
        self.archive
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(str::to_string)
            .collect()
    }

    #[inline]
    pub fn contains(&self, membername: &str) -> bool {
        self.archive.index_for_name(membername).is_some()
    }

    /// Read a member's bytes, or None if the archive has no such member.
    pub fn blob_for(&mut self, membername: &str) -> Result<Option<Vec<u8>>> {
        let mut file = match self.archive.by_name(membername) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(OpcError::Zip(e)),
        };

        // The declared size is only a hint; a crafted header may lie
        let capacity = file.size().min(MAX_PREALLOC) as usize;
        let mut blob = Vec::with_capacity(capacity);
        file.read_to_end(&mut blob)?;
        Ok(Some(blob))
    }

    /// Number of members, directories included.
    #[inline]
    pub fn len(&self) -> usize {
        self.archive.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.archive.is_empty()
    }
}

/// Physical package writer producing a ZIP archive.
///
/// Members are appended in call order; nothing is reordered.
pub struct PhysPkgWriter<W: Write + Seek> {
    zip_writer: ZipWriter<W>,
    options: SimpleFileOptions,
}

impl<W: Write + Seek> PhysPkgWriter<W> {
    pub fn new(writer: W, compression: Compression) -> Self {
        Self {
            zip_writer: ZipWriter::new(writer),
            options: SimpleFileOptions::default().compression_method(compression.into()),
        }
    }

    /// Append one member.
    pub fn write(&mut self, membername: &str, blob: &[u8]) -> Result<()> {
        self.zip_writer.start_file(membername, self.options)?;
        self.zip_writer.write_all(blob)?;
        Ok(())
    }

    /// Write the central directory and hand back the underlying writer.
    pub fn finish(self) -> Result<W> {
        Ok(self.zip_writer.finish()?)
    }
}
