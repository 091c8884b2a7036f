//! Package file abstraction and raw byte access.
//!
//! This module abstracts over the different sources a package image can come from (a file
//! on disk or a buffer in memory) and provides the cursor-based reading and growable writing
//! primitives used by every other part of the crate.
//!
//! # Key Components
//!
//! ## Core Types
//! - [`crate::file::File`] - A loaded package image, independent of where the bytes live
//! - [`crate::file::Backend`] - Trait for different data sources (disk files, memory buffers)
//!
//! ## Parsing Infrastructure
//! - [`crate::file::parser::Parser`] - Bounds-checked cursor for decoding structures
//! - [`crate::file::writer::Writer`] - Growable buffer for encoding structures
//! - [`crate::file::io`] - Low-level little-endian read/write helpers
//!
//! # Examples
//!
//! ```rust,no_run
//! use pkgscope::file::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("Widgets.pkg"))?;
//! let magic = file.data_slice(0, 4)?;
//! println!("{} bytes, magic {:02x?}", file.len(), magic);
//! # Ok::<(), pkgscope::Error>(())
//! ```

pub mod io;
pub mod parser;
pub mod writer;

mod memory;
mod physical;

use std::path::Path;

use crate::{Error::Empty, Result};

pub use memory::Memory;
pub use physical::Physical;

/// Source of the raw bytes behind a [`File`].
pub trait Backend: Send + Sync {
    /// The complete image.
    fn bytes(&self) -> &[u8];

    /// Size of the image in bytes.
    fn len(&self) -> usize {
        self.bytes().len()
    }
}

/// A loaded package image.
///
/// Uninterpreted bytes; the package header is decoded by [`crate::package::PackageHeader`].
pub struct File {
    data: Box<dyn Backend>,
}

impl File {
    /// Loads a package image from the given path using a memory mapping.
    ///
    /// # Arguments
    ///
    /// * `file` - Path to the package on disk.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be opened and
    /// [`crate::Error::Empty`] if it contains no data.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Loads a package image from a memory buffer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Empty`] if the buffer is empty.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(input)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }
        Ok(File { data: Box::new(data) })
    }

    /// Returns the total size of the loaded image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the image has a length of zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the complete image.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.bytes()
    }

    /// Returns a bounds-checked slice of the image.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the requested range is out of bounds.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data().get(offset..end))
            .ok_or_else(|| out_of_bounds_error!())
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File").field("len", &self.len()).finish()
    }
}
