//! Read-only memory mapping of a package on disk.

use std::{fs, path::Path};

use memmap2::Mmap;

use super::Backend;
use crate::{Error, Result};

/// Package image mapped from disk.
///
/// Header, tables and chunks are sliced out of the mapping on demand, so opening a large
/// package only touches the pages the linker actually reads.
#[derive(Debug)]
pub struct Physical {
    map: Mmap,
}

impl Physical {
    /// Maps the package at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path).map_err(Error::FileError)?;
        // SAFETY: packages are never written in place while a session holds them open.
        let map = unsafe { Mmap::map(&file) }.map_err(Error::FileError)?;
        Ok(Physical { map })
    }
}

impl Backend for Physical {
    fn bytes(&self) -> &[u8] {
        &self.map
    }
}
