//! Tagged package index.
//!
//! On disk, references between records are a single signed integer: `0` is the package
//! root, positive values address the export table and negative values address the import
//! table. [`PackageIndex`] decodes that once at parse time so nothing else has to branch on
//! the sign.

use std::fmt;

use crate::{
    file::{parser::Parser, writer::Writer},
    Result,
};

/// A reference to the package root, an export or an import.
///
/// The payload of `Export` and `Import` is the zero-based table position.
///
/// # Examples
///
/// ```rust
/// use pkgscope::package::index::PackageIndex;
///
/// assert_eq!(PackageIndex::from_raw(0), PackageIndex::Root);
/// assert_eq!(PackageIndex::from_raw(3), PackageIndex::Export(2));
/// assert_eq!(PackageIndex::from_raw(-1), PackageIndex::Import(0));
/// assert_eq!(PackageIndex::Import(4).to_raw(), -5);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum PackageIndex {
    /// No outer, the package itself.
    #[default]
    Root,
    /// Position in the export table.
    Export(u32),
    /// Position in the import table.
    Import(u32),
}

impl PackageIndex {
    /// Decodes the on-disk signed representation.
    #[must_use]
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => PackageIndex::Root,
            n if n > 0 => PackageIndex::Export((n - 1) as u32),
            n => PackageIndex::Import((-(i64::from(n)) - 1) as u32),
        }
    }

    /// Encodes back into the on-disk signed representation.
    ///
    /// Every value produced by [`PackageIndex::from_raw`] converts back losslessly. Table
    /// positions beyond the signed range saturate.
    #[must_use]
    pub fn to_raw(self) -> i32 {
        match self {
            PackageIndex::Root => 0,
            PackageIndex::Export(n) => i32::try_from(i64::from(n) + 1).unwrap_or(i32::MAX),
            PackageIndex::Import(n) => i32::try_from(-i64::from(n) - 1).unwrap_or(i32::MIN),
        }
    }

    /// Reads a raw index from the parser.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than four bytes remain.
    pub fn read(parser: &mut Parser) -> Result<Self> {
        Ok(Self::from_raw(parser.read_le::<i32>()?))
    }

    /// Writes the raw index.
    pub fn write(self, writer: &mut Writer) {
        writer.write_le(self.to_raw());
    }

    /// Returns `true` for [`PackageIndex::Root`].
    #[must_use]
    pub fn is_root(&self) -> bool {
        matches!(self, PackageIndex::Root)
    }

    /// Returns `true` for [`PackageIndex::Export`].
    #[must_use]
    pub fn is_export(&self) -> bool {
        matches!(self, PackageIndex::Export(_))
    }

    /// Returns `true` for [`PackageIndex::Import`].
    #[must_use]
    pub fn is_import(&self) -> bool {
        matches!(self, PackageIndex::Import(_))
    }
}

impl fmt::Display for PackageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageIndex::Root => write!(f, "Root"),
            PackageIndex::Export(n) => write!(f, "Export[{n}]"),
            PackageIndex::Import(n) => write!(f, "Import[{n}]"),
        }
    }
}

impl fmt::Debug for PackageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackageIndex({}, raw: {})", self, self.to_raw())
    }
}
