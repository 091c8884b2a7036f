//! Growable little-endian writer, the encoding counterpart of [`crate::file::parser::Parser`].
//!
//! Everything the crate emits (name tables, import/export records, tagged property streams,
//! package headers) goes through [`crate::file::writer::Writer`]. Offsets that are only known
//! after later sections have been laid out are back-patched with
//! [`crate::file::writer::Writer::patch_le_at`].
//!
//! # Examples
//!
//! ```rust
//! use pkgscope::file::writer::Writer;
//! use pkgscope::Parser;
//!
//! let mut writer = Writer::new();
//! writer.write_le(0_u32);
//! writer.write_prefixed_string_utf8("Widget");
//! writer.patch_le_at(0, 0xABCD_u32)?;
//!
//! let bytes = writer.into_inner();
//! let mut parser = Parser::new(&bytes);
//! assert_eq!(parser.read_le::<u32>()?, 0xABCD);
//! assert_eq!(parser.read_prefixed_string_utf8()?, "Widget");
//! # Ok::<(), pkgscope::Error>(())
//! ```

use uguid::Guid;

use crate::{
    file::io::{write_le_at, ByteIO},
    Result,
};

/// A growable byte buffer with little-endian encoding helpers.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    data: Vec<u8>,
}

impl Writer {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Writer { data: Vec::new() }
    }

    /// Creates an empty writer with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Writer {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Current write position, equal to the number of bytes written.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.data.len()
    }

    /// Returns the bytes written so far.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the writer and returns the buffer.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Appends a value in little-endian byte order.
    pub fn write_le<T: ByteIO>(&mut self, value: T) {
        self.data.extend_from_slice(value.to_le_bytes().as_ref());
    }

    /// Overwrites a previously written value at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit inside the bytes
    /// written so far.
    pub fn patch_le_at<T: ByteIO>(&mut self, offset: usize, value: T) -> Result<()> {
        let mut offset = offset;
        write_le_at(&mut self.data, &mut offset, value)
    }

    /// Appends a table or array length as `u32`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `len` does not fit the field.
    pub fn write_count(&mut self, len: usize, what: &str) -> Result<()> {
        self.write_le(count_u32(len, what)?);
        Ok(())
    }

    /// Appends raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Appends a 7-bit encoded unsigned integer.
    pub fn write_7bit_encoded_int(&mut self, value: u32) {
        let mut remaining = value;
        while remaining >= 0x80 {
            self.data.push((remaining as u8) | 0x80);
            remaining >>= 7;
        }
        self.data.push(remaining as u8);
    }

    /// Appends a 7-bit length-prefixed UTF-8 string.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the string is longer than `u32::MAX` bytes.
    pub fn write_prefixed_string_utf8(&mut self, value: &str) -> Result<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| malformed_error!("String of {} bytes is too long", value.len()))?;
        self.write_7bit_encoded_int(len);
        self.write_bytes(value.as_bytes());
        Ok(())
    }

    /// Appends a GUID as 16 raw bytes.
    pub fn write_guid(&mut self, guid: &Guid) {
        self.write_bytes(&guid.to_bytes());
    }
}

/// Converts a length to the `u32` count stored on disk.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if `len` exceeds `u32::MAX`.
pub fn count_u32(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| malformed_error!("Too many {}: {}", what, len))
}
