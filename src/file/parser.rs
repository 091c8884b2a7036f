//! Cursor over package bytes.
//!
//! [`Parser`] reads every structure of the package format: the header, the name table, the
//! import/export tables and the tagged property streams. Reads are bounds-checked and fail with
//! [`crate::Error::OutOfBounds`] instead of panicking on truncated input.
//!
//! Package tables use two recurring shapes that get dedicated helpers:
//!
//! - counted arrays (`u32 n` followed by `n` fixed-size elements), see [`Parser::read_count`]
//! - absolute `u64` file offsets that must be rebased onto the slice being parsed, see
//!   [`Parser::seek_offset`]
//!
//! ```rust
//! use pkgscope::Parser;
//!
//! // Two generation records of 12 bytes each would need 24 bytes after the count.
//! let data = [0x02, 0x00, 0x00, 0x00, 0xAA];
//! let mut parser = Parser::new(&data);
//! assert!(parser.read_count(12).is_err());
//!
//! let data = [0x01, 0x00, 0x00, 0x00, 0x2A, 0x00];
//! let mut parser = Parser::new(&data);
//! assert_eq!(parser.read_count(2)?, 1);
//! assert_eq!(parser.read_le::<u16>()?, 42);
//! # Ok::<(), pkgscope::Error>(())
//! ```

use uguid::Guid;

use crate::{
    file::io::{read_le_at, ByteIO},
    Result,
};

/// Bounds-checked little-endian reader over a byte slice.
///
/// ```rust
/// use pkgscope::Parser;
///
/// let data = [0x05, b'W', b'i', b'd', b'g', b't'];
/// let mut parser = Parser::new(&data);
///
/// assert_eq!(parser.read_prefixed_string_utf8()?, "Widgt");
/// assert!(!parser.has_more_data());
/// # Ok::<(), pkgscope::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Creates a parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Length of the underlying slice.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying slice is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` while unread bytes remain.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Current cursor position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The whole underlying slice.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Moves the cursor. Seeking to exactly the end is allowed.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` is past the end.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Moves the cursor to the absolute file offset `offset`, where the slice starts at file
    /// offset `base`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `offset` lies before `base` or past the end.
    pub fn seek_offset(&mut self, offset: u64, base: u64) -> Result<()> {
        let relative = offset.checked_sub(base).ok_or(out_of_bounds_error!())?;
        let relative = usize::try_from(relative).map_err(|_| out_of_bounds_error!())?;
        self.seek(relative)
    }

    /// Reads a value of type `T` and advances past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain.
    pub fn read_le<T: ByteIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Reads a `u32` element count and checks that `count` elements of at least
    /// `min_element_size` bytes can still follow.
    ///
    /// Guards allocations sized from untrusted counts.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the data is too short for the announced count.
    pub fn read_count(&mut self, min_element_size: usize) -> Result<usize> {
        let start = self.position;
        let count = self.read_le::<u32>()? as usize;
        if let Err(error) = self.ensure_remaining(count.saturating_mul(min_element_size)) {
            self.position = start;
            return Err(error);
        }
        Ok(count)
    }

    /// Reads a 7-bit encoded unsigned integer, least significant group first.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the data ends inside the value and
    /// [`crate::Error::Malformed`] if it does not fit in 32 bits.
    ///
    /// ```rust
    /// use pkgscope::Parser;
    ///
    /// let mut parser = Parser::new(&[0x80, 0x01]);
    /// assert_eq!(parser.read_7bit_encoded_int()?, 128);
    /// # Ok::<(), pkgscope::Error>(())
    /// ```
    pub fn read_7bit_encoded_int(&mut self) -> Result<u32> {
        let mut value = 0u32;
        let mut shift = 0;

        loop {
            let Some(&byte) = self.data.get(self.position) else {
                return Err(out_of_bounds_error!());
            };
            self.position += 1;

            value |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }

            shift += 7;
            if shift >= 32 {
                return Err(malformed_error!("Name length exceeds 32 bits after {} bits", shift));
            }
        }
    }

    /// Reads a name table entry: a 7-bit length followed by that many UTF-8 bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated entries and
    /// [`crate::Error::Malformed`] for invalid UTF-8.
    pub fn read_prefixed_string_utf8(&mut self) -> Result<String> {
        let length = self.read_7bit_encoded_int()? as usize;
        let start = self.position;
        let bytes = self.read_bytes(length)?;

        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| malformed_error!("Invalid UTF-8 at {}..{}: {}", start, start + length, e))
    }

    /// Reads 16 raw GUID bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than 16 bytes remain.
    pub fn read_guid(&mut self) -> Result<Guid> {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(self.read_bytes(16)?);
        Ok(Guid::from_bytes(raw))
    }

    /// Fails unless at least `needed` bytes remain.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `needed` bytes remain.
    pub fn ensure_remaining(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(out_of_bounds_error!());
        }
        Ok(())
    }

    /// Borrows the next `length` bytes and advances past them.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        self.ensure_remaining(length)?;
        let bytes = &self.data[self.position..self.position + length];
        self.position += length;
        Ok(bytes)
    }
}
