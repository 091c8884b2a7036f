//! Low-level byte order and safe reading/writing utilities for package parsing.
//!
//! This module provides endian-aware, bounds-checked reading and writing of primitive
//! values from/to byte buffers. Packages are always stored little-endian, so only the
//! little-endian flavour is exposed.
//!
//! # Key Components
//!
//! - [`crate::file::io::ByteIO`] - Trait implemented for all primitive numeric types
//! - [`crate::file::io::read_le`] - Read a value from the start of a buffer
//! - [`crate::file::io::read_le_at`] - Read a value at an offset and advance the offset
//! - [`crate::file::io::write_le_at`] - Write a value at an offset and advance the offset
//!
//! # Examples
//!
//! ```rust,ignore
//! use pkgscope::file::io::{read_le_at, write_le_at};
//!
//! let mut data = [0u8; 6];
//! let mut offset = 0;
//! write_le_at(&mut data, &mut offset, 0x9E2A_83C1_u32)?;
//! write_le_at(&mut data, &mut offset, 2_u16)?;
//!
//! let mut offset = 0;
//! let magic: u32 = read_le_at(&data, &mut offset)?;
//! assert_eq!(magic, 0x9E2A_83C1);
//! # Ok::<(), pkgscope::Error>(())
//! ```

use crate::Result;

/// Trait for primitive types that can be read from and written to little-endian byte buffers.
///
/// Implemented for `u8`, `i8`, `u16`, `i16`, `u32`, `i32`, `u64`, `i64`, `f32` and `f64`.
pub trait ByteIO: Sized + Copy {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_byte_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl ByteIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_byte_io!(
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
);

/// Safely reads a value of type `T` in little-endian byte order from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: ByteIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`.
///
/// The offset is advanced by the size of `T` on success and left untouched on failure.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: ByteIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// Safely writes a value of type `T` in little-endian byte order at `offset`.
///
/// The offset is advanced by the size of `T` on success.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le_at<T: ByteIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();
    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_le_u32() {
        let result = read_le::<u32>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0403_0201);
    }

    #[test]
    fn read_le_at_advances() {
        let mut offset = 2;
        let result = read_le_at::<u16>(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(result, 0x0403);
        assert_eq!(offset, 4);
    }

    #[test]
    fn read_le_floats() {
        let data = 1.5_f64.to_le_bytes();
        assert_eq!(read_le::<f64>(&data).unwrap(), 1.5);

        let data = (-2.25_f32).to_le_bytes();
        assert_eq!(read_le::<f32>(&data).unwrap(), -2.25);
    }

    #[test]
    fn read_past_end() {
        let mut offset = 6;
        let result = read_le_at::<u32>(&TEST_BUFFER, &mut offset);
        assert!(matches!(result, Err(Error::OutOfBounds { .. })));
        assert_eq!(offset, 6);
    }

    #[test]
    fn write_then_read() {
        let mut buffer = [0u8; 12];
        let mut offset = 0;
        write_le_at(&mut buffer, &mut offset, -7_i32).unwrap();
        write_le_at(&mut buffer, &mut offset, 0xDEAD_BEEF_CAFE_u64).unwrap();
        assert_eq!(offset, 12);

        let mut offset = 0;
        assert_eq!(read_le_at::<i32>(&buffer, &mut offset).unwrap(), -7);
        assert_eq!(read_le_at::<u64>(&buffer, &mut offset).unwrap(), 0xDEAD_BEEF_CAFE);
    }

    #[test]
    fn write_past_end() {
        let mut buffer = [0u8; 3];
        let mut offset = 0;
        let result = write_le_at(&mut buffer, &mut offset, 1_u32);
        assert!(matches!(result, Err(Error::OutOfBounds { .. })));
    }
}
