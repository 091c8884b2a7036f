//! Package stream header.
//!
//! The header is read first and is never compressed. It locates the name, import and export
//! tables inside the logical image, carries the content GUID and the save history
//! (generations), and holds the chunk table for compressed bodies.
//!
//! # Layout
//!
//! ```text
//! u32  magic                   0x9E2A83C1
//! u32  file_version            1 = legacy names, 2 = explicit instance numbers
//! u32  header_size             logical offset where the body begins
//! u32  package_flags
//! u32  name_count,   u64 name_offset
//! u32  import_count, u64 import_offset
//! u32  export_count, u64 export_offset
//! [16] guid
//! u32  generation_count, { u32 export_count, u32 name_count, u32 net_object_count }*
//! u32  compression_method
//! u32  chunk_count, { u64 x4 }*
//! ```

use bitflags::bitflags;
use uguid::Guid;

use crate::{
    file::{parser::Parser, writer::Writer},
    package::compression::{ChunkTable, CompressedChunk, CompressionMethod},
    Error, Result,
};

/// Magic number at offset 0 of every package.
pub const PACKAGE_MAGIC: u32 = 0x9E2A_83C1;
/// Name references are a single index; instance numbers live in the entry text.
pub const FILE_VERSION_LEGACY: u32 = 1;
/// Name references carry an explicit instance number.
pub const FILE_VERSION_CURRENT: u32 = 2;

const FIXED_HEADER_SIZE: usize = 4 * 4 + 3 * (4 + 8) + 16 + 4 + 4 + 4;
const GENERATION_SIZE: usize = 12;

bitflags! {
    /// Package-wide flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PackageFlags: u32 {
        /// May be downloaded by clients.
        const ALLOW_DOWNLOAD = 0x0000_0001;
        /// Clients may skip loading it.
        const CLIENT_OPTIONAL = 0x0000_0002;
        /// Only relevant to servers.
        const SERVER_SIDE_ONLY = 0x0000_0004;
        /// Contains a map.
        const CONTAINS_MAP = 0x0000_0008;
        /// Must be present for the owning content to load.
        const REQUIRED = 0x0000_0010;
        /// The body is chunk-compressed.
        const STORE_COMPRESSED = 0x0000_0020;
    }
}

/// One entry of the save history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenerationInfo {
    /// Export count at the time of the save.
    pub export_count: u32,
    /// Name count at the time of the save.
    pub name_count: u32,
    /// Number of network-addressable objects at the time of the save.
    pub net_object_count: u32,
}

/// The decoded package header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageHeader {
    /// Name table encoding, see [`FILE_VERSION_LEGACY`] and [`FILE_VERSION_CURRENT`].
    pub file_version: u32,
    /// Logical offset where the body begins.
    pub header_size: u32,
    /// Package-wide flags.
    pub package_flags: PackageFlags,
    /// Number of name table entries.
    pub name_count: u32,
    /// Logical offset of the name table.
    pub name_offset: u64,
    /// Number of import records.
    pub import_count: u32,
    /// Logical offset of the import table.
    pub import_offset: u64,
    /// Number of export records.
    pub export_count: u32,
    /// Logical offset of the export table.
    pub export_offset: u64,
    /// Content GUID.
    pub guid: Guid,
    /// Save history, oldest first.
    pub generations: Vec<GenerationInfo>,
    /// Encoding of the chunk payloads.
    pub compression: CompressionMethod,
    /// Chunk table; empty for uncompressed bodies.
    pub chunks: ChunkTable,
}

impl Default for PackageHeader {
    fn default() -> Self {
        PackageHeader {
            file_version: FILE_VERSION_CURRENT,
            header_size: 0,
            package_flags: PackageFlags::empty(),
            name_count: 0,
            name_offset: 0,
            import_count: 0,
            import_offset: 0,
            export_count: 0,
            export_offset: 0,
            guid: Guid::ZERO,
            generations: Vec::new(),
            compression: CompressionMethod::None,
            chunks: ChunkTable::default(),
        }
    }
}

impl PackageHeader {
    /// Encoded size of a header with the given number of generations and chunks.
    #[must_use]
    pub fn encoded_size(generation_count: usize, chunk_count: usize) -> usize {
        FIXED_HEADER_SIZE + generation_count * GENERATION_SIZE + chunk_count * CompressedChunk::SIZE
    }

    /// Decodes the header from the start of a package image.
    ///
    /// # Errors
    /// - [`crate::Error::Empty`] for an empty image
    /// - [`crate::Error::Malformed`] for a bad magic, a `header_size` smaller than the decoded
    ///   header, or an inconsistent compression setup
    /// - [`crate::Error::NotSupported`] for unknown file versions or compression methods
    pub fn read(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::Empty);
        }

        let mut parser = Parser::new(data);

        let magic = parser.read_le::<u32>()?;
        if magic != PACKAGE_MAGIC {
            return Err(malformed_error!("Invalid package magic 0x{:08x}", magic));
        }

        let file_version = parser.read_le::<u32>()?;
        if !(FILE_VERSION_LEGACY..=FILE_VERSION_CURRENT).contains(&file_version) {
            return Err(Error::NotSupported);
        }

        let header_size = parser.read_le::<u32>()?;
        let package_flags = PackageFlags::from_bits_retain(parser.read_le::<u32>()?);

        let name_count = parser.read_le::<u32>()?;
        let name_offset = parser.read_le::<u64>()?;
        let import_count = parser.read_le::<u32>()?;
        let import_offset = parser.read_le::<u64>()?;
        let export_count = parser.read_le::<u32>()?;
        let export_offset = parser.read_le::<u64>()?;
        let guid = parser.read_guid()?;

        let generation_count = parser.read_count(GENERATION_SIZE)?;
        let mut generations = Vec::with_capacity(generation_count);
        for _ in 0..generation_count {
            generations.push(GenerationInfo {
                export_count: parser.read_le()?,
                name_count: parser.read_le()?,
                net_object_count: parser.read_le()?,
            });
        }

        let compression = CompressionMethod::from_u32(parser.read_le::<u32>()?)?;

        let chunk_count = parser.read_count(CompressedChunk::SIZE)?;
        let mut chunks = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            chunks.push(CompressedChunk::read(&mut parser)?);
        }

        if (header_size as usize) < parser.pos() {
            return Err(malformed_error!(
                "Header size {} is smaller than the decoded header ({} bytes)",
                header_size,
                parser.pos()
            ));
        }

        match (compression, chunks.is_empty()) {
            (CompressionMethod::None, false) => {
                return Err(malformed_error!("Uncompressed package carries a chunk table"))
            }
            (CompressionMethod::Zlib, true) => {
                return Err(malformed_error!("Compressed package has no chunks"))
            }
            _ => {}
        }

        if let Some(first) = chunks.first() {
            if first.uncompressed_offset != u64::from(header_size) {
                return Err(malformed_error!(
                    "First chunk starts at 0x{:x}, body starts at 0x{:x}",
                    first.uncompressed_offset,
                    header_size
                ));
            }
        }

        Ok(PackageHeader {
            file_version,
            header_size,
            package_flags,
            name_count,
            name_offset,
            import_count,
            import_offset,
            export_count,
            export_offset,
            guid,
            generations,
            compression,
            chunks: ChunkTable::new(chunks),
        })
    }

    /// Encodes the header.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the generation or chunk list is longer than its
    /// `u32` count field.
    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        writer.write_le(PACKAGE_MAGIC);
        writer.write_le(self.file_version);
        writer.write_le(self.header_size);
        writer.write_le(self.package_flags.bits());
        writer.write_le(self.name_count);
        writer.write_le(self.name_offset);
        writer.write_le(self.import_count);
        writer.write_le(self.import_offset);
        writer.write_le(self.export_count);
        writer.write_le(self.export_offset);
        writer.write_guid(&self.guid);

        writer.write_count(self.generations.len(), "generations")?;
        for generation in &self.generations {
            writer.write_le(generation.export_count);
            writer.write_le(generation.name_count);
            writer.write_le(generation.net_object_count);
        }

        writer.write_le(self.compression.to_u32());
        writer.write_count(self.chunks.len(), "chunks")?;
        for chunk in self.chunks.chunks() {
            chunk.write(writer);
        }
        Ok(())
    }

    /// Returns `true` if the body is chunk-compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compression != CompressionMethod::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PackageHeader {
        PackageHeader {
            header_size: PackageHeader::encoded_size(2, 0) as u32,
            package_flags: PackageFlags::CONTAINS_MAP | PackageFlags::REQUIRED,
            name_count: 12,
            name_offset: 200,
            import_count: 3,
            import_offset: 300,
            export_count: 4,
            export_offset: 400,
            guid: Guid::from_bytes([0x5A; 16]),
            generations: vec![
                GenerationInfo { export_count: 2, name_count: 9, net_object_count: 0 },
                GenerationInfo { export_count: 4, name_count: 12, net_object_count: 1 },
            ],
            ..PackageHeader::default()
        }
    }

    #[test]
    fn write_read() {
        let header = sample();
        let mut writer = Writer::new();
        header.write(&mut writer).unwrap();
        assert_eq!(writer.pos(), header.header_size as usize);

        let decoded = PackageHeader::read(writer.data()).unwrap();
        assert_eq!(decoded, header);
        assert!(!decoded.is_compressed());
    }

    #[test]
    fn bad_magic() {
        let mut writer = Writer::new();
        sample().write(&mut writer).unwrap();
        let mut bytes = writer.into_inner();
        bytes[0] = 0;
        assert!(matches!(PackageHeader::read(&bytes), Err(Error::Malformed { .. })));
    }

    #[test]
    fn unsupported_version() {
        let header = PackageHeader { file_version: 3, ..sample() };
        let mut writer = Writer::new();
        header.write(&mut writer).unwrap();
        assert!(matches!(PackageHeader::read(writer.data()), Err(Error::NotSupported)));
    }

    #[test]
    fn header_size_too_small() {
        let header = PackageHeader { header_size: 8, ..sample() };
        let mut writer = Writer::new();
        header.write(&mut writer).unwrap();
        assert!(matches!(PackageHeader::read(writer.data()), Err(Error::Malformed { .. })));
    }

    #[test]
    fn truncated() {
        let mut writer = Writer::new();
        sample().write(&mut writer).unwrap();
        let bytes = writer.into_inner();
        assert!(matches!(
            PackageHeader::read(&bytes[..40]),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(PackageHeader::read(&[]), Err(Error::Empty)));
    }
}
