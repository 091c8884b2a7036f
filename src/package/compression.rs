//! Chunked compression of package bodies.
//!
//! A compressed package stores its header uncompressed and splits everything after it into
//! independently inflatable zlib chunks. The chunk table in the header maps each chunk's
//! logical (uncompressed) range onto its physical (compressed) range. Chunks are never
//! partially decompressible, so a read always inflates every chunk it touches in full.
//!
//! # Key Components
//!
//! - [`CompressedChunk`] - One logical/physical range pair
//! - [`ChunkTable`] - Sorted, contiguous chunk list with binary-search lookup
//! - [`ChunkWriter`] - Buffers logical bytes and emits compressed chunks
//! - [`PackageReader`] - Logical view over a (possibly compressed) package image
//! - [`read_range`] / [`verify_chunks`] - Free functions over raw images
//!
//! # Examples
//!
//! ```rust
//! use pkgscope::package::compression::{read_range, ChunkWriter, CompressionPolicy};
//!
//! let source: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
//!
//! let mut writer = ChunkWriter::new(CompressionPolicy::BiasSpeed, 4096, 0, 0);
//! writer.write(&source)?;
//! let (table, physical) = writer.finish()?;
//! assert_eq!(table.len(), 3);
//!
//! let window = read_range(&physical, &table, 4000, 300)?;
//! assert_eq!(&window[..], &source[4000..4300]);
//! # Ok::<(), pkgscope::Error>(())
//! ```

use std::borrow::Cow;
use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

use crate::{
    file::{parser::Parser, writer::Writer, File},
    Error, Result,
};

/// Upper bound of the deflate expansion ratio. A chunk announcing more logical bytes per
/// compressed byte cannot be a valid zlib stream.
pub const MAX_INFLATE_RATIO: u64 = 1032;

/// How chunk payloads are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    /// The body is stored as-is and the chunk table is empty.
    #[default]
    None,
    /// Each chunk is an independent zlib stream.
    Zlib,
}

impl CompressionMethod {
    /// Decodes the header field.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for unknown methods.
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(CompressionMethod::None),
            1 => Ok(CompressionMethod::Zlib),
            _ => Err(Error::NotSupported),
        }
    }

    /// Encodes the header field.
    #[must_use]
    pub fn to_u32(self) -> u32 {
        match self {
            CompressionMethod::None => 0,
            CompressionMethod::Zlib => 1,
        }
    }
}

/// Trade-off used when writing compressed chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionPolicy {
    /// Smallest output, slowest to produce.
    BiasMemory,
    /// Fastest to produce and inflate.
    BiasSpeed,
}

impl CompressionPolicy {
    /// The zlib level for this policy.
    #[must_use]
    pub fn level(self) -> Compression {
        match self {
            CompressionPolicy::BiasMemory => Compression::best(),
            CompressionPolicy::BiasSpeed => Compression::fast(),
        }
    }
}

/// One entry of the chunk table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressedChunk {
    /// Logical offset of the first byte of the chunk.
    pub uncompressed_offset: u64,
    /// Logical size of the chunk.
    pub uncompressed_size: u64,
    /// Physical offset of the compressed payload.
    pub compressed_offset: u64,
    /// Physical size of the compressed payload.
    pub compressed_size: u64,
}

impl CompressedChunk {
    /// Encoded size of a table entry.
    pub const SIZE: usize = 32;

    /// Exclusive logical end of the chunk.
    #[must_use]
    pub fn uncompressed_end(&self) -> u64 {
        self.uncompressed_offset.saturating_add(self.uncompressed_size)
    }

    /// Reads a table entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated data.
    pub fn read(parser: &mut Parser) -> Result<Self> {
        Ok(CompressedChunk {
            uncompressed_offset: parser.read_le()?,
            uncompressed_size: parser.read_le()?,
            compressed_offset: parser.read_le()?,
            compressed_size: parser.read_le()?,
        })
    }

    /// Writes a table entry.
    pub fn write(&self, writer: &mut Writer) {
        writer.write_le(self.uncompressed_offset);
        writer.write_le(self.uncompressed_size);
        writer.write_le(self.compressed_offset);
        writer.write_le(self.compressed_size);
    }
}

/// Ordered partition of the logical body into chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkTable {
    chunks: Vec<CompressedChunk>,
}

impl ChunkTable {
    /// Wraps a list of chunks; call [`ChunkTable::validate`] before trusting it.
    #[must_use]
    pub fn new(chunks: Vec<CompressedChunk>) -> Self {
        ChunkTable { chunks }
    }

    /// All chunks in logical order.
    #[must_use]
    pub fn chunks(&self) -> &[CompressedChunk] {
        &self.chunks
    }

    /// Number of chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` if the body is stored uncompressed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Logical start of the first chunk.
    #[must_use]
    pub fn logical_start(&self) -> Option<u64> {
        self.chunks.first().map(|c| c.uncompressed_offset)
    }

    /// Exclusive logical end of the last chunk.
    #[must_use]
    pub fn logical_end(&self) -> Option<u64> {
        self.chunks.last().map(CompressedChunk::uncompressed_end)
    }

    /// Checks the table against a physical image of `physical_len` bytes.
    ///
    /// Logical ranges must be non-empty, sorted and contiguous; every physical range must lie
    /// inside the image and no chunk may announce more than [`MAX_INFLATE_RATIO`] logical bytes
    /// per compressed byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for any violation.
    pub fn validate(&self, physical_len: u64) -> Result<()> {
        let mut expected_start: Option<u64> = None;

        for (index, chunk) in self.chunks.iter().enumerate() {
            if chunk.uncompressed_size == 0 || chunk.compressed_size == 0 {
                return Err(malformed_error!("Chunk {} is empty", index));
            }

            if chunk.uncompressed_offset.checked_add(chunk.uncompressed_size).is_none() {
                return Err(malformed_error!("Chunk {} logical range overflows", index));
            }

            if chunk.uncompressed_size > chunk.compressed_size.saturating_mul(MAX_INFLATE_RATIO) {
                return Err(malformed_error!(
                    "Chunk {} claims {} bytes from a {} byte payload",
                    index,
                    chunk.uncompressed_size,
                    chunk.compressed_size
                ));
            }

            match chunk.compressed_offset.checked_add(chunk.compressed_size) {
                Some(end) if end <= physical_len => {}
                _ => {
                    return Err(malformed_error!(
                        "Chunk {} physical range 0x{:x}+0x{:x} exceeds image of {} bytes",
                        index,
                        chunk.compressed_offset,
                        chunk.compressed_size,
                        physical_len
                    ))
                }
            }

            if let Some(start) = expected_start {
                if chunk.uncompressed_offset != start {
                    return Err(malformed_error!(
                        "Chunk {} starts at 0x{:x}, expected 0x{:x}",
                        index,
                        chunk.uncompressed_offset,
                        start
                    ));
                }
            }
            expected_start = Some(chunk.uncompressed_end());
        }

        Ok(())
    }

    /// Position of the first chunk whose logical range ends after `offset`.
    ///
    /// Equals [`ChunkTable::len`] if `offset` lies past the last chunk.
    #[must_use]
    pub fn find_first(&self, offset: u64) -> usize {
        self.chunks.partition_point(|c| c.uncompressed_end() <= offset)
    }

    /// Exclusive logical end of the chunk holding `offset`, `None` past the last chunk.
    #[must_use]
    pub fn chunk_end_at(&self, offset: u64) -> Option<u64> {
        self.chunks
            .get(self.find_first(offset))
            .map(CompressedChunk::uncompressed_end)
    }
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| out_of_bounds_error!())
}

fn physical_slice(physical: &[u8], offset: u64, size: u64) -> Result<&[u8]> {
    let start = to_usize(offset)?;
    let end = start
        .checked_add(to_usize(size)?)
        .ok_or(out_of_bounds_error!())?;
    physical.get(start..end).ok_or(out_of_bounds_error!())
}

/// Compresses one chunk payload.
///
/// # Errors
/// Returns [`crate::Error::Decompression`] if the encoder fails.
pub fn compress_chunk(data: &[u8], policy: CompressionPolicy) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), policy.level());
    encoder
        .write_all(data)
        .map_err(|e| Error::Decompression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| Error::Decompression(e.to_string()))
}

/// Inflates one chunk payload and checks it has the expected size.
///
/// The output grows with the inflated stream; `expected_size` only caps it.
///
/// # Errors
/// Returns [`crate::Error::Decompression`] if the stream is corrupt and
/// [`crate::Error::Malformed`] if it inflates to a different size than the chunk table says.
pub fn decompress_chunk(data: &[u8], expected_size: u64) -> Result<Vec<u8>> {
    let expected = to_usize(expected_size)?;
    let mut output = Vec::new();
    // One extra byte detects streams longer than announced.
    let limit = expected_size.saturating_add(1);
    ZlibDecoder::new(data)
        .take(limit)
        .read_to_end(&mut output)
        .map_err(|e| Error::Decompression(e.to_string()))?;

    if output.len() != expected {
        return Err(malformed_error!(
            "Chunk inflated to {} bytes, chunk table says {}",
            output.len(),
            expected
        ));
    }

    Ok(output)
}

/// Reads `size` logical bytes starting at `offset`.
///
/// Bytes before the first chunk (the header) and all bytes of an uncompressed image are
/// returned as a borrowed slice. Otherwise every intersecting chunk is inflated in full and
/// the requested window is copied out.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the window leaves the logical image,
/// [`crate::Error::Decompression`] for corrupt chunks and [`crate::Error::Malformed`] for
/// chunks that inflate to the wrong size.
pub fn read_range<'a>(
    physical: &'a [u8],
    table: &ChunkTable,
    offset: u64,
    size: u64,
) -> Result<Cow<'a, [u8]>> {
    let end = offset.checked_add(size).ok_or(out_of_bounds_error!())?;

    let Some(first_start) = table.logical_start() else {
        return Ok(Cow::Borrowed(physical_slice(physical, offset, size)?));
    };

    if end <= first_start {
        return Ok(Cow::Borrowed(physical_slice(physical, offset, size)?));
    }

    let mut output = Vec::new();
    let mut cursor = offset;

    if cursor < first_start {
        output.extend_from_slice(physical_slice(physical, cursor, first_start - cursor)?);
        cursor = first_start;
    }

    let mut index = table.find_first(cursor);
    while cursor < end {
        let Some(chunk) = table.chunks().get(index) else {
            return Err(out_of_bounds_error!());
        };

        let compressed = physical_slice(physical, chunk.compressed_offset, chunk.compressed_size)?;
        let inflated = decompress_chunk(compressed, chunk.uncompressed_size)?;

        let Some(relative) = cursor.checked_sub(chunk.uncompressed_offset) else {
            return Err(malformed_error!("Chunk {} does not cover offset 0x{:x}", index, cursor));
        };
        let start = to_usize(relative)?;
        let stop = to_usize(end.min(chunk.uncompressed_end()) - chunk.uncompressed_offset)?;
        output.extend_from_slice(&inflated[start..stop]);

        cursor = chunk.uncompressed_offset + stop as u64;
        index += 1;
    }

    Ok(Cow::Owned(output))
}

/// Decompresses every chunk and compares it with `source`.
///
/// `source` holds the logical bytes starting at the first chunk. Used as a self check after
/// writing.
///
/// # Errors
/// Returns [`crate::Error::Decompression`] for corrupt chunks and [`crate::Error::Malformed`]
/// if any chunk differs from the source.
pub fn verify_chunks(physical: &[u8], table: &ChunkTable, source: &[u8]) -> Result<()> {
    let base = table.logical_start().unwrap_or(0);

    for (index, chunk) in table.chunks().iter().enumerate() {
        let compressed = physical_slice(physical, chunk.compressed_offset, chunk.compressed_size)?;
        let inflated = decompress_chunk(compressed, chunk.uncompressed_size)?;
        let expected = physical_slice(
            source,
            chunk.uncompressed_offset.saturating_sub(base),
            chunk.uncompressed_size,
        )?;

        if inflated != expected {
            return Err(malformed_error!(
                "Chunk {} does not match its source bytes",
                index
            ));
        }
    }

    Ok(())
}

/// Buffers logical bytes and emits compressed chunks.
///
/// A chunk is closed automatically once `chunk_size` bytes are pending, or explicitly with
/// [`ChunkWriter::finish_chunk`], which allows tables with mixed chunk sizes.
#[derive(Debug)]
pub struct ChunkWriter {
    policy: CompressionPolicy,
    chunk_size: usize,
    logical_cursor: u64,
    physical_base: u64,
    pending: Vec<u8>,
    chunks: Vec<CompressedChunk>,
    output: Vec<u8>,
}

impl ChunkWriter {
    /// Creates a writer whose first chunk starts at `logical_base` and whose compressed
    /// output will be placed at `physical_base` of the final image.
    #[must_use]
    pub fn new(
        policy: CompressionPolicy,
        chunk_size: usize,
        logical_base: u64,
        physical_base: u64,
    ) -> Self {
        ChunkWriter {
            policy,
            chunk_size: chunk_size.max(1),
            logical_cursor: logical_base,
            physical_base,
            pending: Vec::new(),
            chunks: Vec::new(),
            output: Vec::new(),
        }
    }

    /// Appends logical bytes, closing chunks as they fill up.
    ///
    /// # Errors
    /// Returns [`crate::Error::Decompression`] if compression fails.
    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let room = self.chunk_size - self.pending.len();
            let take = room.min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() == self.chunk_size {
                self.finish_chunk()?;
            }
        }
        Ok(())
    }

    /// Closes the pending chunk. Does nothing if no bytes are pending.
    ///
    /// # Errors
    /// Returns [`crate::Error::Decompression`] if compression fails.
    pub fn finish_chunk(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let compressed = compress_chunk(&self.pending, self.policy)?;
        let chunk = CompressedChunk {
            uncompressed_offset: self.logical_cursor,
            uncompressed_size: self.pending.len() as u64,
            compressed_offset: self.physical_base + self.output.len() as u64,
            compressed_size: compressed.len() as u64,
        };

        self.logical_cursor += chunk.uncompressed_size;
        self.output.extend_from_slice(&compressed);
        self.chunks.push(chunk);
        self.pending.clear();
        Ok(())
    }

    /// Closes the last chunk and returns the table plus the compressed bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Decompression`] if compression fails.
    pub fn finish(mut self) -> Result<(ChunkTable, Vec<u8>)> {
        self.finish_chunk()?;
        Ok((ChunkTable::new(self.chunks), self.output))
    }
}

/// Logical view over a package image.
///
/// Owns the [`crate::file::File`] and the validated chunk table and hands out logical byte
/// ranges, inflating chunks as needed.
#[derive(Debug)]
pub struct PackageReader {
    file: File,
    chunks: ChunkTable,
}

impl PackageReader {
    /// Validates `chunks` against the image and wraps both.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the chunk table is inconsistent.
    pub fn new(file: File, chunks: ChunkTable) -> Result<Self> {
        chunks.validate(file.len() as u64)?;
        Ok(PackageReader { file, chunks })
    }

    /// Size of the logical image.
    #[must_use]
    pub fn logical_len(&self) -> u64 {
        self.chunks
            .logical_end()
            .unwrap_or(self.file.len() as u64)
    }

    /// Returns `true` if the body is chunk-compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// The chunk table.
    #[must_use]
    pub fn chunks(&self) -> &ChunkTable {
        &self.chunks
    }

    /// Reads a logical range, see [`read_range`].
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`], [`crate::Error::Decompression`] or
    /// [`crate::Error::Malformed`].
    pub fn read_range(&self, offset: u64, size: u64) -> Result<Cow<'_, [u8]>> {
        read_range(self.file.data(), &self.chunks, offset, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 7) % 253) as u8).collect()
    }

    #[test]
    fn mixed_chunk_sizes_roundtrip() {
        let data = source(9000);

        let mut writer = ChunkWriter::new(CompressionPolicy::BiasMemory, 4096, 100, 100);
        writer.write(&data[..1000]).unwrap();
        writer.finish_chunk().unwrap();
        writer.write(&data[1000..1500]).unwrap();
        writer.finish_chunk().unwrap();
        writer.write(&data[1500..]).unwrap();
        let (table, compressed) = writer.finish().unwrap();

        let sizes: Vec<u64> = table.chunks().iter().map(|c| c.uncompressed_size).collect();
        assert_eq!(sizes, vec![1000, 500, 4096, 3404]);

        let mut physical = vec![0xAA; 100];
        physical.extend_from_slice(&compressed);
        table.validate(physical.len() as u64).unwrap();
        verify_chunks(&physical, &table, &data).unwrap();

        // Window spanning the second, third and fourth chunk.
        let window = read_range(&physical, &table, 100 + 1200, 5000).unwrap();
        assert_eq!(&window[..], &data[1200..6200]);

        // Window spanning the header and the first chunk.
        let window = read_range(&physical, &table, 90, 20).unwrap();
        assert_eq!(&window[..10], &[0xAA; 10]);
        assert_eq!(&window[10..], &data[..10]);

        // Header only stays borrowed.
        let window = read_range(&physical, &table, 0, 100).unwrap();
        assert!(matches!(window, Cow::Borrowed(_)));

        assert!(read_range(&physical, &table, 100 + 8990, 20).is_err());
    }

    #[test]
    fn find_first_uses_logical_ranges() {
        let table = ChunkTable::new(vec![
            CompressedChunk { uncompressed_offset: 10, uncompressed_size: 10, compressed_offset: 0, compressed_size: 1 },
            CompressedChunk { uncompressed_offset: 20, uncompressed_size: 5, compressed_offset: 1, compressed_size: 1 },
        ]);
        assert_eq!(table.find_first(0), 0);
        assert_eq!(table.find_first(19), 0);
        assert_eq!(table.find_first(20), 1);
        assert_eq!(table.find_first(25), 2);
    }

    #[test]
    fn validate_rejects_gaps_and_overruns() {
        let gap = ChunkTable::new(vec![
            CompressedChunk { uncompressed_offset: 0, uncompressed_size: 10, compressed_offset: 0, compressed_size: 4 },
            CompressedChunk { uncompressed_offset: 11, uncompressed_size: 10, compressed_offset: 4, compressed_size: 4 },
        ]);
        assert!(matches!(gap.validate(100), Err(Error::Malformed { .. })));

        let overrun = ChunkTable::new(vec![CompressedChunk {
            uncompressed_offset: 0,
            uncompressed_size: 10,
            compressed_offset: 90,
            compressed_size: 20,
        }]);
        assert!(matches!(overrun.validate(100), Err(Error::Malformed { .. })));
    }

    #[test]
    fn corrupt_chunk_is_rejected() {
        let data = source(300);
        let mut writer = ChunkWriter::new(CompressionPolicy::BiasSpeed, 1024, 0, 0);
        writer.write(&data).unwrap();
        let (table, mut physical) = writer.finish().unwrap();
        physical[2] ^= 0xFF;
        physical[3] ^= 0xFF;

        let result = read_range(&physical, &table, 0, 10);
        assert!(matches!(
            result,
            Err(Error::Decompression(_) | Error::Malformed { .. })
        ));
    }

    #[test]
    fn size_mismatch_is_detected() {
        let compressed = compress_chunk(&[1, 2, 3, 4], CompressionPolicy::BiasSpeed).unwrap();
        assert!(decompress_chunk(&compressed, 4).is_ok());
        assert!(matches!(decompress_chunk(&compressed, 3), Err(Error::Malformed { .. })));
        assert!(matches!(decompress_chunk(&compressed, 5), Err(Error::Malformed { .. })));
    }

    #[test]
    fn validate_rejects_impossible_ratios() {
        let chunk = CompressedChunk {
            uncompressed_offset: 64,
            uncompressed_size: u64::MAX - 64,
            compressed_offset: 64,
            compressed_size: 16,
        };
        let table = ChunkTable::new(vec![chunk]);
        assert!(matches!(table.validate(128), Err(Error::Malformed { .. })));

        let largest = ChunkTable::new(vec![CompressedChunk {
            uncompressed_size: 16 * MAX_INFLATE_RATIO,
            ..chunk
        }]);
        assert!(largest.validate(128).is_ok());
    }

    #[test]
    fn chunk_end_lookup() {
        let table = ChunkTable::new(vec![
            CompressedChunk { uncompressed_offset: 10, uncompressed_size: 10, compressed_offset: 0, compressed_size: 1 },
            CompressedChunk { uncompressed_offset: 20, uncompressed_size: 5, compressed_offset: 1, compressed_size: 1 },
        ]);
        assert_eq!(table.chunk_end_at(12), Some(20));
        assert_eq!(table.chunk_end_at(20), Some(25));
        assert_eq!(table.chunk_end_at(25), None);
    }

    #[test]
    fn method_codes() {
        assert_eq!(CompressionMethod::from_u32(1).unwrap(), CompressionMethod::Zlib);
        assert!(matches!(CompressionMethod::from_u32(7), Err(Error::NotSupported)));
    }
}
