//! Package container format.
//!
//! A package is a header followed by a body holding the name table, the import table, the
//! export table and the tagged property data of every export. The body may be split into
//! zlib-compressed chunks, in which case all table offsets are logical offsets into the
//! decompressed view.
//!
//! # Modules
//! - [`name`] - Session-wide name interning and per-package name maps
//! - [`index`] - The `Root` / `Export` / `Import` reference encoding
//! - [`header`] - Fixed header, generations and the chunk table
//! - [`compression`] - Chunk framing, reading logical ranges and writing compressed bodies
//! - [`records`] - Import and export records
//! - [`linker`] - An opened, validated package
//! - [`builder`] - Writing complete package images
//! - [`diagnostics`] - Non-fatal findings collected while loading
//! - [`config`] - Load and save configuration

pub mod builder;
pub mod compression;
pub mod config;
pub mod diagnostics;
pub mod header;
pub mod index;
pub mod linker;
pub mod name;
pub mod records;

pub use builder::PackageBuilder;
pub use compression::{ChunkTable, CompressedChunk, CompressionMethod, CompressionPolicy};
pub use config::LoadConfig;
pub use diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics};
pub use header::{PackageFlags, PackageHeader};
pub use index::PackageIndex;
pub use linker::{Linker, LinkerId};
pub use name::{Name, NameId, NameTable};
pub use records::{ExportFlags, ExportRecord, ExportState, ImportRecord, ObjectFlags};
