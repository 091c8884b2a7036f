//! Load session configuration
//!
//! [`LoadConfig`] controls where packages are searched for, how strictly tagged property
//! streams are decoded, and how packages are written back.

use std::path::PathBuf;

use crate::package::{compression::CompressionPolicy, header::FILE_VERSION_CURRENT};

/// Default logical chunk size for compressed saves (128 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

/// Configuration for a [`crate::LoadSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadConfig {
    /// Directories searched, in order, for `<package>.<extension>` when an import names a
    /// package that is neither open, native nor registered from memory
    pub search_paths: Vec<PathBuf>,

    /// File extension of packages on disk, without the dot (default: `pkg`)
    pub package_extension: String,

    /// Turn skipped property tags into errors instead of warnings
    /// Useful for tooling that must not silently drop data
    pub strict_properties: bool,

    /// Compression used by `save_package`; `None` writes uncompressed bodies
    pub compression: Option<CompressionPolicy>,

    /// Logical size of a compressed chunk when saving
    pub chunk_size: usize,

    /// Maximum length of Outer chains and maximum resolve nesting (default: 1024)
    pub max_outer_depth: usize,

    /// File version written by `save_package`
    pub write_version: u32,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            package_extension: "pkg".to_string(),
            strict_properties: false,
            compression: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_outer_depth: 1024,
            write_version: FILE_VERSION_CURRENT,
        }
    }
}

impl LoadConfig {
    /// Creates a configuration that rejects any property stream it cannot decode losslessly
    #[must_use]
    pub fn strict() -> Self {
        Self {
            strict_properties: true,
            ..Self::default()
        }
    }

    /// Creates a configuration that writes chunk-compressed packages
    #[must_use]
    pub fn compressed(policy: CompressionPolicy) -> Self {
        Self {
            compression: Some(policy),
            ..Self::default()
        }
    }

    /// Adds a search directory
    #[must_use]
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }
}
