// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # pkgscope
//!
//! A loader, linker and writer for binary object packages. A package is one file holding a
//! header, a name table, an import table (references to objects of other packages), an export
//! table (objects defined here) and per-export tagged property data. `pkgscope` opens packages
//! lazily, resolves objects across package boundaries on demand, decodes their properties
//! tolerantly against the current class layouts and saves them back out.
//!
//! ## Features
//!
//! - **Lazy cross-package resolution** - Imports and exports are materialised on first use, at most once
//! - **Deferred property loading** - Tagged data is decoded when the outermost load transaction closes
//! - **Schema-tolerant properties** - Added, removed, reordered and widened fields load without errors
//! - **Chunked compression** - Package bodies can be stored as zlib chunks and read back transparently
//! - **Dependency analysis** - Post-order dependency walks and reverse reference queries without loading
//! - **Named resources** - A namespaced, reference-counted cache with on-demand population
//!
//! ## Quick Start
//!
//! ```rust
//! use pkgscope::prelude::*;
//!
//! let mut session = LoadSession::new(LoadConfig::default());
//! let widget = session.register_class(
//!     ClassBuilder::new("Widget").package("Engine").field("Health", PropertyKind::Int),
//! )?;
//!
//! let image = {
//!     let defaults = session.classes().defaults(widget)?.clone();
//!     let mut builder = session.package_builder();
//!     let class = builder.import_class("Engine", "Widget");
//!     let button = builder.export_object("Button", class, PackageIndex::Root);
//!     let values = PropertyBag::from_slots(vec![vec![PropertyValue::Int(75)]]);
//!     builder.set_properties(button, widget, &values, &defaults)?;
//!     builder.build()?
//! };
//!
//! let menu = session.open_package_from_memory("Menu", image)?;
//! let button = session.resolve(menu, PackageIndex::Export(0))?;
//! assert_eq!(session.property(button, "Health"), Some(&PropertyValue::Int(75)));
//! # Ok::<(), pkgscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`file`] - Byte sources (memory-mapped or owned), little-endian parsing and writing
//! - [`package`] - On-disk structures: header, names, import/export records, compression, linker
//! - [`property`] - Class layouts, property values and the tagged property stream codec
//! - [`session`] - Load transactions, object construction and cross-package resolution
//! - [`dependencies`] - Dependency gathering and referencer lookup over open packages
//! - [`resources`] - The named resource cache
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. Errors are either fatal (corrupt input; the
//! current load transaction is aborted) or recoverable (a missing import, a dead export); see
//! [`Error::is_fatal`]. Recoverable problems hit while loading are additionally recorded as
//! [`package::Diagnostic`]s on the session.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use pkgscope::prelude::*;
///
/// let session = LoadSession::new(LoadConfig::default());
/// assert_eq!(session.load_depth(), 0);
/// ```
pub mod prelude;

/// Byte-level access to package files.
///
/// [`File`] owns the bytes of a package, either memory-mapped from disk or held in memory.
/// [`Parser`] reads little-endian primitives from a slice and
/// [`file::writer::Writer`] produces them.
pub mod file;

/// On-disk package structures.
///
/// - [`package::PackageHeader`] - File summary, table offsets and the chunk table
/// - [`package::NameTable`] / [`package::Name`] - Session-wide interned names
/// - [`package::ImportRecord`] / [`package::ExportRecord`] - Table records
/// - [`package::Linker`] - One opened package
/// - [`package::PackageBuilder`] - Produces package images
pub mod package;

/// Class layouts and tagged property serialization.
pub mod property;

/// Load sessions: transactions, object construction and resolution.
pub mod session;

/// Dependency gathering and referencer lookup.
pub mod dependencies;

/// Namespaced reference-counted resource cache.
pub mod resources;

/// `pkgscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `pkgscope` Error type
///
/// # Examples
///
/// ```rust
/// use pkgscope::{prelude::*, Error};
///
/// let mut session = LoadSession::new(LoadConfig::default());
/// match session.open_package_from_memory("Broken", vec![0u8; 4]) {
///     Err(error) if error.is_fatal() => println!("corrupt: {error}"),
///     Err(error) => println!("recoverable: {error}"),
///     Ok(_) => unreachable!(),
/// }
/// ```
pub use error::Error;

/// Main entry point for loading packages.
pub use session::LoadSession;

/// Session configuration.
pub use package::LoadConfig;

/// Diagnostics collected while loading.
pub use package::Diagnostics;

/// Low-level file parsing utilities.
pub use file::{parser::Parser, File};
