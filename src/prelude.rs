//! # pkgscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the pkgscope library. Import this module to get quick access to the essential
//! types for loading, inspecting and writing packages.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all pkgscope operations
pub use crate::Error;

/// The result type used throughout pkgscope
pub use crate::Result;

/// Low-level file parsing utilities
pub use crate::{File, Parser};

// ================================================================================================
// Sessions and Objects
// ================================================================================================

/// Main entry point and the objects it produces
pub use crate::session::{LoadSession, LoadStats, Object, ObjectKind, ObjectRef};

/// Session configuration
pub use crate::package::{CompressionPolicy, LoadConfig};

/// Diagnostics collected while loading
pub use crate::package::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics};

// ================================================================================================
// Package Structures
// ================================================================================================

/// Names and record indices
pub use crate::package::{Name, NameTable, PackageIndex};

/// Opened packages and their records
pub use crate::package::{
    ExportFlags, ExportRecord, ExportState, ImportRecord, Linker, LinkerId, ObjectFlags,
    PackageFlags, PackageHeader,
};

/// Producing package images
pub use crate::package::PackageBuilder;

// ================================================================================================
// Properties
// ================================================================================================

/// Class layouts
pub use crate::property::{ClassBuilder, ClassDef, ClassId, ClassRegistry, FieldDef};

/// Property values
pub use crate::property::{PropertyBag, PropertyKind, PropertyType, PropertyValue};

/// Tagged stream codec
pub use crate::property::TaggedCodec;

// ================================================================================================
// Dependencies and Resources
// ================================================================================================

/// Dependency analysis
pub use crate::dependencies::{DependencyOptions, DependencyRef};

/// Named resource cache
pub use crate::resources::{NamedResourceCache, ResourcePayload, ResourceProvider};
