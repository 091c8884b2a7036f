//! Import and export records.
//!
//! Imports are symbolic references to objects defined in other packages, exports are the
//! objects this package defines. Both tables are arenas addressed by
//! [`crate::package::index::PackageIndex`]; the only pointer-like state in a record is the
//! lazily filled `resolved` handle into the session's object arena.

use bitflags::bitflags;
use uguid::Guid;

use crate::{
    file::{parser::Parser, writer::Writer},
    package::{
        index::PackageIndex,
        name::{Name, NameMap, NameMapBuilder},
    },
    session::ObjectRef,
    Result,
};

bitflags! {
    /// Per-object flags stored with every export.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlags: u64 {
        /// Participates in undo transactions.
        const TRANSACTIONAL = 0x0000_0000_0000_0001;
        /// Visible outside the package.
        const PUBLIC = 0x0000_0000_0000_0004;
        /// Kept alive even when unreferenced.
        const STANDALONE = 0x0000_0000_0008_0000;
        /// Defined natively.
        const NATIVE = 0x0000_0000_0400_0000;
        /// Serves as an archetype for other objects.
        const ARCHETYPE_OBJECT = 0x0000_0004_0000_0000;
        /// Class default object.
        const CLASS_DEFAULT_OBJECT = 0x0000_0200_0000_0000;
        /// Never saved.
        const TRANSIENT = 0x0000_4000_0000_0000;
        /// Loaded on clients.
        const LOAD_FOR_CLIENT = 0x0001_0000_0000_0000;
        /// Loaded on servers.
        const LOAD_FOR_SERVER = 0x0002_0000_0000_0000;
        /// Loaded in editors.
        const LOAD_FOR_EDIT = 0x0004_0000_0000_0000;
    }
}

bitflags! {
    /// Flags describing how an export entered the table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExportFlags: u32 {
        /// The object belongs to another package but was copied in.
        const FORCED_EXPORT = 0x0000_0001;
        /// Added by a script patcher.
        const SCRIPT_PATCHER_EXPORT = 0x0000_0002;
        /// Member fields still need patching.
        const MEMBER_FIELD_PATCH_PENDING = 0x0000_0004;
    }
}

/// Load progress of one export within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportState {
    /// Not touched yet.
    #[default]
    Unloaded,
    /// Slot allocated, dependencies being resolved. Re-entrant resolves get the slot.
    Constructing,
    /// Object exists; properties are queued for loading.
    Constructed,
    /// Properties decoded.
    PropertiesLoaded,
    /// The class could not be resolved; the export is unusable for this session.
    Dead,
}

/// An external reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    /// Package that defines the class of the imported object.
    pub class_package: Name,
    /// Class of the imported object.
    pub class_name: Name,
    /// Owner of the import; the outermost import names the package itself.
    pub outer: PackageIndex,
    /// Name of the imported object.
    pub object_name: Name,
    /// Session-local memo, cleared by `LoadSession::reset_loaders`.
    pub resolved: Option<ObjectRef>,
}

impl ImportRecord {
    /// Creates an unresolved import.
    #[must_use]
    pub fn new(class_package: Name, class_name: Name, outer: PackageIndex, object_name: Name) -> Self {
        ImportRecord {
            class_package,
            class_name,
            outer,
            object_name,
            resolved: None,
        }
    }

    /// Reads one record.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated data and
    /// [`crate::Error::Malformed`] for invalid name indices.
    pub fn read(parser: &mut Parser, names: &NameMap) -> Result<Self> {
        let class_package = names.read_name(parser)?;
        let class_name = names.read_name(parser)?;
        let outer = PackageIndex::read(parser)?;
        let object_name = names.read_name(parser)?;

        Ok(ImportRecord::new(class_package, class_name, outer, object_name))
    }

    /// Writes one record.
    pub fn write(&self, writer: &mut Writer, names: &mut NameMapBuilder) {
        names.write_name(writer, self.class_package);
        names.write_name(writer, self.class_name);
        self.outer.write(writer);
        names.write_name(writer, self.object_name);
    }
}

/// An object defined by the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    /// Class of the object; `Root` marks the export as a class itself.
    pub class: PackageIndex,
    /// Parent struct for class exports.
    pub super_index: PackageIndex,
    /// Owner of the object.
    pub outer: PackageIndex,
    /// Name of the object.
    pub object_name: Name,
    /// Template the object's properties start from.
    pub archetype: PackageIndex,
    /// Object flags.
    pub object_flags: ObjectFlags,
    /// Size of the tagged property stream.
    pub serial_size: u64,
    /// Logical offset of the tagged property stream.
    pub serial_offset: u64,
    /// Export flags.
    pub export_flags: ExportFlags,
    /// Net object counts per generation.
    pub generation_net_object_counts: Vec<u32>,
    /// Object GUID.
    pub guid: Guid,
    /// Session load progress.
    pub state: ExportState,
    /// Session-local object handle.
    pub resolved: Option<ObjectRef>,
}

impl Default for ExportRecord {
    fn default() -> Self {
        ExportRecord {
            class: PackageIndex::Root,
            super_index: PackageIndex::Root,
            outer: PackageIndex::Root,
            object_name: Name::NONE,
            archetype: PackageIndex::Root,
            object_flags: ObjectFlags::empty(),
            serial_size: 0,
            serial_offset: 0,
            export_flags: ExportFlags::empty(),
            generation_net_object_counts: Vec::new(),
            guid: Guid::ZERO,
            state: ExportState::Unloaded,
            resolved: None,
        }
    }
}

impl ExportRecord {
    /// Reads one record.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated data and
    /// [`crate::Error::Malformed`] for invalid name indices.
    pub fn read(parser: &mut Parser, names: &NameMap) -> Result<Self> {
        let class = PackageIndex::read(parser)?;
        let super_index = PackageIndex::read(parser)?;
        let outer = PackageIndex::read(parser)?;
        let object_name = names.read_name(parser)?;
        let archetype = PackageIndex::read(parser)?;
        let object_flags = ObjectFlags::from_bits_retain(parser.read_le::<u64>()?);
        let serial_size = parser.read_le::<u64>()?;
        let serial_offset = parser.read_le::<u64>()?;
        let export_flags = ExportFlags::from_bits_retain(parser.read_le::<u32>()?);

        let count = parser.read_count(4)?;
        let mut generation_net_object_counts = Vec::with_capacity(count);
        for _ in 0..count {
            generation_net_object_counts.push(parser.read_le::<u32>()?);
        }

        let guid = parser.read_guid()?;

        Ok(ExportRecord {
            class,
            super_index,
            outer,
            object_name,
            archetype,
            object_flags,
            serial_size,
            serial_offset,
            export_flags,
            generation_net_object_counts,
            guid,
            state: ExportState::Unloaded,
            resolved: None,
        })
    }

    /// Writes one record.
    pub fn write(&self, writer: &mut Writer, names: &mut NameMapBuilder) {
        self.class.write(writer);
        self.super_index.write(writer);
        self.outer.write(writer);
        names.write_name(writer, self.object_name);
        self.archetype.write(writer);
        writer.write_le(self.object_flags.bits());
        writer.write_le(self.serial_size);
        writer.write_le(self.serial_offset);
        writer.write_le(self.export_flags.bits());
        writer.write_le(self.generation_net_object_counts.len() as u32);
        for count in &self.generation_net_object_counts {
            writer.write_le(*count);
        }
        writer.write_guid(&self.guid);
    }

    /// Returns `true` if the export defines a class.
    #[must_use]
    pub fn is_class(&self) -> bool {
        self.class.is_root()
    }
}
