//! Objects materialised by a [`crate::LoadSession`].

use std::fmt;

use crate::{
    dependencies::DependencyRef,
    package::{name::Name, records::ExportState},
    property::{ClassId, PropertyBag},
};

/// Handle of an object in the session arena.
///
/// Handles are never reused within a session, so two resolves of the same record compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(pub(crate) u32);

impl ObjectRef {
    /// Position in the arena.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object#{}", self.0)
    }
}

/// What an object is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Root of a package.
    Package,
    /// A class or struct definition.
    Class(ClassId),
    /// An instance of a class.
    Instance,
}

/// A loaded object.
#[derive(Debug, Clone)]
pub struct Object {
    /// Object name.
    pub name: Name,
    /// Class whose layout `properties` follows.
    pub class: ClassId,
    /// Object representing the class, once resolved.
    pub class_object: Option<ObjectRef>,
    /// Owner.
    pub outer: Option<ObjectRef>,
    /// Template the properties started from.
    pub archetype: Option<ObjectRef>,
    /// Parent struct, for class objects.
    pub super_struct: Option<ObjectRef>,
    /// Package, class or instance.
    pub kind: ObjectKind,
    /// Record the object was created from; `None` for native objects.
    pub origin: Option<DependencyRef>,
    /// Load progress.
    pub state: ExportState,
    /// Decoded property values.
    pub properties: PropertyBag,
    /// Objects referenced by object-valued properties, in stream order.
    pub references: Vec<ObjectRef>,
}

impl Object {
    pub(crate) fn new(name: Name, class: ClassId, kind: ObjectKind) -> Self {
        Object {
            name,
            class,
            class_object: None,
            outer: None,
            archetype: None,
            super_struct: None,
            kind,
            origin: None,
            state: ExportState::Unloaded,
            properties: PropertyBag::default(),
            references: Vec::new(),
        }
    }

    /// Returns `true` for class objects.
    #[must_use]
    pub fn is_class(&self) -> bool {
        matches!(self.kind, ObjectKind::Class(_))
    }
}

/// Counters proving that every record is processed once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadStats {
    /// Packages opened.
    pub packages_opened: u32,
    /// Exports constructed.
    pub constructed: u32,
    /// Exports whose properties were decoded.
    pub properties_loaded: u32,
    /// Imports resolved (memo misses).
    pub imports_resolved: u32,
    /// Exports marked dead.
    pub dead: u32,
}
