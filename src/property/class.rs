//! Class and struct definitions.
//!
//! A [`ClassDef`] describes the field layout a tagged property stream is decoded against. Classes
//! may have a parent; the parent's fields come first in the flattened layout. Structs are
//! classes flagged `is_struct` and can be used as [`PropertyKind::Struct`] field types.

use std::collections::HashMap;

use crate::{
    package::name::{Name, NameTable, NAME_CORE},
    property::{PropertyBag, PropertyKind, PropertyValue},
    Error, Result,
};

/// Handle of a registered class or struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub(crate) u32);

impl ClassId {
    /// Raw registry position.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// One field of a class layout.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name, matched against tag names.
    pub name: Name,
    /// In-memory type.
    pub kind: PropertyKind,
    /// Number of elements of a static array, `1` for plain fields.
    pub array_dim: u32,
    /// Default value of every element.
    pub default: PropertyValue,
}

/// A registered class or struct.
#[derive(Debug, Clone)]
pub struct ClassDef {
    /// Registry handle.
    pub id: ClassId,
    /// Class name.
    pub name: Name,
    /// Package the class lives in.
    pub package: Name,
    /// Parent class, if any.
    pub parent: Option<ClassId>,
    /// `true` for struct types.
    pub is_struct: bool,
    fields: Vec<FieldDef>,
    own_field_start: usize,
    defaults: PropertyBag,
}

impl ClassDef {
    /// Flattened layout: parent fields first, then this class's own fields.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Fields declared by this class itself.
    #[must_use]
    pub fn own_fields(&self) -> &[FieldDef] {
        &self.fields[self.own_field_start..]
    }

    /// Position of a field in the flattened layout.
    #[must_use]
    pub fn field_index(&self, name: Name) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Default values of every field.
    #[must_use]
    pub fn defaults(&self) -> &PropertyBag {
        &self.defaults
    }
}

struct PendingField {
    name: String,
    kind: PropertyKind,
    array_dim: u32,
    default: Option<PropertyValue>,
}

/// Declarative description of a class, registered through [`ClassRegistry::register`].
///
/// # Examples
///
/// ```rust
/// use pkgscope::package::name::NameTable;
/// use pkgscope::property::{ClassBuilder, ClassRegistry, PropertyKind, PropertyValue};
///
/// let mut names = NameTable::new();
/// let mut classes = ClassRegistry::new();
///
/// let vector = classes.register(
///     &mut names,
///     ClassBuilder::new_struct("Vector")
///         .field("X", PropertyKind::Float)
///         .field("Y", PropertyKind::Float),
/// )?;
/// let widget = classes.register(
///     &mut names,
///     ClassBuilder::new("Widget")
///         .field_with_default("Health", PropertyKind::Int, PropertyValue::Int(100))
///         .field("Location", PropertyKind::Struct(vector))
///         .static_array("Slots", PropertyKind::Byte, 4),
/// )?;
///
/// assert_eq!(classes.class(widget)?.fields().len(), 3);
/// # Ok::<(), pkgscope::Error>(())
/// ```
pub struct ClassBuilder {
    name: String,
    package: Option<String>,
    parent: Option<ClassId>,
    is_struct: bool,
    fields: Vec<PendingField>,
}

impl ClassBuilder {
    /// Starts a class definition.
    #[must_use]
    pub fn new(name: &str) -> Self {
        ClassBuilder {
            name: name.to_string(),
            package: None,
            parent: None,
            is_struct: false,
            fields: Vec::new(),
        }
    }

    /// Starts a struct definition.
    #[must_use]
    pub fn new_struct(name: &str) -> Self {
        ClassBuilder {
            is_struct: true,
            ..Self::new(name)
        }
    }

    /// Sets the owning package (default `Core`).
    #[must_use]
    pub fn package(mut self, package: &str) -> Self {
        self.package = Some(package.to_string());
        self
    }

    /// Sets the parent class.
    #[must_use]
    pub fn parent(mut self, parent: ClassId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Adds a field whose default is the zero value of its kind.
    #[must_use]
    pub fn field(mut self, name: &str, kind: PropertyKind) -> Self {
        self.fields.push(PendingField {
            name: name.to_string(),
            kind,
            array_dim: 1,
            default: None,
        });
        self
    }

    /// Adds a field with an explicit default.
    #[must_use]
    pub fn field_with_default(mut self, name: &str, kind: PropertyKind, default: PropertyValue) -> Self {
        self.fields.push(PendingField {
            name: name.to_string(),
            kind,
            array_dim: 1,
            default: Some(default),
        });
        self
    }

    /// Adds a static array field of `dim` elements.
    #[must_use]
    pub fn static_array(mut self, name: &str, kind: PropertyKind, dim: u32) -> Self {
        self.fields.push(PendingField {
            name: name.to_string(),
            kind,
            array_dim: dim,
            default: None,
        });
        self
    }
}

/// All classes and structs known to a session.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: Vec<ClassDef>,
    by_name: HashMap<Name, ClassId>,
}

impl ClassRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a definition.
    ///
    /// # Errors
    /// Returns [`crate::Error::ClassRegistration`] for duplicate class or field names, unknown
    /// parents or struct types, nested arrays, static arrays of dynamic arrays, zero-sized
    /// static arrays, and defaults that do not fit their field.
    pub fn register(&mut self, names: &mut NameTable, builder: ClassBuilder) -> Result<ClassId> {
        let name = names.name(&builder.name);
        if self.by_name.contains_key(&name) {
            return Err(Error::ClassRegistration(format!(
                "{} is already registered",
                builder.name
            )));
        }

        let package = builder
            .package
            .as_deref()
            .map_or(Name::plain(NAME_CORE), |p| names.name(p));

        let (mut fields, mut slots) = match builder.parent {
            Some(parent) => {
                let parent_def = self.class(parent)?;
                if parent_def.is_struct != builder.is_struct {
                    return Err(Error::ClassRegistration(format!(
                        "{} cannot inherit across class and struct",
                        builder.name
                    )));
                }
                let slots: Vec<Vec<PropertyValue>> =
                    parent_def.defaults.iter().map(|(_, s)| s.to_vec()).collect();
                (parent_def.fields.clone(), slots)
            }
            None => (Vec::new(), Vec::new()),
        };
        let own_field_start = fields.len();

        for pending in builder.fields {
            let field_name = names.name(&pending.name);
            if fields.iter().any(|f: &FieldDef| f.name == field_name) {
                return Err(Error::ClassRegistration(format!(
                    "{}.{} is declared twice",
                    builder.name, pending.name
                )));
            }

            self.check_kind(&builder.name, &pending)?;

            let default = match pending.default {
                Some(value) => value,
                None => self.zero_value(&pending.kind)?,
            };
            if !default.fits(&pending.kind) {
                return Err(Error::ClassRegistration(format!(
                    "Default of {}.{} does not match its type",
                    builder.name, pending.name
                )));
            }

            slots.push(vec![default.clone(); pending.array_dim as usize]);
            fields.push(FieldDef {
                name: field_name,
                kind: pending.kind,
                array_dim: pending.array_dim,
                default,
            });
        }

        let id = ClassId(self.classes.len() as u32);
        self.classes.push(ClassDef {
            id,
            name,
            package,
            parent: builder.parent,
            is_struct: builder.is_struct,
            fields,
            own_field_start,
            defaults: PropertyBag::from_slots(slots),
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Registers a fieldless class, or returns the existing one of that name.
    pub(crate) fn register_intrinsic(&mut self, name: Name, package: Name) -> ClassId {
        if let Some(id) = self.by_name.get(&name) {
            return *id;
        }

        let id = ClassId(self.classes.len() as u32);
        self.classes.push(ClassDef {
            id,
            name,
            package,
            parent: None,
            is_struct: false,
            fields: Vec::new(),
            own_field_start: 0,
            defaults: PropertyBag::default(),
        });
        self.by_name.insert(name, id);
        id
    }

    fn check_kind(&self, class: &str, field: &PendingField) -> Result<()> {
        if field.array_dim == 0 {
            return Err(Error::ClassRegistration(format!(
                "{}.{} has a zero-sized static array",
                class, field.name
            )));
        }

        match &field.kind {
            PropertyKind::Array(inner) => {
                if field.array_dim != 1 {
                    return Err(Error::ClassRegistration(format!(
                        "{}.{} is a static array of dynamic arrays",
                        class, field.name
                    )));
                }
                if matches!(**inner, PropertyKind::Array(_)) {
                    return Err(Error::ClassRegistration(format!(
                        "{}.{} nests dynamic arrays",
                        class, field.name
                    )));
                }
                self.check_struct_kind(class, &field.name, inner)
            }
            kind => self.check_struct_kind(class, &field.name, kind),
        }
    }

    fn check_struct_kind(&self, class: &str, field: &str, kind: &PropertyKind) -> Result<()> {
        if let PropertyKind::Struct(id) = kind {
            match self.get(*id) {
                Some(def) if def.is_struct => {}
                _ => {
                    return Err(Error::ClassRegistration(format!(
                        "{}.{} refers to an unknown struct type",
                        class, field
                    )))
                }
            }
        }
        Ok(())
    }

    /// The zero value of a kind; struct kinds yield the struct's defaults.
    ///
    /// # Errors
    /// Returns [`crate::Error::ClassNotFound`] if a struct kind refers to an unknown id.
    pub fn zero_value(&self, kind: &PropertyKind) -> Result<PropertyValue> {
        Ok(match kind {
            PropertyKind::Bool => PropertyValue::Bool(false),
            PropertyKind::Byte => PropertyValue::Byte(0),
            PropertyKind::Int16 => PropertyValue::Int16(0),
            PropertyKind::Int => PropertyValue::Int(0),
            PropertyKind::Int64 => PropertyValue::Int64(0),
            PropertyKind::Float => PropertyValue::Float(0.0),
            PropertyKind::Double => PropertyValue::Double(0.0),
            PropertyKind::Str => PropertyValue::Str(String::new()),
            PropertyKind::Name => PropertyValue::Name(Name::NONE),
            PropertyKind::Object => PropertyValue::Object(crate::package::index::PackageIndex::Root),
            PropertyKind::Struct(id) => PropertyValue::Struct(self.class(*id)?.defaults.clone()),
            PropertyKind::Array(_) => PropertyValue::Array(Vec::new()),
        })
    }

    /// Looks up a class by name (case-insensitive through the name table).
    #[must_use]
    pub fn find(&self, name: Name) -> Option<ClassId> {
        self.by_name.get(&name).copied()
    }

    /// Returns a definition.
    #[must_use]
    pub fn get(&self, id: ClassId) -> Option<&ClassDef> {
        self.classes.get(id.0 as usize)
    }

    /// Returns a definition or [`crate::Error::ClassNotFound`].
    ///
    /// # Errors
    /// Returns [`crate::Error::ClassNotFound`] for unknown ids.
    pub fn class(&self, id: ClassId) -> Result<&ClassDef> {
        self.get(id)
            .ok_or_else(|| Error::ClassNotFound(format!("class id {}", id.0)))
    }

    /// Default values of a class.
    ///
    /// # Errors
    /// Returns [`crate::Error::ClassNotFound`] for unknown ids.
    pub fn defaults(&self, id: ClassId) -> Result<&PropertyBag> {
        Ok(&self.class(id)?.defaults)
    }

    /// Returns `true` if `class` is `ancestor` or derives from it.
    #[must_use]
    pub fn is_child_of(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.get(id).and_then(|c| c.parent);
        }
        false
    }

    /// Number of registered definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Iterates over all definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.iter()
    }
}
