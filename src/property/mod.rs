//! Tagged property serialization.
//!
//! Object data is stored as a stream of self-describing tags: every field that differs from its
//! default is written as `(name, type, size, array index)` followed by exactly `size` value
//! bytes, and the stream ends with a tag named `None`. Because every value is sized, a reader
//! can skip fields it does not know, which is what lets on-disk data survive class changes.
//!
//! # Architecture
//!
//! - [`PropertyType`] - The fixed set of on-disk type tags
//! - [`PropertyKind`] - The in-memory type of a field, a closed enum matched exhaustively by
//!   the codec
//! - [`PropertyValue`] / [`PropertyBag`] - Decoded values of one object
//! - [`class`] - Class and struct definitions with flattened field layouts
//! - [`tag`] - The tag header
//! - [`codec`] - Encoding, schema-tolerant decoding and the reference pre-scan
//!
//! # Schema drift
//!
//! | Situation | Result |
//! |---|---|
//! | Field renamed or removed | Tag skipped, warning recorded |
//! | Field added | Keeps its default |
//! | Fields reordered | Found by the forward/wrap-around search |
//! | Narrow number stored, wider field now | Widened losslessly |
//! | Any other type change | Tag skipped, warning recorded |
//! | Struct renamed | Tag skipped, warning recorded |

pub mod class;
pub mod codec;
pub mod tag;

use strum::{EnumCount, EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::package::{
    index::PackageIndex,
    name::{Name, NameId},
};

pub use class::{ClassBuilder, ClassDef, ClassId, ClassRegistry, FieldDef};
pub use codec::TaggedCodec;
pub use tag::PropertyTag;

/// On-disk property type tags.
///
/// The display names are pre-interned in every [`crate::package::name::NameTable`] right after
/// `None`, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount, IntoStaticStr)]
pub enum PropertyType {
    /// `BoolProperty`, value stored in the tag.
    #[strum(to_string = "BoolProperty")]
    Bool,
    /// `ByteProperty`, `u8`.
    #[strum(to_string = "ByteProperty")]
    Byte,
    /// `Int16Property`, `i16`.
    #[strum(to_string = "Int16Property")]
    Int16,
    /// `IntProperty`, `i32`.
    #[strum(to_string = "IntProperty")]
    Int,
    /// `Int64Property`, `i64`.
    #[strum(to_string = "Int64Property")]
    Int64,
    /// `FloatProperty`, `f32`.
    #[strum(to_string = "FloatProperty")]
    Float,
    /// `DoubleProperty`, `f64`.
    #[strum(to_string = "DoubleProperty")]
    Double,
    /// `StrProperty`, length-prefixed UTF-8.
    #[strum(to_string = "StrProperty")]
    Str,
    /// `NameProperty`, a name reference.
    #[strum(to_string = "NameProperty")]
    Name,
    /// `ObjectProperty`, a raw package index.
    #[strum(to_string = "ObjectProperty")]
    Object,
    /// `StructProperty`, a nested tag stream.
    #[strum(to_string = "StructProperty")]
    Struct,
    /// `ArrayProperty`, `u32` count followed by the elements.
    #[strum(to_string = "ArrayProperty")]
    Array,
}

impl PropertyType {
    /// The on-disk tag name, e.g. `IntProperty`.
    #[must_use]
    pub fn type_name(self) -> &'static str {
        self.into()
    }

    /// The pre-interned id of [`PropertyType::type_name`].
    #[must_use]
    pub fn name_id(self) -> NameId {
        NameId(1 + self as u32)
    }

    /// Maps a tag type name back onto a property type.
    #[must_use]
    pub fn from_name(name: Name) -> Option<Self> {
        if name.number != 0 || name.id.0 == 0 || name.id.0 as usize > Self::COUNT {
            return None;
        }
        Self::iter().nth(name.id.0 as usize - 1)
    }
}

/// The in-memory type of a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// `bool`
    Bool,
    /// `u8`
    Byte,
    /// `i16`
    Int16,
    /// `i32`
    Int,
    /// `i64`
    Int64,
    /// `f32`
    Float,
    /// `f64`
    Double,
    /// `String`
    Str,
    /// [`Name`]
    Name,
    /// Reference to another object, as a [`PackageIndex`] of the owning package.
    Object,
    /// Nested struct of the given registered struct type.
    Struct(ClassId),
    /// Dynamic array of the inner kind.
    Array(Box<PropertyKind>),
}

impl PropertyKind {
    /// The on-disk tag type for this kind.
    #[must_use]
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyKind::Bool => PropertyType::Bool,
            PropertyKind::Byte => PropertyType::Byte,
            PropertyKind::Int16 => PropertyType::Int16,
            PropertyKind::Int => PropertyType::Int,
            PropertyKind::Int64 => PropertyType::Int64,
            PropertyKind::Float => PropertyType::Float,
            PropertyKind::Double => PropertyType::Double,
            PropertyKind::Str => PropertyType::Str,
            PropertyKind::Name => PropertyType::Name,
            PropertyKind::Object => PropertyType::Object,
            PropertyKind::Struct(_) => PropertyType::Struct,
            PropertyKind::Array(_) => PropertyType::Array,
        }
    }
}

/// A decoded property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// `BoolProperty`
    Bool(bool),
    /// `ByteProperty`
    Byte(u8),
    /// `Int16Property`
    Int16(i16),
    /// `IntProperty`
    Int(i32),
    /// `Int64Property`
    Int64(i64),
    /// `FloatProperty`
    Float(f32),
    /// `DoubleProperty`
    Double(f64),
    /// `StrProperty`
    Str(String),
    /// `NameProperty`
    Name(Name),
    /// `ObjectProperty`; `Root` is the null reference.
    Object(PackageIndex),
    /// `StructProperty`
    Struct(PropertyBag),
    /// `ArrayProperty`
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    /// The on-disk tag type of this value.
    #[must_use]
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::Bool(_) => PropertyType::Bool,
            PropertyValue::Byte(_) => PropertyType::Byte,
            PropertyValue::Int16(_) => PropertyType::Int16,
            PropertyValue::Int(_) => PropertyType::Int,
            PropertyValue::Int64(_) => PropertyType::Int64,
            PropertyValue::Float(_) => PropertyType::Float,
            PropertyValue::Double(_) => PropertyType::Double,
            PropertyValue::Str(_) => PropertyType::Str,
            PropertyValue::Name(_) => PropertyType::Name,
            PropertyValue::Object(_) => PropertyType::Object,
            PropertyValue::Struct(_) => PropertyType::Struct,
            PropertyValue::Array(_) => PropertyType::Array,
        }
    }

    /// Returns `true` if the value can be stored in a field of `kind`.
    ///
    /// Struct values are only checked shallowly; array values element by element.
    #[must_use]
    pub fn fits(&self, kind: &PropertyKind) -> bool {
        match (self, kind) {
            (PropertyValue::Array(items), PropertyKind::Array(inner)) => {
                items.iter().all(|item| item.fits(inner))
            }
            _ => self.property_type() == kind.property_type(),
        }
    }

    /// Converts `self` into `target` if that is a lossless widening (or no change).
    ///
    /// Accepted widenings: `Byte` to `Int16`, `Int` or `Int64`; `Int16` to `Int` or `Int64`;
    /// `Int` to `Int64` or `Double`; `Float` to `Double`.
    #[must_use]
    pub fn widen(self, target: &PropertyKind) -> Option<PropertyValue> {
        match (self, target) {
            (PropertyValue::Byte(v), PropertyKind::Int16) => Some(PropertyValue::Int16(i16::from(v))),
            (PropertyValue::Byte(v), PropertyKind::Int) => Some(PropertyValue::Int(i32::from(v))),
            (PropertyValue::Byte(v), PropertyKind::Int64) => Some(PropertyValue::Int64(i64::from(v))),
            (PropertyValue::Int16(v), PropertyKind::Int) => Some(PropertyValue::Int(i32::from(v))),
            (PropertyValue::Int16(v), PropertyKind::Int64) => Some(PropertyValue::Int64(i64::from(v))),
            (PropertyValue::Int(v), PropertyKind::Int64) => Some(PropertyValue::Int64(i64::from(v))),
            (PropertyValue::Int(v), PropertyKind::Double) => Some(PropertyValue::Double(f64::from(v))),
            (PropertyValue::Float(v), PropertyKind::Double) => Some(PropertyValue::Double(f64::from(v))),
            (value, target) if value.fits(target) => Some(value),
            _ => None,
        }
    }

    /// Collects every object reference in the value, including nested ones. `Root` is skipped.
    pub fn collect_references(&self, out: &mut Vec<PackageIndex>) {
        match self {
            PropertyValue::Object(index) if !index.is_root() => out.push(*index),
            PropertyValue::Struct(bag) => bag.collect_references(out),
            PropertyValue::Array(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            _ => {}
        }
    }
}

/// Values of one object or struct, indexed by flattened field position and array element.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyBag {
    slots: Vec<Vec<PropertyValue>>,
}

impl PropertyBag {
    /// Creates a bag from per-field element lists.
    #[must_use]
    pub fn from_slots(slots: Vec<Vec<PropertyValue>>) -> Self {
        PropertyBag { slots }
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the bag has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All elements of a field.
    #[must_use]
    pub fn field(&self, field: usize) -> Option<&[PropertyValue]> {
        self.slots.get(field).map(Vec::as_slice)
    }

    /// One element of a field.
    #[must_use]
    pub fn get(&self, field: usize, array_index: usize) -> Option<&PropertyValue> {
        self.slots.get(field).and_then(|slot| slot.get(array_index))
    }

    /// Replaces one element; returns `false` if the position does not exist.
    pub fn set(&mut self, field: usize, array_index: usize, value: PropertyValue) -> bool {
        match self.slots.get_mut(field).and_then(|slot| slot.get_mut(array_index)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Iterates over `(field, elements)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[PropertyValue])> {
        self.slots.iter().enumerate().map(|(i, s)| (i, s.as_slice()))
    }

    /// Collects every non-null object reference held by the bag.
    pub fn collect_references(&self, out: &mut Vec<PackageIndex>) {
        for slot in &self.slots {
            for value in slot {
                value.collect_references(out);
            }
        }
    }
}
