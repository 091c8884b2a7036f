//! Encoding and schema-tolerant decoding of tagged property streams.
//!
//! # Decoding
//!
//! [`TaggedCodec::deserialize`] keeps a cursor into the flattened field list of the target
//! class and advances it in lockstep with the tag stream. When a tag does not match the
//! field under the cursor, the field list is searched from the cursor to the end and then
//! from the start up to the cursor. Tags that match no field, carry an incompatible type or
//! name a different struct are skipped by their recorded size and reported as warnings.
//! Every value is decoded from its own `size`-byte window, so the stream stays aligned
//! whatever happens inside a value.
//!
//! # Examples
//!
//! ```rust
//! use pkgscope::file::{parser::Parser, writer::Writer};
//! use pkgscope::package::header::FILE_VERSION_CURRENT;
//! use pkgscope::package::name::{NameMap, NameMapBuilder, NameTable};
//! use pkgscope::property::{ClassBuilder, ClassRegistry, PropertyKind, PropertyValue, TaggedCodec};
//!
//! let mut names = NameTable::new();
//! let mut classes = ClassRegistry::new();
//! let widget = classes.register(&mut names, ClassBuilder::new("Widget").field("Health", PropertyKind::Int))?;
//!
//! let mut values = classes.defaults(widget)?.clone();
//! values.set(0, 0, PropertyValue::Int(75));
//!
//! let codec = TaggedCodec::new(&classes, &names);
//! let mut map = NameMapBuilder::new(FILE_VERSION_CURRENT);
//! let mut stream = Writer::new();
//! codec.serialize(&mut stream, &mut map, widget, &values, classes.defaults(widget)?)?;
//!
//! let mut table = Writer::new();
//! map.write_table(&mut table, &names)?;
//! let table = table.into_inner();
//! let mut reader_names = names.clone();
//! let map = NameMap::read(&mut Parser::new(&table), map.len() as u32, FILE_VERSION_CURRENT, &mut reader_names)?;
//!
//! let codec = TaggedCodec::new(&classes, &reader_names);
//! let mut decoded = classes.defaults(widget)?.clone();
//! let stream = stream.into_inner();
//! codec.deserialize(&mut Parser::new(&stream), &map, widget, &mut decoded)?;
//! assert_eq!(decoded, values);
//! # Ok::<(), pkgscope::Error>(())
//! ```

use crate::{
    file::{parser::Parser, writer::Writer},
    package::{
        diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics},
        index::PackageIndex,
        name::{Name, NameMap, NameMapBuilder, NameTable},
    },
    property::{
        class::{ClassId, ClassRegistry, FieldDef},
        tag::PropertyTag,
        PropertyBag, PropertyKind, PropertyType, PropertyValue,
    },
    Error, Result,
};

/// Maximum struct nesting accepted from untrusted streams.
const MAX_NESTING: usize = 64;

enum Decoded {
    Value(PropertyValue),
    Mismatch(String),
}

/// Encoder/decoder for tagged property streams.
pub struct TaggedCodec<'a> {
    classes: &'a ClassRegistry,
    names: &'a NameTable,
    diagnostics: Option<&'a Diagnostics>,
    strict: bool,
    package: Option<&'a str>,
    export: Option<u32>,
}

impl<'a> TaggedCodec<'a> {
    /// Creates a codec for the given classes. `names` is used for messages only.
    #[must_use]
    pub fn new(classes: &'a ClassRegistry, names: &'a NameTable) -> Self {
        TaggedCodec {
            classes,
            names,
            diagnostics: None,
            strict: false,
            package: None,
            export: None,
        }
    }

    /// Records skipped tags into `diagnostics`.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: &'a Diagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// In strict mode a skipped tag fails the decode instead of producing a warning.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Attaches package/export context to recorded diagnostics.
    #[must_use]
    pub fn with_context(mut self, package: &'a str, export: u32) -> Self {
        self.package = Some(package);
        self.export = Some(export);
        self
    }

    /// Writes every value of `values` that differs from `defaults`, then the terminator.
    ///
    /// Structs become nested tag streams diffed against the struct defaults; dynamic arrays are
    /// written whole as one tag.
    ///
    /// # Errors
    /// Returns [`crate::Error::ClassNotFound`] for unknown classes and [`crate::Error::Error`]
    /// for values that do not fit their field.
    pub fn serialize(
        &self,
        writer: &mut Writer,
        map: &mut NameMapBuilder,
        class: ClassId,
        values: &PropertyBag,
        defaults: &PropertyBag,
    ) -> Result<()> {
        let def = self.classes.class(class)?;

        for (index, field) in def.fields().iter().enumerate() {
            let Some(current) = values.field(index) else {
                continue;
            };

            for (element, value) in current.iter().enumerate() {
                if defaults.get(index, element) == Some(value) {
                    continue;
                }

                if !value.fits(&field.kind) {
                    return Err(Error::Error(format!(
                        "Value of {} does not match its {} type",
                        self.names.display(field.name),
                        field.kind.property_type().type_name()
                    )));
                }

                self.write_property(writer, map, field, element as u32, value)?;
            }
        }

        PropertyTag::TERMINATOR.write(writer, map);
        Ok(())
    }

    fn write_property(
        &self,
        writer: &mut Writer,
        map: &mut NameMapBuilder,
        field: &FieldDef,
        array_index: u32,
        value: &PropertyValue,
    ) -> Result<()> {
        let mut body = Writer::new();
        let mut tag = PropertyTag::new(field.name, field.kind.property_type(), array_index, 0);

        match (value, &field.kind) {
            (PropertyValue::Bool(flag), _) => tag.bool_value = *flag,
            (PropertyValue::Struct(bag), PropertyKind::Struct(id)) => {
                let def = self.classes.class(*id)?;
                tag.item_type = def.name;
                self.serialize(&mut body, map, *id, bag, def.defaults())?;
            }
            (PropertyValue::Array(items), PropertyKind::Array(inner)) => {
                tag.item_type = Name::plain(inner.property_type().name_id());
                body.write_count(items.len(), "array items")?;
                for item in items {
                    self.write_element(&mut body, map, inner, item)?;
                }
            }
            (value, _) => Self::write_scalar(&mut body, map, value)?,
        }

        tag.size = u32::try_from(body.pos())
            .map_err(|_| Error::Error(format!("Property value of {} bytes is too large", body.pos())))?;
        tag.write(writer, map);
        writer.write_bytes(body.data());
        Ok(())
    }

    fn write_element(
        &self,
        body: &mut Writer,
        map: &mut NameMapBuilder,
        kind: &PropertyKind,
        item: &PropertyValue,
    ) -> Result<()> {
        match (item, kind) {
            (PropertyValue::Bool(flag), _) => body.write_le(u8::from(*flag)),
            (PropertyValue::Struct(bag), PropertyKind::Struct(id)) => {
                self.serialize(body, map, *id, bag, self.classes.defaults(*id)?)?;
            }
            (item, _) => Self::write_scalar(body, map, item)?,
        }
        Ok(())
    }

    fn write_scalar(body: &mut Writer, map: &mut NameMapBuilder, value: &PropertyValue) -> Result<()> {
        match value {
            PropertyValue::Byte(v) => body.write_le(*v),
            PropertyValue::Int16(v) => body.write_le(*v),
            PropertyValue::Int(v) => body.write_le(*v),
            PropertyValue::Int64(v) => body.write_le(*v),
            PropertyValue::Float(v) => body.write_le(*v),
            PropertyValue::Double(v) => body.write_le(*v),
            PropertyValue::Str(v) => body.write_prefixed_string_utf8(v)?,
            PropertyValue::Name(v) => map.write_name(body, *v),
            PropertyValue::Object(v) => v.write(body),
            PropertyValue::Bool(_) | PropertyValue::Struct(_) | PropertyValue::Array(_) => {
                return Err(Error::Error(format!(
                    "{} is not a scalar value",
                    value.property_type().type_name()
                )))
            }
        }
        Ok(())
    }

    /// Decodes a tag stream into `bag`, which should hold the starting values (class defaults
    /// or archetype values) for `class`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] or [`crate::Error::Malformed`] if the stream
    /// itself is corrupt, and [`crate::Error::Error`] for skipped tags in strict mode.
    pub fn deserialize(
        &self,
        parser: &mut Parser,
        map: &NameMap,
        class: ClassId,
        bag: &mut PropertyBag,
    ) -> Result<()> {
        let def = self.classes.class(class)?;
        let fields = def.fields();
        let mut cursor = 0usize;

        loop {
            let tag_offset = parser.pos();
            let tag = PropertyTag::read(parser, map)?;
            if tag.is_terminator() {
                return Ok(());
            }

            let window = parser.read_bytes(tag.size as usize)?;

            let Some(index) = find_field(fields, cursor, tag.name) else {
                self.skip(&tag, tag_offset, "no such field")?;
                continue;
            };
            let field = &fields[index];

            if tag.array_index >= field.array_dim {
                self.skip(
                    &tag,
                    tag_offset,
                    &format!("array index out of range ({} elements)", field.array_dim),
                )?;
                continue;
            }

            let mut sub = Parser::new(window);
            let decoded = match self.read_value(&mut sub, map, &tag, &field.kind) {
                Ok(decoded) => decoded,
                Err(Error::OutOfBounds { .. }) => {
                    Decoded::Mismatch("value overruns its recorded size".to_string())
                }
                Err(error) => return Err(error),
            };

            match decoded {
                Decoded::Value(value) => {
                    if !bag.set(index, tag.array_index as usize, value) {
                        self.skip(&tag, tag_offset, "target has no slot for this field")?;
                    } else if sub.has_more_data() {
                        self.report(
                            DiagnosticSeverity::Warning,
                            &tag,
                            tag_offset,
                            &format!("{} trailing bytes ignored", sub.remaining()),
                        );
                    }
                }
                Decoded::Mismatch(reason) => self.skip(&tag, tag_offset, &reason)?,
            }

            cursor = if tag.array_index + 1 >= field.array_dim {
                index + 1
            } else {
                index
            };
        }
    }

    fn read_value(
        &self,
        sub: &mut Parser,
        map: &NameMap,
        tag: &PropertyTag,
        kind: &PropertyKind,
    ) -> Result<Decoded> {
        let Some(disk) = tag.property_type() else {
            return Ok(Decoded::Mismatch(format!(
                "unknown type {}",
                self.names.display(tag.type_name)
            )));
        };

        match (disk, kind) {
            (PropertyType::Bool, PropertyKind::Bool) => {
                Ok(Decoded::Value(PropertyValue::Bool(tag.bool_value)))
            }
            (PropertyType::Struct, PropertyKind::Struct(id)) => {
                let def = self.classes.class(*id)?;
                if tag.item_type != def.name {
                    return Ok(Decoded::Mismatch(format!(
                        "struct {} stored, {} expected",
                        self.names.display(tag.item_type),
                        self.names.display(def.name)
                    )));
                }
                let mut nested = def.defaults().clone();
                self.deserialize(sub, map, *id, &mut nested)?;
                Ok(Decoded::Value(PropertyValue::Struct(nested)))
            }
            (PropertyType::Array, PropertyKind::Array(inner)) => {
                let Some(inner_disk) = PropertyType::from_name(tag.item_type) else {
                    return Ok(Decoded::Mismatch(format!(
                        "unknown element type {}",
                        self.names.display(tag.item_type)
                    )));
                };

                let count = sub.read_count(1)?;

                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    match self.read_element(sub, map, inner_disk, inner)? {
                        Decoded::Value(item) => items.push(item),
                        mismatch @ Decoded::Mismatch(_) => return Ok(mismatch),
                    }
                }
                Ok(Decoded::Value(PropertyValue::Array(items)))
            }
            (PropertyType::Bool | PropertyType::Struct | PropertyType::Array, _) => {
                Ok(self.type_mismatch(disk, kind))
            }
            (disk, kind) => {
                let value = read_scalar(sub, map, disk)?;
                Ok(match value.widen(kind) {
                    Some(value) => Decoded::Value(value),
                    None => self.type_mismatch(disk, kind),
                })
            }
        }
    }

    fn read_element(
        &self,
        sub: &mut Parser,
        map: &NameMap,
        disk: PropertyType,
        kind: &PropertyKind,
    ) -> Result<Decoded> {
        match (disk, kind) {
            (PropertyType::Bool, PropertyKind::Bool) => {
                Ok(Decoded::Value(PropertyValue::Bool(sub.read_le::<u8>()? != 0)))
            }
            (PropertyType::Struct, PropertyKind::Struct(id)) => {
                let mut nested = self.classes.defaults(*id)?.clone();
                self.deserialize(sub, map, *id, &mut nested)?;
                Ok(Decoded::Value(PropertyValue::Struct(nested)))
            }
            (PropertyType::Bool | PropertyType::Struct | PropertyType::Array, _) => {
                Ok(self.type_mismatch(disk, kind))
            }
            (disk, kind) => {
                let value = read_scalar(sub, map, disk)?;
                Ok(match value.widen(kind) {
                    Some(value) => Decoded::Value(value),
                    None => self.type_mismatch(disk, kind),
                })
            }
        }
    }

    fn type_mismatch(&self, disk: PropertyType, kind: &PropertyKind) -> Decoded {
        Decoded::Mismatch(format!(
            "{} stored, {} expected",
            disk.type_name(),
            kind.property_type().type_name()
        ))
    }

    fn skip(&self, tag: &PropertyTag, offset: usize, reason: &str) -> Result<()> {
        if self.strict {
            return Err(Error::Error(format!(
                "Property {} ({}, {} bytes) could not be decoded: {}",
                self.names.display(tag.name),
                self.names.display(tag.type_name),
                tag.size,
                reason
            )));
        }

        self.report(DiagnosticSeverity::Warning, tag, offset, &format!("skipped: {reason}"));
        Ok(())
    }

    fn report(&self, severity: DiagnosticSeverity, tag: &PropertyTag, offset: usize, message: &str) {
        let Some(diagnostics) = self.diagnostics else {
            return;
        };

        let mut diagnostic = Diagnostic::new(
            severity,
            DiagnosticCategory::Property,
            format!(
                "Property {} ({}, {} bytes) {}",
                self.names.display(tag.name),
                self.names.display(tag.type_name),
                tag.size,
                message
            ),
        )
        .with_offset(offset as u64);

        if let Some(package) = self.package {
            diagnostic = diagnostic.with_package(package);
        }
        if let Some(export) = self.export {
            diagnostic = diagnostic.with_export(export);
        }
        diagnostics.push(diagnostic);
    }

    /// Returns every object reference stored in a tag stream without a class definition.
    ///
    /// Looks into `ObjectProperty` values, arrays of objects or structs, and nested structs.
    /// Null references are omitted.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] or [`crate::Error::Malformed`] for corrupt streams
    /// and [`crate::Error::RecursionLimit`] for absurdly nested structs.
    pub fn scan_references(parser: &mut Parser, map: &NameMap) -> Result<Vec<PackageIndex>> {
        let mut found = Vec::new();
        scan_stream(parser, map, &mut found, 0)?;
        Ok(found)
    }

    /// Copies a tag stream encoded against `from` into `writer`, re-encoding every name
    /// against `to`.
    ///
    /// No class definition is needed, so this works for objects that were never loaded.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] or [`crate::Error::Malformed`] for corrupt streams
    /// and [`crate::Error::RecursionLimit`] for absurdly nested structs.
    pub fn transcode(
        parser: &mut Parser,
        from: &NameMap,
        writer: &mut Writer,
        to: &mut NameMapBuilder,
    ) -> Result<()> {
        transcode_stream(parser, from, writer, to, 0)
    }
}

fn find_field(fields: &[FieldDef], cursor: usize, name: Name) -> Option<usize> {
    let cursor = cursor.min(fields.len());
    (cursor..fields.len())
        .chain(0..cursor)
        .find(|&i| fields[i].name == name)
}

fn read_scalar(sub: &mut Parser, map: &NameMap, disk: PropertyType) -> Result<PropertyValue> {
    Ok(match disk {
        PropertyType::Byte => PropertyValue::Byte(sub.read_le()?),
        PropertyType::Int16 => PropertyValue::Int16(sub.read_le()?),
        PropertyType::Int => PropertyValue::Int(sub.read_le()?),
        PropertyType::Int64 => PropertyValue::Int64(sub.read_le()?),
        PropertyType::Float => PropertyValue::Float(sub.read_le()?),
        PropertyType::Double => PropertyValue::Double(sub.read_le()?),
        PropertyType::Str => PropertyValue::Str(sub.read_prefixed_string_utf8()?),
        PropertyType::Name => PropertyValue::Name(map.read_name(sub)?),
        PropertyType::Object => PropertyValue::Object(PackageIndex::read(sub)?),
        PropertyType::Bool | PropertyType::Struct | PropertyType::Array => {
            return Err(malformed_error!("{} is not a scalar type", disk.type_name()))
        }
    })
}

fn scan_stream(
    parser: &mut Parser,
    map: &NameMap,
    found: &mut Vec<PackageIndex>,
    depth: usize,
) -> Result<()> {
    if depth > MAX_NESTING {
        return Err(Error::RecursionLimit(MAX_NESTING));
    }

    loop {
        let tag = PropertyTag::read(parser, map)?;
        if tag.is_terminator() {
            return Ok(());
        }

        let window = parser.read_bytes(tag.size as usize)?;
        let mut sub = Parser::new(window);

        match tag.property_type() {
            Some(PropertyType::Object) => {
                let index = PackageIndex::read(&mut sub)?;
                if !index.is_root() {
                    found.push(index);
                }
            }
            Some(PropertyType::Struct) => scan_stream(&mut sub, map, found, depth + 1)?,
            Some(PropertyType::Array) => match PropertyType::from_name(tag.item_type) {
                Some(PropertyType::Object) => {
                    let count = sub.read_le::<u32>()?;
                    for _ in 0..count {
                        let index = PackageIndex::read(&mut sub)?;
                        if !index.is_root() {
                            found.push(index);
                        }
                    }
                }
                Some(PropertyType::Struct) => {
                    let count = sub.read_le::<u32>()?;
                    for _ in 0..count {
                        scan_stream(&mut sub, map, found, depth + 1)?;
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }
}

fn transcode_stream(
    parser: &mut Parser,
    from: &NameMap,
    writer: &mut Writer,
    to: &mut NameMapBuilder,
    depth: usize,
) -> Result<()> {
    if depth > MAX_NESTING {
        return Err(Error::RecursionLimit(MAX_NESTING));
    }

    loop {
        let mut tag = PropertyTag::read(parser, from)?;
        if tag.is_terminator() {
            PropertyTag::TERMINATOR.write(writer, to);
            return Ok(());
        }

        let window = parser.read_bytes(tag.size as usize)?;
        let mut sub = Parser::new(window);
        let mut body = Writer::with_capacity(window.len());

        match tag.property_type() {
            Some(PropertyType::Name) => {
                let name = from.read_name(&mut sub)?;
                to.write_name(&mut body, name);
            }
            Some(PropertyType::Struct) => {
                transcode_stream(&mut sub, from, &mut body, to, depth + 1)?;
            }
            Some(PropertyType::Array) => match PropertyType::from_name(tag.item_type) {
                Some(PropertyType::Name) => {
                    let count = sub.read_le::<u32>()?;
                    body.write_le(count);
                    for _ in 0..count {
                        let name = from.read_name(&mut sub)?;
                        to.write_name(&mut body, name);
                    }
                }
                Some(PropertyType::Struct) => {
                    let count = sub.read_le::<u32>()?;
                    body.write_le(count);
                    for _ in 0..count {
                        transcode_stream(&mut sub, from, &mut body, to, depth + 1)?;
                    }
                }
                _ => {}
            },
            _ => {}
        }
        body.write_bytes(&window[sub.pos()..]);

        tag.size = u32::try_from(body.pos())
            .map_err(|_| malformed_error!("Property value of {} bytes is too large", body.pos()))?;
        tag.write(writer, to);
        writer.write_bytes(body.data());
    }
}
