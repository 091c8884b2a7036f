//! Property tag header.
//!
//! ```text
//! name                        terminates the stream when it is `None`
//! type                        e.g. `IntProperty`
//! u32 size                    number of value bytes after the header
//! u32 array_index             element of a static array
//! struct_name                 StructProperty only
//! u8  bool_value              BoolProperty only
//! inner_type                  ArrayProperty only
//! ```

use crate::{
    file::{parser::Parser, writer::Writer},
    package::name::{Name, NameMap, NameMapBuilder},
    property::PropertyType,
    Result,
};

/// A decoded tag header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyTag {
    /// Field name, or `None` for the terminator.
    pub name: Name,
    /// Type tag name.
    pub type_name: Name,
    /// Struct name for struct tags, inner element type for array tags, `None` otherwise.
    pub item_type: Name,
    /// Value of a bool tag.
    pub bool_value: bool,
    /// Element of a static array.
    pub array_index: u32,
    /// Number of value bytes following the header.
    pub size: u32,
}

impl PropertyTag {
    /// The stream terminator.
    pub const TERMINATOR: PropertyTag = PropertyTag {
        name: Name::NONE,
        type_name: Name::NONE,
        item_type: Name::NONE,
        bool_value: false,
        array_index: 0,
        size: 0,
    };

    /// Creates a tag for the given type.
    #[must_use]
    pub fn new(name: Name, property_type: PropertyType, array_index: u32, size: u32) -> Self {
        PropertyTag {
            name,
            type_name: Name::plain(property_type.name_id()),
            item_type: Name::NONE,
            bool_value: false,
            array_index,
            size,
        }
    }

    /// Returns `true` for the stream terminator.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.name.is_none()
    }

    /// The decoded type tag, `None` if the type name is unknown.
    #[must_use]
    pub fn property_type(&self) -> Option<PropertyType> {
        PropertyType::from_name(self.type_name)
    }

    /// Reads a tag header.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated data and
    /// [`crate::Error::Malformed`] for invalid name indices.
    pub fn read(parser: &mut Parser, names: &NameMap) -> Result<Self> {
        let name = names.read_name(parser)?;
        if name.is_none() {
            return Ok(PropertyTag::TERMINATOR);
        }

        let type_name = names.read_name(parser)?;
        let size = parser.read_le::<u32>()?;
        let array_index = parser.read_le::<u32>()?;

        let mut tag = PropertyTag {
            name,
            type_name,
            item_type: Name::NONE,
            bool_value: false,
            array_index,
            size,
        };

        match tag.property_type() {
            Some(PropertyType::Struct) | Some(PropertyType::Array) => {
                tag.item_type = names.read_name(parser)?;
            }
            Some(PropertyType::Bool) => {
                tag.bool_value = parser.read_le::<u8>()? != 0;
            }
            _ => {}
        }

        Ok(tag)
    }

    /// Writes a tag header.
    pub fn write(&self, writer: &mut Writer, names: &mut NameMapBuilder) {
        names.write_name(writer, self.name);
        if self.is_terminator() {
            return;
        }

        names.write_name(writer, self.type_name);
        writer.write_le(self.size);
        writer.write_le(self.array_index);

        match self.property_type() {
            Some(PropertyType::Struct) | Some(PropertyType::Array) => {
                names.write_name(writer, self.item_type);
            }
            Some(PropertyType::Bool) => writer.write_le(u8::from(self.bool_value)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{header::FILE_VERSION_CURRENT, name::NameTable};

    #[test]
    fn bool_and_struct_tags() {
        let mut names = NameTable::new();
        let mut builder = NameMapBuilder::new(FILE_VERSION_CURRENT);

        let mut flag = PropertyTag::new(names.name("bHidden"), PropertyType::Bool, 0, 0);
        flag.bool_value = true;
        let mut location = PropertyTag::new(names.name("Location"), PropertyType::Struct, 0, 17);
        location.item_type = names.name("Vector");

        let mut writer = Writer::new();
        flag.write(&mut writer, &mut builder);
        location.write(&mut writer, &mut builder);
        PropertyTag::TERMINATOR.write(&mut writer, &mut builder);

        let mut table = Writer::new();
        builder.write_table(&mut table, &names).unwrap();
        let table_bytes = table.into_inner();
        let map = NameMap::read(
            &mut Parser::new(&table_bytes),
            builder.len() as u32,
            FILE_VERSION_CURRENT,
            &mut names,
        )
        .unwrap();

        let bytes = writer.into_inner();
        let mut parser = Parser::new(&bytes);
        assert_eq!(PropertyTag::read(&mut parser, &map).unwrap(), flag);
        assert_eq!(PropertyTag::read(&mut parser, &map).unwrap(), location);
        assert!(PropertyTag::read(&mut parser, &map).unwrap().is_terminator());
        assert!(!parser.has_more_data());
    }
}
