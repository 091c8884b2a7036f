//! Name interning with instance numbers.
//!
//! Every symbolic identifier in a package (object names, class names, property names, tag type
//! names) is a [`Name`]: an interned, case-insensitive base string plus an instance number.
//! `number == 0` means "no instance"; `number == n + 1` renders as `base_n`.
//!
//! # Key Components
//!
//! - [`NameTable`] - Session wide, append-only intern table
//! - [`NameMap`] - Maps the name indices of one package onto session names
//! - [`NameMapBuilder`] - Assigns on-disk name indices when a package is written
//!
//! # Wire formats
//!
//! Two encodings of a name reference exist, selected by the package file version:
//!
//! - **Legacy** (version 1): a reference is a single `u32` index. Instance numbers are folded
//!   into the entry text as a trailing `_<digits>` suffix and split out again on load.
//! - **Current** (version 2): a reference is `u32 index, u32 number`; entries hold the
//!   plain base text.
//!
//! Both decode to the same [`Name`] values.
//!
//! # Examples
//!
//! ```rust
//! use pkgscope::package::name::NameTable;
//!
//! let mut names = NameTable::new();
//! let widget = names.name("Widget_3");
//!
//! assert_eq!(widget.number, 4);
//! assert_eq!(names.display(widget), "Widget_3");
//! assert_eq!(names.name("WIDGET_3"), widget);
//! let lower = names.name("widget");
//! assert_eq!(names.display(lower), "Widget");
//! ```

use std::collections::HashMap;
use std::fmt;

use strum::{EnumCount, IntoEnumIterator};

use crate::{
    file::{parser::Parser, writer::Writer},
    package::header::FILE_VERSION_LEGACY,
    property::PropertyType,
    Result,
};

/// Index of an interned string inside a [`NameTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameId(pub(crate) u32);

impl NameId {
    /// The reserved `None` name, which terminates tag streams.
    pub const NONE: NameId = NameId(0);

    /// Returns the raw table position.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Pre-interned `Core` name.
pub const NAME_CORE: NameId = NameId(1 + PropertyType::COUNT as u32);
/// Pre-interned `Class` name.
pub const NAME_CLASS: NameId = NameId(2 + PropertyType::COUNT as u32);
/// Pre-interned `Package` name.
pub const NAME_PACKAGE: NameId = NameId(3 + PropertyType::COUNT as u32);

/// An interned string plus an instance number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    /// Interned base text.
    pub id: NameId,
    /// Instance number, `0` for none, `n + 1` for `base_n`.
    pub number: u32,
}

impl Name {
    /// The reserved `None` name.
    pub const NONE: Name = Name {
        id: NameId::NONE,
        number: 0,
    };

    /// Creates a name from an interned id and an instance number.
    #[must_use]
    pub fn new(id: NameId, number: u32) -> Self {
        Name { id, number }
    }

    /// Creates a name without instance number.
    #[must_use]
    pub fn plain(id: NameId) -> Self {
        Name { id, number: 0 }
    }

    /// Returns `true` for the reserved `None` name.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.id == NameId::NONE && self.number == 0
    }
}

impl From<NameId> for Name {
    fn from(id: NameId) -> Self {
        Name::plain(id)
    }
}

/// Splits a trailing `_<digits>` suffix off `text`.
///
/// The suffix only counts when the base is non-empty, the digits have no leading zero (a lone
/// `0` is fine) and the value still leaves room for the `+ 1` encoding. Anything else is a
/// literal name with instance number `0`.
#[must_use]
pub fn split_number(text: &str) -> (&str, u32) {
    let Some(pos) = text.rfind('_') else {
        return (text, 0);
    };

    let (base, digits) = (&text[..pos], &text[pos + 1..]);
    if base.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return (text, 0);
    }

    if digits.len() > 1 && digits.starts_with('0') {
        return (text, 0);
    }

    match digits.parse::<u32>() {
        Ok(value) if value < u32::MAX => (base, value + 1),
        _ => (text, 0),
    }
}

/// Session wide, case-insensitive string intern table.
///
/// Entries are never removed. The first insertion of a string decides the casing returned by
/// [`NameTable::resolve`].
#[derive(Debug, Clone)]
pub struct NameTable {
    entries: Vec<String>,
    lookup: HashMap<String, NameId>,
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NameTable {
    /// Creates a table with all well-known names pre-interned at their fixed ids.
    #[must_use]
    pub fn new() -> Self {
        let mut table = NameTable {
            entries: Vec::new(),
            lookup: HashMap::new(),
        };

        table.intern("None");
        for property_type in PropertyType::iter() {
            table.intern(property_type.type_name());
        }
        table.intern("Core");
        table.intern("Class");
        table.intern("Package");

        debug_assert_eq!(table.find("Package"), Some(NAME_PACKAGE));
        table
    }

    /// Interns `text` verbatim and returns its id.
    ///
    /// No instance number is split off; use [`NameTable::name`] for that.
    pub fn intern(&mut self, text: &str) -> NameId {
        let key = text.to_lowercase();
        if let Some(id) = self.lookup.get(&key) {
            return *id;
        }

        // More than u32::MAX distinct strings cannot be addressed by the wire format either.
        let id = NameId(self.entries.len() as u32);
        self.entries.push(text.to_string());
        self.lookup.insert(key, id);
        id
    }

    /// Looks up `text` without interning it.
    #[must_use]
    pub fn find(&self, text: &str) -> Option<NameId> {
        self.lookup.get(&text.to_lowercase()).copied()
    }

    /// Returns the text of the first insertion of `id`.
    #[must_use]
    pub fn resolve(&self, id: NameId) -> Option<&str> {
        self.entries.get(id.0 as usize).map(String::as_str)
    }

    /// Interns `text`, splitting a trailing `_<digits>` suffix into the instance number.
    pub fn name(&mut self, text: &str) -> Name {
        let (base, number) = split_number(text);
        Name::new(self.intern(base), number)
    }

    /// Like [`NameTable::name`], but never interns.
    #[must_use]
    pub fn find_name(&self, text: &str) -> Option<Name> {
        let (base, number) = split_number(text);
        self.find(base).map(|id| Name::new(id, number))
    }

    /// Rebuilds the display form `base` or `base_n`.
    #[must_use]
    pub fn display(&self, name: Name) -> String {
        let base = self.resolve(name.id).unwrap_or("<invalid>");
        if name.number == 0 {
            base.to_string()
        } else {
            format!("{}_{}", base, name.number - 1)
        }
    }

    /// Number of interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Name table of one package, mapped onto session names.
#[derive(Debug, Clone)]
pub struct NameMap {
    version: u32,
    entries: Vec<Name>,
}

impl NameMap {
    /// Reads `count` entries and interns them into `table`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] or [`crate::Error::Malformed`] for truncated or
    /// invalid entries.
    pub fn read(parser: &mut Parser, count: u32, version: u32, table: &mut NameTable) -> Result<Self> {
        // Every entry takes at least one byte; refuse counts the data cannot hold.
        parser.ensure_remaining(count as usize)?;

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let text = parser.read_prefixed_string_utf8()?;
            let name = if version == FILE_VERSION_LEGACY {
                table.name(&text)
            } else {
                Name::plain(table.intern(&text))
            };
            entries.push(name);
        }

        Ok(NameMap { version, entries })
    }

    /// Decodes one name reference.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the index is outside the table.
    pub fn read_name(&self, parser: &mut Parser) -> Result<Name> {
        let index = parser.read_le::<u32>()?;
        let number = if self.version == FILE_VERSION_LEGACY {
            None
        } else {
            Some(parser.read_le::<u32>()?)
        };

        let Some(entry) = self.entries.get(index as usize) else {
            return Err(malformed_error!(
                "Name index {} out of range, table has {} entries",
                index,
                self.entries.len()
            ));
        };

        Ok(match number {
            Some(number) => Name::new(entry.id, number),
            None => *entry,
        })
    }

    /// Returns the session name of an entry.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<Name> {
        self.entries.get(index as usize).copied()
    }

    /// File version the table was decoded with.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Assigns on-disk name indices while a package is being written.
#[derive(Debug, Clone)]
pub struct NameMapBuilder {
    version: u32,
    entries: Vec<Name>,
    lookup: HashMap<Name, u32>,
}

impl NameMapBuilder {
    /// Creates an empty builder for the given file version.
    #[must_use]
    pub fn new(version: u32) -> Self {
        NameMapBuilder {
            version,
            entries: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    fn key(&self, name: Name) -> Name {
        if self.version == FILE_VERSION_LEGACY {
            name
        } else {
            Name::plain(name.id)
        }
    }

    /// Returns the on-disk index of `name`, assigning one on first use.
    pub fn index_of(&mut self, name: Name) -> u32 {
        let key = self.key(name);
        if let Some(index) = self.lookup.get(&key) {
            return *index;
        }

        let index = self.entries.len() as u32;
        self.entries.push(key);
        self.lookup.insert(key, index);
        index
    }

    /// Writes one name reference.
    pub fn write_name(&mut self, writer: &mut Writer, name: Name) {
        let index = self.index_of(name);
        writer.write_le(index);
        if self.version != FILE_VERSION_LEGACY {
            writer.write_le(name.number);
        }
    }

    /// Writes all assigned entries in index order.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if an entry refers to an id unknown to `table`.
    pub fn write_table(&self, writer: &mut Writer, table: &NameTable) -> Result<()> {
        for entry in &self.entries {
            let text = if self.version == FILE_VERSION_LEGACY {
                if table.resolve(entry.id).is_none() {
                    return Err(malformed_error!("Unknown name id {}", entry.id.0));
                }
                table.display(*entry)
            } else {
                table
                    .resolve(entry.id)
                    .ok_or_else(|| malformed_error!("Unknown name id {}", entry.id.0))?
                    .to_string()
            };
            writer.write_prefixed_string_utf8(&text)?;
        }
        Ok(())
    }

    /// Number of assigned entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entry has been assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File version the builder encodes for.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Display for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::header::FILE_VERSION_CURRENT;
    use crate::Error;

    #[test]
    fn intern_is_case_insensitive() {
        let mut names = NameTable::new();
        let first = names.intern("Widget");
        let second = names.intern("WIDGET");
        assert_eq!(first, second);
        assert_eq!(names.resolve(first), Some("Widget"));
        assert_eq!(names.find("widget"), Some(first));
        assert_eq!(names.find("Gadget"), None);
    }

    #[test]
    fn well_known_ids() {
        let names = NameTable::new();
        assert_eq!(names.find("none"), Some(NameId::NONE));
        assert_eq!(names.find("Core"), Some(NAME_CORE));
        assert_eq!(names.find("Class"), Some(NAME_CLASS));
        assert_eq!(names.find("package"), Some(NAME_PACKAGE));
        for property_type in PropertyType::iter() {
            assert_eq!(
                names.find(property_type.type_name()),
                Some(property_type.name_id())
            );
        }
    }

    #[test]
    fn split_rules() {
        assert_eq!(split_number("Widget_0"), ("Widget", 1));
        assert_eq!(split_number("Widget_12"), ("Widget", 13));
        assert_eq!(split_number("Widget_012"), ("Widget_012", 0));
        assert_eq!(split_number("Widget_"), ("Widget_", 0));
        assert_eq!(split_number("_5"), ("_5", 0));
        assert_eq!(split_number("Widget_5a"), ("Widget_5a", 0));
        assert_eq!(split_number("Widget"), ("Widget", 0));
        assert_eq!(split_number("Widget_99999999999"), ("Widget_99999999999", 0));
        assert_eq!(split_number("Big_4294967295"), ("Big_4294967295", 0));
        assert_eq!(split_number("A_B_7"), ("A_B", 8));
    }

    #[test]
    fn display_roundtrip() {
        let mut names = NameTable::new();
        for text in ["Gadget", "Gadget_0", "Gadget_41", "Gadget_01"] {
            let name = names.name(text);
            assert_eq!(names.display(name), text);
        }
    }

    fn encode(version: u32, names: &NameTable, values: &[Name]) -> (Vec<u8>, Vec<u8>) {
        let mut builder = NameMapBuilder::new(version);
        let mut refs = Writer::new();
        for value in values {
            builder.write_name(&mut refs, *value);
        }
        let mut table = Writer::new();
        builder.write_table(&mut table, names).unwrap();
        (table.into_inner(), refs.into_inner())
    }

    #[test]
    fn legacy_and_current_decode_alike() {
        let mut names = NameTable::new();
        let values = [names.name("Gizmo_2"), names.name("Gizmo"), names.name("Gizmo_02")];

        for version in [FILE_VERSION_LEGACY, FILE_VERSION_CURRENT] {
            let (table_bytes, ref_bytes) = encode(version, &names, &values);

            let mut fresh = NameTable::new();
            let mut parser = Parser::new(&table_bytes);
            let count = if version == FILE_VERSION_LEGACY { 3 } else { 2 };
            let map = NameMap::read(&mut parser, count, version, &mut fresh).unwrap();
            assert_eq!(map.len(), count as usize);

            let mut parser = Parser::new(&ref_bytes);
            let decoded: Vec<String> = (0..3)
                .map(|_| fresh.display(map.read_name(&mut parser).unwrap()))
                .collect();
            assert_eq!(decoded, vec!["Gizmo_2", "Gizmo", "Gizmo_02"]);
        }
    }

    #[test]
    fn legacy_entry_splits_number() {
        let data = [7, b'W', b'i', b'd', b'g', b'_', b'1', b'0'];
        let mut names = NameTable::new();
        let mut parser = Parser::new(&data);
        let map = NameMap::read(&mut parser, 1, FILE_VERSION_LEGACY, &mut names).unwrap();
        let name = map.get(0).unwrap();
        assert_eq!(name.number, 11);
        assert_eq!(names.resolve(name.id), Some("Widg"));
    }

    #[test]
    fn out_of_range_index_is_fatal() {
        let mut names = NameTable::new();
        let table = [3, b'F', b'o', b'o'];
        let map = NameMap::read(&mut Parser::new(&table), 1, FILE_VERSION_CURRENT, &mut names).unwrap();

        let reference = [5, 0, 0, 0, 0, 0, 0, 0];
        let result = map.read_name(&mut Parser::new(&reference));
        match result {
            Err(err @ Error::Malformed { .. }) => assert!(err.is_fatal()),
            other => panic!("unexpected {other:?}"),
        }
    }
}
