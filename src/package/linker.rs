//! An opened package.
//!
//! [`Linker::open`] decodes the header, validates the chunk table, reads the name, import and
//! export tables (inflating only the chunks that hold them) and checks every structural
//! invariant the rest of the crate relies on:
//!
//! - every [`PackageIndex`] stored in a record points inside its table
//! - import outers are imports (or `Root` for the package import itself)
//! - every Outer chain reaches `Root` without repeating a record
//! - every export's property data lies inside the logical image
//!
//! A linker that passed `open` can be walked without further bounds checks on its tables.
//! Violations are fatal [`crate::Error::Malformed`] errors; nothing is partially opened.

use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    fmt,
    path::{Path, PathBuf},
};

use crate::{
    file::{parser::Parser, File},
    package::{
        compression::PackageReader,
        config::LoadConfig,
        header::PackageHeader,
        index::PackageIndex,
        name::{Name, NameMap, NameTable, NAME_CLASS, NAME_PACKAGE},
        records::{ExportRecord, ImportRecord},
    },
    session::ObjectRef,
    Error, Result,
};

/// Session-local handle of an opened package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkerId(pub(crate) u32);

impl LinkerId {
    /// Position of the linker in its session.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for LinkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Linker#{}", self.0)
    }
}

/// Decoded tables of one package plus its logical byte view.
#[derive(Debug)]
pub struct Linker {
    id: LinkerId,
    name: Name,
    path: Option<PathBuf>,
    reader: PackageReader,
    header: PackageHeader,
    names: NameMap,
    imports: Vec<ImportRecord>,
    exports: Vec<ExportRecord>,
    export_lookup: HashMap<Name, Vec<u32>>,
    root: Option<ObjectRef>,
}

impl Linker {
    /// Opens and validates a package image.
    ///
    /// Names are interned into `names`; `name` is the package's own name.
    ///
    /// # Errors
    /// Returns any fatal error: [`crate::Error::Malformed`], [`crate::Error::OutOfBounds`],
    /// [`crate::Error::NotSupported`], [`crate::Error::Decompression`] or
    /// [`crate::Error::RecursionLimit`] for Outer chains deeper than
    /// [`LoadConfig::max_outer_depth`].
    pub fn open(
        id: LinkerId,
        name: Name,
        file: File,
        path: Option<PathBuf>,
        names: &mut NameTable,
        config: &LoadConfig,
    ) -> Result<Linker> {
        let header = PackageHeader::read(file.data())?;
        let reader = PackageReader::new(file, header.chunks.clone())?;
        let logical_len = reader.logical_len();

        let start = header
            .name_offset
            .min(header.import_offset)
            .min(header.export_offset);
        if start > logical_len {
            return Err(malformed_error!(
                "Table offset {} beyond the logical image of {} bytes",
                start,
                logical_len
            ));
        }

        // Only the chunks holding the tables are inflated; export data is read on demand. Record
        // sizes vary, so the window starts at the chunk holding the last table offset and
        // doubles whenever the tables run past it.
        let table_start = header.name_offset.max(header.import_offset).max(header.export_offset);
        let mut end = match reader.is_compressed() {
            true => reader.chunks().chunk_end_at(table_start).unwrap_or(logical_len),
            false => logical_len,
        };
        let (name_map, imports, exports) = loop {
            let region = reader.read_range(start, end - start)?;
            match read_tables(&region, start, &header, names) {
                Err(Error::OutOfBounds { .. }) if end < logical_len => {
                    let wider = end.saturating_add(end - start);
                    end = reader.chunks().chunk_end_at(wider).unwrap_or(logical_len);
                }
                result => break result?,
            }
        };

        let mut export_lookup: HashMap<Name, Vec<u32>> = HashMap::new();
        for (index, export) in exports.iter().enumerate() {
            export_lookup
                .entry(export.object_name)
                .or_default()
                .push(index as u32);
        }

        let linker = Linker {
            id,
            name,
            path,
            reader,
            header,
            names: name_map,
            imports,
            exports,
            export_lookup,
            root: None,
        };

        linker.validate_indices()?;
        linker.validate_outer_chains(config.max_outer_depth)?;
        linker.validate_serial_ranges(logical_len)?;

        tracing::debug!(
            package = %names.display(name),
            imports = linker.imports.len(),
            exports = linker.exports.len(),
            compressed = linker.reader.is_compressed(),
            "opened package"
        );

        Ok(linker)
    }

    fn check_index(&self, index: PackageIndex, what: &str, owner: PackageIndex) -> Result<()> {
        let valid = match index {
            PackageIndex::Root => true,
            PackageIndex::Import(i) => (i as usize) < self.imports.len(),
            PackageIndex::Export(i) => (i as usize) < self.exports.len(),
        };

        if valid {
            Ok(())
        } else {
            Err(malformed_error!("{} of {} points outside the tables: {}", what, owner, index))
        }
    }

    fn validate_indices(&self) -> Result<()> {
        for (i, import) in self.imports.iter().enumerate() {
            let owner = PackageIndex::Import(i as u32);
            self.check_index(import.outer, "Outer", owner)?;
            if import.outer.is_export() {
                return Err(malformed_error!("Outer of {} is an export", owner));
            }
        }

        for (i, export) in self.exports.iter().enumerate() {
            let owner = PackageIndex::Export(i as u32);
            self.check_index(export.class, "Class", owner)?;
            self.check_index(export.super_index, "Super", owner)?;
            self.check_index(export.outer, "Outer", owner)?;
            self.check_index(export.archetype, "Archetype", owner)?;
        }

        Ok(())
    }

    fn validate_outer_chains(&self, max_depth: usize) -> Result<()> {
        let mut done_imports = vec![false; self.imports.len()];
        let mut done_exports = vec![false; self.exports.len()];

        let starts = (0..self.imports.len() as u32)
            .map(PackageIndex::Import)
            .chain((0..self.exports.len() as u32).map(PackageIndex::Export));

        for start in starts {
            let mut chain = Vec::new();
            let mut seen = HashSet::new();
            let mut cursor = start;

            loop {
                let done = match cursor {
                    PackageIndex::Root => true,
                    PackageIndex::Import(i) => done_imports[i as usize],
                    PackageIndex::Export(i) => done_exports[i as usize],
                };
                if done {
                    break;
                }

                if !seen.insert(cursor) {
                    return Err(malformed_error!("Outer chain of {} contains a cycle at {}", start, cursor));
                }
                if chain.len() >= max_depth {
                    return Err(Error::RecursionLimit(max_depth));
                }

                chain.push(cursor);
                cursor = self.outer_of(cursor);
            }

            for index in chain {
                match index {
                    PackageIndex::Import(i) => done_imports[i as usize] = true,
                    PackageIndex::Export(i) => done_exports[i as usize] = true,
                    PackageIndex::Root => {}
                }
            }
        }

        Ok(())
    }

    fn validate_serial_ranges(&self, logical_len: u64) -> Result<()> {
        for (i, export) in self.exports.iter().enumerate() {
            let end = export.serial_offset.checked_add(export.serial_size);
            if end.map_or(true, |end| end > logical_len) {
                return Err(malformed_error!(
                    "Data of export {} ({} bytes at {}) exceeds the image of {} bytes",
                    i,
                    export.serial_size,
                    export.serial_offset,
                    logical_len
                ));
            }
        }
        Ok(())
    }

    /// Session handle of this linker.
    #[must_use]
    pub fn id(&self) -> LinkerId {
        self.id
    }

    /// Package name.
    #[must_use]
    pub fn name(&self) -> Name {
        self.name
    }

    /// File the package was opened from, `None` for in-memory packages.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The decoded header.
    #[must_use]
    pub fn header(&self) -> &PackageHeader {
        &self.header
    }

    /// The package's name map.
    #[must_use]
    pub fn names(&self) -> &NameMap {
        &self.names
    }

    /// The import table.
    #[must_use]
    pub fn imports(&self) -> &[ImportRecord] {
        &self.imports
    }

    /// The export table.
    #[must_use]
    pub fn exports(&self) -> &[ExportRecord] {
        &self.exports
    }

    /// Returns `true` if the body is chunk-compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.reader.is_compressed()
    }

    /// Size of the logical image.
    #[must_use]
    pub fn logical_len(&self) -> u64 {
        self.reader.logical_len()
    }

    /// Object handle of the package root, once resolved.
    #[must_use]
    pub fn root(&self) -> Option<ObjectRef> {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: ObjectRef) {
        self.root = Some(root);
    }

    /// Returns one import record.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for indices outside the table.
    pub fn import(&self, index: u32) -> Result<&ImportRecord> {
        self.imports.get(index as usize).ok_or(out_of_bounds_error!())
    }

    /// Returns one export record.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for indices outside the table.
    pub fn export(&self, index: u32) -> Result<&ExportRecord> {
        self.exports.get(index as usize).ok_or(out_of_bounds_error!())
    }

    pub(crate) fn import_mut(&mut self, index: u32) -> Result<&mut ImportRecord> {
        self.imports.get_mut(index as usize).ok_or(out_of_bounds_error!())
    }

    pub(crate) fn export_mut(&mut self, index: u32) -> Result<&mut ExportRecord> {
        self.exports.get_mut(index as usize).ok_or(out_of_bounds_error!())
    }

    /// Clears the resolution memo of every import.
    pub(crate) fn reset_imports(&mut self) {
        for import in &mut self.imports {
            import.resolved = None;
        }
    }

    /// The tagged property stream of an export. Empty if the export stores no data.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for bad indices and [`crate::Error::Decompression`]
    /// or [`crate::Error::Malformed`] for corrupt chunks.
    pub fn export_data(&self, index: u32) -> Result<Cow<'_, [u8]>> {
        let export = self.export(index)?;
        if export.serial_size == 0 {
            return Ok(Cow::Borrowed(&[]));
        }
        self.reader.read_range(export.serial_offset, export.serial_size)
    }

    /// Owner of a record; `Root` for `Root`.
    #[must_use]
    pub fn outer_of(&self, index: PackageIndex) -> PackageIndex {
        match index {
            PackageIndex::Root => PackageIndex::Root,
            PackageIndex::Import(i) => self
                .imports
                .get(i as usize)
                .map_or(PackageIndex::Root, |import| import.outer),
            PackageIndex::Export(i) => self
                .exports
                .get(i as usize)
                .map_or(PackageIndex::Root, |export| export.outer),
        }
    }

    /// Object name of a record; the package name for `Root`.
    #[must_use]
    pub fn object_name(&self, index: PackageIndex) -> Name {
        match index {
            PackageIndex::Root => self.name,
            PackageIndex::Import(i) => self
                .imports
                .get(i as usize)
                .map_or(Name::NONE, |import| import.object_name),
            PackageIndex::Export(i) => self
                .exports
                .get(i as usize)
                .map_or(Name::NONE, |export| export.object_name),
        }
    }

    /// Class name of a record.
    ///
    /// Class exports report `Class`, the root reports `Package`.
    #[must_use]
    pub fn class_name_of(&self, index: PackageIndex) -> Name {
        match index {
            PackageIndex::Root => Name::plain(NAME_PACKAGE),
            PackageIndex::Import(i) => self
                .imports
                .get(i as usize)
                .map_or(Name::NONE, |import| import.class_name),
            PackageIndex::Export(i) => match self.exports.get(i as usize) {
                Some(export) if export.class.is_root() => Name::plain(NAME_CLASS),
                Some(export) => self.object_name(export.class),
                None => Name::NONE,
            },
        }
    }

    /// Object path of an export inside this package, outermost first.
    #[must_use]
    pub fn export_path(&self, index: u32) -> Vec<Name> {
        let mut path = Vec::new();
        let mut cursor = PackageIndex::Export(index);
        while let PackageIndex::Export(i) = cursor {
            let Some(export) = self.exports.get(i as usize) else {
                break;
            };
            path.push(export.object_name);
            cursor = export.outer;
        }
        path.reverse();
        path
    }

    /// Splits an import into the package it lives in and its path inside that package.
    ///
    /// An import whose outer is `Root` names a package; its path is empty.
    #[must_use]
    pub fn import_target(&self, index: u32) -> (Name, Vec<Name>) {
        let mut path = Vec::new();
        let mut cursor = index;
        loop {
            let Some(import) = self.imports.get(cursor as usize) else {
                break;
            };
            match import.outer {
                PackageIndex::Import(outer) => {
                    path.push(import.object_name);
                    cursor = outer;
                }
                _ => {
                    path.reverse();
                    return (import.object_name, path);
                }
            }
        }
        path.reverse();
        (Name::NONE, path)
    }

    /// Finds the export at `path` whose class is `class`.
    #[must_use]
    pub fn find_export(&self, path: &[Name], class: Name) -> Option<u32> {
        let last = path.last()?;
        self.export_lookup.get(last)?.iter().copied().find(|&candidate| {
            self.class_name_of(PackageIndex::Export(candidate)) == class
                && self.export_path(candidate) == path
        })
    }

    /// Human readable path of a record, e.g. `Widgets.Outer.Gadget`.
    #[must_use]
    pub fn display_path(&self, index: PackageIndex, names: &NameTable) -> String {
        let (package, path) = match index {
            PackageIndex::Root => (self.name, Vec::new()),
            PackageIndex::Export(i) => (self.name, self.export_path(i)),
            PackageIndex::Import(i) => self.import_target(i),
        };

        let mut text = names.display(package);
        for segment in path {
            text.push('.');
            text.push_str(&names.display(segment));
        }
        text
    }
}

/// Decodes the name, import and export tables from `region`, which starts at logical offset
/// `base`. Returns [`crate::Error::OutOfBounds`] if the tables extend past `region`.
fn read_tables(
    region: &[u8],
    base: u64,
    header: &PackageHeader,
    names: &mut NameTable,
) -> Result<(NameMap, Vec<ImportRecord>, Vec<ExportRecord>)> {
    let mut parser = Parser::new(region);

    parser.seek_offset(header.name_offset, base)?;
    let name_map = NameMap::read(&mut parser, header.name_count, header.file_version, names)?;

    parser.seek_offset(header.import_offset, base)?;
    let mut imports = Vec::with_capacity((header.import_count as usize).min(parser.remaining()));
    for _ in 0..header.import_count {
        imports.push(ImportRecord::read(&mut parser, &name_map)?);
    }

    parser.seek_offset(header.export_offset, base)?;
    let mut exports = Vec::with_capacity((header.export_count as usize).min(parser.remaining()));
    for _ in 0..header.export_count {
        exports.push(ExportRecord::read(&mut parser, &name_map)?);
    }

    Ok((name_map, imports, exports))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{
        builder::PackageBuilder,
        compression::CompressionPolicy,
        header::{FILE_VERSION_CURRENT, FILE_VERSION_LEGACY},
        records::ExportRecord,
    };
    use crate::property::{ClassBuilder, ClassRegistry, PropertyBag, PropertyKind, PropertyValue};

    fn open(names: &mut NameTable, bytes: Vec<u8>) -> Result<Linker> {
        let package = names.name("Widgets");
        Linker::open(
            LinkerId(0),
            package,
            File::from_mem(bytes)?,
            None,
            names,
            &LoadConfig::default(),
        )
    }

    fn sample(names: &mut NameTable, version: u32, compress: bool) -> Vec<u8> {
        let classes = ClassRegistry::new();
        let mut builder = PackageBuilder::new(names, &classes, version);
        let widget = builder.import_class("Engine", "Widget");
        let outer = builder.export_object("Group", widget, PackageIndex::Root);
        builder.export_object("Gadget_2", widget, outer);
        if compress {
            builder.compression(CompressionPolicy::BiasSpeed, 64);
        }
        builder.build().unwrap()
    }

    #[test]
    fn open_and_find() {
        for version in [FILE_VERSION_LEGACY, FILE_VERSION_CURRENT] {
            for compress in [false, true] {
                let mut names = NameTable::new();
                let bytes = sample(&mut names, version, compress);
                let linker = open(&mut names, bytes).unwrap();

                assert_eq!(linker.is_compressed(), compress);
                assert_eq!(linker.imports().len(), 2);
                assert_eq!(linker.exports().len(), 2);

                let path = [names.name("Group"), names.name("Gadget_2")];
                let class = names.name("Widget");
                assert_eq!(linker.find_export(&path, class), Some(1));
                assert_eq!(linker.find_export(&path, names.name("Other")), None);
                assert_eq!(
                    linker.display_path(PackageIndex::Export(1), &names),
                    "Widgets.Group.Gadget_2"
                );
                assert_eq!(
                    linker.import_target(1),
                    (names.name("Engine"), vec![names.name("Widget")])
                );
            }
        }
    }

    #[test]
    fn outer_cycle_is_rejected() {
        let mut names = NameTable::new();
        let classes = ClassRegistry::new();
        let mut builder = PackageBuilder::new(&mut names, &classes, FILE_VERSION_CURRENT);
        let class = builder.import_class("Engine", "Widget");
        let first = builder.name("A");
        let second = builder.name("B");
        builder.push_export(ExportRecord {
            class,
            outer: PackageIndex::Export(1),
            object_name: first,
            ..ExportRecord::default()
        });
        builder.push_export(ExportRecord {
            class,
            outer: PackageIndex::Export(0),
            object_name: second,
            ..ExportRecord::default()
        });
        let bytes = builder.build().unwrap();

        assert!(matches!(open(&mut names, bytes), Err(Error::Malformed { .. })));
    }

    #[test]
    fn dangling_index_is_rejected() {
        let mut names = NameTable::new();
        let classes = ClassRegistry::new();
        let mut builder = PackageBuilder::new(&mut names, &classes, FILE_VERSION_CURRENT);
        let object = builder.name("Lonely");
        builder.push_export(ExportRecord {
            class: PackageIndex::Import(7),
            object_name: object,
            ..ExportRecord::default()
        });
        let bytes = builder.build().unwrap();

        let error = open(&mut names, bytes).unwrap_err();
        assert!(error.is_fatal());
    }

    #[test]
    fn deep_outer_chain_hits_limit() {
        let mut names = NameTable::new();
        let classes = ClassRegistry::new();
        let mut builder = PackageBuilder::new(&mut names, &classes, FILE_VERSION_CURRENT);
        let class = builder.import_class("Engine", "Widget");
        let mut outer = PackageIndex::Root;
        for i in 0..20 {
            outer = builder.export_object(&format!("Level_{i}"), class, outer);
        }
        let bytes = builder.build().unwrap();

        let package = names.name("Widgets");
        let config = LoadConfig {
            max_outer_depth: 8,
            ..LoadConfig::default()
        };
        let result = Linker::open(LinkerId(0), package, File::from_mem(bytes).unwrap(), None, &mut names, &config);
        assert!(matches!(result, Err(Error::RecursionLimit(8))));
    }

    #[test]
    fn export_data_is_inflated_on_demand() {
        let mut names = NameTable::new();
        let mut classes = ClassRegistry::new();
        let note = classes
            .register(&mut names, ClassBuilder::new("Note").field("Text", PropertyKind::Str))
            .unwrap();
        let defaults = classes.defaults(note).unwrap().clone();

        let mut bytes = {
            let mut builder = PackageBuilder::new(&mut names, &classes, FILE_VERSION_CURRENT);
            let class = builder.import_class("Core", "Note");
            let export = builder.export_object("Long", class, PackageIndex::Root);
            let values = PropertyBag::from_slots(vec![vec![PropertyValue::Str("x".repeat(4096))]]);
            builder.set_properties(export, note, &values, &defaults).unwrap();
            builder.compression(CompressionPolicy::BiasSpeed, 64);
            builder.build().unwrap()
        };

        // The last chunk holds nothing but property data.
        let header = PackageHeader::read(&bytes).unwrap();
        assert!(header.chunks.len() > 32);
        let last = *header.chunks.chunks().last().unwrap();
        let payload = last.compressed_offset as usize..(last.compressed_offset + last.compressed_size) as usize;
        bytes[payload].fill(0xFF);

        let linker = open(&mut names, bytes).unwrap();
        assert_eq!(linker.exports().len(), 1);
        assert_eq!(linker.find_export(&[names.name("Long")], names.name("Note")), Some(0));
        assert!(linker.export_data(0).unwrap_err().is_fatal());
    }
}
