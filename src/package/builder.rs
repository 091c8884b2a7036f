//! Writing package images.
//!
//! [`PackageBuilder`] collects import and export records plus the tagged property data of
//! every export and lays them out as `header | names | imports | exports | data`. Property
//! streams are encoded against the builder's own [`NameMapBuilder`], so name indices stay
//! stable from the moment a stream is added until the name table is written.
//!
//! With compression enabled the body is split into chunks of the configured size; the header
//! (which then carries the chunk table) stays uncompressed and logical offsets start right
//! after it.
//!
//! # Examples
//!
//! ```rust
//! use pkgscope::package::{builder::PackageBuilder, header::FILE_VERSION_CURRENT, NameTable, PackageIndex};
//! use pkgscope::property::ClassRegistry;
//!
//! let mut names = NameTable::new();
//! let classes = ClassRegistry::new();
//! let mut builder = PackageBuilder::new(&mut names, &classes, FILE_VERSION_CURRENT);
//! let widget = builder.import_class("Engine", "Widget");
//! builder.export_object("Gadget", widget, PackageIndex::Root);
//! let image = builder.build()?;
//! assert!(!image.is_empty());
//! # Ok::<(), pkgscope::Error>(())
//! ```

use sha1::{Digest, Sha1};
use uguid::Guid;

use crate::{
    file::{
        parser::Parser,
        writer::{count_u32, Writer},
    },
    package::{
        compression::{ChunkWriter, CompressionMethod, CompressionPolicy},
        header::{GenerationInfo, PackageFlags, PackageHeader},
        index::PackageIndex,
        name::{Name, NameMap, NameMapBuilder, NameTable, NAME_CLASS, NAME_CORE, NAME_PACKAGE},
        records::{ExportRecord, ImportRecord, ObjectFlags},
    },
    property::{class::ClassId, codec::TaggedCodec, tag::PropertyTag, ClassRegistry, PropertyBag},
    Error, Result,
};

/// Assembles a complete package image.
pub struct PackageBuilder<'a> {
    names: &'a mut NameTable,
    classes: &'a ClassRegistry,
    map: NameMapBuilder,
    flags: PackageFlags,
    imports: Vec<ImportRecord>,
    exports: Vec<ExportRecord>,
    data: Vec<Option<Vec<u8>>>,
    generations: Vec<GenerationInfo>,
    compression: Option<(CompressionPolicy, usize)>,
}

impl<'a> PackageBuilder<'a> {
    /// Creates an empty builder writing the given file version.
    #[must_use]
    pub fn new(names: &'a mut NameTable, classes: &'a ClassRegistry, version: u32) -> Self {
        PackageBuilder {
            names,
            classes,
            map: NameMapBuilder::new(version),
            flags: PackageFlags::empty(),
            imports: Vec::new(),
            exports: Vec::new(),
            data: Vec::new(),
            generations: Vec::new(),
            compression: None,
        }
    }

    /// Interns `text` in the session name table.
    pub fn name(&mut self, text: &str) -> Name {
        self.names.name(text)
    }

    /// Appends an import record.
    pub fn import_record(&mut self, record: ImportRecord) -> PackageIndex {
        self.imports.push(record);
        PackageIndex::Import(self.imports.len() as u32 - 1)
    }

    /// Appends an import of `object_name` (class `class_package.class_name`) owned by `outer`.
    pub fn import(
        &mut self,
        class_package: &str,
        class_name: &str,
        outer: PackageIndex,
        object_name: &str,
    ) -> PackageIndex {
        let record = ImportRecord::new(
            self.names.name(class_package),
            self.names.name(class_name),
            outer,
            self.names.name(object_name),
        );
        self.find_import(&record)
            .unwrap_or_else(|| self.import_record(record))
    }

    /// Imports another package. Repeated calls return the same import.
    pub fn import_package(&mut self, package: &str) -> PackageIndex {
        let record = ImportRecord::new(
            Name::plain(NAME_CORE),
            Name::plain(NAME_PACKAGE),
            PackageIndex::Root,
            self.names.name(package),
        );
        self.find_import(&record)
            .unwrap_or_else(|| self.import_record(record))
    }

    /// Imports class `class` of `package`, importing the package as needed.
    pub fn import_class(&mut self, package: &str, class: &str) -> PackageIndex {
        let outer = self.import_package(package);
        let record = ImportRecord::new(
            Name::plain(NAME_CORE),
            Name::plain(NAME_CLASS),
            outer,
            self.names.name(class),
        );
        self.find_import(&record)
            .unwrap_or_else(|| self.import_record(record))
    }

    fn find_import(&self, record: &ImportRecord) -> Option<PackageIndex> {
        self.imports
            .iter()
            .position(|import| {
                import.class_package == record.class_package
                    && import.class_name == record.class_name
                    && import.outer == record.outer
                    && import.object_name == record.object_name
            })
            .map(|i| PackageIndex::Import(i as u32))
    }

    /// Appends an export record without property data.
    pub fn push_export(&mut self, record: ExportRecord) -> PackageIndex {
        self.exports.push(record);
        self.data.push(None);
        PackageIndex::Export(self.exports.len() as u32 - 1)
    }

    /// Appends a public object export.
    pub fn export_object(&mut self, name: &str, class: PackageIndex, outer: PackageIndex) -> PackageIndex {
        let object_name = self.names.name(name);
        self.push_export(ExportRecord {
            class,
            outer,
            object_name,
            object_flags: ObjectFlags::PUBLIC,
            ..ExportRecord::default()
        })
    }

    /// Appends a class export; the class must be registered under `name` when loaded.
    pub fn export_class(&mut self, name: &str, super_index: PackageIndex) -> PackageIndex {
        let object_name = self.names.name(name);
        self.push_export(ExportRecord {
            class: PackageIndex::Root,
            super_index,
            object_name,
            object_flags: ObjectFlags::PUBLIC | ObjectFlags::STANDALONE,
            ..ExportRecord::default()
        })
    }

    fn export_slot(&mut self, export: PackageIndex) -> Result<usize> {
        match export {
            PackageIndex::Export(i) if (i as usize) < self.exports.len() => Ok(i as usize),
            other => Err(Error::Error(format!("{other} is not an export of this package"))),
        }
    }

    /// Mutable access to a previously added export record.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if `export` is not an export of this builder.
    pub fn export_mut(&mut self, export: PackageIndex) -> Result<&mut ExportRecord> {
        let slot = self.export_slot(export)?;
        Ok(&mut self.exports[slot])
    }

    /// Sets the archetype of an export.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if `export` is not an export of this builder.
    pub fn set_archetype(&mut self, export: PackageIndex, archetype: PackageIndex) -> Result<()> {
        self.export_mut(export)?.archetype = archetype;
        Ok(())
    }

    /// Sets the parent struct of a class export.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if `export` is not an export of this builder.
    pub fn set_super(&mut self, export: PackageIndex, super_index: PackageIndex) -> Result<()> {
        self.export_mut(export)?.super_index = super_index;
        Ok(())
    }

    /// Encodes the values of an export, writing only those that differ from `defaults`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] for unknown exports or values that do not fit,
    /// [`crate::Error::ClassNotFound`] for unknown classes.
    pub fn set_properties(
        &mut self,
        export: PackageIndex,
        class: ClassId,
        values: &PropertyBag,
        defaults: &PropertyBag,
    ) -> Result<()> {
        let slot = self.export_slot(export)?;

        let mut stream = Writer::new();
        TaggedCodec::new(self.classes, self.names).serialize(&mut stream, &mut self.map, class, values, defaults)?;
        self.data[slot] = Some(stream.into_inner());
        Ok(())
    }

    /// Copies an already encoded stream, re-encoding its names for this package.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] for unknown exports and any fatal error of a corrupt
    /// stream.
    pub fn set_tagged_data(&mut self, export: PackageIndex, bytes: &[u8], names: &NameMap) -> Result<()> {
        let slot = self.export_slot(export)?;

        let mut stream = Writer::with_capacity(bytes.len());
        if bytes.is_empty() {
            PropertyTag::TERMINATOR.write(&mut stream, &mut self.map);
        } else {
            TaggedCodec::transcode(&mut Parser::new(bytes), names, &mut stream, &mut self.map)?;
        }
        self.data[slot] = Some(stream.into_inner());
        Ok(())
    }

    /// Sets the package flags.
    pub fn flags(&mut self, flags: PackageFlags) -> &mut Self {
        self.flags = flags;
        self
    }

    /// Sets the save history carried over from a previous version of the package.
    pub fn generations(&mut self, generations: Vec<GenerationInfo>) -> &mut Self {
        self.generations = generations;
        self
    }

    /// Enables chunk compression.
    pub fn compression(&mut self, policy: CompressionPolicy, chunk_size: usize) -> &mut Self {
        self.compression = Some((policy, chunk_size.max(1)));
        self
    }

    /// Number of exports added so far.
    #[must_use]
    pub fn export_count(&self) -> usize {
        self.exports.len()
    }

    /// Lays out and encodes the package.
    ///
    /// A new generation entry is appended and the content GUID is derived from the body.
    ///
    /// # Errors
    /// Returns [`crate::Error::Decompression`] if compression fails and
    /// [`crate::Error::Malformed`] for names unknown to the session table.
    pub fn build(mut self) -> Result<Vec<u8>> {
        for slot in &mut self.data {
            if slot.is_none() {
                let mut stream = Writer::new();
                PropertyTag::TERMINATOR.write(&mut stream, &mut self.map);
                *slot = Some(stream.into_inner());
            }
        }

        // Record sizes do not depend on offsets; a first pass registers every name.
        let mut import_table = Writer::new();
        for import in &self.imports {
            import.write(&mut import_table, &mut self.map);
        }
        let mut scratch = Writer::new();
        for export in &self.exports {
            export.write(&mut scratch, &mut self.map);
        }
        let export_table_len = scratch.pos();

        let mut name_table = Writer::new();
        self.map.write_table(&mut name_table, self.names)?;

        let data_len: usize = self.data.iter().flatten().map(Vec::len).sum();
        let body_len = name_table.pos() + import_table.pos() + export_table_len + data_len;

        let export_count = count_u32(self.exports.len(), "exports")?;
        let import_count = count_u32(self.imports.len(), "imports")?;
        let name_count = count_u32(self.map.len(), "names")?;
        self.generations.push(GenerationInfo {
            export_count,
            name_count,
            net_object_count: export_count,
        });

        let compression = self.compression.filter(|_| body_len > 0);
        let chunk_count = compression.map_or(0, |(_, size)| body_len.div_ceil(size));
        let header_size = PackageHeader::encoded_size(self.generations.len(), chunk_count);

        let base = header_size as u64;
        let name_offset = base;
        let import_offset = name_offset + name_table.pos() as u64;
        let export_offset = import_offset + import_table.pos() as u64;
        let mut data_cursor = export_offset + export_table_len as u64;

        for (export, data) in self.exports.iter_mut().zip(&self.data) {
            let size = data.as_ref().map_or(0, Vec::len) as u64;
            export.serial_offset = data_cursor;
            export.serial_size = size;
            data_cursor += size;
        }

        let mut body = Writer::with_capacity(body_len);
        body.write_bytes(name_table.data());
        body.write_bytes(import_table.data());
        for export in &self.exports {
            export.write(&mut body, &mut self.map);
        }
        for data in self.data.iter().flatten() {
            body.write_bytes(data);
        }
        let body = body.into_inner();

        let digest = Sha1::digest(&body);
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&digest[..16]);

        let mut header = PackageHeader {
            file_version: self.map.version(),
            header_size: u32::try_from(header_size).map_err(|_| malformed_error!("Header too large"))?,
            package_flags: self.flags,
            name_count,
            name_offset,
            import_count,
            import_offset,
            export_count,
            export_offset,
            guid: Guid::from_bytes(guid),
            generations: self.generations,
            ..PackageHeader::default()
        };

        let payload = match compression {
            Some((policy, chunk_size)) => {
                let mut chunks = ChunkWriter::new(policy, chunk_size, base, base);
                chunks.write(&body)?;
                let (table, compressed) = chunks.finish()?;
                header.compression = CompressionMethod::Zlib;
                header.chunks = table;
                header.package_flags |= PackageFlags::STORE_COMPRESSED;
                compressed
            }
            None => {
                header.package_flags.remove(PackageFlags::STORE_COMPRESSED);
                body
            }
        };

        let mut image = Writer::with_capacity(header_size + payload.len());
        header.write(&mut image)?;
        if image.pos() != header_size {
            return Err(malformed_error!(
                "Header encoded to {} bytes, {} expected",
                image.pos(),
                header_size
            ));
        }
        image.write_bytes(&payload);

        tracing::debug!(
            exports = self.exports.len(),
            imports = self.imports.len(),
            names = self.map.len(),
            compressed = compression.is_some(),
            size = image.pos(),
            "built package"
        );

        Ok(image.into_inner())
    }
}
