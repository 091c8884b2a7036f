//! Load sessions.
//!
//! A [`LoadSession`] owns everything that lives for the duration of one load: the name table,
//! the class registry, every opened [`Linker`], the object arena and the deferred preload
//! queue. It is single-threaded; resolution is a depth-first recursion through the import and
//! export tables of the involved packages.
//!
//! # Load transactions
//!
//! Every public resolve runs inside a `begin_load` / `end_load` bracket. Constructing an export
//! only allocates the object and resolves what the object needs to exist (class, outer,
//! archetype, super); decoding its tagged properties is queued and happens when the outermost
//! bracket closes. Brackets nest, so callers can group several resolves into one transaction.
//!
//! # Failure model
//!
//! Fatal errors ([`crate::Error::is_fatal`]) abort the transaction and clear the preload queue.
//! An export whose class cannot be resolved is marked dead; resolving it returns
//! [`crate::Error::ExportDead`] while its siblings keep loading.
//!
//! # Examples
//!
//! ```rust
//! use pkgscope::prelude::*;
//!
//! let mut session = LoadSession::new(LoadConfig::default());
//! let widget = session.register_class(
//!     ClassBuilder::new("Widget").package("Engine").field("Health", PropertyKind::Int),
//! )?;
//!
//! let image = {
//!     let mut builder = session.package_builder();
//!     let class = builder.import_class("Engine", "Widget");
//!     builder.export_object("Button", class, PackageIndex::Root);
//!     builder.build()?
//! };
//!
//! let linker = session.open_package_from_memory("Menu", image)?;
//! let button = session.resolve(linker, PackageIndex::Export(0))?;
//! assert_eq!(session.object(button)?.class, widget);
//! # Ok::<(), pkgscope::Error>(())
//! ```

mod object;

pub use object::{LoadStats, Object, ObjectKind, ObjectRef};

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fs,
    path::Path,
    sync::Arc,
};

use crate::{
    dependencies::{self, DependencyOptions, DependencyRef},
    file::{parser::Parser, File},
    package::{
        builder::PackageBuilder,
        config::LoadConfig,
        diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics},
        header::PackageFlags,
        index::PackageIndex,
        linker::{Linker, LinkerId},
        name::{Name, NameTable, NAME_CLASS, NAME_CORE, NAME_PACKAGE},
        records::{ExportRecord, ExportState, ImportRecord},
    },
    property::{ClassBuilder, ClassId, ClassRegistry, PropertyValue, TaggedCodec},
    Error, Result,
};

#[derive(Debug, Default)]
struct NativePackage {
    root: Option<ObjectRef>,
    objects: HashMap<Name, ObjectRef>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum PackageSource {
    Linker(LinkerId),
    Native(Name),
}

/// Owner of all state of one load.
#[derive(Debug)]
pub struct LoadSession {
    config: LoadConfig,
    names: NameTable,
    classes: ClassRegistry,
    linkers: Vec<Linker>,
    linkers_by_name: HashMap<Name, LinkerId>,
    memory_packages: HashMap<Name, Vec<u8>>,
    native_packages: HashMap<Name, NativePackage>,
    class_objects: HashMap<ClassId, ObjectRef>,
    objects: Vec<Object>,
    preload_queue: VecDeque<(LinkerId, u32)>,
    properties_in_progress: HashSet<ObjectRef>,
    load_depth: u32,
    resolve_depth: usize,
    stats: LoadStats,
    diagnostics: Arc<Diagnostics>,
    meta_class: ClassId,
    package_class: ClassId,
}

impl LoadSession {
    /// Creates a session with the intrinsic `Core.Class` and `Core.Package` classes registered.
    #[must_use]
    pub fn new(config: LoadConfig) -> Self {
        let names = NameTable::new();
        let mut classes = ClassRegistry::new();
        let meta_class = classes.register_intrinsic(Name::plain(NAME_CLASS), Name::plain(NAME_CORE));
        let package_class = classes.register_intrinsic(Name::plain(NAME_PACKAGE), Name::plain(NAME_CORE));

        let mut session = LoadSession {
            config,
            names,
            classes,
            linkers: Vec::new(),
            linkers_by_name: HashMap::new(),
            memory_packages: HashMap::new(),
            native_packages: HashMap::new(),
            class_objects: HashMap::new(),
            objects: Vec::new(),
            preload_queue: VecDeque::new(),
            properties_in_progress: HashSet::new(),
            load_depth: 0,
            resolve_depth: 0,
            stats: LoadStats::default(),
            diagnostics: Arc::new(Diagnostics::new()),
            meta_class,
            package_class,
        };

        session.add_native_class(meta_class);
        session.add_native_class(package_class);
        session
    }

    // ============================================================================================
    // Accessors
    // ============================================================================================

    /// The session configuration.
    #[must_use]
    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// The session name table.
    #[must_use]
    pub fn names(&self) -> &NameTable {
        &self.names
    }

    /// Mutable access to the name table, e.g. to intern lookup keys.
    pub fn names_mut(&mut self) -> &mut NameTable {
        &mut self.names
    }

    /// The class registry.
    #[must_use]
    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// Warnings and errors collected so far.
    #[must_use]
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Processing counters.
    #[must_use]
    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    /// Current `begin_load` nesting depth.
    #[must_use]
    pub fn load_depth(&self) -> u32 {
        self.load_depth
    }

    /// Number of exports waiting for their properties.
    #[must_use]
    pub fn pending_loads(&self) -> usize {
        self.preload_queue.len()
    }

    /// Number of objects in the arena.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Returns an object.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for handles of another session.
    pub fn object(&self, object: ObjectRef) -> Result<&Object> {
        self.objects.get(object.0 as usize).ok_or(out_of_bounds_error!())
    }

    fn object_mut(&mut self, object: ObjectRef) -> Result<&mut Object> {
        self.objects.get_mut(object.0 as usize).ok_or(out_of_bounds_error!())
    }

    /// Returns an opened package.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for ids of another session.
    pub fn linker(&self, linker: LinkerId) -> Result<&Linker> {
        self.linkers.get(linker.0 as usize).ok_or(out_of_bounds_error!())
    }

    fn linker_mut(&mut self, linker: LinkerId) -> Result<&mut Linker> {
        self.linkers.get_mut(linker.0 as usize).ok_or(out_of_bounds_error!())
    }

    /// All opened packages.
    pub fn linkers(&self) -> impl Iterator<Item = &Linker> {
        self.linkers.iter()
    }

    /// Returns the id of an already opened package.
    #[must_use]
    pub fn find_package(&self, name: &str) -> Option<LinkerId> {
        let name = self.names.find_name(name)?;
        self.linkers_by_name.get(&name).copied()
    }

    /// Value of element 0 of the field called `field`.
    #[must_use]
    pub fn property(&self, object: ObjectRef, field: &str) -> Option<&PropertyValue> {
        let object = self.objects.get(object.0 as usize)?;
        let name = self.names.find_name(field)?;
        let index = self.classes.get(object.class)?.field_index(name)?;
        object.properties.get(index, 0)
    }

    /// Replaces one element of a loaded object's field.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if the object is not loaded, the field or element does
    /// not exist, or the value does not fit the field.
    pub fn set_property(
        &mut self,
        object: ObjectRef,
        field: &str,
        array_index: usize,
        value: PropertyValue,
    ) -> Result<()> {
        let name = self
            .names
            .find_name(field)
            .ok_or_else(|| Error::Error(format!("Unknown field {field}")))?;
        let target = self.objects.get_mut(object.0 as usize).ok_or(out_of_bounds_error!())?;
        if target.state != ExportState::PropertiesLoaded {
            return Err(Error::Error(format!("{object} is not loaded")));
        }

        let def = self.classes.class(target.class)?;
        let index = def
            .field_index(name)
            .ok_or_else(|| Error::Error(format!("Unknown field {field}")))?;
        if !value.fits(&def.fields()[index].kind) {
            return Err(Error::Error(format!("Value does not fit field {field}")));
        }

        if target.properties.set(index, array_index, value) {
            Ok(())
        } else {
            Err(Error::Error(format!("{field}[{array_index}] does not exist")))
        }
    }

    /// Human readable path of a record, e.g. `Widgets.Group.Gadget`.
    #[must_use]
    pub fn display_path(&self, reference: DependencyRef) -> String {
        match self.linkers.get(reference.linker.0 as usize) {
            Some(linker) => linker.display_path(reference.index, &self.names),
            None => format!("{}:{}", reference.linker, reference.index),
        }
    }

    // ============================================================================================
    // Classes and packages
    // ============================================================================================

    /// Registers a native class and creates its class object in its (native) package.
    ///
    /// # Errors
    /// Returns [`crate::Error::ClassRegistration`] if the registry rejects the definition.
    pub fn register_class(&mut self, builder: ClassBuilder) -> Result<ClassId> {
        let id = self.classes.register(&mut self.names, builder)?;
        self.add_native_class(id);
        Ok(id)
    }

    fn add_native_class(&mut self, id: ClassId) {
        let Some(def) = self.classes.get(id) else {
            return;
        };
        let (name, package, parent) = (def.name, def.package, def.parent);

        let root = self.native_root(package);
        let mut object = Object::new(name, self.meta_class, ObjectKind::Class(id));
        object.class_object = self.class_objects.get(&self.meta_class).copied();
        object.outer = Some(root);
        object.super_struct = parent.and_then(|p| self.class_objects.get(&p).copied());
        object.state = ExportState::PropertiesLoaded;
        let handle = self.alloc(object);

        self.class_objects.insert(id, handle);
        self.native_packages
            .entry(package)
            .or_default()
            .objects
            .insert(name, handle);
    }

    fn native_root(&mut self, package: Name) -> ObjectRef {
        if let Some(root) = self.native_packages.get(&package).and_then(|p| p.root) {
            return root;
        }

        let mut object = Object::new(package, self.package_class, ObjectKind::Package);
        object.class_object = self.class_objects.get(&self.package_class).copied();
        object.state = ExportState::PropertiesLoaded;
        let root = self.alloc(object);
        self.native_packages.entry(package).or_default().root = Some(root);
        root
    }

    fn alloc(&mut self, object: Object) -> ObjectRef {
        let handle = ObjectRef(self.objects.len() as u32);
        self.objects.push(object);
        handle
    }

    /// Returns `true` if `package` holds native classes.
    #[must_use]
    pub fn is_native_package(&self, package: Name) -> bool {
        self.native_packages.contains_key(&package)
    }

    /// Opens a package file. The package name is the file stem.
    ///
    /// Opening the same package twice returns the existing linker.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] for I/O failures and any fatal error of
    /// [`Linker::open`].
    pub fn open_package(&mut self, path: &Path) -> Result<LinkerId> {
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| Error::Error(format!("Invalid package path {}", path.display())))?;
        let name = self.names.name(stem);
        if let Some(id) = self.linkers_by_name.get(&name) {
            return Ok(*id);
        }

        let file = File::from_file(path)?;
        self.attach(name, file, Some(path.to_path_buf()))
    }

    /// Opens a package image held in memory under the given name.
    ///
    /// # Errors
    /// Returns any fatal error of [`Linker::open`].
    pub fn open_package_from_memory(&mut self, name: &str, data: Vec<u8>) -> Result<LinkerId> {
        let name = self.names.name(name);
        if let Some(id) = self.linkers_by_name.get(&name) {
            return Ok(*id);
        }

        self.attach(name, File::from_mem(data)?, None)
    }

    /// Makes an in-memory image available to import resolution without opening it yet.
    pub fn register_memory_package(&mut self, name: &str, data: Vec<u8>) {
        let name = self.names.name(name);
        self.memory_packages.insert(name, data);
    }

    fn attach(&mut self, name: Name, file: File, path: Option<std::path::PathBuf>) -> Result<LinkerId> {
        let id = LinkerId(self.linkers.len() as u32);
        match Linker::open(id, name, file, path, &mut self.names, &self.config) {
            Ok(linker) => {
                self.linkers.push(linker);
                self.linkers_by_name.insert(name, id);
                self.stats.packages_opened += 1;
                Ok(id)
            }
            Err(error) => {
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagnosticSeverity::Error,
                        DiagnosticCategory::Header,
                        format!("Failed to open package: {error}"),
                    )
                    .with_package(self.names.display(name)),
                );
                Err(error)
            }
        }
    }

    /// Finds a package by name: open linkers, native packages, memory registrations, then the
    /// search paths. Opens it if necessary.
    pub(crate) fn locate_package(&mut self, package: Name) -> Result<PackageSource> {
        if let Some(id) = self.linkers_by_name.get(&package) {
            return Ok(PackageSource::Linker(*id));
        }

        if self.native_packages.contains_key(&package) {
            return Ok(PackageSource::Native(package));
        }

        if let Some(data) = self.memory_packages.remove(&package) {
            let file = File::from_mem(data)?;
            return self.attach(package, file, None).map(PackageSource::Linker);
        }

        let file_name = format!("{}.{}", self.names.display(package), self.config.package_extension);
        let candidate = self
            .config
            .search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file());
        if let Some(candidate) = candidate {
            let file = File::from_file(&candidate)?;
            return self
                .attach(package, file, Some(candidate))
                .map(PackageSource::Linker);
        }

        Err(Error::PackageNotFound(self.names.display(package)))
    }

    // ============================================================================================
    // Load transactions
    // ============================================================================================

    /// Opens (or nests) a load transaction.
    pub fn begin_load(&mut self) {
        self.load_depth += 1;
    }

    /// Closes a load transaction. Closing the outermost one loads the properties of every
    /// export constructed during the transaction.
    ///
    /// # Errors
    /// Returns [`crate::Error::LoadTransaction`] without a matching [`LoadSession::begin_load`]
    /// and the first fatal error raised while loading properties, in which case the remaining
    /// queue is discarded.
    pub fn end_load(&mut self) -> Result<()> {
        match self.load_depth {
            0 => Err(Error::LoadTransaction(
                "end_load called without matching begin_load".to_string(),
            )),
            1 => {
                // The depth stays at 1 while flushing so nested brackets do not flush again.
                let result = self.flush_preload_queue();
                self.load_depth = 0;
                result
            }
            _ => {
                self.load_depth -= 1;
                Ok(())
            }
        }
    }

    fn flush_preload_queue(&mut self) -> Result<()> {
        while let Some((linker, export)) = self.preload_queue.pop_front() {
            if let Err(error) = self.load_properties(linker, export) {
                if error.is_fatal() {
                    self.preload_queue.clear();
                    return Err(error);
                }

                self.diagnostics.push(
                    Diagnostic::new(DiagnosticSeverity::Error, DiagnosticCategory::Property, error.to_string())
                        .with_package(self.package_display(linker))
                        .with_export(export),
                );
            }
        }
        Ok(())
    }

    /// Resolves a record of an opened package to an object, loading everything it needs.
    ///
    /// # Errors
    /// Returns [`crate::Error::ExportDead`], [`crate::Error::ImportNotFound`] or
    /// [`crate::Error::PackageNotFound`] if the record cannot be resolved, and any fatal error
    /// raised by the packages involved.
    pub fn resolve(&mut self, linker: LinkerId, index: PackageIndex) -> Result<ObjectRef> {
        self.begin_load();
        let result = self.resolve_index(linker, index);
        if matches!(&result, Err(error) if error.is_fatal()) {
            self.preload_queue.clear();
        }
        let flushed = self.end_load();

        let object = result?;
        flushed?;
        Ok(object)
    }

    /// Clears the resolution memo of every import of every open package.
    pub fn reset_loaders(&mut self) {
        for linker in &mut self.linkers {
            linker.reset_imports();
        }
    }

    fn package_display(&self, linker: LinkerId) -> String {
        self.linkers
            .get(linker.0 as usize)
            .map_or_else(|| linker.to_string(), |l| self.names.display(l.name()))
    }

    pub(crate) fn resolve_index(&mut self, linker: LinkerId, index: PackageIndex) -> Result<ObjectRef> {
        if self.resolve_depth >= self.config.max_outer_depth {
            return Err(Error::RecursionLimit(self.config.max_outer_depth));
        }

        self.resolve_depth += 1;
        let result = match index {
            PackageIndex::Root => self.package_root(linker),
            PackageIndex::Export(i) => self.construct_export(linker, i),
            PackageIndex::Import(i) => self.resolve_import(linker, i),
        };
        self.resolve_depth -= 1;
        result
    }

    fn package_root(&mut self, linker: LinkerId) -> Result<ObjectRef> {
        let package = self.linker(linker)?;
        if let Some(root) = package.root() {
            return Ok(root);
        }

        let mut object = Object::new(package.name(), self.package_class, ObjectKind::Package);
        object.class_object = self.class_objects.get(&self.package_class).copied();
        object.origin = Some(DependencyRef::new(linker, PackageIndex::Root));
        object.state = ExportState::PropertiesLoaded;
        let root = self.alloc(object);
        self.linker_mut(linker)?.set_root(root);
        Ok(root)
    }

    fn dead_error(&self, linker: LinkerId, export: u32) -> Error {
        let name = self
            .linkers
            .get(linker.0 as usize)
            .map_or_else(String::new, |l| l.display_path(PackageIndex::Export(export), &self.names));
        Error::ExportDead {
            package: self.package_display(linker),
            index: export,
            name,
        }
    }

    fn mark_dead(&mut self, linker: LinkerId, export: u32, object: ObjectRef, cause: &Error) -> Result<Error> {
        {
            let record = self.linker_mut(linker)?.export_mut(export)?;
            record.state = ExportState::Dead;
            record.resolved = None;
        }
        self.object_mut(object)?.state = ExportState::Dead;
        self.stats.dead += 1;

        self.diagnostics.push(
            Diagnostic::new(
                DiagnosticSeverity::Error,
                DiagnosticCategory::Export,
                format!("Export is dead: {cause}"),
            )
            .with_package(self.package_display(linker))
            .with_export(export),
        );

        Ok(self.dead_error(linker, export))
    }

    /// Best-effort resolve: recoverable failures become warnings and yield `None`.
    fn resolve_optional(
        &mut self,
        linker: LinkerId,
        index: PackageIndex,
        owner: u32,
        what: &str,
    ) -> Result<Option<ObjectRef>> {
        if index.is_root() {
            return Ok(None);
        }

        match self.resolve_index(linker, index) {
            Ok(object) => Ok(Some(object)),
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagnosticSeverity::Warning,
                        DiagnosticCategory::Dependency,
                        format!("{what} {index} could not be resolved: {error}"),
                    )
                    .with_package(self.package_display(linker))
                    .with_export(owner),
                );
                Ok(None)
            }
        }
    }

    fn construct_export(&mut self, linker: LinkerId, export: u32) -> Result<ObjectRef> {
        let record = self.linker(linker)?.export(export)?;
        if record.state == ExportState::Dead {
            return Err(self.dead_error(linker, export));
        }
        if let Some(object) = record.resolved {
            return Ok(object);
        }

        let ExportRecord {
            class,
            super_index,
            outer,
            archetype,
            object_name,
            ..
        } = *record;

        let handle = self.alloc(Object::new(object_name, self.meta_class, ObjectKind::Instance));
        self.object_mut(handle)?.origin = Some(DependencyRef::new(linker, PackageIndex::Export(export)));
        {
            let record = self.linker_mut(linker)?.export_mut(export)?;
            record.state = ExportState::Constructing;
            record.resolved = Some(handle);
        }
        self.object_mut(handle)?.state = ExportState::Constructing;

        let (class_id, kind, class_object) = match self.resolve_export_class(linker, class, object_name) {
            Ok(resolved) => resolved,
            Err(error) if error.is_fatal() => return Err(error),
            Err(error) => return Err(self.mark_dead(linker, export, handle, &error)?),
        };
        {
            let object = self.object_mut(handle)?;
            object.class = class_id;
            object.kind = kind;
            object.class_object = class_object;
        }

        let outer_object = match outer {
            PackageIndex::Root => self.package_root(linker)?,
            index => match self.resolve_index(linker, index) {
                Ok(object) => object,
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => return Err(self.mark_dead(linker, export, handle, &error)?),
            },
        };

        let archetype_object = self.resolve_optional(linker, archetype, export, "Archetype")?;
        let super_object = self.resolve_optional(linker, super_index, export, "Super")?;

        {
            let object = self.object_mut(handle)?;
            object.outer = Some(outer_object);
            object.archetype = archetype_object;
            object.super_struct = super_object;
            object.state = ExportState::Constructed;
        }
        self.linker_mut(linker)?.export_mut(export)?.state = ExportState::Constructed;
        self.stats.constructed += 1;
        self.preload_queue.push_back((linker, export));

        Ok(handle)
    }

    fn resolve_export_class(
        &mut self,
        linker: LinkerId,
        class: PackageIndex,
        object_name: Name,
    ) -> Result<(ClassId, ObjectKind, Option<ObjectRef>)> {
        if class.is_root() {
            let id = self
                .classes
                .find(object_name)
                .ok_or_else(|| Error::ClassNotFound(self.names.display(object_name)))?;
            return Ok((
                self.meta_class,
                ObjectKind::Class(id),
                self.class_objects.get(&self.meta_class).copied(),
            ));
        }

        let class_object = self.resolve_index(linker, class)?;
        match self.object(class_object)?.kind {
            ObjectKind::Class(id) => Ok((id, ObjectKind::Instance, Some(class_object))),
            _ => Err(Error::ClassNotFound(format!(
                "{} is not a class",
                self.linker(linker)?.display_path(class, &self.names)
            ))),
        }
    }

    fn resolve_import(&mut self, linker: LinkerId, import: u32) -> Result<ObjectRef> {
        let package = self.linker(linker)?;
        let record = package.import(import)?;
        if let Some(object) = record.resolved {
            return Ok(object);
        }

        let class_name = record.class_name;
        let (package_name, path) = package.import_target(import);

        let object = match self.locate_package(package_name)? {
            PackageSource::Linker(target) if path.is_empty() => self.package_root(target)?,
            PackageSource::Native(native) if path.is_empty() => self
                .native_packages
                .get(&native)
                .and_then(|p| p.root)
                .ok_or_else(|| Error::PackageNotFound(self.names.display(native)))?,
            PackageSource::Linker(target) => {
                let export = self
                    .linker(target)?
                    .find_export(&path, class_name)
                    .ok_or_else(|| self.import_not_found(package_name, &path, class_name))?;
                self.construct_export(target, export)?
            }
            PackageSource::Native(native) => self
                .find_native(native, &path, class_name)
                .ok_or_else(|| self.import_not_found(package_name, &path, class_name))?,
        };

        self.linker_mut(linker)?.import_mut(import)?.resolved = Some(object);
        self.stats.imports_resolved += 1;
        Ok(object)
    }

    fn find_native(&self, package: Name, path: &[Name], class: Name) -> Option<ObjectRef> {
        let [name] = path else {
            return None;
        };
        let object = *self.native_packages.get(&package)?.objects.get(name)?;
        (class == Name::plain(NAME_CLASS)).then_some(object)
    }

    /// Returns `true` if the class of an export would resolve. Nothing is constructed, although
    /// the package holding an imported class may be opened.
    pub(crate) fn export_class_resolves(&mut self, linker: LinkerId, export: u32) -> Result<bool> {
        let record = self.linker(linker)?.export(export)?;
        if record.state == ExportState::Dead {
            return Ok(false);
        }

        match record.class {
            PackageIndex::Root => Ok(self.classes.find(record.object_name).is_some()),
            PackageIndex::Export(class) => self.is_class_export(linker, class),
            PackageIndex::Import(class) => self.is_class_import(linker, class),
        }
    }

    fn is_class_export(&self, linker: LinkerId, export: u32) -> Result<bool> {
        let record = self.linker(linker)?.export(export)?;
        Ok(record.state != ExportState::Dead
            && record.class.is_root()
            && self.classes.find(record.object_name).is_some())
    }

    fn is_class_import(&mut self, linker: LinkerId, import: u32) -> Result<bool> {
        let package = self.linker(linker)?;
        let record = package.import(import)?;
        if let Some(object) = record.resolved {
            return Ok(matches!(self.object(object)?.kind, ObjectKind::Class(_)));
        }

        let class_name = record.class_name;
        let (package_name, path) = package.import_target(import);

        match self.locate_package(package_name) {
            Ok(PackageSource::Native(native)) => Ok(self.find_native(native, &path, class_name).is_some()),
            Ok(PackageSource::Linker(target)) => match self.linker(target)?.find_export(&path, class_name) {
                Some(export) => self.is_class_export(target, export),
                None => Ok(false),
            },
            Err(error) if error.is_fatal() => Err(error),
            Err(_) => Ok(false),
        }
    }

    fn import_not_found(&self, package: Name, path: &[Name], class: Name) -> Error {
        let mut text = self.names.display(package);
        for segment in path {
            text.push('.');
            text.push_str(&self.names.display(*segment));
        }
        Error::ImportNotFound {
            path: text,
            class: self.names.display(class),
        }
    }

    fn load_properties(&mut self, linker: LinkerId, export: u32) -> Result<()> {
        let record = self.linker(linker)?.export(export)?;
        let Some(handle) = record.resolved else {
            return Ok(());
        };
        if record.state != ExportState::Constructed || !self.properties_in_progress.insert(handle) {
            return Ok(());
        }

        let result = self.decode_properties(linker, export, handle);
        self.properties_in_progress.remove(&handle);
        result
    }

    fn decode_properties(&mut self, linker: LinkerId, export: u32, handle: ObjectRef) -> Result<()> {
        let (class, archetype) = {
            let object = self.object(handle)?;
            (object.class, object.archetype)
        };

        // An archetype of the same class provides the starting values; load it first.
        let mut start = None;
        if let Some(archetype) = archetype {
            if let Some(DependencyRef {
                linker: owner,
                index: PackageIndex::Export(index),
            }) = self.object(archetype)?.origin
            {
                self.load_properties(owner, index)?;
            }

            let template = self.object(archetype)?;
            if template.class == class && template.state == ExportState::PropertiesLoaded {
                start = Some(template.properties.clone());
            }
        }
        let mut bag = match start {
            Some(bag) => bag,
            None => self.classes.defaults(class)?.clone(),
        };

        {
            let package = self.linker(linker)?;
            let data = package.export_data(export)?;
            if !data.is_empty() {
                let package_name = self.names.display(package.name());
                TaggedCodec::new(&self.classes, &self.names)
                    .with_diagnostics(&self.diagnostics)
                    .strict(self.config.strict_properties)
                    .with_context(&package_name, export)
                    .deserialize(&mut Parser::new(&data), package.names(), class, &mut bag)?;
            }
        }

        let mut indices = Vec::new();
        bag.collect_references(&mut indices);
        let mut references = Vec::with_capacity(indices.len());
        for index in indices {
            if let Some(object) = self.resolve_optional(linker, index, export, "Reference")? {
                references.push(object);
            }
        }

        {
            let object = self.object_mut(handle)?;
            object.properties = bag;
            object.references = references;
            object.state = ExportState::PropertiesLoaded;
        }
        self.linker_mut(linker)?.export_mut(export)?.state = ExportState::PropertiesLoaded;
        self.stats.properties_loaded += 1;
        Ok(())
    }

    // ============================================================================================
    // Dependencies
    // ============================================================================================

    /// Everything `root` depends on, dependencies before dependents, `root` excluded.
    ///
    /// # Errors
    /// Returns fatal errors of corrupt packages; unresolvable edges are recorded as diagnostics.
    pub fn gather_dependencies(
        &mut self,
        root: DependencyRef,
        options: &DependencyOptions,
    ) -> Result<Vec<DependencyRef>> {
        dependencies::gather(self, root, options)
    }

    /// Every import, in every open package, that refers to `target`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `target` is not a record of this session.
    pub fn find_referencers(&self, target: DependencyRef) -> Result<Vec<DependencyRef>> {
        dependencies::find_referencers(self, target)
    }

    // ============================================================================================
    // Saving
    // ============================================================================================

    /// Starts a new package written with the configured file version.
    pub fn package_builder(&mut self) -> PackageBuilder<'_> {
        PackageBuilder::new(&mut self.names, &self.classes, self.config.write_version)
    }

    /// Encodes an opened package, including the current property values of loaded exports.
    ///
    /// Loaded exports are diffed against their archetype (when it shares their class) or their
    /// class defaults. Exports that were never loaded or are dead keep their original data.
    ///
    /// # Errors
    /// Returns fatal errors from reading the original data and errors from encoding.
    pub fn save_package_to_vec(&mut self, linker: LinkerId) -> Result<Vec<u8>> {
        let package = self.linkers.get(linker.0 as usize).ok_or(out_of_bounds_error!())?;
        let objects = &self.objects;
        let classes = &self.classes;

        let mut builder = PackageBuilder::new(&mut self.names, classes, self.config.write_version);
        for import in package.imports() {
            builder.import_record(ImportRecord::new(
                import.class_package,
                import.class_name,
                import.outer,
                import.object_name,
            ));
        }

        for (i, export) in package.exports().iter().enumerate() {
            let index = builder.push_export(ExportRecord {
                state: ExportState::Unloaded,
                resolved: None,
                serial_offset: 0,
                serial_size: 0,
                ..export.clone()
            });

            let loaded = export
                .resolved
                .and_then(|handle| objects.get(handle.0 as usize))
                .filter(|object| object.state == ExportState::PropertiesLoaded);

            match loaded {
                Some(object) => {
                    let base = object
                        .archetype
                        .and_then(|a| objects.get(a.0 as usize))
                        .filter(|a| a.class == object.class && a.state == ExportState::PropertiesLoaded)
                        .map_or_else(|| classes.defaults(object.class), |a| Ok(&a.properties))?;
                    builder.set_properties(index, object.class, &object.properties, base)?;
                }
                None => {
                    let data = package.export_data(i as u32)?;
                    builder.set_tagged_data(index, &data, package.names())?;
                }
            }
        }

        builder.generations(package.header().generations.clone());
        builder.flags(package.header().package_flags - PackageFlags::STORE_COMPRESSED);
        if let Some(policy) = self.config.compression {
            builder.compression(policy, self.config.chunk_size);
        }

        let image = builder.build()?;
        tracing::info!(
            package = %self.names.display(package.name()),
            size = image.len(),
            "saved package"
        );
        Ok(image)
    }

    /// Encodes an opened package to a file, see [`LoadSession::save_package_to_vec`].
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be written.
    pub fn save_package(&mut self, linker: LinkerId, path: &Path) -> Result<()> {
        let image = self.save_package_to_vec(linker)?;
        fs::write(path, image)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{build_image, session_with_widget};

    #[test]
    fn unbalanced_end_load() {
        let mut session = LoadSession::new(LoadConfig::default());
        assert!(matches!(session.end_load(), Err(Error::LoadTransaction(_))));

        session.begin_load();
        session.begin_load();
        assert_eq!(session.load_depth(), 2);
        session.end_load().unwrap();
        session.end_load().unwrap();
        assert_eq!(session.load_depth(), 0);
    }

    #[test]
    fn properties_wait_for_outermost_end_load() {
        let (mut session, widget) = session_with_widget();
        let defaults = session.classes().defaults(widget).unwrap().clone();
        let mut values = defaults.clone();
        values.set(0, 0, PropertyValue::Int(7));
        let image = build_image(&mut session, |builder| {
            let class = builder.import_class("Engine", "Widget");
            let button = builder.export_object("Button", class, PackageIndex::Root);
            builder.set_properties(button, widget, &values, &defaults)
        });
        let linker = session.open_package_from_memory("Menu", image).unwrap();

        session.begin_load();
        let button = session.resolve(linker, PackageIndex::Export(0)).unwrap();
        assert_eq!(session.object(button).unwrap().state, ExportState::Constructed);
        assert_eq!(session.pending_loads(), 1);
        session.end_load().unwrap();

        let object = session.object(button).unwrap();
        assert_eq!(object.state, ExportState::PropertiesLoaded);
        assert_eq!(session.property(button, "Health"), Some(&PropertyValue::Int(7)));
        assert_eq!(session.property(button, "Target"), Some(&PropertyValue::Object(PackageIndex::Root)));
    }

    #[test]
    fn class_exports_need_registration() {
        let mut session = LoadSession::new(LoadConfig::default());
        session
            .register_class(ClassBuilder::new("Known").package("Menu"))
            .unwrap();

        let image = {
            let mut builder = session.package_builder();
            builder.export_class("Known", PackageIndex::Root);
            builder.export_class("Unknown", PackageIndex::Root);
            builder.build().unwrap()
        };
        let linker = session.open_package_from_memory("Menu", image).unwrap();

        let known = session.resolve(linker, PackageIndex::Export(0)).unwrap();
        assert!(session.object(known).unwrap().is_class());

        let unknown = session.resolve(linker, PackageIndex::Export(1));
        assert!(matches!(unknown, Err(Error::ExportDead { index: 1, .. })));
        assert_eq!(session.stats().dead, 1);
        assert!(session.diagnostics().has_errors());
    }

    #[test]
    fn archetype_values_are_inherited() {
        let (mut session, widget) = session_with_widget();
        let image = {
            let defaults = session.classes().defaults(widget).unwrap().clone();
            let mut template_values = defaults.clone();
            template_values.set(0, 0, PropertyValue::Int(40));

            let mut builder = session.package_builder();
            let class = builder.import_class("Engine", "Widget");
            let template = builder.export_object("Template", class, PackageIndex::Root);
            let instance = builder.export_object("Instance", class, PackageIndex::Root);
            builder.set_archetype(instance, template).unwrap();
            builder
                .set_properties(template, widget, &template_values, &defaults)
                .unwrap();
            builder
                .set_properties(instance, widget, &template_values, &template_values)
                .unwrap();
            builder.build().unwrap()
        };
        let linker = session.open_package_from_memory("Menu", image).unwrap();

        let instance = session.resolve(linker, PackageIndex::Export(1)).unwrap();
        assert_eq!(session.property(instance, "Health"), Some(&PropertyValue::Int(40)));
    }

    #[test]
    fn missing_package_is_recoverable() {
        let mut session = LoadSession::new(LoadConfig::default());
        let image = {
            let mut builder = session.package_builder();
            let class = builder.import_class("Nowhere", "Thing");
            builder.export_object("Orphan", class, PackageIndex::Root);
            builder.build().unwrap()
        };
        let linker = session.open_package_from_memory("Menu", image).unwrap();

        let result = session.resolve(linker, PackageIndex::Import(1));
        assert!(matches!(result, Err(Error::PackageNotFound(_))));
        let result = session.resolve(linker, PackageIndex::Export(0));
        assert!(matches!(result, Err(Error::ExportDead { .. })));
        assert_eq!(session.load_depth(), 0);
        assert_eq!(session.pending_loads(), 0);
    }
}
