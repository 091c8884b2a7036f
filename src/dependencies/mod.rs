//! Dependency analysis over open packages.
//!
//! The walk reads import and export tables and pre-scans tagged property streams; it never
//! constructs objects. [`gather`] follows edges forward (what does this record need?),
//! [`find_referencers`] answers the reverse question by comparing import identities across
//! every open package.
//!
//! Edges of an export: its class, parent struct, outer, archetype and, optionally, every
//! object reference stored in its properties. Edges of an import: its outer import and,
//! optionally, the export it names in the imported package.

use std::{collections::HashSet, fmt};

use crate::{
    file::parser::Parser,
    package::{
        diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity},
        index::PackageIndex,
        linker::{Linker, LinkerId},
        name::{Name, NAME_PACKAGE},
    },
    property::TaggedCodec,
    session::{LoadSession, PackageSource},
    Result,
};

/// A record of an open package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyRef {
    /// Package holding the record.
    pub linker: LinkerId,
    /// Record inside the package.
    pub index: PackageIndex,
}

impl DependencyRef {
    /// Creates a reference.
    #[must_use]
    pub fn new(linker: LinkerId, index: PackageIndex) -> Self {
        DependencyRef { linker, index }
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.linker, self.index)
    }
}

/// Controls which edges [`gather`] follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyOptions {
    /// Do not report imports that resolve into native packages.
    pub skip_native: bool,
    /// Open imported packages (best effort) and continue into the exports they name.
    pub follow_imports: bool,
    /// Pre-scan property streams for object references.
    pub include_properties: bool,
}

impl Default for DependencyOptions {
    fn default() -> Self {
        DependencyOptions {
            skip_native: true,
            follow_imports: false,
            include_properties: true,
        }
    }
}

struct Frame {
    node: DependencyRef,
    children: Vec<DependencyRef>,
    next: usize,
}

/// Collects everything `root` depends on.
///
/// The result is in post-order: every record appears after all records it depends on. `root`
/// itself is excluded and no record is reported twice. Exports whose class does not resolve
/// (dead exports among them) and, with `skip_native`, native imports are left out together
/// with their own dependencies. Packages holding imported classes may be opened on the way.
///
/// # Errors
/// Returns fatal errors raised by corrupt tables or property streams. Imports that cannot be
/// followed are recorded as diagnostics.
pub fn gather(
    session: &mut LoadSession,
    root: DependencyRef,
    options: &DependencyOptions,
) -> Result<Vec<DependencyRef>> {
    session.linker(root.linker)?;

    let mut visited = HashSet::from([root]);
    let mut output = Vec::new();
    let mut stack = vec![Frame {
        node: root,
        children: edges(session, root, options)?,
        next: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        if frame.next < frame.children.len() {
            let child = frame.children[frame.next];
            frame.next += 1;

            if !visited.insert(child) || !is_reported(session, child, options)? {
                continue;
            }

            let children = edges(session, child, options)?;
            stack.push(Frame {
                node: child,
                children,
                next: 0,
            });
        } else {
            let node = frame.node;
            stack.pop();
            if node != root {
                output.push(node);
            }
        }
    }

    tracing::debug!(
        root = %session.display_path(root),
        count = output.len(),
        "gathered dependencies"
    );

    Ok(output)
}

fn is_reported(session: &mut LoadSession, node: DependencyRef, options: &DependencyOptions) -> Result<bool> {
    match node.index {
        PackageIndex::Root => Ok(false),
        PackageIndex::Export(i) => session.export_class_resolves(node.linker, i),
        PackageIndex::Import(i) => {
            let (package, _) = session.linker(node.linker)?.import_target(i);
            Ok(!(options.skip_native && session.is_native_package(package)))
        }
    }
}

fn edges(session: &mut LoadSession, node: DependencyRef, options: &DependencyOptions) -> Result<Vec<DependencyRef>> {
    let linker = session.linker(node.linker)?;
    let at = |index: PackageIndex| DependencyRef::new(node.linker, index);

    match node.index {
        PackageIndex::Root => Ok(Vec::new()),
        PackageIndex::Export(i) => {
            let export = linker.export(i)?;
            let mut children: Vec<DependencyRef> = [export.class, export.super_index, export.outer, export.archetype]
                .into_iter()
                .filter(|index| !index.is_root())
                .map(at)
                .collect();

            if options.include_properties {
                let data = linker.export_data(i)?;
                if !data.is_empty() {
                    let references = TaggedCodec::scan_references(&mut Parser::new(&data), linker.names())?;
                    children.extend(references.into_iter().map(at));
                }
            }
            Ok(children)
        }
        PackageIndex::Import(i) => {
            let import = linker.import(i)?;
            let mut children = Vec::new();
            if !import.outer.is_root() {
                children.push(at(import.outer));
            }

            if options.follow_imports {
                let class = import.class_name;
                let (package, path) = linker.import_target(i);
                if let Some(target) = follow_import(session, node, package, &path, class)? {
                    children.push(target);
                }
            }
            Ok(children)
        }
    }
}

fn follow_import(
    session: &mut LoadSession,
    node: DependencyRef,
    package: Name,
    path: &[Name],
    class: Name,
) -> Result<Option<DependencyRef>> {
    let target = match session.locate_package(package) {
        Ok(PackageSource::Linker(target)) => target,
        Ok(PackageSource::Native(_)) => return Ok(None),
        Err(error) if error.is_fatal() => return Err(error),
        Err(error) => {
            report_unfollowed(session, node, &error.to_string());
            return Ok(None);
        }
    };

    if path.is_empty() {
        return Ok(Some(DependencyRef::new(target, PackageIndex::Root)));
    }

    match session.linker(target)?.find_export(path, class) {
        Some(export) => Ok(Some(DependencyRef::new(target, PackageIndex::Export(export)))),
        None => {
            report_unfollowed(session, node, "no matching export");
            Ok(None)
        }
    }
}

fn report_unfollowed(session: &LoadSession, node: DependencyRef, reason: &str) {
    let package = session
        .linker(node.linker)
        .map(|l| session.names().display(l.name()))
        .unwrap_or_default();
    session.diagnostics().push(
        Diagnostic::new(
            DiagnosticSeverity::Warning,
            DiagnosticCategory::Dependency,
            format!("Import {} not followed: {}", session.display_path(node), reason),
        )
        .with_package(package),
    );
}

fn identity(linker: &Linker, index: PackageIndex) -> Result<(Name, Vec<Name>, Name)> {
    Ok(match index {
        PackageIndex::Root => (linker.name(), Vec::new(), Name::plain(NAME_PACKAGE)),
        PackageIndex::Export(i) => {
            linker.export(i)?;
            (linker.name(), linker.export_path(i), linker.class_name_of(index))
        }
        PackageIndex::Import(i) => {
            let class = linker.import(i)?.class_name;
            let (package, path) = linker.import_target(i);
            (package, path, class)
        }
    })
}

/// Every import of every open package that names the same object as `target`.
///
/// Identity is the triple (package, object path, class name); the scan is linear in the total
/// size of all import tables.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `target` is not a record of `session`.
pub fn find_referencers(session: &LoadSession, target: DependencyRef) -> Result<Vec<DependencyRef>> {
    let wanted = identity(session.linker(target.linker)?, target.index)?;

    let mut referencers = Vec::new();
    for linker in session.linkers() {
        for i in 0..linker.imports().len() as u32 {
            let candidate = DependencyRef::new(linker.id(), PackageIndex::Import(i));
            if candidate != target && identity(linker, candidate.index)? == wanted {
                referencers.push(candidate);
            }
        }
    }

    Ok(referencers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::config::LoadConfig;
    use crate::property::{ClassBuilder, PropertyBag, PropertyKind, PropertyValue};

    fn widget_session() -> (LoadSession, LinkerId) {
        let mut session = LoadSession::new(LoadConfig::default());
        let gadget_type = session
            .register_class(
                ClassBuilder::new("Gadget")
                    .package("Engine")
                    .field("Target", PropertyKind::Object),
            )
            .unwrap();
        session
            .register_class(ClassBuilder::new("Widget").package("Engine"))
            .unwrap();
        let defaults = session.classes().defaults(gadget_type).unwrap().clone();

        let image = {
            let mut builder = session.package_builder();
            let widget_class = builder.import_class("Engine", "Widget");
            let gadget_class = builder.import_class("Engine", "Gadget");
            let widget = builder.export_object("MyWidget", widget_class, PackageIndex::Root);
            let gadget = builder.export_object("MyGadget", gadget_class, PackageIndex::Root);
            let values = PropertyBag::from_slots(vec![vec![PropertyValue::Object(widget)]]);
            builder
                .set_properties(gadget, gadget_type, &values, &defaults)
                .unwrap();
            builder.build().unwrap()
        };
        let linker = session.open_package_from_memory("Widgets", image).unwrap();
        (session, linker)
    }

    #[test]
    fn native_classes_are_skipped() {
        let (mut session, linker) = widget_session();
        let root = DependencyRef::new(linker, PackageIndex::Export(1));

        let deps = session.gather_dependencies(root, &DependencyOptions::default()).unwrap();
        assert_eq!(deps, vec![DependencyRef::new(linker, PackageIndex::Export(0))]);
    }

    #[test]
    fn native_imports_when_requested() {
        let (mut session, linker) = widget_session();
        let root = DependencyRef::new(linker, PackageIndex::Export(1));
        let options = DependencyOptions {
            skip_native: false,
            ..DependencyOptions::default()
        };

        let deps = session.gather_dependencies(root, &options).unwrap();
        let engine = DependencyRef::new(linker, PackageIndex::Import(0));
        let widget_class = DependencyRef::new(linker, PackageIndex::Import(1));
        let gadget_class = DependencyRef::new(linker, PackageIndex::Import(2));
        let widget = DependencyRef::new(linker, PackageIndex::Export(0));

        assert_eq!(deps, vec![engine, gadget_class, widget_class, widget]);
    }
}
