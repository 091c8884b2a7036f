//! Integration tests for cross-package resolution and dependency analysis.

use std::path::Path;

use pkgscope::prelude::*;

fn register_engine(session: &mut LoadSession) -> Result<ClassId> {
    session.register_class(ClassBuilder::new("Gadget").package("Engine"))?;
    session.register_class(
        ClassBuilder::new("Widget")
            .package("Engine")
            .field_with_default("Health", PropertyKind::Int, PropertyValue::Int(100))
            .field("Target", PropertyKind::Object),
    )
}

/// `Shared` holds one widget, `Theme`, at its top level.
fn write_shared(dir: &Path) -> Result<()> {
    let mut session = LoadSession::new(LoadConfig::default());
    register_engine(&mut session)?;

    let mut builder = session.package_builder();
    let class = builder.import_class("Engine", "Widget");
    builder.export_object("Theme", class, PackageIndex::Root);
    std::fs::write(dir.join("Shared.pkg"), builder.build()?)?;
    Ok(())
}

/// A package whose only export, `Button`, targets `Shared.Theme`.
///
/// Imports: 0 = package `Shared`, 1 = package `Engine`, 2 = class `Widget`, 3 = `Shared.Theme`.
fn importer_image(session: &mut LoadSession, widget: ClassId) -> Result<Vec<u8>> {
    let defaults = session.classes().defaults(widget)?.clone();

    let mut builder = session.package_builder();
    let shared = builder.import_package("Shared");
    let class = builder.import_class("Engine", "Widget");
    let theme = builder.import("Engine", "Widget", shared, "Theme");
    let button = builder.export_object("Button", class, PackageIndex::Root);

    let mut values = defaults.clone();
    values.set(1, 0, PropertyValue::Object(theme));
    builder.set_properties(button, widget, &values, &defaults)?;
    builder.build()
}

#[test]
fn widget_gadget_scenario() -> Result<()> {
    let mut session = LoadSession::new(LoadConfig::default());
    register_engine(&mut session)?;

    let image = {
        let mut builder = session.package_builder();
        let widget = builder.export_class("Widget", PackageIndex::Root);
        let gadget = builder.export_class("Gadget", PackageIndex::Root);
        builder.set_archetype(gadget, widget)?;
        builder.build()?
    };
    let linker = session.open_package_from_memory("Widgets", image)?;

    let deps = session.gather_dependencies(
        DependencyRef::new(linker, PackageIndex::Export(1)),
        &DependencyOptions::default(),
    )?;
    assert_eq!(deps, vec![DependencyRef::new(linker, PackageIndex::Export(0))]);
    assert_eq!(session.stats().constructed, 0);

    let first = session.resolve(linker, PackageIndex::Export(1))?;
    let second = session.resolve(linker, PackageIndex::Export(1))?;
    assert_eq!(first, second);

    let stats = session.stats();
    assert_eq!(stats.constructed, 2);
    assert_eq!(stats.properties_loaded, 2);

    let gadget = session.object(first)?;
    assert!(gadget.is_class());
    let widget = gadget.archetype.unwrap();
    assert_eq!(session.names().display(session.object(widget)?.name), "Widget");
    assert_eq!(session.resolve(linker, PackageIndex::Export(0))?, widget);
    assert_eq!(session.stats().constructed, 2);
    Ok(())
}

#[test]
fn archetype_class_cycle_terminates() -> Result<()> {
    let mut session = LoadSession::new(LoadConfig::default());
    register_engine(&mut session)?;

    // Gadget's archetype is an instance of Gadget.
    let image = {
        let mut builder = session.package_builder();
        let gadget = builder.export_class("Gadget", PackageIndex::Root);
        let thing = builder.export_object("Thing", gadget, PackageIndex::Root);
        builder.set_archetype(gadget, thing)?;
        builder.build()?
    };
    let linker = session.open_package_from_memory("Loop", image)?;
    let at = |index| DependencyRef::new(linker, index);

    let options = DependencyOptions::default();
    assert_eq!(
        session.gather_dependencies(at(PackageIndex::Export(1)), &options)?,
        vec![at(PackageIndex::Export(0))]
    );
    assert_eq!(
        session.gather_dependencies(at(PackageIndex::Export(0)), &options)?,
        vec![at(PackageIndex::Export(1))]
    );

    let thing = session.resolve(linker, PackageIndex::Export(1))?;
    let gadget = session.resolve(linker, PackageIndex::Export(0))?;
    assert_eq!(session.object(thing)?.class_object, Some(gadget));
    assert_eq!(session.object(gadget)?.archetype, Some(thing));
    assert_eq!(session.stats().constructed, 2);
    assert_eq!(session.object(thing)?.state, ExportState::PropertiesLoaded);
    Ok(())
}

#[test]
fn dead_exports_do_not_poison_siblings() -> Result<()> {
    let mut session = LoadSession::new(LoadConfig::default());
    register_engine(&mut session)?;

    let image = {
        let mut builder = session.package_builder();
        let missing = builder.import_class("Engine", "Missing");
        let widget = builder.import_class("Engine", "Widget");
        builder.export_object("Broken", missing, PackageIndex::Root);
        builder.export_object("Fine", widget, PackageIndex::Root);
        let child = builder.export_object("Child", widget, PackageIndex::Root);
        builder.set_archetype(child, PackageIndex::Export(0))?;
        builder.build()?
    };
    let linker = session.open_package_from_memory("Menu", image)?;

    let broken = session.resolve(linker, PackageIndex::Export(0));
    assert!(matches!(broken, Err(Error::ExportDead { index: 0, .. })));
    assert!(!broken.unwrap_err().is_fatal());

    let fine = session.resolve(linker, PackageIndex::Export(1))?;
    assert_eq!(session.property(fine, "Health"), Some(&PropertyValue::Int(100)));

    let child = session.resolve(linker, PackageIndex::Export(2))?;
    assert_eq!(session.object(child)?.archetype, None);
    assert_eq!(session.object(child)?.state, ExportState::PropertiesLoaded);

    let again = session.resolve(linker, PackageIndex::Export(0));
    assert!(matches!(again, Err(Error::ExportDead { .. })));
    assert_eq!(session.stats().dead, 1);
    assert_eq!(session.linker(linker)?.exports()[0].state, ExportState::Dead);

    let deps = session.gather_dependencies(
        DependencyRef::new(linker, PackageIndex::Export(2)),
        &DependencyOptions::default(),
    )?;
    assert!(deps.is_empty());
    assert!(session.diagnostics().has_errors());
    assert!(session.diagnostics().has_warnings());
    Ok(())
}

#[test]
fn imports_open_packages_from_search_paths() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_shared(dir.path())?;

    let mut session = LoadSession::new(LoadConfig::default().with_search_path(dir.path()));
    let widget = register_engine(&mut session)?;
    let image = importer_image(&mut session, widget)?;
    let menu = session.open_package_from_memory("Menu", image)?;
    assert!(session.find_package("Shared").is_none());

    let button = session.resolve(menu, PackageIndex::Export(0))?;
    let shared = session.find_package("Shared").unwrap();
    assert_eq!(session.linker(shared)?.path(), Some(dir.path().join("Shared.pkg").as_path()));

    let theme = session.resolve(shared, PackageIndex::Export(0))?;
    assert_eq!(session.object(button)?.references, vec![theme]);
    assert_eq!(session.resolve(menu, PackageIndex::Import(3))?, theme);

    let stats = session.stats();
    assert_eq!(stats.packages_opened, 2);
    assert_eq!(stats.constructed, 2);
    Ok(())
}

#[test]
fn packages_open_once() -> Result<()> {
    let mut session = LoadSession::new(LoadConfig::default());
    let widget = register_engine(&mut session)?;

    let shared = {
        let mut builder = session.package_builder();
        let class = builder.import_class("Engine", "Widget");
        builder.export_object("Theme", class, PackageIndex::Root);
        builder.build()?
    };
    session.register_memory_package("Shared", shared);

    let menu = importer_image(&mut session, widget)?;
    let hud = importer_image(&mut session, widget)?;
    let menu = session.open_package_from_memory("Menu", menu)?;
    let hud = session.open_package_from_memory("Hud", hud)?;

    let from_menu = session.resolve(menu, PackageIndex::Import(3))?;
    let from_hud = session.resolve(hud, PackageIndex::Import(3))?;
    assert_eq!(from_menu, from_hud);

    let stats = session.stats();
    assert_eq!(stats.packages_opened, 3);
    // Both `Theme` imports plus the class import inside `Shared`.
    assert_eq!(stats.imports_resolved, 3);
    assert_eq!(stats.constructed, 1);

    session.reset_loaders();
    assert_eq!(session.resolve(menu, PackageIndex::Import(3))?, from_menu);
    assert_eq!(session.stats().imports_resolved, 4);
    assert_eq!(session.stats().constructed, 1);
    Ok(())
}

#[test]
fn referencers_span_packages() -> Result<()> {
    let mut session = LoadSession::new(LoadConfig::default());
    let widget = register_engine(&mut session)?;

    let shared = {
        let mut builder = session.package_builder();
        let class = builder.import_class("Engine", "Widget");
        builder.export_object("Theme", class, PackageIndex::Root);
        builder.build()?
    };
    let menu = importer_image(&mut session, widget)?;
    let hud = importer_image(&mut session, widget)?;
    let shared = session.open_package_from_memory("Shared", shared)?;
    let menu = session.open_package_from_memory("Menu", menu)?;
    let hud = session.open_package_from_memory("Hud", hud)?;

    let theme = DependencyRef::new(shared, PackageIndex::Export(0));
    let referencers = session.find_referencers(theme)?;
    assert_eq!(
        referencers,
        vec![
            DependencyRef::new(menu, PackageIndex::Import(3)),
            DependencyRef::new(hud, PackageIndex::Import(3)),
        ]
    );

    // Nothing was loaded to answer the query.
    assert_eq!(session.stats().constructed, 0);
    Ok(())
}

#[test]
fn unresolvable_classes_are_skipped_before_loading() -> Result<()> {
    let mut session = LoadSession::new(LoadConfig::default());
    register_engine(&mut session)?;

    let image = {
        let mut builder = session.package_builder();
        let gizmo = builder.import_class("Addons", "Gizmo");
        let widget = builder.import_class("Engine", "Widget");
        let broken = builder.export_object("Broken", gizmo, PackageIndex::Root);
        let holder = builder.export_object("Holder", widget, PackageIndex::Root);
        builder.set_archetype(holder, broken)?;
        builder.build()?
    };
    let linker = session.open_package_from_memory("Menu", image)?;

    // Nothing was resolved yet, so `Broken` is not known to be dead.
    let deps = session.gather_dependencies(
        DependencyRef::new(linker, PackageIndex::Export(1)),
        &DependencyOptions::default(),
    )?;
    assert!(deps.is_empty());
    assert_eq!(session.stats().constructed, 0);
    assert_eq!(session.linker(linker)?.exports()[0].state, ExportState::Unloaded);
    assert!(session.find_package("Addons").is_none());

    let options = DependencyOptions {
        skip_native: false,
        ..DependencyOptions::default()
    };
    let deps = session.gather_dependencies(DependencyRef::new(linker, PackageIndex::Export(1)), &options)?;
    assert!(!deps.contains(&DependencyRef::new(linker, PackageIndex::Export(0))));
    Ok(())
}

#[test]
fn followed_imports_reach_into_other_packages() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_shared(dir.path())?;

    let mut session = LoadSession::new(LoadConfig::default().with_search_path(dir.path()));
    let widget = register_engine(&mut session)?;
    let image = importer_image(&mut session, widget)?;
    let menu = session.open_package_from_memory("Menu", image)?;
    let button = DependencyRef::new(menu, PackageIndex::Export(0));

    let local = session.gather_dependencies(button, &DependencyOptions::default())?;
    assert_eq!(
        local,
        vec![
            DependencyRef::new(menu, PackageIndex::Import(0)),
            DependencyRef::new(menu, PackageIndex::Import(3)),
        ]
    );

    let options = DependencyOptions {
        follow_imports: true,
        ..DependencyOptions::default()
    };
    let followed = session.gather_dependencies(button, &options)?;
    let shared = session.find_package("Shared").unwrap();
    assert_eq!(
        followed,
        vec![
            DependencyRef::new(menu, PackageIndex::Import(0)),
            DependencyRef::new(shared, PackageIndex::Export(0)),
            DependencyRef::new(menu, PackageIndex::Import(3)),
        ]
    );
    assert_eq!(session.stats().constructed, 0);
    Ok(())
}

#[test]
fn unfollowable_imports_are_reported() -> Result<()> {
    let mut session = LoadSession::new(LoadConfig::default());
    let widget = register_engine(&mut session)?;
    let image = importer_image(&mut session, widget)?;
    let menu = session.open_package_from_memory("Menu", image)?;

    let options = DependencyOptions {
        follow_imports: true,
        ..DependencyOptions::default()
    };
    let deps = session.gather_dependencies(DependencyRef::new(menu, PackageIndex::Export(0)), &options)?;
    assert_eq!(deps.len(), 2);
    assert!(!session
        .diagnostics()
        .by_category(DiagnosticCategory::Dependency)
        .is_empty());
    Ok(())
}

#[test]
fn grouped_resolves_share_one_transaction() -> Result<()> {
    let mut session = LoadSession::new(LoadConfig::default());
    register_engine(&mut session)?;

    let image = {
        let mut builder = session.package_builder();
        let class = builder.import_class("Engine", "Widget");
        builder.export_object("A", class, PackageIndex::Root);
        builder.export_object("B", class, PackageIndex::Root);
        builder.build()?
    };
    let linker = session.open_package_from_memory("Menu", image)?;

    session.begin_load();
    let a = session.resolve(linker, PackageIndex::Export(0))?;
    let b = session.resolve(linker, PackageIndex::Export(1))?;
    assert_eq!(session.pending_loads(), 2);
    assert_eq!(session.stats().properties_loaded, 0);
    session.end_load()?;

    assert_eq!(session.pending_loads(), 0);
    assert_eq!(session.object(a)?.state, ExportState::PropertiesLoaded);
    assert_eq!(session.object(b)?.state, ExportState::PropertiesLoaded);
    assert!(matches!(session.end_load(), Err(Error::LoadTransaction(_))));
    Ok(())
}

#[test]
fn class_changes_between_save_and_load() -> Result<()> {
    let mut writer = LoadSession::new(LoadConfig::default());
    let old = writer.register_class(
        ClassBuilder::new("Widget")
            .package("Engine")
            .field("Health", PropertyKind::Byte)
            .field("Legacy", PropertyKind::Int),
    )?;
    let image = {
        let defaults = writer.classes().defaults(old)?.clone();
        let values = PropertyBag::from_slots(vec![vec![PropertyValue::Byte(7)], vec![PropertyValue::Int(3)]]);
        let mut builder = writer.package_builder();
        let class = builder.import_class("Engine", "Widget");
        let button = builder.export_object("Button", class, PackageIndex::Root);
        builder.set_properties(button, old, &values, &defaults)?;
        builder.build()?
    };

    let mut reader = LoadSession::new(LoadConfig::default());
    reader.register_class(
        ClassBuilder::new("Widget")
            .package("Engine")
            .field_with_default("Armor", PropertyKind::Int, PropertyValue::Int(50))
            .field("Health", PropertyKind::Int64),
    )?;
    let menu = reader.open_package_from_memory("Menu", image.clone())?;
    let button = reader.resolve(menu, PackageIndex::Export(0))?;
    assert_eq!(reader.property(button, "Health"), Some(&PropertyValue::Int64(7)));
    assert_eq!(reader.property(button, "Armor"), Some(&PropertyValue::Int(50)));
    assert_eq!(reader.diagnostics().by_category(DiagnosticCategory::Property).len(), 1);

    let mut strict = LoadSession::new(LoadConfig::strict());
    strict.register_class(ClassBuilder::new("Widget").package("Engine").field("Health", PropertyKind::Int))?;
    let menu = strict.open_package_from_memory("Menu", image)?;
    let button = strict.resolve(menu, PackageIndex::Export(0))?;
    assert_eq!(strict.object(button)?.state, ExportState::Constructed);
    assert!(strict.diagnostics().has_errors());
    Ok(())
}
