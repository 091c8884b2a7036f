//! Fixtures shared by the unit tests.

use crate::{
    package::{builder::PackageBuilder, config::LoadConfig},
    property::{ClassBuilder, ClassId, PropertyKind, PropertyValue},
    session::LoadSession,
    Result,
};

/// A session with `Engine.Widget { Health: Int = 100, Target: Object }` registered.
pub fn session_with_widget() -> (LoadSession, ClassId) {
    let mut session = LoadSession::new(LoadConfig::default());
    let widget = session
        .register_class(
            ClassBuilder::new("Widget")
                .package("Engine")
                .field_with_default("Health", PropertyKind::Int, PropertyValue::Int(100))
                .field("Target", PropertyKind::Object),
        )
        .unwrap();
    (session, widget)
}

/// Builds a package image with the session's names and classes.
pub fn build_image<F>(session: &mut LoadSession, fill: F) -> Vec<u8>
where
    F: FnOnce(&mut PackageBuilder<'_>) -> Result<()>,
{
    let mut builder = session.package_builder();
    fill(&mut builder).unwrap();
    builder.build().unwrap()
}
