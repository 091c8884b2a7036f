//! Integration tests for the named resource cache.

use std::{
    any::Any,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use pkgscope::prelude::*;

#[derive(Default)]
struct Counters {
    requested: AtomicU32,
    released: AtomicU32,
}

struct CollisionGroups(Arc<Counters>);

impl ResourceProvider for CollisionGroups {
    fn request_resource(&mut self, name: &str) -> Option<ResourcePayload> {
        self.0.requested.fetch_add(1, Ordering::SeqCst);
        match name {
            "Pawn" => Some(ResourcePayload::Value(1)),
            "Vehicle" => Some(ResourcePayload::Value(2)),
            _ => None,
        }
    }

    fn release_resource(&mut self, _name: &str, _payload: Option<&ResourcePayload>) {
        self.0.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn cache() -> (NamedResourceCache, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let mut cache = NamedResourceCache::new();
    cache.register_provider("CollisionGroup", Box::new(CollisionGroups(counters.clone())));
    (cache, counters)
}

#[test]
fn refcount_releases_exactly_once() -> Result<()> {
    let (mut cache, counters) = cache();
    let payload = ResourcePayload::Value(7);

    cache.set("CollisionGroup", "x", Some(payload.clone()), true);
    cache.set("CollisionGroup", "x", Some(payload), true);

    assert_eq!(cache.release("CollisionGroup", "x")?, 1);
    assert_eq!(counters.released.load(Ordering::SeqCst), 0);

    assert_eq!(cache.release("CollisionGroup", "x")?, 0);
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
    assert!(!cache.contains("CollisionGroup", "x"));

    let third = cache.release("CollisionGroup", "x");
    assert!(matches!(third, Err(Error::ResourceNotFound { .. })));
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);

    // Explicitly set entries never ask the provider.
    assert_eq!(counters.requested.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn namespaces_are_isolated() {
    let mut cache = NamedResourceCache::new();
    let first: Arc<dyn Any + Send + Sync> = Arc::new("material-a");
    let second: Arc<dyn Any + Send + Sync> = Arc::new("material-b");

    cache.set("A", "x", Some(ResourcePayload::Object(first.clone())), false);
    cache.set("B", "x", Some(ResourcePayload::Object(second)), false);

    let a = cache.get("A", "x");
    let b = cache.get("B", "x");
    assert_ne!(a, b);
    assert_eq!(a, Some(ResourcePayload::Object(first)));
    assert_eq!(cache.len(), 2);
}

#[test]
fn provider_runs_once_per_entry_lifetime() -> Result<()> {
    let (mut cache, counters) = cache();

    for _ in 0..3 {
        assert_eq!(cache.get("CollisionGroup", "Pawn"), Some(ResourcePayload::Value(1)));
    }
    assert_eq!(counters.requested.load(Ordering::SeqCst), 1);
    assert_eq!(cache.ref_count("CollisionGroup", "Pawn"), Some(3));

    // Unknown names are cached as "no resource".
    assert_eq!(cache.get("CollisionGroup", "Ghost"), None);
    assert_eq!(cache.get("CollisionGroup", "Ghost"), None);
    assert_eq!(counters.requested.load(Ordering::SeqCst), 2);

    for remaining in (0..3).rev() {
        assert_eq!(cache.release("CollisionGroup", "Pawn")?, remaining);
    }
    assert_eq!(cache.find_resource_u32("CollisionGroup", "Pawn"), None);

    cache.get("CollisionGroup", "Pawn");
    assert_eq!(counters.requested.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn lookups_without_population() {
    let (mut cache, counters) = cache();

    assert_eq!(cache.find_resource("CollisionGroup", "Vehicle"), None);
    assert_eq!(counters.requested.load(Ordering::SeqCst), 0);

    cache.get("CollisionGroup", "Vehicle");
    assert_eq!(cache.find_resource_u32("CollisionGroup", "Vehicle"), Some(2));
    assert_eq!(cache.ref_count("CollisionGroup", "Vehicle"), Some(1));
    assert_eq!(counters.requested.load(Ordering::SeqCst), 1);
}

#[test]
fn namespace_without_provider_caches_nothing_found() {
    let mut cache = NamedResourceCache::new();

    assert_eq!(cache.get("Unregistered", "x"), None);
    assert!(cache.contains("Unregistered", "x"));
    assert_eq!(cache.ref_count("Unregistered", "x"), Some(1));
    assert!(!cache.is_empty());
}
