//! Named resource cache.
//!
//! A namespaced, reference-counted map from symbolic names to opaque payloads, populated on
//! demand by per-namespace [`ResourceProvider`]s. It is independent of the package format and
//! serves handles that do not belong to any one package (collision groups, material names).
//!
//! # Entry lifecycle
//!
//! ```text
//! get() on missing entry ──► request_resource() ──► cached (payload or "no resource")
//!                                                        │
//!                          release() reaches zero ◄──────┘
//!                                   │
//!                          release_resource() ──► removed
//! ```
//!
//! The population callback runs at most once per entry lifetime. A cached "no resource" is a
//! valid result, not an error. The cache does no locking; callers that share it across threads
//! must synchronise access themselves.
//!
//! # Examples
//!
//! ```rust
//! use pkgscope::resources::{NamedResourceCache, ResourcePayload, ResourceProvider};
//!
//! struct Groups;
//!
//! impl ResourceProvider for Groups {
//!     fn request_resource(&mut self, name: &str) -> Option<ResourcePayload> {
//!         (name == "Pawn").then_some(ResourcePayload::Value(3))
//!     }
//! }
//!
//! let mut cache = NamedResourceCache::new();
//! cache.register_provider("CollisionGroup", Box::new(Groups));
//!
//! assert_eq!(cache.get("CollisionGroup", "Pawn"), Some(ResourcePayload::Value(3)));
//! assert_eq!(cache.find_resource_u32("CollisionGroup", "Pawn"), Some(3));
//! assert_eq!(cache.release("CollisionGroup", "Pawn")?, 0);
//! # Ok::<(), pkgscope::Error>(())
//! ```

use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use crate::{Error, Result};

/// Value stored for a name.
#[derive(Clone)]
pub enum ResourcePayload {
    /// A shared object.
    Object(Arc<dyn Any + Send + Sync>),
    /// A plain number.
    Value(u32),
}

impl ResourcePayload {
    /// The number, for [`ResourcePayload::Value`].
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            ResourcePayload::Value(value) => Some(*value),
            ResourcePayload::Object(_) => None,
        }
    }

    /// Downcasts an object payload.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            ResourcePayload::Object(object) => object.downcast_ref::<T>(),
            ResourcePayload::Value(_) => None,
        }
    }
}

impl PartialEq for ResourcePayload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ResourcePayload::Object(a), ResourcePayload::Object(b)) => Arc::ptr_eq(a, b),
            (ResourcePayload::Value(a), ResourcePayload::Value(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for ResourcePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourcePayload::Object(object) => write!(f, "Object({:p})", Arc::as_ptr(object)),
            ResourcePayload::Value(value) => write!(f, "Value({value})"),
        }
    }
}

/// Populates and releases the entries of one namespace.
pub trait ResourceProvider {
    /// Produces the payload for `name`, or `None` if there is no such resource.
    fn request_resource(&mut self, name: &str) -> Option<ResourcePayload>;

    /// Called once when the last reference to an entry is released.
    fn release_resource(&mut self, _name: &str, _payload: Option<&ResourcePayload>) {}
}

/// One cached name.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedResourceEntry {
    /// Cached payload; `None` caches "no resource".
    pub payload: Option<ResourcePayload>,
    /// Outstanding references.
    pub ref_count: u32,
    /// Reserved by [`NamedResourceCache::set`] without a payload; the next `get` populates it.
    pub pending: bool,
}

/// Namespaced, refcounted, lazily populated name cache.
#[derive(Default)]
pub struct NamedResourceCache {
    providers: HashMap<String, Box<dyn ResourceProvider>>,
    namespaces: HashMap<String, HashMap<String, NamedResourceEntry>>,
}

impl fmt::Debug for NamedResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedResourceCache")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("namespaces", &self.namespaces)
            .finish()
    }
}

impl NamedResourceCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the provider of a namespace, replacing any previous one.
    pub fn register_provider(&mut self, namespace: &str, provider: Box<dyn ResourceProvider>) {
        self.providers.insert(namespace.to_string(), provider);
    }

    /// Returns the payload for `(namespace, name)` and takes one reference.
    ///
    /// Missing (or pending) entries are populated through the namespace's provider; without a
    /// provider the entry caches "no resource".
    pub fn get(&mut self, namespace: &str, name: &str) -> Option<ResourcePayload> {
        let entries = self.namespaces.entry(namespace.to_string()).or_default();

        if let Some(entry) = entries.get_mut(name) {
            if !entry.pending {
                entry.ref_count = entry.ref_count.saturating_add(1);
                return entry.payload.clone();
            }
        }

        let payload = self
            .providers
            .get_mut(namespace)
            .and_then(|provider| provider.request_resource(name));

        tracing::debug!(namespace, name, found = payload.is_some(), "populated named resource");

        let entry = entries.entry(name.to_string()).or_insert(NamedResourceEntry {
            payload: None,
            ref_count: 0,
            pending: true,
        });
        entry.payload = payload;
        entry.pending = false;
        entry.ref_count = entry.ref_count.saturating_add(1);
        entry.payload.clone()
    }

    /// Inserts or overwrites an entry.
    ///
    /// With `inc_ref_count` the entry gains a reference; otherwise the count is unchanged, which
    /// registers the payload without owning it. A `None` payload reserves the entry for the
    /// provider.
    pub fn set(&mut self, namespace: &str, name: &str, payload: Option<ResourcePayload>, inc_ref_count: bool) {
        let entry = self
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .entry(name.to_string())
            .or_insert(NamedResourceEntry {
                payload: None,
                ref_count: 0,
                pending: false,
            });

        entry.pending = payload.is_none();
        entry.payload = payload;
        if inc_ref_count {
            entry.ref_count = entry.ref_count.saturating_add(1);
        }
    }

    /// Drops one reference and returns the remaining count.
    ///
    /// When the count reaches zero the provider's release callback runs once and the entry is
    /// removed.
    ///
    /// # Errors
    /// Returns [`crate::Error::ResourceNotFound`] if the entry does not exist.
    pub fn release(&mut self, namespace: &str, name: &str) -> Result<u32> {
        let not_found = || Error::ResourceNotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };

        let entries = self.namespaces.get_mut(namespace).ok_or_else(not_found)?;
        let entry = entries.get_mut(name).ok_or_else(not_found)?;

        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count > 0 {
            return Ok(entry.ref_count);
        }

        if let Some(entry) = entries.remove(name) {
            if entries.is_empty() {
                self.namespaces.remove(namespace);
            }
            if let Some(provider) = self.providers.get_mut(namespace) {
                provider.release_resource(name, entry.payload.as_ref());
            }
            tracing::debug!(namespace, name, "released named resource");
        }
        Ok(0)
    }

    /// Returns the cached payload without populating or taking a reference.
    #[must_use]
    pub fn find_resource(&self, namespace: &str, name: &str) -> Option<&ResourcePayload> {
        self.entry(namespace, name)?.payload.as_ref()
    }

    /// Returns a cached number without populating or taking a reference.
    #[must_use]
    pub fn find_resource_u32(&self, namespace: &str, name: &str) -> Option<u32> {
        self.find_resource(namespace, name)?.as_u32()
    }

    /// Returns an entry.
    #[must_use]
    pub fn entry(&self, namespace: &str, name: &str) -> Option<&NamedResourceEntry> {
        self.namespaces.get(namespace)?.get(name)
    }

    /// Outstanding references of an entry, `None` if it does not exist.
    #[must_use]
    pub fn ref_count(&self, namespace: &str, name: &str) -> Option<u32> {
        self.entry(namespace, name).map(|entry| entry.ref_count)
    }

    /// Returns `true` if the entry exists.
    #[must_use]
    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.entry(namespace, name).is_some()
    }

    /// Number of entries across all namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces.values().map(HashMap::len).sum()
    }

    /// Returns `true` if no entry exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
