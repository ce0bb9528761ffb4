//! Reverse index from backend Services to the mappings that reference them
//!
//! A mapping's registration depends on its backend Service (the proxy target
//! port comes from it), but the mapping object does not change when the
//! Service does. The Service watch uses this index to requeue the affected
//! mappings.

use std::collections::BTreeSet;

use dashmap::DashMap;
use kube::ResourceExt;

use crate::crd::TCPIngressMapping;
use crate::reference::ObjectKey;

/// Thread-safe multimap `backend namespace/name -> mappings`
#[derive(Debug, Default)]
pub struct MappingIndex {
    by_backend: DashMap<ObjectKey, BTreeSet<ObjectKey>>,
    backend_of: DashMap<ObjectKey, ObjectKey>,
}

impl MappingIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a full set of mappings
    pub fn from_mappings<'a>(mappings: impl IntoIterator<Item = &'a TCPIngressMapping>) -> Self {
        let index = Self::new();
        for mapping in mappings {
            index.put_mapping(mapping);
        }
        index
    }

    /// Record (or move) a mapping under its current backend
    pub fn put_mapping(&self, mapping: &TCPIngressMapping) {
        if let Some((key, backend)) = keys_for(mapping) {
            self.put(key, backend);
        }
    }

    /// Record `mapping` as referencing `backend`, replacing any previous backend
    pub fn put(&self, mapping: ObjectKey, backend: ObjectKey) {
        let previous = self.backend_of.insert(mapping.clone(), backend.clone());
        if let Some(previous) = previous.filter(|p| *p != backend) {
            self.detach(&mapping, &previous);
        }
        self.by_backend.entry(backend).or_default().insert(mapping);
    }

    /// Forget a mapping entirely
    pub fn remove(&self, mapping: &ObjectKey) {
        if let Some((_, backend)) = self.backend_of.remove(mapping) {
            self.detach(mapping, &backend);
        }
    }

    /// Mappings whose backend is `backend`, in a stable order
    pub fn mappings_for(&self, backend: &ObjectKey) -> Vec<ObjectKey> {
        self.by_backend
            .get(backend)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of indexed mappings
    pub fn len(&self) -> usize {
        self.backend_of.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.backend_of.is_empty()
    }

    fn detach(&self, mapping: &ObjectKey, backend: &ObjectKey) {
        self.by_backend.remove_if_mut(backend, |_, set| {
            set.remove(mapping);
            set.is_empty()
        });
    }
}

/// The mapping's own key and the key of the backend Service it references
pub fn keys_for(mapping: &TCPIngressMapping) -> Option<(ObjectKey, ObjectKey)> {
    let namespace = mapping.namespace()?;
    let backend_namespace = mapping
        .spec
        .backend_ref
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(&namespace)
        .to_string();
    Some((
        ObjectKey::new(namespace.clone(), mapping.name_any()),
        ObjectKey::new(backend_namespace, mapping.spec.backend_ref.name.clone()),
    ))
}
