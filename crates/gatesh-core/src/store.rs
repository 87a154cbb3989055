//! Object store adapter contract and an in-memory implementation.
//!
//! The engine only reads from the store. Adapters must keep "not found"
//! ([`StoreError::NotFound`]) distinct from every other failure
//! ([`StoreError::Transport`]) because the resolver treats the former as an
//! empty result and the latter as a target failure.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::object::{Object, ObjectKey};
use crate::selector::LabelPredicate;

/// Read-only access to cluster objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches a single object by key.
    async fn get(&self, key: &ObjectKey) -> Result<Object, StoreError>;

    /// Lists objects of `api_version`/`kind` whose labels satisfy `predicate`.
    ///
    /// `namespace: None` lists across all namespaces.
    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        predicate: &LabelPredicate,
    ) -> Result<Vec<Object>, StoreError>;
}

#[async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    async fn get(&self, key: &ObjectKey) -> Result<Object, StoreError> {
        (**self).get(key).await
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        predicate: &LabelPredicate,
    ) -> Result<Vec<Object>, StoreError> {
        (**self).list(api_version, kind, namespace, predicate).await
    }
}

/// Process-local object store.
///
/// Listings are ordered by [`ObjectKey`], so results are reproducible across
/// runs regardless of insertion order.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<ObjectKey, Object>>,
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `objects`.
    #[must_use]
    pub fn with_objects(objects: impl IntoIterator<Item = Object>) -> Self {
        let store = Self::new();
        for object in objects {
            store.upsert(object);
        }
        store
    }

    /// Inserts or replaces an object, returning the previous version.
    pub fn upsert(&self, object: Object) -> Option<Object> {
        let key = object.key();
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, object)
    }

    /// Removes an object, returning it if it existed.
    pub fn remove(&self, key: &ObjectKey) -> Option<Object> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &ObjectKey) -> Result<Object, StoreError> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        predicate: &LabelPredicate,
    ) -> Result<Vec<Object>, StoreError> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(objects
            .iter()
            .filter(|(key, _)| key.api_version == api_version && key.kind == kind)
            .filter(|(key, _)| namespace.is_none_or(|ns| key.namespace.as_deref() == Some(ns)))
            .filter(|(_, object)| predicate.matches(&object.labels()))
            .map(|(_, object)| object.clone())
            .collect())
    }
}
