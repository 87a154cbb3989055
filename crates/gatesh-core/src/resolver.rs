//! Target resolution: declarative selector to concrete object set.

use tracing::debug;

use crate::error::ResolveError;
use crate::object::{Object, ObjectKey};
use crate::policy::TargetSelector;
use crate::selector::GroupVersion;
use crate::store::ObjectStore;

/// Resolves target selectors against an [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct TargetResolver<S> {
    store: S,
}

impl<S: ObjectStore> TargetResolver<S> {
    /// Creates a resolver over `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Resolves `selector` into its (possibly empty) object set.
    ///
    /// The selector's namespace wins over `default_namespace`; with neither,
    /// a name lookup addresses a cluster-scoped object and a label listing
    /// spans every namespace. A missing named object is an empty set.
    ///
    /// # Errors
    ///
    /// [`ResolveError::InvalidSelector`] for a malformed `apiVersion`, for
    /// both or neither of `name` and `labelSelector`, or a malformed label
    /// selector. [`ResolveError::Store`] for transport failures.
    pub async fn resolve(
        &self,
        selector: &TargetSelector,
        default_namespace: Option<&str>,
    ) -> Result<Vec<Object>, ResolveError> {
        let gv = GroupVersion::parse(&selector.api_version)?;
        if selector.kind.trim().is_empty() {
            return Err(ResolveError::invalid_selector("kind must not be empty"));
        }

        let name = selector.name.as_deref().filter(|n| !n.is_empty());
        let labels = selector.label_selector.as_ref().filter(|l| !l.is_empty());
        let namespace = selector
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .or(default_namespace)
            .filter(|ns| !ns.is_empty());

        match (name, labels) {
            (Some(_), Some(_)) => Err(ResolveError::invalid_selector(
                "name and labelSelector are mutually exclusive",
            )),
            (None, None) => Err(ResolveError::invalid_selector(
                "either name or labelSelector must be specified",
            )),
            (Some(name), None) => {
                let key = ObjectKey::new(gv.to_string(), selector.kind.as_str(), namespace, name);
                match self.store.get(&key).await {
                    Ok(object) => Ok(vec![object]),
                    Err(err) if err.is_not_found() => {
                        debug!(%key, "named target object not found");
                        Ok(Vec::new())
                    },
                    Err(err) => Err(err.into()),
                }
            },
            (None, Some(labels)) => {
                let predicate = labels.to_predicate()?;
                let objects = self
                    .store
                    .list(&gv.to_string(), &selector.kind, namespace, &predicate)
                    .await?;
                debug!(
                    kind = %selector.kind,
                    api_version = %gv,
                    namespace = namespace.unwrap_or("*"),
                    found = objects.len(),
                    "listed target objects"
                );
                Ok(objects)
            },
        }
    }
}
