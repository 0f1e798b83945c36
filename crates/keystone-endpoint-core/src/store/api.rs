//! Typed, namespaced access to a [`ResourceStore`]

use crate::Result;
use crate::resource::{ObjectKey, Resource};
use crate::traits::ResourceStore;
use std::marker::PhantomData;
use std::sync::Arc;

/// Handle for one object kind in one namespace
///
/// ```rust,ignore
/// let services = Api::<KeystoneService>::namespaced(store.clone(), "openstack");
/// let nova = services.find(|s| s.spec.service_name == "nova").await?;
/// ```
pub struct Api<K> {
    store: Arc<dyn ResourceStore>,
    namespace: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for Api<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            namespace: self.namespace.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: Resource> Api<K> {
    pub fn namespaced(store: Arc<dyn ResourceStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            _kind: PhantomData,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, name: &str) -> ObjectKey {
        ObjectKey::new(K::KIND, &self.namespace, name)
    }

    /// Get an object by name; `Ok(None)` when it does not exist
    pub async fn get(&self, name: &str) -> Result<Option<K>> {
        self.store
            .get(&self.key(name))
            .await?
            .map(K::from_raw)
            .transpose()
    }

    /// List all objects of this kind in the namespace, ordered by name
    pub async fn list(&self) -> Result<Vec<K>> {
        let mut objects = Vec::new();
        for key in self.store.list(K::KIND).await? {
            if key.namespace != self.namespace {
                continue;
            }
            // Removed between list and get
            if let Some(raw) = self.store.get(&key).await? {
                objects.push(K::from_raw(raw)?);
            }
        }
        Ok(objects)
    }

    /// First object, by name order, matching `predicate`
    pub async fn find(&self, predicate: impl Fn(&K) -> bool) -> Result<Option<K>> {
        Ok(self.list().await?.into_iter().find(|o| predicate(o)))
    }

    pub async fn create(&self, object: &K) -> Result<K> {
        let stored = self.store.create(self.owned_raw(object)?).await?;
        K::from_raw(stored)
    }

    /// Write metadata and spec; `Ok(None)` when the object was removed
    /// because its last finalizer was released.
    pub async fn update(&self, object: &K) -> Result<Option<K>> {
        self.store
            .update(self.owned_raw(object)?)
            .await?
            .map(K::from_raw)
            .transpose()
    }

    pub async fn patch_status(&self, object: &K) -> Result<K> {
        let stored = self.store.patch_status(self.owned_raw(object)?).await?;
        K::from_raw(stored)
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.store.delete(&self.key(name)).await
    }

    fn owned_raw(&self, object: &K) -> Result<crate::resource::RawObject> {
        if object.meta().namespace != self.namespace {
            return Err(crate::Error::invalid_input(format!(
                "{} belongs to namespace {}, not {}",
                object.key(),
                object.meta().namespace,
                self.namespace
            )));
        }
        object.to_raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{KeystoneService, KeystoneServiceSpec};
    use crate::store::MemoryResourceStore;

    fn service(namespace: &str, name: &str, service_name: &str) -> KeystoneService {
        KeystoneService::new(
            namespace,
            name,
            KeystoneServiceSpec {
                service_name: service_name.to_string(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_namespace() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryResourceStore::new());
        let openstack = Api::<KeystoneService>::namespaced(store.clone(), "openstack");
        let other = Api::<KeystoneService>::namespaced(store.clone(), "other");

        openstack.create(&service("openstack", "nova", "nova")).await.unwrap();
        other.create(&service("other", "glance", "glance")).await.unwrap();

        let names: Vec<_> = openstack
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.metadata.name)
            .collect();
        assert_eq!(names, vec!["nova"]);
    }

    #[tokio::test]
    async fn test_find_by_spec_field() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryResourceStore::new());
        let services = Api::<KeystoneService>::namespaced(store, "openstack");
        services.create(&service("openstack", "compute", "nova")).await.unwrap();

        let found = services
            .find(|s| s.spec.service_name == "nova")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.metadata.name, "compute");
        assert!(services.find(|s| s.spec.service_name == "glance").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_object_from_other_namespace() {
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryResourceStore::new());
        let services = Api::<KeystoneService>::namespaced(store, "openstack");

        let err = services.create(&service("other", "nova", "nova")).await.unwrap_err();
        assert!(matches!(err, crate::Error::InvalidInput(_)));
    }
}
