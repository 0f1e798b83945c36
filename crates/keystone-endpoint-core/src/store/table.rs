//! Object table shared by the store implementations
//!
//! Holds the stored objects and applies the platform rules: resource
//! versions, generations, status-only patches, and finalizer-aware deletion.

use crate::resource::{Lifecycle, ObjectKey, RawObject, ResourceKind};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ObjectTable {
    #[serde(default)]
    last_resource_version: u64,
    #[serde(default, with = "objects_as_list")]
    objects: BTreeMap<ObjectKey, RawObject>,
}

impl ObjectTable {
    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }

    pub(crate) fn get(&self, key: &ObjectKey) -> Option<RawObject> {
        self.objects.get(key).cloned()
    }

    pub(crate) fn create(&mut self, mut object: RawObject) -> Result<RawObject, Error> {
        let key = object.key();
        if key.name.is_empty() || key.namespace.is_empty() {
            return Err(Error::invalid_input(format!(
                "object needs a namespace and a name: {key}"
            )));
        }
        if self.objects.contains_key(&key) {
            return Err(Error::already_exists(key.to_string()));
        }

        object.metadata.generation = 1;
        object.metadata.resource_version = self.next_resource_version();
        object.metadata.lifecycle = Lifecycle::Active;
        self.objects.insert(key, object.clone());
        Ok(object)
    }

    /// Apply a metadata+spec update. `None` means the object was removed.
    pub(crate) fn update(&mut self, object: RawObject) -> Result<Option<RawObject>, Error> {
        let key = object.key();
        let version = self.next_resource_version();
        let stored = self
            .objects
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(key.to_string()))?;

        if stored.metadata.resource_version != object.metadata.resource_version {
            return Err(Error::conflict(format!(
                "{key} was modified: stored version {}, update based on {}",
                stored.metadata.resource_version, object.metadata.resource_version
            )));
        }

        if stored.spec != object.spec {
            stored.spec = object.spec;
            stored.metadata.generation += 1;
        }
        stored.metadata.finalizers = object.metadata.finalizers;
        stored.metadata.resource_version = version;

        if stored.metadata.is_terminating() && stored.metadata.finalizers.is_empty() {
            self.objects.remove(&key);
            return Ok(None);
        }
        Ok(Some(stored.clone()))
    }

    pub(crate) fn patch_status(&mut self, object: RawObject) -> Result<RawObject, Error> {
        let key = object.key();
        let version = self.next_resource_version();
        let stored = self
            .objects
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(key.to_string()))?;

        stored.status = object.status;
        stored.metadata.resource_version = version;
        Ok(stored.clone())
    }

    pub(crate) fn delete(&mut self, key: &ObjectKey) -> Result<(), Error> {
        let version = self.next_resource_version();
        let stored = self
            .objects
            .get_mut(key)
            .ok_or_else(|| Error::not_found(key.to_string()))?;

        if stored.metadata.finalizers.is_empty() {
            self.objects.remove(key);
        } else if !stored.metadata.is_terminating() {
            stored.metadata.lifecycle = Lifecycle::Terminating {
                since: chrono::Utc::now(),
            };
            stored.metadata.resource_version = version;
        }
        Ok(())
    }

    pub(crate) fn list(&self, kind: ResourceKind) -> Vec<ObjectKey> {
        self.objects
            .keys()
            .filter(|key| key.kind == kind)
            .cloned()
            .collect()
    }

    fn next_resource_version(&mut self) -> u64 {
        self.last_resource_version += 1;
        self.last_resource_version
    }
}

/// `ObjectKey` has no string form serde can use as a map key, so the
/// table is persisted as a list and re-keyed on load.
mod objects_as_list {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        objects: &BTreeMap<ObjectKey, RawObject>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(objects.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<ObjectKey, RawObject>, D::Error> {
        let list = Vec::<RawObject>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|o| (o.key(), o)).collect())
    }
}
