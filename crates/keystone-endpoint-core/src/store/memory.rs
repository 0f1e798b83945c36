// # Memory Resource Store
//
// In-memory implementation of ResourceStore.
//
// ## Purpose
//
// Provides a fast store that doesn't persist across restarts. Used by the
// contract tests and by deployments where another system owns persistence
// and replays objects on start.
//
// ## Crash Behavior
//
// - All objects are lost on restart/crash
// - Endpoints registered remotely stay registered; the next reconcile of a
//   re-created object adopts them by `(service_id, availability)`

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::table::ObjectTable;
use crate::Error;
use crate::resource::{ObjectKey, RawObject, ResourceKind};
use crate::traits::resource_store::{ResourceStore, WatchStream};

/// Capacity of the watch broadcast channel
pub(crate) const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// In-memory resource store implementation
///
/// Objects live in an ordered table protected by a RwLock. Every write is
/// broadcast to watchers.
///
/// # Example
///
/// ```rust,no_run
/// use keystone_endpoint_core::resource::{KeystoneApi, Resource};
/// use keystone_endpoint_core::store::MemoryResourceStore;
/// use keystone_endpoint_core::traits::ResourceStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryResourceStore::new();
///
///     let api = KeystoneApi::new("openstack", "keystone");
///     store.create(api.to_raw()?).await?;
///
///     let stored = store.get(&api.key()).await?;
///     assert!(stored.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryResourceStore {
    inner: Arc<RwLock<ObjectTable>>,
    events: broadcast::Sender<ObjectKey>,
}

impl MemoryResourceStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(ObjectTable::default())),
            events,
        }
    }

    /// Get the number of objects in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn notify(&self, key: ObjectKey) {
        // No receivers is fine: nobody is watching yet
        let _ = self.events.send(key);
    }
}

impl Default for MemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn a broadcast receiver into a watch stream, skipping lag notices
pub(crate) fn watch_stream(events: &broadcast::Sender<ObjectKey>) -> WatchStream {
    let stream = BroadcastStream::new(events.subscribe()).filter_map(|event| match event {
        Ok(key) => Some(key),
        Err(lagged) => {
            tracing::warn!("Watch stream lagging, events dropped: {}", lagged);
            None
        }
    });
    Box::pin(stream)
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<RawObject>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(key))
    }

    async fn create(&self, object: RawObject) -> Result<RawObject, Error> {
        let created = self.inner.write().await.create(object)?;
        self.notify(created.key());
        Ok(created)
    }

    async fn update(&self, object: RawObject) -> Result<Option<RawObject>, Error> {
        let key = object.key();
        let updated = self.inner.write().await.update(object)?;
        self.notify(key);
        Ok(updated)
    }

    async fn patch_status(&self, object: RawObject) -> Result<RawObject, Error> {
        let patched = self.inner.write().await.patch_status(object)?;
        self.notify(patched.key());
        Ok(patched)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), Error> {
        self.inner.write().await.delete(key)?;
        self.notify(key.clone());
        Ok(())
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ObjectKey>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.list(kind))
    }

    fn watch(&self) -> WatchStream {
        watch_stream(&self.events)
    }

    async fn flush(&self) -> Result<(), Error> {
        // No-op for memory store (everything is already "persisted")
        Ok(())
    }
}
