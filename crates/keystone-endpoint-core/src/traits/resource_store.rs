// # Resource Store Trait
//
// Defines the interface to the storage holding `KeystoneEndpoint`,
// `KeystoneApi` and `KeystoneService` objects.
//
// ## Purpose
//
// The store is the reconciler's view of the orchestration platform:
// - get-by-name, full-object update and status-subresource patch
// - optimistic concurrency through `resource_version`
// - deletion requests that honour finalizers
// - a watch stream of changed object keys
//
// ## Implementations
//
// - Memory: `MemoryResourceStore`
// - File: `FileResourceStore` (JSON with atomic writes and backup recovery)
//
// ## Usage
//
// ```rust,ignore
// use keystone_endpoint_core::store::Api;
//
// let endpoints = Api::<KeystoneEndpoint>::namespaced(store.clone(), "openstack");
// if let Some(mut endpoint) = endpoints.get("nova").await? {
//     endpoint.status.service_id = "abc".into();
//     endpoints.patch_status(&endpoint).await?;
// }
// ```

use crate::resource::{ObjectKey, RawObject, ResourceKind};
use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;

/// Stream of keys of objects that changed
pub type WatchStream = Pin<Box<dyn Stream<Item = ObjectKey> + Send + 'static>>;

/// Trait for resource store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks;
/// different instances are reconciled in parallel and may write the same
/// dependency object.
///
/// # Platform Semantics
///
/// Implementations must behave like the orchestration platform:
///
/// - `create` assigns `generation = 1` and a fresh `resource_version`
/// - `update` writes metadata and spec only, fails with
///   [`crate::Error::Conflict`] when the caller's `resource_version` is stale,
///   bumps `generation` when the spec changed, and removes the object when
///   it is terminating and has no finalizers left
/// - `patch_status` writes status only, without a version check
/// - `delete` marks an object with finalizers as terminating and removes one
///   without finalizers immediately
/// - every successful write emits the object key on all watch streams
/// - operations on a missing object fail with [`crate::Error::NotFound`],
///   except `get`, which returns `Ok(None)`
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get one object
    async fn get(&self, key: &ObjectKey) -> Result<Option<RawObject>, crate::Error>;

    /// Create a new object, returning it as stored
    async fn create(&self, object: RawObject) -> Result<RawObject, crate::Error>;

    /// Replace metadata and spec, returning the object as stored
    ///
    /// Returns `Ok(None)` when the update released the last finalizer of a
    /// terminating object and the object was removed.
    async fn update(&self, object: RawObject) -> Result<Option<RawObject>, crate::Error>;

    /// Replace the status subresource, returning the object as stored
    async fn patch_status(&self, object: RawObject) -> Result<RawObject, crate::Error>;

    /// Request deletion of an object
    async fn delete(&self, key: &ObjectKey) -> Result<(), crate::Error>;

    /// List keys of all objects of a kind, in key order
    async fn list(&self, kind: ResourceKind) -> Result<Vec<ObjectKey>, crate::Error>;

    /// Watch for changed objects
    ///
    /// The stream yields keys of objects written after the call. Lagging
    /// consumers may miss keys.
    fn watch(&self) -> WatchStream;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing resource stores from configuration
#[async_trait]
pub trait ResourceStoreFactory: Send + Sync {
    /// Create a ResourceStore instance from configuration
    async fn create(
        &self,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn ResourceStore>, crate::Error>;
}
