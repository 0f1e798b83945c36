//! Plugin-based backend registry
//!
//! The registry allows identity connectors and resource stores to be
//! registered dynamically at runtime, avoiding hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keystone_endpoint_core::registry::BackendRegistry;
//! use keystone_endpoint_core::config::IdentityConfig;
//!
//! // Create a registry with the memory and file stores
//! let registry = BackendRegistry::with_builtin_stores();
//!
//! // Register connectors
//! registry.register_connector("keystone", Box::new(keystone_factory));
//!
//! // Create connector from config
//! let connector = registry.create_connector(&IdentityConfig::keystone("/run/secrets/password"))?;
//! ```
//!
//! ## Registration
//!
//! Implementations should register themselves during initialization:
//!
//! ```rust,ignore
//! // In keystone-endpoint-openstack crate
//! pub fn register(registry: &BackendRegistry) {
//!     registry.register_connector("keystone", Box::new(KeystoneConnectorFactory));
//! }
//! ```

use crate::config::{IdentityConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::store::{FileResourceStore, MemoryResourceStore};
use crate::traits::{IdentityConnector, IdentityConnectorFactory, ResourceStore, ResourceStoreFactory};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Backend registry for plugin-based connector and store creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct BackendRegistry {
    /// Registered identity connector factories
    connectors: RwLock<HashMap<String, Box<dyn IdentityConnectorFactory>>>,

    /// Registered resource store factories
    stores: RwLock<HashMap<String, Arc<dyn ResourceStoreFactory>>>,
}

impl BackendRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `memory` and `file` stores registered
    pub fn with_builtin_stores() -> Self {
        let registry = Self::new();
        registry.register_store("memory", Box::new(MemoryStoreFactory));
        registry.register_store("file", Box::new(FileStoreFactory));
        registry
    }

    /// Register an identity connector factory
    ///
    /// # Parameters
    ///
    /// - `name`: Connector type name (e.g., "keystone")
    /// - `factory`: Factory object for creating connector instances
    pub fn register_connector(
        &self,
        name: impl Into<String>,
        factory: Box<dyn IdentityConnectorFactory>,
    ) {
        let mut connectors = self.connectors.write().unwrap_or_else(PoisonError::into_inner);
        connectors.insert(name.into(), factory);
    }

    /// Register a resource store factory
    ///
    /// # Parameters
    ///
    /// - `name`: Store type name (e.g., "file", "memory")
    /// - `factory`: Factory object for creating store instances
    pub fn register_store(&self, name: impl Into<String>, factory: Box<dyn ResourceStoreFactory>) {
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        stores.insert(name.into(), Arc::from(factory));
    }

    /// Create an identity connector from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn IdentityConnector>)`: Created connector instance
    /// - `Err(Error)`: If connector type is not registered or creation fails
    pub fn create_connector(&self, config: &IdentityConfig) -> Result<Arc<dyn IdentityConnector>> {
        let connector_type = config.type_name();
        let connectors = self.connectors.read().unwrap_or_else(PoisonError::into_inner);

        let factory = connectors.get(connector_type).ok_or_else(|| {
            Error::config(format!("Unknown identity connector type: {}", connector_type))
        })?;

        factory.create(config)
    }

    /// Create a resource store from configuration
    ///
    /// Custom stores receive their own `config` value; built-in stores
    /// receive the serialized [`StoreConfig`].
    pub async fn create_store(&self, config: &StoreConfig) -> Result<Arc<dyn ResourceStore>> {
        let store_type = config.type_name();

        let factory = {
            let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
            stores
                .get(store_type)
                .ok_or_else(|| Error::config(format!("Unknown store type: {}", store_type)))?
                .clone()
        };

        let config_json = match config {
            StoreConfig::Custom { config, .. } => config.clone(),
            other => serde_json::to_value(other)?,
        };

        factory.create(&config_json).await
    }

    /// List all registered connector types
    pub fn list_connectors(&self) -> Vec<String> {
        let connectors = self.connectors.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = connectors.keys().cloned().collect();
        names.sort();
        names
    }

    /// List all registered store types
    pub fn list_stores(&self) -> Vec<String> {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = stores.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a connector type is registered
    pub fn has_connector(&self, name: &str) -> bool {
        let connectors = self.connectors.read().unwrap_or_else(PoisonError::into_inner);
        connectors.contains_key(name)
    }

    /// Check if a store type is registered
    pub fn has_store(&self, name: &str) -> bool {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        stores.contains_key(name)
    }
}

struct MemoryStoreFactory;

#[async_trait]
impl ResourceStoreFactory for MemoryStoreFactory {
    async fn create(&self, _config: &serde_json::Value) -> Result<Arc<dyn ResourceStore>> {
        Ok(Arc::new(MemoryResourceStore::new()))
    }
}

struct FileStoreFactory;

#[async_trait]
impl ResourceStoreFactory for FileStoreFactory {
    async fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn ResourceStore>> {
        match serde_json::from_value::<StoreConfig>(config.clone())? {
            StoreConfig::File { path } => Ok(Arc::new(FileResourceStore::new(path).await?)),
            other => Err(Error::config(format!(
                "File store factory cannot build a {} store",
                other.type_name()
            ))),
        }
    }
}
