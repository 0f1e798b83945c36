// # Identity Service Traits
//
// Defines the boundary to the identity service's endpoint registry.
//
// ## Implementations
//
// - Keystone v3 REST: `keystone-endpoint-openstack` crate
// - Tests: in-memory registries in `tests/common`
//
// ## Usage
//
// ```rust,ignore
// use keystone_endpoint_core::traits::{Connection, IdentityConnector};
//
// async fn example(connector: &dyn IdentityConnector, api: &KeystoneApi) -> Result<()> {
//     match connector.connect(api).await? {
//         Connection::Ready(admin) => {
//             let found = admin.list_endpoints("service-id", Availability::Public).await?;
//             println!("{} endpoint(s)", found.len());
//         }
//         Connection::NotYetAvailable { retry_after, reason } => {
//             println!("retry in {:?}: {}", retry_after, reason);
//         }
//     }
//     Ok(())
// }
// ```

use crate::availability::Availability;
use crate::resource::KeystoneApi;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// An endpoint as registered in the identity service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    /// Remote identifier
    pub id: String,
    /// Endpoint name (usually the service name)
    pub name: String,
    /// Owning service registration
    pub service_id: String,
    /// Interface the endpoint is registered under
    pub availability: Availability,
    /// Registered URL
    pub url: String,
}

/// Desired endpoint sent to the identity service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRequest {
    /// Endpoint name (usually the service name)
    pub name: String,
    /// Owning service registration
    pub service_id: String,
    /// Interface to register under
    pub availability: Availability,
    /// Desired URL; ignored by deletes
    pub url: String,
}

/// Admin-scoped CRUD against the identity service endpoint registry
///
/// # Trust Level: Untrusted
///
/// Implementations only translate calls into requests:
///
/// - ✅ One remote call (or one list + per-match call for deletes) per method
/// - ✅ Parse responses and map failures to [`crate::Error`]
/// - ❌ No retries or backoff (owned by the controller)
/// - ❌ No access to the resource store
/// - ❌ No caching beyond a single call
#[async_trait]
pub trait EndpointAdmin: Send + Sync {
    /// List endpoints registered for `(service_id, availability)`
    async fn list_endpoints(
        &self,
        service_id: &str,
        availability: Availability,
    ) -> Result<Vec<RemoteEndpoint>, crate::Error>;

    /// Register a new endpoint, returning its remote ID
    async fn create_endpoint(&self, endpoint: &EndpointRequest) -> Result<String, crate::Error>;

    /// Change an existing endpoint, returning its (possibly new) remote ID
    async fn update_endpoint(
        &self,
        endpoint: &EndpointRequest,
        id: &str,
    ) -> Result<String, crate::Error>;

    /// Remove every endpoint registered for `(service_id, availability)`
    ///
    /// Must succeed when nothing is registered.
    async fn delete_endpoint(&self, endpoint: &EndpointRequest) -> Result<(), crate::Error>;

    /// Backend name (for logging/debugging)
    fn backend_name(&self) -> &'static str;
}

/// Outcome of asking for an admin client
pub enum Connection {
    /// An authenticated admin client
    Ready(Arc<dyn EndpointAdmin>),
    /// Credentials or the API URL are not published yet; ask again later
    NotYetAvailable {
        /// Suggested delay before the next attempt
        retry_after: Duration,
        /// Human readable explanation, surfaced in conditions
        reason: String,
    },
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connection::Ready(admin) => f
                .debug_tuple("Ready")
                .field(&admin.backend_name())
                .finish(),
            Connection::NotYetAvailable { retry_after, reason } => f
                .debug_struct("NotYetAvailable")
                .field("retry_after", retry_after)
                .field("reason", reason)
                .finish(),
        }
    }
}

/// Obtains admin clients for the identity API described by a `KeystoneApi`
///
/// Obtaining a client may block on token acquisition. A missing credential
/// or API URL is reported as [`Connection::NotYetAvailable`]; only genuine
/// failures are errors.
#[async_trait]
pub trait IdentityConnector: Send + Sync {
    async fn connect(&self, api: &KeystoneApi) -> Result<Connection, crate::Error>;

    /// Connector name (for logging/debugging)
    fn connector_name(&self) -> &'static str;
}

/// Helper trait for constructing identity connectors from configuration
pub trait IdentityConnectorFactory: Send + Sync {
    /// Create an IdentityConnector instance from configuration
    fn create(
        &self,
        config: &crate::config::IdentityConfig,
    ) -> Result<Arc<dyn IdentityConnector>, crate::Error>;
}
