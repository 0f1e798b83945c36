//! Core traits for the keystone endpoint reconciler
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`EndpointAdmin`]: CRUD against the identity service endpoint registry
//! - [`IdentityConnector`]: Obtain admin clients for an identity API
//! - [`ResourceStore`]: Storage and watch for reconciled and dependency objects

pub mod identity;
pub mod resource_store;

pub use identity::{
    Connection, EndpointAdmin, EndpointRequest, IdentityConnector, IdentityConnectorFactory,
    RemoteEndpoint,
};
pub use resource_store::{ResourceStore, ResourceStoreFactory, WatchStream};
