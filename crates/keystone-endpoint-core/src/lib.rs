// # keystone-endpoint-core
//
// Core library of the Keystone endpoint controller.
//
// ## Architecture Overview
//
// This library keeps the endpoint registry of an identity service in line
// with declared `KeystoneEndpoint` objects:
// - **ResourceStore**: Trait for the object store (get/update/status/watch)
// - **IdentityConnector**: Trait for obtaining an identity admin client
// - **EndpointAdmin**: Trait for listing, creating, updating and deleting endpoints
// - **Reconciler**: One reconcile pass over one object (gates, finalizers, sync)
// - **Controller**: Watch-driven loop that schedules passes and requeues
// - **BackendRegistry**: Plugin-based registry for connectors and stores
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from backend implementations
// 2. **Level-Triggered**: Every pass starts from stored state, never from the event
// 3. **Plugin-Based**: Connectors and stores are registered dynamically
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Idempotency**: A converged object causes no remote or store writes

pub mod availability;
pub mod condition;
pub mod config;
pub mod controller;
pub mod error;
pub mod reconciler;
pub mod registry;
pub mod resource;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use availability::Availability;
pub use config::{IdentityConfig, OperatorConfig, ReconcileSettings, StoreConfig};
pub use controller::{Controller, ControllerEvent};
pub use error::{Error, Result};
pub use reconciler::{Action, Outcome, Phase, Reconciler};
pub use registry::BackendRegistry;
pub use resource::{KeystoneApi, KeystoneEndpoint, KeystoneService, ObjectKey, ResourceKind};
pub use store::{Api, FileResourceStore, MemoryResourceStore};
pub use traits::{Connection, EndpointAdmin, IdentityConnector, ResourceStore};
