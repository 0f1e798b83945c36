//! Resource store implementations
//!
//! This module provides the built-in implementations of the ResourceStore trait:
//! - [`MemoryResourceStore`]: in-memory (tests, ephemeral deployments)
//! - [`FileResourceStore`]: JSON file with atomic writes and backup recovery
//!
//! [`Api`] gives typed, namespaced access on top of either.

mod api;
mod file;
mod memory;
mod table;

pub use api::Api;
pub use file::FileResourceStore;
pub use memory::MemoryResourceStore;
