//! Capability model shared by providers, the registry and the dispatcher
//!
//! Descriptors and addressing, the provider contract, the per-request context and
//! the protocol content union.

pub mod content;
pub mod context;
pub mod descriptor;
pub mod provider;
