//! Adapters between the Envoy CRD and the Kubernetes objects it owns

pub mod bootstrap;
mod resources;
mod store;

pub use resources::*;
pub use store::*;
