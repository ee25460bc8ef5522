//! Envoy Kubernetes Operator
//!
//! This operator keeps Envoy proxy Deployments, Services and bootstrap
//! ConfigMaps converged with `Envoy` custom resources.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod reconcilers;

pub use error::{Error, Result};
