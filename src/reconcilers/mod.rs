//! Reconcilers for the Envoy CRD
//!
//! This module contains the business logic for reconciling Envoy resources:
//! - Validating specs
//! - Converging the ConfigMap, Deployment and Service
//! - Writing observed state back into status

pub mod envoy;
pub mod status;

pub use envoy::{reconcile, validate, ChildAction, Outcome};
