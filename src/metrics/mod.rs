//! Prometheus metrics for the Envoy Operator
//!
//! This module exposes metrics for monitoring operator health and reconcile activity.

mod prometheus;

pub use prometheus::*;
