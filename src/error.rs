//! Error types for the Envoy Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist in the store
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    /// Spec is structurally invalid and cannot be converged
    #[error("Validation error: {0}")]
    Validation(String),

    /// Store rejected a call or could not be reached
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kubeconfig could not be loaded
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// In-cluster configuration could not be loaded
    #[error("In-cluster config error: {0}")]
    InCluster(#[from] kube::config::InClusterError),

    /// Reconcile task panicked
    #[error("Reconcile panicked: {0}")]
    Panicked(String),
}

impl Error {
    /// Create a not found error for an object kind
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Whether this is the expected "object missing" signal
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Whether a reconcile failing with this error should be retried with backoff
    ///
    /// A missing managed object is handled before reconciling, so a not found
    /// error that escapes a reconcile comes from a rejected store call and is
    /// retried like any other store failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Validation(_))
    }
}
