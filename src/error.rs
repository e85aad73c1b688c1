//! Error taxonomy for the provider port.
//!
//! None of these cross the message boundary. The router turns every failure
//! into a diagnostic log line and drops the offending message; only schema
//! and configuration loading hand errors back to their caller.

use thiserror::Error;

/// Errors produced while loading schemas or handling port traffic.
#[derive(Debug, Error)]
pub enum PortError {
    /// An instance was requested before any implementation was provided.
    #[error("Cannot instantiate provider, since it is not provided")]
    NotProvided,

    /// A wire message did not match any known variant.
    #[error("Unrecognized message: {0}")]
    UnrecognizedMessage(String),

    /// The target instance does not implement the requested method.
    #[error("Provider does not implement {method}()")]
    MethodNotFound { method: String },

    /// The port has been closed and no longer processes traffic.
    #[error("Port is closed")]
    PortClosed,

    /// A capability schema was structurally invalid.
    #[error("Invalid capability schema: {0}")]
    Schema(String),

    /// Filesystem failure while loading a schema or configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias used across the crate.
pub type PortResult<T> = Result<T, PortError>;
