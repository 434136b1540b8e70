//! Error types for the fedbroker host.

use fedbroker_core::{BrokerError, QueryError};

/// Errors raised while loading configuration or running the broker.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Configuration file is missing fields, malformed, or inconsistent.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The query could not be built.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The broker refused to start or a federated query failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, HostError>;
