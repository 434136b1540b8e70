//! Error types for the fedbroker-core crate.
//!
//! Errors are split by how far they are allowed to travel. Query construction
//! errors ([`QueryError`]) stop a request before anything is dispatched.
//! Per-source errors ([`SourceError`]) never fail an aggregation; they are
//! downgraded to processing details. Renormalization errors are recovered
//! where they happen.

use serde::{Deserialize, Serialize};

use crate::query::keyword::ParseError;

/// Errors raised while turning caller criteria into a [`crate::Query`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    /// The keyword text could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Criteria are invalid, contradictory, or missing.
    #[error("unsupported query: {0}")]
    Unsupported(String),
}

/// A failure reported for a single source during a federated query.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SourceError {
    /// The shared deadline passed before the source answered.
    #[error("source timed out after waiting {waited_ms} ms")]
    Timeout {
        /// How long the monitor actually waited on this source.
        waited_ms: u64,
    },

    /// The source task was cancelled before it produced a result.
    #[error("source query was interrupted")]
    Interrupted,

    /// The source (or its task) failed while executing the query.
    #[error("source query failed: {0}")]
    Failed(String),

    /// The source was not queried at all.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Failures inside the relevance renormalization pass.
#[derive(Debug, thiserror::Error)]
pub enum RenormalizeError {
    /// Building or searching the ephemeral index failed.
    #[error("index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    /// The phrase produced no indexable terms.
    #[error("phrase has no searchable terms")]
    EmptyPhrase,

    /// A hit pointed at a document that was never indexed.
    #[error("hit refers to unknown document {0}")]
    UnknownHit(u64),
}

/// Errors surfaced by [`crate::FederationBroker`].
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The query was structurally invalid.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Invalid broker configuration.
    #[error("config error: {0}")]
    Config(String),

    /// The aggregation task itself died.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for broker results.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_unsupported() {
        let err = QueryError::Unsupported("start date is after end date".into());
        assert_eq!(
            err.to_string(),
            "unsupported query: start date is after end date"
        );
    }

    #[test]
    fn display_parse_is_transparent() {
        let err = QueryError::from(ParseError::new(3, "expected ')'"));
        assert_eq!(err.to_string(), "parse error at position 3: expected ')'");
    }

    #[test]
    fn display_timeout() {
        let err = SourceError::Timeout { waited_ms: 100 };
        assert_eq!(err.to_string(), "source timed out after waiting 100 ms");
    }

    #[test]
    fn display_failed() {
        let err = SourceError::Failed("connection refused".into());
        assert_eq!(err.to_string(), "source query failed: connection refused");
    }

    #[test]
    fn source_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(SourceError::Timeout { waited_ms: 5 }).expect("serialize");
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["detail"]["waited_ms"], 5);
    }

    #[test]
    fn broker_error_wraps_query_error() {
        let err = BrokerError::from(QueryError::Unsupported("no criteria".into()));
        assert_eq!(err.to_string(), "unsupported query: no criteria");
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<QueryError>();
        assert_send_sync::<SourceError>();
        assert_send_sync::<BrokerError>();
        assert_send_sync::<RenormalizeError>();
    }
}
