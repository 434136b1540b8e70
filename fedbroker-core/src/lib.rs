//! # fedbroker-core
//!
//! Federated search broker core: fan one query out to many catalog sources,
//! collect what comes back under a single deadline, and return one ranked page.
//!
//! ## Design
//!
//! - A small boolean keyword language (terms, `"phrases"`, `(groups)`,
//!   `AND`/`OR`/`NOT`) compiles, together with spatial, temporal and
//!   property criteria, into a [`FilterPredicate`]
//! - Sources are pluggable [`SourceClient`]s queried concurrently on a
//!   bounded pool
//! - One shared deadline bounds the whole collection pass; slow or failing
//!   sources become [`ProcessingDetail`]s instead of failing the query
//! - Optional relevance renormalization rescores the merged set against the
//!   query text in a throwaway full-text index
//! - Repeatedly failing sources are skipped by a per-source circuit breaker
//! - Duplicate and looping queries in a broker mesh are rejected by a
//!   bounded LRU of correlation ids
//!
//! ## Logging
//!
//! Query text is only ever logged at trace level.

pub mod broker;
pub mod config;
pub mod error;
pub mod filter;
pub mod health;
pub mod loop_guard;
pub mod markup;
pub mod orchestrator;
pub mod query;
pub mod renormalize;
pub mod source;
pub mod types;

pub use broker::FederationBroker;
pub use config::BrokerConfig;
pub use error::{BrokerError, QueryError, Result, SourceError};
pub use filter::FilterPredicate;
pub use query::keyword::{AstNode, ParseError};
pub use query::{Query, QueryBuilder};
pub use source::{SharedSource, SourceClient};
pub use types::{
    AggregatedResponse, AttributeValue, ProcessingDetail, Record, SearchResult, SortOrder,
    SortSpec, SourceResult,
};

/// Parse keyword search text and compile it to a filter.
///
/// In strict mode any syntax problem is an error. Otherwise the parser
/// recovers where it can, treating unparsable text as literal keywords;
/// unbalanced parentheses or quotes are errors in both modes.
///
/// # Errors
///
/// Returns [`QueryError::Parse`] with the position of the problem.
///
/// # Examples
///
/// ```
/// let filter = fedbroker_core::parse_keyword_query("{title}:Report OR coast", true)?;
/// assert_eq!(
///     filter.to_string(),
///     "(xpath('title') ILIKE 'Report' OR anyText ILIKE 'coast')"
/// );
/// # Ok::<(), fedbroker_core::QueryError>(())
/// ```
pub fn parse_keyword_query(text: &str, strict: bool) -> std::result::Result<FilterPredicate, QueryError> {
    filter::parse_keyword_query(text, strict)
}
