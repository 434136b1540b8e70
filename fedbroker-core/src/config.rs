//! Broker configuration with sensible defaults.
//!
//! [`BrokerConfig`] controls the broker's identity in a mesh, how many
//! sources run at once, duplicate-query tracking, relevance renormalization,
//! and per-source circuit breaking. Every field has a default, so a partial
//! TOML table deserializes cleanly.

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::health::CircuitBreakerConfig;
use crate::types::SortSpec;

/// Configuration for a [`crate::FederationBroker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// This broker's id, appended to a query's path when it is forwarded.
    pub local_id: String,
    /// Upper bound on source queries running at the same time.
    pub max_concurrent_sources: usize,
    /// Number of correlation ids remembered for duplicate detection. `0` remembers none.
    pub loop_guard_capacity: u64,
    /// Reject queries whose correlation id was already seen or whose path loops.
    pub dedup_enabled: bool,
    /// Rescore merged results against the query text before a relevance sort.
    pub renormalize_relevance: bool,
    /// Abort source tasks still running when the deadline passes.
    pub cancel_abandoned_sources: bool,
    /// Sort used when the query names none and has textual criteria.
    pub default_sort: SortSpec,
    /// Per-source circuit breaker tuning.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            local_id: "broker".into(),
            max_concurrent_sources: 8,
            loop_guard_capacity: 1000,
            dedup_enabled: true,
            renormalize_relevance: false,
            cancel_abandoned_sources: true,
            default_sort: SortSpec::relevance(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Validates this configuration, returning an error if any field is invalid.
    ///
    /// Checks:
    /// - `local_id` must not be blank
    /// - `max_concurrent_sources` must be greater than 0
    /// - `default_sort.property` must not be blank
    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.local_id.trim().is_empty() {
            return Err(BrokerError::Config("local_id must not be empty".into()));
        }
        if self.max_concurrent_sources == 0 {
            return Err(BrokerError::Config(
                "max_concurrent_sources must be greater than 0".into(),
            ));
        }
        if self.default_sort.property.trim().is_empty() {
            return Err(BrokerError::Config(
                "default_sort property must not be empty".into(),
            ));
        }
        Ok(())
    }
}
