//! # fedbroker
//!
//! Host for the federated search broker: loads a TOML configuration, serves
//! the configured fixture sources in-process, and runs federated queries
//! through [`fedbroker_core::FederationBroker`].

pub mod config;
pub mod error;
pub mod fixture;

pub use config::{FixtureRecord, FixtureSourceConfig, HostConfig};
pub use error::{HostError, Result};
pub use fixture::FixtureSource;

use fedbroker_core::{AggregatedResponse, FederationBroker, Query};

/// Build a broker over the configured fixture sources.
///
/// # Errors
///
/// Returns [`HostError::Broker`] if the broker settings are invalid.
pub fn build_broker(config: &HostConfig) -> Result<FederationBroker> {
    let sources = fixture::sources_from_config(config);
    Ok(FederationBroker::new(config.broker.clone(), sources)?)
}

/// Run one query against the configured fixtures.
///
/// # Errors
///
/// Returns [`HostError::Broker`] if the broker cannot be built or the
/// aggregation task dies.
pub async fn search(
    config: &HostConfig,
    query: &Query,
    source_ids: &[String],
) -> Result<AggregatedResponse> {
    let broker = build_broker(config)?;
    tracing::info!(
        correlation_id = %query.correlation_id(),
        sources = ?broker.source_ids(),
        "running federated query"
    );
    let response = broker.run_federated_query(query, source_ids).await?;
    tracing::info!(
        returned = response.results.len(),
        total_hits = response.total_hits,
        failed = response.processing_details.len(),
        "federated query finished"
    );
    Ok(response)
}
