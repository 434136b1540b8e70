//! In-process sources that answer from a fixed record list.
//!
//! A fixture source evaluates the compiled query filter against each of its
//! records, ranks matches by their position in the list, and pages the
//! outcome the way a remote catalog would. Latency and failure are
//! configurable so deadline and circuit-breaker behaviour can be exercised
//! without a network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fedbroker_core::filter::record_location;
use fedbroker_core::{
    Query, Record, SearchResult, SharedSource, SourceClient, SourceError, SourceResult,
};

use crate::config::{FixtureSourceConfig, HostConfig};

/// Property key reporting how many records a fixture holds.
pub const RECORD_COUNT_PROPERTY: &str = "fixture-records";

/// A source backed by records held in memory.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    id: String,
    latency: Duration,
    failure: Option<String>,
    total_hits: Option<u64>,
    records: Vec<Record>,
}

impl FixtureSource {
    /// A healthy, instant source serving `records`.
    pub fn new(id: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            id: id.into(),
            latency: Duration::ZERO,
            failure: None,
            total_hits: None,
            records,
        }
    }

    /// Build from a config entry.
    pub fn from_config(config: &FixtureSourceConfig) -> Self {
        let records = config
            .records
            .iter()
            .map(|record| record.to_record(&config.id))
            .collect();
        Self {
            id: config.id.clone(),
            latency: Duration::from_millis(config.latency_ms),
            failure: config.failure.clone(),
            total_hits: config.total_hits,
            records,
        }
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every query with `message`.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    fn rank(&self, query: &Query) -> Vec<SearchResult> {
        let filter = query.filter();
        let origin = filter.distance_origin();
        self.records
            .iter()
            .filter(|record| filter.evaluate(record))
            .enumerate()
            .map(|(position, record)| {
                let mut result = SearchResult::new(record.clone())
                    .with_relevance(1.0 / (1.0 + position as f64 * 0.1));
                if let Some(meters) = origin
                    .and_then(|point| record_location(record)?.distance_to_m(point))
                {
                    result = result.with_distance(meters);
                }
                result
            })
            .collect()
    }
}

#[async_trait]
impl SourceClient for FixtureSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn query(&self, query: &Query) -> Result<SourceResult, SourceError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(message) = &self.failure {
            return Err(SourceError::Failed(message.clone()));
        }

        let matched = self.rank(query);
        let total_hits = self
            .total_hits
            .unwrap_or(matched.len() as u64)
            .max(matched.len() as u64);

        let mut page: Vec<SearchResult> = matched
            .into_iter()
            .skip(query.start_index().saturating_sub(1))
            .collect();
        if query.page_size() > 0 {
            page.truncate(query.page_size());
        }
        tracing::debug!(source = %self.id, returned = page.len(), total_hits, "fixture answered");

        let mut result = SourceResult::new(page, total_hits);
        result
            .properties
            .insert(RECORD_COUNT_PROPERTY.to_owned(), self.records.len().into());
        Ok(result)
    }
}

/// One shared source per configured fixture.
pub fn sources_from_config(config: &HostConfig) -> Vec<SharedSource> {
    config
        .sources
        .iter()
        .map(|source| Arc::new(FixtureSource::from_config(source)) as SharedSource)
        .collect()
}
