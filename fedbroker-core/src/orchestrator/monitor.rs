//! Aggregation monitor: collect source outcomes under one shared deadline.
//!
//! # Pipeline
//!
//! 1. Compute the deadline once from the query timeout
//! 2. Wait on each source task in sorted id order, for whatever time is left
//! 3. Merge successful results; record a processing detail for every failure
//! 4. Optionally renormalize relevance
//! 5. Sort, skip to the start index, truncate to the page size
//!
//! A slow early source eats into the budget of later ones; total waiting is
//! bounded by the single query timeout, not by a per-source timeout.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinError;
use tokio::time::Instant;

use super::dispatch::Dispatch;
use super::sort;
use crate::error::SourceError;
use crate::health::CircuitBreaker;
use crate::query::Query;
use crate::renormalize;
use crate::types::{
    AggregatedResponse, ELAPSED_TIME_PROPERTY, ProcessingDetail, SearchResult, SortSpec,
    SourceResult,
};

/// Knobs the monitor takes from the broker configuration.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Rescore merged results before a relevance sort.
    pub renormalize_relevance: bool,
    /// Abort tasks that are still running when the deadline passes.
    pub cancel_abandoned_sources: bool,
    /// Sort used when the query names none.
    pub default_sort: SortSpec,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            renormalize_relevance: false,
            cancel_abandoned_sources: true,
            default_sort: SortSpec::relevance(),
        }
    }
}

fn join_outcome(
    joined: Result<Result<SourceResult, SourceError>, JoinError>,
) -> Result<SourceResult, SourceError> {
    match joined {
        Ok(outcome) => outcome,
        Err(err) if err.is_cancelled() => Err(SourceError::Interrupted),
        Err(err) => Err(SourceError::Failed(format!("source task panicked: {err}"))),
    }
}

/// Collect, merge, rank and page the outcome of one dispatch.
///
/// Never fails: every source problem becomes a [`ProcessingDetail`].
pub async fn aggregate(
    query: &Query,
    dispatch: Dispatch,
    settings: &MonitorSettings,
    health: Arc<Mutex<CircuitBreaker>>,
) -> AggregatedResponse {
    let deadline = u64::try_from(query.timeout_ms())
        .ok()
        .filter(|ms| *ms > 0)
        .map(|ms| Instant::now() + Duration::from_millis(ms));

    let mut results: Vec<SearchResult> = Vec::new();
    let mut total_hits: u64 = 0;
    let mut processing_details = dispatch.skipped;
    let mut source_properties = BTreeMap::new();
    let mut responded_sources = Vec::new();

    for (source_id, mut task) in dispatch.tasks {
        let waiting_since = Instant::now();
        let mut counts_against_source = true;
        let outcome = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, &mut task.handle).await {
                Ok(joined) => join_outcome(joined),
                Err(_) => {
                    if settings.cancel_abandoned_sources {
                        task.handle.abort();
                    }
                    // A source still queued for a pool permit never got to answer.
                    counts_against_source = task.has_started();
                    let waited_ms =
                        u64::try_from(waiting_since.elapsed().as_millis()).unwrap_or(u64::MAX);
                    Err(SourceError::Timeout { waited_ms })
                }
            },
            None => join_outcome((&mut task.handle).await),
        };

        let succeeded = outcome.is_ok();
        match outcome {
            Ok(result) => {
                let count = result.results.len();
                tracing::debug!(
                    source = %source_id,
                    count,
                    total = result.total_hits,
                    "source returned results"
                );
                total_hits += result.total_hits.max(count as u64);
                let mut properties = result.properties;
                if let Some(elapsed) = result.elapsed {
                    let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                    properties.insert(ELAPSED_TIME_PROPERTY.to_owned(), ms.into());
                }
                source_properties.insert(source_id.clone(), properties);
                results.extend(result.results);
                responded_sources.push(source_id.clone());
            }
            Err(err) => {
                tracing::warn!(source = %source_id, error = %err, "source query failed");
                processing_details.push(ProcessingDetail::failed(&source_id, err));
            }
        }

        let mut breaker = health.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if succeeded {
            breaker.record_success(&source_id);
        } else if counts_against_source {
            breaker.record_failure(&source_id);
        } else {
            tracing::debug!(source = %source_id, "source never started before the deadline");
        }
    }

    let sort_spec = sort::effective_sort(query, &settings.default_sort);
    if settings.renormalize_relevance {
        results = renormalize::renormalize(query, &sort_spec, results);
    }
    sort::sort_results(&mut results, &sort_spec, query.filter().distance_origin());

    let offset = query.start_index().saturating_sub(1);
    let mut page: Vec<SearchResult> = results.into_iter().skip(offset).collect();
    if query.page_size() > 0 {
        page.truncate(query.page_size());
    }

    tracing::debug!(
        responded = responded_sources.len(),
        failed = processing_details.len(),
        returned = page.len(),
        total_hits,
        "aggregation complete"
    );

    AggregatedResponse {
        results: page,
        total_hits,
        processing_details,
        source_properties,
        responded_sources,
        correlation_id: query.correlation_id().to_owned(),
    }
}
