//! The federation broker: loop guard, dispatch, and aggregation in one call.

use std::sync::{Arc, Mutex};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::health::{CircuitBreaker, CircuitState};
use crate::loop_guard::LoopGuard;
use crate::orchestrator::{Dispatcher, MonitorSettings, monitor};
use crate::query::Query;
use crate::source::SharedSource;
use crate::types::{AggregatedResponse, ProcessingDetail};

/// Runs federated queries across a fixed set of sources.
///
/// Health and duplicate tracking persist across queries for the lifetime of
/// the broker.
#[derive(Debug)]
pub struct FederationBroker {
    config: BrokerConfig,
    dispatcher: Dispatcher,
    loop_guard: LoopGuard,
    health: Arc<Mutex<CircuitBreaker>>,
}

impl FederationBroker {
    /// Build a broker over `sources`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Config`] if `config` fails validation.
    pub fn new(config: BrokerConfig, sources: impl IntoIterator<Item = SharedSource>) -> Result<Self> {
        config.validate()?;
        let dispatcher = Dispatcher::new(sources, config.max_concurrent_sources);
        let loop_guard = LoopGuard::new(config.loop_guard_capacity);
        let health = Arc::new(Mutex::new(CircuitBreaker::new(
            config.circuit_breaker.clone(),
        )));
        tracing::debug!(
            local_id = %config.local_id,
            sources = ?dispatcher.source_ids(),
            "federation broker ready"
        );
        Ok(Self {
            config,
            dispatcher,
            loop_guard,
            health,
        })
    }

    /// The configuration this broker runs with.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Ids of every registered source, sorted.
    pub fn source_ids(&self) -> Vec<String> {
        self.dispatcher.source_ids()
    }

    /// The duplicate-query guard.
    pub fn loop_guard(&self) -> &LoopGuard {
        &self.loop_guard
    }

    /// `(source, state, consecutive_failures)` for every source seen so far.
    pub fn health_report(&self) -> Vec<(String, CircuitState, u32)> {
        self.health
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .health_report()
    }

    /// Run `query` against `source_ids` and return the merged page.
    ///
    /// Source selection: `source_ids` if non-empty, else the query's own
    /// source list, else every registered source. A query already seen, or
    /// one that has already passed through this broker, is answered with an
    /// empty response carrying a warning detail.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Internal`] only if the aggregation task itself
    /// dies. Source failures are reported in the response.
    pub async fn run_federated_query(
        &self,
        query: &Query,
        source_ids: &[String],
    ) -> Result<AggregatedResponse> {
        let local_id = &self.config.local_id;
        if self.config.dedup_enabled
            && !self
                .loop_guard
                .is_unique(query.correlation_id(), query.path(), local_id)
        {
            tracing::info!(
                correlation_id = %query.correlation_id(),
                "rejecting duplicate or looping query"
            );
            return Ok(AggregatedResponse {
                processing_details: vec![ProcessingDetail::warning(
                    local_id,
                    format!(
                        "query {} was already processed by this broker",
                        query.correlation_id()
                    ),
                )],
                correlation_id: query.correlation_id().to_owned(),
                ..AggregatedResponse::default()
            });
        }

        let selected = if source_ids.is_empty() {
            query.sources()
        } else {
            source_ids
        };
        tracing::trace!(text = ?query.text(), filter = %query.filter_trace(), "federating query");

        let forwarded = query.forwarded_by(local_id);
        let dispatch = self.dispatcher.dispatch(&forwarded, selected, &self.health);

        let settings = MonitorSettings {
            renormalize_relevance: self.config.renormalize_relevance,
            cancel_abandoned_sources: self.config.cancel_abandoned_sources,
            default_sort: self.config.default_sort.clone(),
        };
        let health = Arc::clone(&self.health);
        let query = query.clone();
        tokio::spawn(async move { monitor::aggregate(&query, dispatch, &settings, health).await })
            .await
            .map_err(|e| BrokerError::Internal(format!("aggregation task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::source::SourceClient;
    use crate::types::{Record, SearchResult, SourceResult};
    use async_trait::async_trait;

    struct StaticSource {
        id: String,
        hits: u64,
    }

    #[async_trait]
    impl SourceClient for StaticSource {
        fn id(&self) -> &str {
            &self.id
        }

        async fn query(&self, _query: &Query) -> std::result::Result<SourceResult, SourceError> {
            let record = Record::new(format!("{}-0", self.id), &self.id);
            Ok(SourceResult::new(
                vec![SearchResult::new(record).with_relevance(0.5)],
                self.hits,
            ))
        }
    }

    fn broker(config: BrokerConfig) -> FederationBroker {
        let sources: Vec<SharedSource> = vec![
            Arc::new(StaticSource {
                id: "a".into(),
                hits: 3,
            }),
            Arc::new(StaticSource {
                id: "b".into(),
                hits: 4,
            }),
        ];
        FederationBroker::new(config, sources).expect("broker")
    }

    fn query() -> Query {
        Query::builder()
            .text("coast")
            .timeout_ms(1_000)
            .build()
            .expect("query")
    }

    #[test]
    fn invalid_config_rejected() {
        let config = BrokerConfig {
            max_concurrent_sources: 0,
            ..Default::default()
        };
        let err = FederationBroker::new(config, Vec::<SharedSource>::new()).unwrap_err();
        assert!(matches!(err, BrokerError::Config(_)));
    }

    #[tokio::test]
    async fn broadcasts_to_all_sources_by_default() {
        let broker = broker(BrokerConfig::default());
        let query = query();
        let response = broker.run_federated_query(&query, &[]).await.expect("run");
        assert_eq!(response.responded_sources, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(response.total_hits, 7);
        assert_eq!(response.correlation_id, query.correlation_id());
    }

    #[tokio::test]
    async fn explicit_selection_wins_over_query_sources() {
        let broker = broker(BrokerConfig::default());
        let query = Query::builder()
            .text("coast")
            .sources(["a"])
            .build()
            .expect("query");
        let response = broker
            .run_federated_query(&query, &["b".to_string()])
            .await
            .expect("run");
        assert_eq!(response.responded_sources, vec!["b".to_string()]);

        let query = Query::builder()
            .text("coast")
            .sources(["a"])
            .build()
            .expect("query");
        let response = broker.run_federated_query(&query, &[]).await.expect("run");
        assert_eq!(response.responded_sources, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_correlation_id_is_rejected() {
        let broker = broker(BrokerConfig::default());
        let query = query();
        let first = broker.run_federated_query(&query, &[]).await.expect("run");
        assert_eq!(first.results.len(), 2);

        let second = broker.run_federated_query(&query, &[]).await.expect("run");
        assert!(second.results.is_empty());
        assert_eq!(second.total_hits, 0);
        assert_eq!(second.processing_details.len(), 1);
        assert_eq!(second.processing_details[0].source_id, "broker");
        assert!(second.processing_details[0].error.is_none());
    }

    #[tokio::test]
    async fn dedup_can_be_disabled() {
        let broker = broker(BrokerConfig {
            dedup_enabled: false,
            ..Default::default()
        });
        let query = query();
        broker.run_federated_query(&query, &[]).await.expect("run");
        let again = broker.run_federated_query(&query, &[]).await.expect("run");
        assert_eq!(again.results.len(), 2);
    }

    #[tokio::test]
    async fn query_that_already_visited_this_broker_is_rejected() {
        let broker = broker(BrokerConfig::default());
        let query = Query::builder()
            .text("coast")
            .path(["upstream", "broker"])
            .build()
            .expect("query");
        let response = broker.run_federated_query(&query, &[]).await.expect("run");
        assert!(response.responded_sources.is_empty());
        assert_eq!(response.processing_details.len(), 1);
    }

    #[tokio::test]
    async fn offset_page_with_unbounded_size_runs() {
        let broker = broker(BrokerConfig::default());
        let query = Query::builder()
            .text("coast")
            .timeout_ms(1_000)
            .start_index(2)
            .page_size(usize::MAX)
            .build()
            .expect("query");
        let response = broker.run_federated_query(&query, &[]).await.expect("run");
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].record.id, "b-0");
        assert_eq!(response.total_hits, 7);
    }

    #[tokio::test]
    async fn health_report_tracks_sources() {
        let broker = broker(BrokerConfig::default());
        broker.run_federated_query(&query(), &[]).await.expect("run");
        let report = broker.health_report();
        assert_eq!(report.len(), 2);
        assert!(report.iter().all(|(_, state, _)| *state == CircuitState::Closed));
    }
}
