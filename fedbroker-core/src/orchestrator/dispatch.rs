//! Fan-out dispatcher: one task per selected source.
//!
//! Each source query runs as its own tokio task, gated by a shared
//! semaphore that bounds how many run at once. Dispatch never waits; the
//! monitor collects the handles afterwards.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::SourceError;
use crate::health::CircuitBreaker;
use crate::query::Query;
use crate::source::SharedSource;
use crate::types::{ProcessingDetail, SourceResult};

/// A dispatched source query.
#[derive(Debug)]
pub struct SourceTask {
    /// Source the task queries.
    pub source_id: String,
    /// Pending outcome of the query.
    pub handle: JoinHandle<Result<SourceResult, SourceError>>,
    /// When the task was spawned.
    pub dispatched_at: Instant,
    /// Set once the task holds a pool permit and the source query is running.
    pub started: Arc<AtomicBool>,
}

impl SourceTask {
    /// Whether the source query got past the pool and began running.
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

/// Everything dispatch produced for one query.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Running tasks keyed by source id. Iteration order is sorted by id.
    pub tasks: BTreeMap<String, SourceTask>,
    /// Selected sources that were not dispatched, with the reason.
    pub skipped: Vec<ProcessingDetail>,
}

/// Holds the registered sources and the shared concurrency limit.
pub struct Dispatcher {
    sources: BTreeMap<String, SharedSource>,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

impl Dispatcher {
    /// Register `sources`, allowing at most `max_concurrent` queries at a time.
    ///
    /// A later source with the same id replaces an earlier one.
    pub fn new(sources: impl IntoIterator<Item = SharedSource>, max_concurrent: usize) -> Self {
        let sources = sources
            .into_iter()
            .map(|source| (source.id().to_owned(), source))
            .collect();
        Self {
            sources,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Ids of all registered sources, sorted.
    pub fn source_ids(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    /// Whether a source with `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    /// Spawn one query task per selected source.
    ///
    /// An empty `selected` list means every registered source. Unknown ids
    /// and sources whose circuit is open come back as skipped details
    /// instead of tasks. Must be called from within a tokio runtime.
    pub fn dispatch(
        &self,
        query: &Query,
        selected: &[String],
        health: &Mutex<CircuitBreaker>,
    ) -> Dispatch {
        let selected: Vec<String> = if selected.is_empty() {
            self.source_ids()
        } else {
            selected.to_vec()
        };

        let query = Arc::new(query.clone());
        let mut dispatch = Dispatch::default();
        let mut breaker = health.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        for source_id in selected {
            if dispatch.tasks.contains_key(&source_id) {
                continue;
            }
            let Some(client) = self.sources.get(&source_id) else {
                tracing::warn!(source = %source_id, "unknown source selected");
                dispatch.skipped.push(ProcessingDetail::failed(
                    &source_id,
                    SourceError::Unavailable("no such source".into()),
                ));
                continue;
            };
            if !breaker.should_attempt(&source_id) {
                tracing::debug!(source = %source_id, "circuit open, skipping source");
                dispatch.skipped.push(ProcessingDetail::failed(
                    &source_id,
                    SourceError::Unavailable("circuit open after repeated failures".into()),
                ));
                continue;
            }

            let client = Arc::clone(client);
            let permits = Arc::clone(&self.permits);
            let query = Arc::clone(&query);
            let started = Arc::new(AtomicBool::new(false));
            let started_flag = Arc::clone(&started);
            let handle = tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| SourceError::Interrupted)?;
                started_flag.store(true, Ordering::Release);
                let started = Instant::now();
                let mut result = client.query(&query).await?;
                if result.elapsed.is_none() {
                    result.elapsed = Some(started.elapsed());
                }
                Ok(result)
            });

            tracing::trace!(source = %source_id, "source query dispatched");
            dispatch.tasks.insert(
                source_id.clone(),
                SourceTask {
                    source_id,
                    handle,
                    dispatched_at: Instant::now(),
                    started,
                },
            );
        }

        dispatch
    }
}
