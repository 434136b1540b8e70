//! Trait seam for the per-source query collaborator.
//!
//! The broker never talks to a remote catalog itself. Each source is a
//! [`SourceClient`] that takes a compiled [`Query`] and performs whatever
//! transport it needs, returning a [`SourceResult`] or a [`SourceError`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::query::Query;
use crate::types::SourceResult;

/// A pluggable search source.
///
/// Implementations must be `Send + Sync`: the dispatcher runs one query per
/// source concurrently on the runtime. A client may enforce its own
/// transport timeouts; the broker's deadline applies regardless.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Stable id this source is selected and reported by.
    fn id(&self) -> &str;

    /// Run `query` against this source.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the source cannot answer. The error is
    /// recorded as a processing detail and never fails the aggregation.
    async fn query(&self, query: &Query) -> Result<SourceResult, SourceError>;
}

/// Shared handle to a source client.
pub type SharedSource = Arc<dyn SourceClient>;
