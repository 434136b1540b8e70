//! Core value types shared by sources, the monitor, and callers.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Attribute name holding a record's WKT location.
pub const LOCATION_ATTRIBUTE: &str = "location";

/// Property key under which a source's elapsed time (ms) is reported.
pub const ELAPSED_TIME_PROPERTY: &str = "elapsed-time";

/// A typed attribute value on a [`Record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    /// Free text.
    Text(String),
    /// Any numeric value.
    Number(f64),
    /// An instant in time.
    Date(DateTime<Utc>),
    /// A flag.
    Bool(bool),
    /// Geometry as WKT text.
    Geometry(String),
}

impl AttributeValue {
    /// Renders the value as plain text, the way it would be matched by text predicates.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) | Self::Geometry(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Date(d) => d.to_rfc3339(),
            Self::Bool(b) => b.to_string(),
        }
    }

    /// Returns the date if this is a date attribute.
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the number if this is a numeric attribute.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// An opaque catalog record returned by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record key, unique within its source.
    pub id: String,
    /// The source that produced this record.
    pub source_id: String,
    /// Optional display title.
    #[serde(default)]
    pub title: Option<String>,
    /// Structured metadata as XML-like markup.
    #[serde(default)]
    pub metadata: Option<String>,
    /// Typed attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Record {
    /// Create an empty record.
    pub fn new(id: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            title: None,
            metadata: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the metadata markup.
    pub fn with_metadata(mut self, markup: impl Into<String>) -> Self {
        self.metadata = Some(markup.into());
        self
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Look up an attribute by name. `id` and `title` resolve to the record fields.
    pub fn attribute_text(&self, name: &str) -> Option<String> {
        match name {
            "id" => Some(self.id.clone()),
            "title" if self.title.is_some() => self.title.clone(),
            _ => self.attributes.get(name).map(AttributeValue::as_text),
        }
    }
}

/// A single result: a record plus its ranking inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matched record.
    pub record: Record,
    /// Relevance score reported by the source (higher is better).
    pub relevance: Option<f64>,
    /// Distance from the query location in meters.
    pub distance_m: Option<f64>,
}

impl SearchResult {
    /// Wrap a record with no ranking information.
    pub fn new(record: Record) -> Self {
        Self {
            record,
            relevance: None,
            distance_m: None,
        }
    }

    /// Set the relevance score.
    pub fn with_relevance(mut self, score: f64) -> Self {
        self.relevance = Some(score);
        self
    }

    /// Set the distance in meters.
    pub fn with_distance(mut self, meters: f64) -> Self {
        self.distance_m = Some(meters);
        self
    }
}

/// Everything one source returned for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    /// Results in source order.
    pub results: Vec<SearchResult>,
    /// The source's estimate of total matches, independent of paging.
    pub total_hits: u64,
    /// Free-form properties reported by the source.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Time the source spent on the query, if known.
    #[serde(default)]
    pub elapsed: Option<Duration>,
}

impl SourceResult {
    /// Build a result set with the given hit estimate.
    pub fn new(results: Vec<SearchResult>, total_hits: u64) -> Self {
        Self {
            results,
            total_hits,
            properties: BTreeMap::new(),
            elapsed: None,
        }
    }
}

/// Diagnostics for a source that failed, timed out, or was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingDetail {
    /// The source this detail describes.
    pub source_id: String,
    /// Why the source contributed no results, if it failed.
    pub error: Option<SourceError>,
    /// Non-fatal notes.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ProcessingDetail {
    /// Detail for a failed source.
    pub fn failed(source_id: impl Into<String>, error: SourceError) -> Self {
        Self {
            source_id: source_id.into(),
            error: Some(error),
            warnings: Vec::new(),
        }
    }

    /// Detail carrying only a warning.
    pub fn warning(source_id: impl Into<String>, warning: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            error: None,
            warnings: vec![warning.into()],
        }
    }
}

/// The merged, ranked, paged outcome of a federated query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResponse {
    /// The page of results after sorting.
    pub results: Vec<SearchResult>,
    /// Sum of every responding source's hit estimate.
    pub total_hits: u64,
    /// One entry per source that did not contribute normally.
    pub processing_details: Vec<ProcessingDetail>,
    /// Properties reported by each responding source, keyed by source id.
    pub source_properties: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    /// Sources that answered, in the order they were collected.
    pub responded_sources: Vec<String>,
    /// Correlation id of the query this answers.
    pub correlation_id: String,
}

/// Direction of a sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// A requested sort: which property, which direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    /// Property name (`relevance`, `distance`, a temporal attribute, or any attribute).
    pub property: String,
    /// Sort direction.
    pub order: SortOrder,
}

impl SortSpec {
    /// Build a sort spec.
    pub fn new(property: impl Into<String>, order: SortOrder) -> Self {
        Self {
            property: property.into(),
            order,
        }
    }

    /// Highest relevance first.
    pub fn relevance() -> Self {
        Self::new("relevance", SortOrder::Descending)
    }

    /// Nearest first.
    pub fn distance() -> Self {
        Self::new("distance", SortOrder::Ascending)
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::relevance()
    }
}
