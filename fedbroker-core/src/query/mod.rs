//! Immutable federated queries and the builder that validates them.
//!
//! A [`Query`] is built once per inbound request. [`QueryBuilder::build`]
//! runs the keyword parser and the filter compiler, so a query that exists is
//! a query that can be dispatched.

pub mod keyword;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::filter::{self, FilterPredicate};
use crate::types::SortSpec;

/// Free-text criterion in the keyword language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCriterion {
    /// The raw search text.
    pub text: String,
    /// Match case exactly.
    #[serde(default)]
    pub case_sensitive: bool,
    /// Allow near matches.
    #[serde(default)]
    pub fuzzy: bool,
}

impl TextCriterion {
    /// Plain, case-insensitive text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            case_sensitive: false,
            fuzzy: false,
        }
    }
}

/// Geospatial criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "relation", rename_all = "snake_case")]
pub enum SpatialCriterion {
    /// Records lying inside the WKT geometry.
    Within {
        /// Geometry as WKT.
        wkt: String,
    },
    /// Records touching the WKT geometry.
    Intersects {
        /// Geometry as WKT.
        wkt: String,
    },
    /// Records within `radius_m` meters of a point.
    PointRadius {
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
        /// Radius in meters.
        radius_m: f64,
    },
}

/// Temporal criterion over one date attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalCriterion {
    /// The date attribute to test, e.g. `modified`.
    pub attribute: String,
    /// Inclusive lower bound.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub end: Option<DateTime<Utc>>,
}

/// Comparison operator for property criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// Wildcard text match (`*` and `?`).
    Like,
}

/// A comparison against a single attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyCriterion {
    /// Attribute name.
    pub attribute: String,
    /// How to compare.
    pub op: Comparison,
    /// Value as supplied by the caller.
    pub value: String,
}

impl PropertyCriterion {
    /// Build a property criterion.
    pub fn new(attribute: impl Into<String>, op: Comparison, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }
}

/// Everything a caller may filter on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    /// Keyword text.
    pub text: Option<TextCriterion>,
    /// Geospatial filter.
    pub spatial: Option<SpatialCriterion>,
    /// Temporal filter.
    pub temporal: Option<TemporalCriterion>,
    /// Attribute comparisons, all of which must hold.
    #[serde(default)]
    pub properties: Vec<PropertyCriterion>,
}

/// An immutable, validated federated query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    criteria: Criteria,
    filter: FilterPredicate,
    filter_trace: String,
    sort: Option<SortSpec>,
    start_index: usize,
    page_size: usize,
    timeout_ms: i64,
    strict: bool,
    sources: Vec<String>,
    format: Option<String>,
    correlation_id: String,
    path: Vec<String>,
}

impl Query {
    /// Start building a query.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }

    /// The criteria the query was built from.
    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    /// The raw keyword text, if any.
    pub fn text(&self) -> Option<&str> {
        self.criteria.text.as_ref().map(|t| t.text.as_str())
    }

    /// The compiled filter.
    pub fn filter(&self) -> &FilterPredicate {
        &self.filter
    }

    /// Human-readable rendering of the compiled filter.
    pub fn filter_trace(&self) -> &str {
        &self.filter_trace
    }

    /// The explicit sort, if the caller gave one.
    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    /// One-based index of the first result of the page.
    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// Page size; 0 means no explicit page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Timeout in milliseconds; 0 or less means wait indefinitely.
    pub fn timeout_ms(&self) -> i64 {
        self.timeout_ms
    }

    /// Whether unsupported criteria were treated as errors.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Source ids the caller targeted; empty means all.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Requested response format tag.
    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    /// Correlation id, supplied by the caller or minted at build time.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Broker ids this query has already passed through.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The copy of this query that gets sent to sources.
    ///
    /// `local_id` is appended to the visited path. When the page does not
    /// start at 1, sources are asked for everything up to the end of the
    /// page starting from 1; the broker applies the offset after merging.
    pub fn forwarded_by(&self, local_id: &str) -> Query {
        let mut forwarded = self.clone();
        forwarded.path.push(local_id.to_owned());
        if self.start_index > 1 {
            forwarded.start_index = 1;
            if self.page_size > 0 {
                forwarded.page_size = (self.start_index - 1).saturating_add(self.page_size);
            }
        }
        forwarded
    }
}

/// Builder for [`Query`].
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    criteria: Criteria,
    sort: Option<SortSpec>,
    start_index: Option<usize>,
    page_size: usize,
    timeout_ms: i64,
    strict: bool,
    sources: Vec<String>,
    format: Option<String>,
    correlation_id: Option<String>,
    path: Vec<String>,
}

impl QueryBuilder {
    /// Keyword text with default matching.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.criteria.text = Some(TextCriterion::new(text));
        self
    }

    /// Keyword text with explicit matching flags.
    pub fn text_criterion(mut self, criterion: TextCriterion) -> Self {
        self.criteria.text = Some(criterion);
        self
    }

    /// Geospatial criterion.
    pub fn spatial(mut self, criterion: SpatialCriterion) -> Self {
        self.criteria.spatial = Some(criterion);
        self
    }

    /// Temporal criterion.
    pub fn temporal(mut self, criterion: TemporalCriterion) -> Self {
        self.criteria.temporal = Some(criterion);
        self
    }

    /// Add an attribute comparison.
    pub fn property(mut self, criterion: PropertyCriterion) -> Self {
        self.criteria.properties.push(criterion);
        self
    }

    /// Replace all criteria at once.
    pub fn criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Explicit sort.
    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    /// One-based start index.
    pub fn start_index(mut self, start_index: usize) -> Self {
        self.start_index = Some(start_index);
        self
    }

    /// Page size (0 = no explicit page size).
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Timeout in milliseconds (0 or less = none).
    pub fn timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Treat malformed or unsupported criteria as errors.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Target a subset of sources.
    pub fn sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Response format tag.
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Correlation id; minted if never set.
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Broker ids already visited by this query.
    pub fn path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path = path.into_iter().map(Into::into).collect();
        self
    }

    /// Validate criteria and compile the filter.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Parse`] for malformed keyword text and
    /// [`QueryError::Unsupported`] for invalid, contradictory, or missing
    /// criteria, or a start index of 0.
    pub fn build(self) -> Result<Query, QueryError> {
        let start_index = self.start_index.unwrap_or(1);
        if start_index == 0 {
            return Err(QueryError::Unsupported(
                "start index must be at least 1".into(),
            ));
        }

        let filter = filter::compile_criteria(&self.criteria, self.strict)?;
        let filter_trace = filter.to_string();
        let correlation_id = self
            .correlation_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tracing::trace!(%correlation_id, filter = %filter_trace, "compiled query filter");

        Ok(Query {
            criteria: self.criteria,
            filter,
            filter_trace,
            sort: self.sort,
            start_index,
            page_size: self.page_size,
            timeout_ms: self.timeout_ms,
            strict: self.strict,
            sources: self.sources,
            format: self.format,
            correlation_id,
            path: self.path,
        })
    }
}
