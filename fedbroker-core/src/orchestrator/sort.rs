//! Result ordering for merged result sets.
//!
//! The sort property picks a comparator: relevance, distance, a known
//! temporal attribute, or a generic comparison over any other attribute.
//! Results without a value for the property always sort last, whichever the
//! direction, and ties keep their merge order.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::filter::{Coord, record_location};
use crate::query::Query;
use crate::types::{AttributeValue, Record, SearchResult, SortOrder, SortSpec};

/// Property names that select the relevance comparator.
const RELEVANCE_PROPERTIES: &[&str] = &["relevance", "score"];

/// Property names that select the distance comparator.
const DISTANCE_PROPERTIES: &[&str] = &["distance"];

/// Date attributes compared chronologically.
pub const TEMPORAL_ATTRIBUTES: &[&str] = &["created", "modified", "effective", "expiration"];

/// Which comparator a sort property selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    /// Source or renormalized relevance score.
    Relevance,
    /// Distance from the query point.
    Distance,
    /// A known date attribute.
    Temporal(String),
    /// Any other attribute.
    Property(String),
}

impl SortKey {
    /// Classify a sort property name (case-insensitive).
    pub fn classify(property: &str) -> Self {
        let lower = property.trim().to_lowercase();
        if RELEVANCE_PROPERTIES.contains(&lower.as_str()) {
            Self::Relevance
        } else if DISTANCE_PROPERTIES.contains(&lower.as_str()) {
            Self::Distance
        } else if TEMPORAL_ATTRIBUTES.contains(&lower.as_str()) {
            Self::Temporal(lower)
        } else {
            Self::Property(property.trim().to_owned())
        }
    }
}

/// The sort actually applied to a query.
///
/// An explicit sort wins. Without one, a query with spatial but no textual
/// criteria sorts nearest first; everything else uses `default_sort`.
pub fn effective_sort(query: &Query, default_sort: &SortSpec) -> SortSpec {
    if let Some(sort) = query.sort() {
        return sort.clone();
    }
    let criteria = query.criteria();
    if criteria.spatial.is_some() && criteria.text.is_none() {
        return SortSpec::distance();
    }
    default_sort.clone()
}

/// Whether `sort` orders by relevance.
pub fn is_relevance(sort: &SortSpec) -> bool {
    SortKey::classify(&sort.property) == SortKey::Relevance
}

#[derive(Debug, Clone, PartialEq)]
enum SortValue {
    Number(f64),
    Date(DateTime<Utc>),
    Text(String),
}

impl SortValue {
    fn rank(&self) -> u8 {
        match self {
            Self::Number(_) => 0,
            Self::Date(_) => 1,
            Self::Text(_) => 2,
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn attribute_value(record: &Record, name: &str) -> Option<SortValue> {
    match record.attributes.get(name) {
        Some(AttributeValue::Number(n)) => Some(SortValue::Number(*n)),
        Some(AttributeValue::Date(d)) => Some(SortValue::Date(*d)),
        Some(other) => Some(SortValue::Text(other.as_text())),
        None => record.attribute_text(name).map(SortValue::Text),
    }
}

fn temporal_value(record: &Record, name: &str) -> Option<SortValue> {
    match record.attributes.get(name)? {
        AttributeValue::Date(d) => Some(SortValue::Date(*d)),
        AttributeValue::Text(s) => s.parse().ok().map(SortValue::Date),
        _ => None,
    }
}

fn distance_value(result: &SearchResult, origin: Option<Coord>) -> Option<SortValue> {
    result
        .distance_m
        .or_else(|| record_location(&result.record)?.distance_to_m(origin?))
        .map(SortValue::Number)
}

fn sort_value(result: &SearchResult, key: &SortKey, origin: Option<Coord>) -> Option<SortValue> {
    match key {
        SortKey::Relevance => result.relevance.map(SortValue::Number),
        SortKey::Distance => distance_value(result, origin),
        SortKey::Temporal(name) => temporal_value(&result.record, name),
        SortKey::Property(name) => attribute_value(&result.record, name),
    }
}

/// Stable sort of `results` by `sort`.
///
/// `origin` is used for results that carry no distance of their own but
/// have a `location` attribute.
pub fn sort_results(results: &mut Vec<SearchResult>, sort: &SortSpec, origin: Option<Coord>) {
    let key = SortKey::classify(&sort.property);
    let mut keyed: Vec<(Option<SortValue>, SearchResult)> = results
        .drain(..)
        .map(|r| (sort_value(&r, &key, origin), r))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => match sort.order {
            SortOrder::Ascending => a.compare(b),
            SortOrder::Descending => b.compare(a),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    results.extend(keyed.into_iter().map(|(_, r)| r));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SpatialCriterion;

    fn scored(id: &str, relevance: Option<f64>) -> SearchResult {
        let result = SearchResult::new(Record::new(id, "alpha"));
        match relevance {
            Some(score) => result.with_relevance(score),
            None => result,
        }
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.record.id.as_str()).collect()
    }

    #[test]
    fn classify_properties() {
        assert_eq!(SortKey::classify("Relevance"), SortKey::Relevance);
        assert_eq!(SortKey::classify("score"), SortKey::Relevance);
        assert_eq!(SortKey::classify("DISTANCE"), SortKey::Distance);
        assert_eq!(SortKey::classify("Modified"), SortKey::Temporal("modified".into()));
        assert_eq!(SortKey::classify("title"), SortKey::Property("title".into()));
    }

    #[test]
    fn relevance_descending_with_missing_last() {
        let mut results = vec![
            scored("a", Some(0.2)),
            scored("b", None),
            scored("c", Some(0.9)),
            scored("d", Some(0.5)),
        ];
        sort_results(&mut results, &SortSpec::relevance(), None);
        assert_eq!(ids(&results), vec!["c", "d", "a", "b"]);
    }

    #[test]
    fn ties_keep_merge_order() {
        let mut results = vec![
            scored("a", Some(0.5)),
            scored("b", Some(0.5)),
            scored("c", Some(0.5)),
        ];
        sort_results(&mut results, &SortSpec::relevance(), None);
        assert_eq!(ids(&results), vec!["a", "b", "c"]);
    }

    #[test]
    fn temporal_sort_ascending() {
        let dated = |id: &str, date: &str| {
            SearchResult::new(Record::new(id, "alpha").with_attribute(
                "modified",
                AttributeValue::Date(date.parse().expect("date")),
            ))
        };
        let mut results = vec![
            dated("late", "2024-05-01T00:00:00Z"),
            scored("undated", None),
            dated("early", "2023-01-01T00:00:00Z"),
        ];
        sort_results(
            &mut results,
            &SortSpec::new("modified", SortOrder::Ascending),
            None,
        );
        assert_eq!(ids(&results), vec!["early", "late", "undated"]);
    }

    #[test]
    fn distance_sort_uses_reported_then_computed() {
        let located = |id: &str, wkt: &str| {
            SearchResult::new(
                Record::new(id, "alpha")
                    .with_attribute("location", AttributeValue::Geometry(wkt.into())),
            )
        };
        let mut results = vec![
            located("far", "POINT(0 10)"),
            scored("nowhere", None),
            SearchResult::new(Record::new("reported", "alpha")).with_distance(5.0),
            located("near", "POINT(0 1)"),
        ];
        sort_results(&mut results, &SortSpec::distance(), Some(Coord::new(0.0, 0.0)));
        assert_eq!(ids(&results), vec!["reported", "near", "far", "nowhere"]);
    }

    #[test]
    fn generic_property_sort() {
        let titled = |id: &str, title: &str| SearchResult::new(Record::new(id, "alpha").with_title(title));
        let mut results = vec![titled("1", "beta"), titled("2", "Alpha"), titled("3", "gamma")];
        sort_results(&mut results, &SortSpec::new("title", SortOrder::Ascending), None);
        assert_eq!(ids(&results), vec!["2", "1", "3"]);
    }

    #[test]
    fn effective_sort_rules() {
        let default_sort = SortSpec::relevance();
        let text = Query::builder().text("coast").build().expect("query");
        assert_eq!(effective_sort(&text, &default_sort), SortSpec::relevance());

        let spatial = Query::builder()
            .spatial(SpatialCriterion::PointRadius {
                latitude: 1.0,
                longitude: 1.0,
                radius_m: 100.0,
            })
            .build()
            .expect("query");
        assert_eq!(effective_sort(&spatial, &default_sort), SortSpec::distance());

        let explicit = Query::builder()
            .text("coast")
            .sort(SortSpec::new("created", SortOrder::Ascending))
            .build()
            .expect("query");
        assert_eq!(
            effective_sort(&explicit, &default_sort),
            SortSpec::new("created", SortOrder::Ascending)
        );
    }

    #[test]
    fn is_relevance_accepts_aliases() {
        assert!(is_relevance(&SortSpec::new("Score", SortOrder::Descending)));
        assert!(!is_relevance(&SortSpec::distance()));
    }
}
