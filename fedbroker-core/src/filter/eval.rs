//! Evaluate a compiled filter against a record.

use chrono::{DateTime, Utc};

use super::geometry::Geometry;
use super::{FilterPredicate, TextMatch};
use crate::markup;
use crate::types::{AttributeValue, LOCATION_ATTRIBUTE, Record};

impl FilterPredicate {
    /// Whether `record` satisfies this predicate.
    ///
    /// Missing or mistyped attributes never match; `Not` of such a
    /// predicate therefore does.
    pub fn evaluate(&self, record: &Record) -> bool {
        match self {
            Self::Text { phrase, mode } => text_matches(&searchable_text(record), phrase, *mode),
            Self::TextEquals { attribute, value } => {
                record.attribute_text(attribute).as_deref() == Some(value.as_str())
            }
            Self::TextLike { attribute, pattern } => record
                .attribute_text(attribute)
                .is_some_and(|text| like_match(&text, pattern, false)),
            Self::PathMatch { path, literal } => path_values(record, path)
                .iter()
                .any(|value| pattern_matches(value, literal, false)),
            Self::PathExists { path } => !path_values(record, path).is_empty(),
            Self::Before { attribute, instant } => {
                date_of(record, attribute).is_some_and(|d| d < *instant)
            }
            Self::After { attribute, instant } => {
                date_of(record, attribute).is_some_and(|d| d > *instant)
            }
            Self::During {
                attribute,
                start,
                end,
            } => date_of(record, attribute).is_some_and(|d| *start <= d && d <= *end),
            Self::Within { geometry } => {
                record_location(record).is_some_and(|loc| geometry.contains(&loc))
            }
            Self::Intersects { geometry } => {
                record_location(record).is_some_and(|loc| geometry.intersects(&loc))
            }
            Self::WithinDistance { center, radius_m } => record_location(record)
                .and_then(|loc| loc.distance_to_m(*center))
                .is_some_and(|d| d <= *radius_m),
            Self::Compare {
                attribute,
                op,
                value,
            } => number_of(record, attribute).is_some_and(|n| op.test(n, *value)),
            Self::And(children) => children.iter().all(|c| c.evaluate(record)),
            Self::Or(children) => children.iter().any(|c| c.evaluate(record)),
            Self::Not(inner) => !inner.evaluate(record),
        }
    }
}

/// Parse the record's `location` attribute, if it holds valid WKT.
pub fn record_location(record: &Record) -> Option<Geometry> {
    match record.attributes.get(LOCATION_ATTRIBUTE)? {
        AttributeValue::Geometry(wkt) | AttributeValue::Text(wkt) => Geometry::parse_wkt(wkt).ok(),
        _ => None,
    }
}

/// All text a free-text predicate searches: id, title, text attributes and metadata.
pub fn searchable_text(record: &Record) -> String {
    let mut parts = vec![record.id.clone()];
    parts.extend(record.title.clone());
    parts.extend(record.attributes.values().filter_map(|v| match v {
        AttributeValue::Text(s) => Some(s.clone()),
        _ => None,
    }));
    if let Some(metadata) = &record.metadata {
        parts.push(markup::extract_text(metadata));
    }
    parts.join(" ")
}

fn path_values(record: &Record, path: &str) -> Vec<String> {
    let from_markup = record
        .metadata
        .as_deref()
        .map(|m| markup::values_at_path(m, path))
        .unwrap_or_default();
    if !from_markup.is_empty() {
        return from_markup;
    }
    let name = path.trim().trim_start_matches('/');
    if name.is_empty() || name.contains('/') {
        return Vec::new();
    }
    record.attribute_text(name).into_iter().collect()
}

fn date_of(record: &Record, attribute: &str) -> Option<DateTime<Utc>> {
    match record.attributes.get(attribute)? {
        AttributeValue::Date(d) => Some(*d),
        AttributeValue::Text(s) => s.parse().ok(),
        _ => None,
    }
}

fn number_of(record: &Record, attribute: &str) -> Option<f64> {
    match record.attributes.get(attribute)? {
        AttributeValue::Number(n) => Some(*n),
        AttributeValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn has_wildcards(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// Substring match, or anchored wildcard match when the pattern has `*`/`?`.
fn pattern_matches(text: &str, pattern: &str, case_sensitive: bool) -> bool {
    if has_wildcards(pattern) {
        like_match(text, pattern, case_sensitive)
    } else if case_sensitive {
        text.contains(pattern)
    } else {
        text.to_lowercase().contains(&pattern.to_lowercase())
    }
}

fn text_matches(haystack: &str, phrase: &str, mode: TextMatch) -> bool {
    match mode {
        TextMatch::Fuzzy => fuzzy_matches(haystack, phrase),
        TextMatch::Plain | TextMatch::CaseSensitive => {
            let case_sensitive = mode == TextMatch::CaseSensitive;
            if has_wildcards(phrase) {
                like_match(haystack, phrase, case_sensitive)
                    || haystack
                        .split_whitespace()
                        .any(|word| like_match(word, phrase, case_sensitive))
            } else {
                pattern_matches(haystack, phrase, case_sensitive)
            }
        }
    }
}

fn words(text: &str) -> Vec<Vec<char>> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase().chars().collect())
        .collect()
}

fn fuzzy_matches(haystack: &str, phrase: &str) -> bool {
    let candidates = words(haystack);
    let wanted = words(phrase);
    !wanted.is_empty()
        && wanted
            .iter()
            .all(|w| candidates.iter().any(|c| within_one_edit(w, c)))
}

/// Levenshtein distance of at most one.
fn within_one_edit(a: &[char], b: &[char]) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if long.len() - short.len() > 1 {
        return false;
    }
    let prefix = short.iter().zip(long).take_while(|(x, y)| x == y).count();
    if short.len() == long.len() {
        short[prefix..].len() <= 1 || short[prefix + 1..] == long[prefix + 1..]
    } else {
        short[prefix..] == long[prefix + 1..]
    }
}

/// Anchored wildcard match: `*` is any run of characters, `?` exactly one.
pub fn like_match(text: &str, pattern: &str, case_sensitive: bool) -> bool {
    let fold = |s: &str| -> Vec<char> {
        if case_sensitive {
            s.chars().collect()
        } else {
            s.to_lowercase().chars().collect()
        }
    };
    let text = fold(text);
    let pattern = fold(pattern);

    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}
