//! Filter compiler: keyword AST and structured criteria to a predicate tree.
//!
//! The textual criterion goes through the keyword parser; geospatial,
//! temporal and property criteria compile on their own and are conjoined with
//! it. `Display` on [`FilterPredicate`] produces the trace string attached to
//! every [`crate::Query`].

mod eval;
pub mod geometry;

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::QueryError;
use crate::query::keyword::{self, AstNode, Operator};
use crate::query::{Comparison, Criteria, PropertyCriterion, SpatialCriterion, TemporalCriterion};

pub use eval::{like_match, record_location, searchable_text};
pub use geometry::{Coord, Geometry, GeometryError};

/// Pseudo-attribute for "any text field" in traces.
pub const ANY_TEXT: &str = "anyText";

/// Pseudo-attribute for "any geometry field" in traces.
pub const ANY_GEO: &str = "anyGeo";

/// How a free-text predicate matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextMatch {
    /// Case-insensitive substring or wildcard match.
    Plain,
    /// Exact-case substring or wildcard match.
    CaseSensitive,
    /// Every word must be within one edit of a record word.
    Fuzzy,
}

/// Numeric comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl NumericOp {
    /// Symbol used in traces.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Apply the comparison.
    pub fn test(&self, left: f64, right: f64) -> bool {
        match self {
            Self::Eq => left == right,
            Self::Ne => left != right,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
        }
    }
}

/// Compiled boolean filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterPredicate {
    /// Free text anywhere in the record.
    Text {
        /// Text or wildcard pattern.
        phrase: String,
        /// Matching mode.
        mode: TextMatch,
    },
    /// Attribute text equals a value exactly.
    TextEquals {
        /// Attribute name.
        attribute: String,
        /// Expected value.
        value: String,
    },
    /// Attribute text matches a wildcard pattern.
    TextLike {
        /// Attribute name.
        attribute: String,
        /// Pattern with `*` and `?`.
        pattern: String,
    },
    /// A literal matches at a structured path in the record metadata.
    PathMatch {
        /// Slash-separated path, optionally ending in `@attribute`.
        path: String,
        /// Literal or wildcard pattern.
        literal: String,
    },
    /// Something exists at a structured path.
    PathExists {
        /// Slash-separated path.
        path: String,
    },
    /// Date attribute strictly before an instant.
    Before {
        /// Date attribute.
        attribute: String,
        /// Exclusive bound.
        instant: DateTime<Utc>,
    },
    /// Date attribute strictly after an instant.
    After {
        /// Date attribute.
        attribute: String,
        /// Exclusive bound.
        instant: DateTime<Utc>,
    },
    /// Date attribute inside an inclusive range.
    During {
        /// Date attribute.
        attribute: String,
        /// Inclusive start.
        start: DateTime<Utc>,
        /// Inclusive end.
        end: DateTime<Utc>,
    },
    /// Record location lies inside a geometry.
    Within {
        /// Containing geometry.
        geometry: Geometry,
    },
    /// Record location touches a geometry.
    Intersects {
        /// Geometry to test against.
        geometry: Geometry,
    },
    /// Record location within a distance of a point.
    WithinDistance {
        /// Center point.
        center: Coord,
        /// Radius in meters.
        radius_m: f64,
    },
    /// Numeric attribute comparison.
    Compare {
        /// Numeric attribute.
        attribute: String,
        /// Operator.
        op: NumericOp,
        /// Right-hand side.
        value: f64,
    },
    /// All children hold.
    And(Vec<FilterPredicate>),
    /// Any child holds.
    Or(Vec<FilterPredicate>),
    /// The child does not hold.
    Not(Box<FilterPredicate>),
}

impl FilterPredicate {
    /// Conjunction of two predicates.
    pub fn and(left: FilterPredicate, right: FilterPredicate) -> Self {
        Self::And(vec![left, right])
    }

    /// Disjunction of two predicates.
    pub fn or(left: FilterPredicate, right: FilterPredicate) -> Self {
        Self::Or(vec![left, right])
    }

    /// Negation.
    pub fn negate(inner: FilterPredicate) -> Self {
        Self::Not(Box::new(inner))
    }

    /// The point a distance sort should measure from, if the filter has one.
    pub fn distance_origin(&self) -> Option<Coord> {
        match self {
            Self::WithinDistance { center, .. } => Some(*center),
            Self::And(children) | Self::Or(children) => {
                children.iter().find_map(FilterPredicate::distance_origin)
            }
            _ => None,
        }
    }
}

fn instant(d: &DateTime<Utc>) -> String {
    d.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn join(f: &mut fmt::Formatter<'_>, children: &[FilterPredicate], op: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, " {op} ")?;
        }
        write!(f, "{child}")?;
    }
    f.write_str(")")
}

impl fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { phrase, mode } => {
                let verb = match mode {
                    TextMatch::Plain => "ILIKE",
                    TextMatch::CaseSensitive => "LIKE",
                    TextMatch::Fuzzy => "FUZZY",
                };
                write!(f, "{ANY_TEXT} {verb} '{phrase}'")
            }
            Self::TextEquals { attribute, value } => write!(f, "{attribute} = '{value}'"),
            Self::TextLike { attribute, pattern } => write!(f, "{attribute} ILIKE '{pattern}'"),
            Self::PathMatch { path, literal } => write!(f, "xpath('{path}') ILIKE '{literal}'"),
            Self::PathExists { path } => write!(f, "xpath('{path}') EXISTS"),
            Self::Before { attribute, instant: at } => {
                write!(f, "{attribute} BEFORE {}", instant(at))
            }
            Self::After { attribute, instant: at } => {
                write!(f, "{attribute} AFTER {}", instant(at))
            }
            Self::During {
                attribute,
                start,
                end,
            } => write!(f, "{attribute} DURING {}/{}", instant(start), instant(end)),
            Self::Within { geometry } => write!(f, "{ANY_GEO} WITHIN {geometry}"),
            Self::Intersects { geometry } => write!(f, "{ANY_GEO} INTERSECTS {geometry}"),
            Self::WithinDistance { center, radius_m } => write!(
                f,
                "{ANY_GEO} DWITHIN POINT({} {}), {radius_m} meters",
                center.x, center.y
            ),
            Self::Compare {
                attribute,
                op,
                value,
            } => write!(f, "{attribute} {} {value}", op.symbol()),
            Self::And(children) => join(f, children, "AND"),
            Self::Or(children) => join(f, children, "OR"),
            Self::Not(inner) => write!(f, "NOT {inner}"),
        }
    }
}

/// Caller flags that choose the free-text matching mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextOptions {
    /// Match case exactly.
    pub case_sensitive: bool,
    /// Allow near matches.
    pub fuzzy: bool,
    /// Surface parse problems instead of recovering.
    pub strict: bool,
}

impl TextOptions {
    fn mode(&self) -> TextMatch {
        if self.case_sensitive {
            TextMatch::CaseSensitive
        } else if self.fuzzy {
            TextMatch::Fuzzy
        } else {
            TextMatch::Plain
        }
    }
}

/// Parse keyword text and compile it with default matching.
///
/// # Errors
///
/// Returns [`QueryError::Parse`] if the text cannot be parsed.
pub fn parse_keyword_query(text: &str, strict: bool) -> Result<FilterPredicate, QueryError> {
    compile_keyword_query(
        text,
        &TextOptions {
            strict,
            ..TextOptions::default()
        },
    )
}

/// Parse keyword text and compile it with the given matching options.
///
/// # Errors
///
/// Returns [`QueryError::Parse`] if the text cannot be parsed.
pub fn compile_keyword_query(
    text: &str,
    options: &TextOptions,
) -> Result<FilterPredicate, QueryError> {
    let ast = keyword::parse(text, options.strict)?;
    Ok(compile_ast(&ast, options))
}

/// Compile a parsed keyword expression.
pub fn compile_ast(node: &AstNode, options: &TextOptions) -> FilterPredicate {
    match node {
        AstNode::Keyword(text) => compile_keyword(text, options),
        AstNode::Operator { op, left, right } => {
            let left = compile_ast(left, options);
            let right = compile_ast(right, options);
            match op {
                Operator::And => FilterPredicate::and(left, right),
                Operator::Or => FilterPredicate::or(left, right),
                Operator::Not => FilterPredicate::and(left, FilterPredicate::negate(right)),
            }
        }
    }
}

/// Split `{path}:literal` into its parts.
fn split_path_literal(text: &str) -> Option<(&str, &str)> {
    let inner = text.strip_prefix('{')?;
    let close = inner.find("}:")?;
    let path = inner[..close].trim();
    if path.is_empty() {
        return None;
    }
    Some((path, &inner[close + 2..]))
}

fn compile_keyword(text: &str, options: &TextOptions) -> FilterPredicate {
    match split_path_literal(text) {
        Some((path, "")) => FilterPredicate::PathExists {
            path: path.to_owned(),
        },
        Some((path, literal)) => FilterPredicate::PathMatch {
            path: path.to_owned(),
            literal: literal.to_owned(),
        },
        None => FilterPredicate::Text {
            phrase: text.to_owned(),
            mode: options.mode(),
        },
    }
}

/// Outcome of compiling one optional criterion.
enum Compiled {
    Predicate(FilterPredicate),
    Dropped(String),
}

/// Compile every criterion and conjoin the results.
///
/// In strict mode anything malformed is an error; otherwise malformed
/// numeric or geometry parameters drop their criterion with a warning.
/// Contradictory dates and unparsable geometry are errors in both modes.
///
/// # Errors
///
/// Returns [`QueryError`] as described above, or when no criterion remains.
pub fn compile_criteria(criteria: &Criteria, strict: bool) -> Result<FilterPredicate, QueryError> {
    let mut parts = Vec::new();
    let mut keep = |compiled: Compiled| -> Result<(), QueryError> {
        match compiled {
            Compiled::Predicate(p) => parts.push(p),
            Compiled::Dropped(reason) if strict => return Err(QueryError::Unsupported(reason)),
            Compiled::Dropped(reason) => {
                tracing::warn!(%reason, "dropping unsupported criterion");
            }
        }
        Ok(())
    };

    if let Some(text) = &criteria.text {
        let options = TextOptions {
            case_sensitive: text.case_sensitive,
            fuzzy: text.fuzzy,
            strict,
        };
        keep(Compiled::Predicate(compile_keyword_query(&text.text, &options)?))?;
    }
    if let Some(spatial) = &criteria.spatial {
        keep(compile_spatial(spatial, strict)?)?;
    }
    if let Some(temporal) = &criteria.temporal {
        keep(compile_temporal(temporal)?)?;
    }
    for property in &criteria.properties {
        keep(compile_property(property))?;
    }

    match parts.len() {
        0 => Err(QueryError::Unsupported(
            "query must specify at least one usable search criterion".into(),
        )),
        1 => Ok(parts.remove(0)),
        _ => Ok(FilterPredicate::And(parts)),
    }
}

fn compile_spatial(criterion: &SpatialCriterion, strict: bool) -> Result<Compiled, QueryError> {
    let parse = |wkt: &str| -> Result<Option<Geometry>, QueryError> {
        let geometry =
            Geometry::parse_wkt(wkt).map_err(|e| QueryError::Unsupported(e.to_string()))?;
        if !geometry.is_geographic() {
            if strict {
                return Err(QueryError::Unsupported(format!(
                    "geometry has coordinates outside longitude/latitude range: {geometry}"
                )));
            }
            return Ok(None);
        }
        Ok(Some(geometry))
    };

    Ok(match criterion {
        SpatialCriterion::Within { wkt } => match parse(wkt)? {
            Some(geometry) => Compiled::Predicate(FilterPredicate::Within { geometry }),
            None => Compiled::Dropped(format!("geometry out of range: {wkt}")),
        },
        SpatialCriterion::Intersects { wkt } => match parse(wkt)? {
            Some(geometry) => Compiled::Predicate(FilterPredicate::Intersects { geometry }),
            None => Compiled::Dropped(format!("geometry out of range: {wkt}")),
        },
        SpatialCriterion::PointRadius {
            latitude,
            longitude,
            radius_m,
        } => {
            let center = Coord::new(*longitude, *latitude);
            if !center.is_geographic() {
                Compiled::Dropped(format!(
                    "invalid point: latitude {latitude}, longitude {longitude}"
                ))
            } else if !radius_m.is_finite() || *radius_m < 0.0 {
                Compiled::Dropped(format!("invalid radius: {radius_m}"))
            } else {
                Compiled::Predicate(FilterPredicate::WithinDistance {
                    center,
                    radius_m: *radius_m,
                })
            }
        }
    })
}

fn compile_temporal(criterion: &TemporalCriterion) -> Result<Compiled, QueryError> {
    let attribute = criterion.attribute.clone();
    Ok(match (criterion.start, criterion.end) {
        (Some(start), Some(end)) if start > end => {
            return Err(QueryError::Unsupported(format!(
                "start date {} is after end date {}",
                instant(&start),
                instant(&end)
            )));
        }
        (Some(start), Some(end)) => Compiled::Predicate(FilterPredicate::During {
            attribute,
            start,
            end,
        }),
        (Some(start), None) => Compiled::Predicate(FilterPredicate::After {
            attribute,
            instant: start,
        }),
        (None, Some(end)) => Compiled::Predicate(FilterPredicate::Before {
            attribute,
            instant: end,
        }),
        (None, None) => Compiled::Dropped(format!(
            "temporal criterion on '{}' has neither start nor end",
            criterion.attribute
        )),
    })
}

fn compile_property(criterion: &PropertyCriterion) -> Compiled {
    let attribute = criterion.attribute.clone();
    let numeric = criterion.value.trim().parse::<f64>().ok().filter(|v| v.is_finite());
    let op = match criterion.op {
        Comparison::Like => {
            return Compiled::Predicate(FilterPredicate::TextLike {
                attribute,
                pattern: criterion.value.clone(),
            });
        }
        Comparison::Equal => NumericOp::Eq,
        Comparison::NotEqual => NumericOp::Ne,
        Comparison::Less => NumericOp::Lt,
        Comparison::LessOrEqual => NumericOp::Le,
        Comparison::Greater => NumericOp::Gt,
        Comparison::GreaterOrEqual => NumericOp::Ge,
    };

    match (numeric, op) {
        (Some(value), op) => Compiled::Predicate(FilterPredicate::Compare {
            attribute,
            op,
            value,
        }),
        (None, NumericOp::Eq) => Compiled::Predicate(FilterPredicate::TextEquals {
            attribute,
            value: criterion.value.clone(),
        }),
        (None, NumericOp::Ne) => Compiled::Predicate(FilterPredicate::negate(
            FilterPredicate::TextEquals {
                attribute,
                value: criterion.value.clone(),
            },
        )),
        (None, op) => Compiled::Dropped(format!(
            "'{}' {} needs a numeric value, got '{}'",
            criterion.attribute,
            op.symbol(),
            criterion.value
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::TextCriterion;

    fn date(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid date")
    }

    fn text(phrase: &str) -> FilterPredicate {
        FilterPredicate::Text {
            phrase: phrase.into(),
            mode: TextMatch::Plain,
        }
    }

    #[test]
    fn path_literal_compiles_to_path_match() {
        let p = parse_keyword_query("{title}:Report", true).expect("compile");
        assert_eq!(
            p,
            FilterPredicate::PathMatch {
                path: "title".into(),
                literal: "Report".into(),
            }
        );
        assert_eq!(p.to_string(), "xpath('title') ILIKE 'Report'");
    }

    #[test]
    fn empty_path_literal_compiles_to_exists() {
        let p = parse_keyword_query("{title}:", true).expect("compile");
        assert_eq!(
            p,
            FilterPredicate::PathExists {
                path: "title".into()
            }
        );
    }

    #[test]
    fn phrase_path_literal_keeps_spaces() {
        let p = parse_keyword_query("\"{/metacard/title}:Quarterly Report\"", true)
            .expect("compile");
        assert_eq!(
            p,
            FilterPredicate::PathMatch {
                path: "/metacard/title".into(),
                literal: "Quarterly Report".into(),
            }
        );
    }

    #[test]
    fn braces_without_colon_are_plain_text() {
        assert_eq!(parse_keyword_query("{title}", true), Ok(text("{title}")));
        assert_eq!(parse_keyword_query("{}:x", true), Ok(text("{}:x")));
    }

    #[test]
    fn operators_compile_to_combinators() {
        let p = parse_keyword_query("a OR b NOT c", true).expect("compile");
        let expected = FilterPredicate::and(
            FilterPredicate::or(text("a"), text("b")),
            FilterPredicate::negate(text("c")),
        );
        assert_eq!(p, expected);
        assert_eq!(
            p.to_string(),
            "((anyText ILIKE 'a' OR anyText ILIKE 'b') AND NOT anyText ILIKE 'c')"
        );
    }

    #[test]
    fn case_sensitive_wins_over_fuzzy() {
        let options = TextOptions {
            case_sensitive: true,
            fuzzy: true,
            strict: true,
        };
        let p = compile_keyword_query("Harbour", &options).expect("compile");
        assert_eq!(
            p,
            FilterPredicate::Text {
                phrase: "Harbour".into(),
                mode: TextMatch::CaseSensitive
            }
        );
    }

    #[test]
    fn fuzzy_flag_selects_fuzzy_mode() {
        let options = TextOptions {
            fuzzy: true,
            ..TextOptions::default()
        };
        let p = compile_keyword_query("harbour", &options).expect("compile");
        assert_eq!(p.to_string(), "anyText FUZZY 'harbour'");
    }

    #[test]
    fn criteria_are_conjoined() {
        let criteria = Criteria {
            text: Some(TextCriterion::new("ice")),
            temporal: Some(TemporalCriterion {
                attribute: "modified".into(),
                start: Some(date("2024-01-01T00:00:00Z")),
                end: None,
            }),
            ..Criteria::default()
        };
        let p = compile_criteria(&criteria, true).expect("compile");
        assert_eq!(
            p.to_string(),
            "(anyText ILIKE 'ice' AND modified AFTER 2024-01-01T00:00:00Z)"
        );
    }

    #[test]
    fn start_after_end_fails_in_both_modes() {
        let criteria = Criteria {
            temporal: Some(TemporalCriterion {
                attribute: "created".into(),
                start: Some(date("2024-02-01T00:00:00Z")),
                end: Some(date("2024-01-01T00:00:00Z")),
            }),
            ..Criteria::default()
        };
        for strict in [true, false] {
            let err = compile_criteria(&criteria, strict).expect_err("should fail");
            assert!(err.to_string().contains("after end date"));
        }
    }

    #[test]
    fn during_and_before() {
        let during = compile_temporal(&TemporalCriterion {
            attribute: "created".into(),
            start: Some(date("2024-01-01T00:00:00Z")),
            end: Some(date("2024-02-01T00:00:00Z")),
        })
        .expect("compile");
        assert!(matches!(during, Compiled::Predicate(FilterPredicate::During { .. })));

        let before = compile_temporal(&TemporalCriterion {
            attribute: "created".into(),
            start: None,
            end: Some(date("2024-02-01T00:00:00Z")),
        })
        .expect("compile");
        assert!(matches!(before, Compiled::Predicate(FilterPredicate::Before { .. })));
    }

    #[test]
    fn bad_geometry_fails_in_both_modes() {
        let criteria = Criteria {
            spatial: Some(SpatialCriterion::Within {
                wkt: "POLYGON((0 0, 1 1))".into(),
            }),
            ..Criteria::default()
        };
        for strict in [true, false] {
            let err = compile_criteria(&criteria, strict).expect_err("should fail");
            assert!(err.to_string().contains("invalid geometry"));
        }
    }

    #[test]
    fn out_of_range_point_radius_is_strict_only() {
        let criteria = Criteria {
            text: Some(TextCriterion::new("ice")),
            spatial: Some(SpatialCriterion::PointRadius {
                latitude: 95.0,
                longitude: 10.0,
                radius_m: 1000.0,
            }),
            ..Criteria::default()
        };
        assert!(compile_criteria(&criteria, true).is_err());
        let lenient = compile_criteria(&criteria, false).expect("lenient");
        assert_eq!(lenient, text("ice"));
    }

    #[test]
    fn negative_radius_is_strict_only() {
        let criteria = Criteria {
            spatial: Some(SpatialCriterion::PointRadius {
                latitude: 10.0,
                longitude: 10.0,
                radius_m: -1.0,
            }),
            ..Criteria::default()
        };
        assert!(compile_criteria(&criteria, true).is_err());
        // Nothing usable remains once the only criterion is dropped.
        assert!(compile_criteria(&criteria, false).is_err());
    }

    #[test]
    fn point_radius_exposes_distance_origin() {
        let criteria = Criteria {
            text: Some(TextCriterion::new("ice")),
            spatial: Some(SpatialCriterion::PointRadius {
                latitude: 10.0,
                longitude: 20.0,
                radius_m: 500.0,
            }),
            ..Criteria::default()
        };
        let p = compile_criteria(&criteria, true).expect("compile");
        assert_eq!(p.distance_origin(), Some(Coord::new(20.0, 10.0)));
        assert!(p.to_string().contains("DWITHIN POINT(20 10), 500 meters"));
    }

    #[test]
    fn numeric_property_compiles_to_compare() {
        let p = compile_property(&PropertyCriterion::new("size", Comparison::Greater, "10"));
        assert!(matches!(
            p,
            Compiled::Predicate(FilterPredicate::Compare {
                op: NumericOp::Gt,
                ..
            })
        ));
    }

    #[test]
    fn non_numeric_ordering_is_strict_only() {
        let criteria = Criteria {
            text: Some(TextCriterion::new("ice")),
            properties: vec![PropertyCriterion::new("size", Comparison::Less, "big")],
            ..Criteria::default()
        };
        let err = compile_criteria(&criteria, true).expect_err("strict");
        assert!(err.to_string().contains("numeric"));
        assert_eq!(compile_criteria(&criteria, false), Ok(text("ice")));
    }

    #[test]
    fn text_equality_and_like() {
        let eq = compile_property(&PropertyCriterion::new("format", Comparison::Equal, "PDF"));
        assert!(matches!(eq, Compiled::Predicate(FilterPredicate::TextEquals { .. })));
        let ne = compile_property(&PropertyCriterion::new("format", Comparison::NotEqual, "PDF"));
        assert!(matches!(ne, Compiled::Predicate(FilterPredicate::Not(_))));
        let like = compile_property(&PropertyCriterion::new("format", Comparison::Like, "P*"));
        assert!(matches!(like, Compiled::Predicate(FilterPredicate::TextLike { .. })));
    }

    #[test]
    fn empty_criteria_rejected() {
        let err = compile_criteria(&Criteria::default(), false).expect_err("should fail");
        assert!(err.to_string().contains("at least one"));
    }
}
