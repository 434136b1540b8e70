//! Record metadata markup: text extraction and path lookup.
//!
//! Metadata is XML. Well-formed documents are read with [`roxmltree`], so
//! self-closing elements close and no element is treated as void. Anything
//! that is not well-formed XML is parsed leniently as an HTML fragment with
//! [`scraper`]; malformed input never fails, it just yields less text.
//!
//! Element and attribute names are compared case-insensitively in both
//! modes.

use scraper::{Html, Node, Selector};

/// Collect every attribute value and text node, depth first, space-joined.
///
/// Attribute values of an element come before the text it contains, so
/// `<origin name="feed">Sat</origin>` yields `"feed Sat"`.
pub fn extract_text(markup: &str) -> String {
    match roxmltree::Document::parse(markup) {
        Ok(document) => {
            let mut parts: Vec<&str> = Vec::new();
            for node in document.root().descendants() {
                if node.is_element() {
                    parts.extend(node.attributes().map(|attr| attr.value().trim()));
                } else if node.is_text() {
                    parts.extend(node.text().map(str::trim));
                }
            }
            join_parts(parts)
        }
        Err(err) => {
            tracing::trace!(error = %err, "metadata is not well-formed XML, reading leniently");
            lenient_text(markup)
        }
    }
}

/// Values found at a slash-separated path.
///
/// `metacard/title` selects the text of every `title` directly inside a
/// `metacard`, wherever that `metacard` sits; a trailing `@name` segment
/// selects that attribute instead. A leading slash is accepted and ignored.
/// Namespace prefixes on segments are ignored. Paths that cannot match
/// anything yield nothing.
pub fn values_at_path(markup: &str, path: &str) -> Vec<String> {
    let Some(path) = PathQuery::parse(path) else {
        return Vec::new();
    };
    match roxmltree::Document::parse(markup) {
        Ok(document) => document
            .descendants()
            .filter(|node| node.is_element() && path.matches_element(*node))
            .filter_map(|node| match path.attribute {
                Some(name) => node
                    .attributes()
                    .find(|attr| attr.name().eq_ignore_ascii_case(name))
                    .map(|attr| attr.value().to_owned()),
                None => {
                    let text: Vec<&str> = node
                        .descendants()
                        .filter(|n| n.is_text())
                        .filter_map(|n| n.text())
                        .collect();
                    Some(normalise_whitespace(&text.join(" ")))
                }
            })
            .collect(),
        Err(_) => lenient_values(markup, &path),
    }
}

/// A parsed element path with an optional trailing attribute.
struct PathQuery<'p> {
    segments: Vec<&'p str>,
    attribute: Option<&'p str>,
}

impl<'p> PathQuery<'p> {
    fn parse(path: &'p str) -> Option<Self> {
        let mut segments: Vec<&str> = path
            .trim()
            .trim_start_matches('/')
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let attribute = match segments.last() {
            Some(last) if last.starts_with('@') => {
                let name = &last[1..];
                segments.pop();
                if name.is_empty() {
                    return None;
                }
                Some(name)
            }
            _ => None,
        };

        Some(Self {
            segments,
            attribute,
        })
    }

    /// Whether `node` ends a parent-to-child chain matching every segment.
    fn matches_element(&self, node: roxmltree::Node<'_, '_>) -> bool {
        if let Some(name) = self.attribute {
            if !node.attributes().any(|attr| attr.name().eq_ignore_ascii_case(name)) {
                return false;
            }
        }
        let mut current = Some(node);
        for segment in self.segments.iter().rev() {
            match current {
                Some(element) if name_matches(element.tag_name().name(), segment) => {
                    current = element.parent_element();
                }
                _ => return false,
            }
        }
        true
    }

    fn selector(&self) -> Option<Selector> {
        let css = if self.segments.is_empty() {
            "*".to_owned()
        } else {
            self.segments
                .iter()
                .map(|s| s.to_lowercase())
                .collect::<Vec<_>>()
                .join(" > ")
        };
        let css = match self.attribute {
            Some(name) => format!("{css}[{name}]"),
            None => css,
        };
        Selector::parse(&css).ok()
    }
}

fn name_matches(name: &str, segment: &str) -> bool {
    let local = segment.rsplit(':').next().unwrap_or(segment);
    name.eq_ignore_ascii_case(local)
}

fn lenient_text(markup: &str) -> String {
    let fragment = Html::parse_fragment(markup);
    let mut parts: Vec<&str> = Vec::new();
    for node in fragment.tree.root().descendants() {
        match node.value() {
            Node::Element(element) => {
                parts.extend(element.attrs().map(|(_, value)| value.trim()));
            }
            Node::Text(text) => parts.push(text.trim()),
            _ => {}
        }
    }
    join_parts(parts)
}

fn lenient_values(markup: &str, path: &PathQuery<'_>) -> Vec<String> {
    let Some(selector) = path.selector() else {
        return Vec::new();
    };
    let fragment = Html::parse_fragment(markup);
    fragment
        .select(&selector)
        .filter_map(|element| match path.attribute {
            Some(name) => element.value().attr(name).map(str::to_owned),
            None => {
                let text = element.text().collect::<Vec<_>>().join(" ");
                Some(normalise_whitespace(&text))
            }
        })
        .collect()
}

fn join_parts(mut parts: Vec<&str>) -> String {
    parts.retain(|p| !p.is_empty());
    normalise_whitespace(&parts.join(" "))
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalise_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD: &str = r#"<metacard id="m1">
        <title>Harbour   report</title>
        <origin name="satelite feed"/>
        <keywords><keyword>coast</keyword><keyword>ice</keyword></keywords>
    </metacard>"#;

    const ENTRY: &str = r#"<entry>
        <link rel="alternate">http://example.org/records/7</link>
        <title>Tide gauge</title>
    </entry>"#;

    #[test]
    fn extract_includes_attributes_and_text() {
        let text = extract_text(CARD);
        assert_eq!(text, "m1 Harbour report satelite feed coast ice");
    }

    #[test]
    fn extract_keeps_text_of_html_void_names() {
        assert_eq!(
            extract_text(ENTRY),
            "alternate http://example.org/records/7 Tide gauge"
        );
    }

    #[test]
    fn extract_from_plain_text() {
        assert_eq!(extract_text("  just   words "), "just words");
    }

    #[test]
    fn extract_from_empty_markup() {
        assert_eq!(extract_text(""), "");
    }

    #[test]
    fn extract_from_malformed_markup_is_lenient() {
        assert_eq!(extract_text("<metacard><name>Open ended"), "Open ended");
    }

    #[test]
    fn path_selects_element_text() {
        assert_eq!(values_at_path(CARD, "/metacard/title"), vec!["Harbour report"]);
        assert_eq!(values_at_path(CARD, "title"), vec!["Harbour report"]);
    }

    #[test]
    fn path_selects_every_match() {
        assert_eq!(
            values_at_path(CARD, "keywords/keyword"),
            vec!["coast".to_string(), "ice".to_string()]
        );
    }

    #[test]
    fn absolute_path_after_self_closing_sibling() {
        assert_eq!(
            values_at_path(CARD, "/metacard/keywords/keyword"),
            vec!["coast".to_string(), "ice".to_string()]
        );
        assert!(values_at_path(CARD, "/metacard/origin/keywords").is_empty());
    }

    #[test]
    fn path_selects_text_of_html_void_names() {
        assert_eq!(
            values_at_path(ENTRY, "entry/link"),
            vec!["http://example.org/records/7"]
        );
        assert_eq!(values_at_path(ENTRY, "link/@rel"), vec!["alternate"]);
    }

    #[test]
    fn path_selects_attribute() {
        assert_eq!(values_at_path(CARD, "origin/@name"), vec!["satelite feed"]);
        assert_eq!(values_at_path(CARD, "/metacard/@id"), vec!["m1"]);
    }

    #[test]
    fn path_is_case_folded() {
        assert_eq!(values_at_path(CARD, "/MetaCard/Title"), vec!["Harbour report"]);
    }

    #[test]
    fn namespace_prefix_on_segment_is_ignored() {
        let markup = r#"<csw:Record xmlns:csw="urn:csw" xmlns:dc="urn:dc"><dc:title>Shelf ice</dc:title></csw:Record>"#;
        assert_eq!(values_at_path(markup, "csw:Record/dc:title"), vec!["Shelf ice"]);
    }

    #[test]
    fn malformed_markup_falls_back_to_lenient_lookup() {
        assert_eq!(
            values_at_path("<metacard><name>Open ended</metacard>", "metacard/name"),
            vec!["Open ended"]
        );
    }

    #[test]
    fn missing_path_is_empty() {
        assert!(values_at_path(CARD, "abstract").is_empty());
        assert!(values_at_path(CARD, "origin/@").is_empty());
    }

    #[test]
    fn unusable_path_is_empty() {
        assert!(values_at_path(CARD, "ns:title[").is_empty());
    }
}
