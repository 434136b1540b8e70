//! Relevance renormalization over an ephemeral full-text index.
//!
//! Sources score relevance on their own scales. Before a relevance sort the
//! merged results can be re-scored together: every record's text goes into a
//! throwaway in-memory [`tantivy`] index, the query phrase is run against it
//! with BM25 plus one-edit fuzzy matching, and each hit's score replaces the
//! source score.
//!
//! Results the phrase does not match at all are not hits and are dropped
//! from the output. Any index failure leaves the input untouched.

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, FuzzyTermQuery, Occur, Query as IndexQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, STORED, STRING, Schema, TEXT, Value};
use tantivy::tokenizer::TokenStream;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term, doc};

use crate::error::RenormalizeError;
use crate::markup;
use crate::orchestrator::sort;
use crate::query::Query;
use crate::types::{Record, SearchResult, SortSpec};

/// Heap given to the single indexing thread.
const WRITER_HEAP_BYTES: usize = 20_000_000;

/// Maximum edit distance for fuzzy term clauses.
const FUZZY_DISTANCE: u8 = 1;

/// Operator words that never contribute to the phrase.
const OPERATOR_WORDS: &[&str] = &["AND", "OR", "NOT"];

/// Rescore `results` against the query text when `sort` is by relevance.
///
/// Returns the input unchanged when the sort is not relevance, the query has
/// no text, or anything goes wrong while indexing or searching.
pub fn renormalize(query: &Query, sort: &SortSpec, results: Vec<SearchResult>) -> Vec<SearchResult> {
    renormalize_with(query, sort, results, rescore)
}

fn renormalize_with<F>(
    query: &Query,
    sort: &SortSpec,
    results: Vec<SearchResult>,
    rescorer: F,
) -> Vec<SearchResult>
where
    F: FnOnce(&str, &[SearchResult]) -> Result<Vec<SearchResult>, RenormalizeError>,
{
    if !sort::is_relevance(sort) {
        return results;
    }
    let Some(text) = query.text().map(str::trim).filter(|t| !t.is_empty()) else {
        return results;
    };

    match rescorer(&search_phrase(text), &results) {
        Ok(rescored) => {
            tracing::debug!(
                before = results.len(),
                after = rescored.len(),
                "renormalized relevance"
            );
            rescored
        }
        Err(RenormalizeError::EmptyPhrase) => results,
        Err(err) => {
            tracing::warn!(error = %err, "relevance renormalization failed, keeping source scores");
            results
        }
    }
}

/// Strip operator words, quotes, grouping and path prefixes from keyword text.
pub fn search_phrase(text: &str) -> String {
    text.replace(['"', '(', ')'], " ")
        .split_whitespace()
        .filter(|word| !OPERATOR_WORDS.contains(word))
        .map(|word| match word.strip_prefix('{').and_then(|w| w.find("}:").map(|i| &w[i + 2..])) {
            Some(literal) => literal,
            None => word,
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text indexed for a record: its markup text, or its title without markup.
fn document_text(record: &Record) -> String {
    match &record.metadata {
        Some(markup) => markup::extract_text(markup),
        None => record.title.clone().unwrap_or_default(),
    }
}

struct Fields {
    key: Field,
    position: Field,
    content: Field,
}

fn schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let key = builder.add_text_field("key", STRING | STORED);
    let position = builder.add_u64_field("position", STORED);
    let content = builder.add_text_field("content", TEXT);
    (
        builder.build(),
        Fields {
            key,
            position,
            content,
        },
    )
}

fn phrase_terms(index: &Index, field: Field, phrase: &str) -> Result<Vec<String>, RenormalizeError> {
    let mut analyzer = index.tokenizer_for_field(field)?;
    let mut stream = analyzer.token_stream(phrase);
    let mut terms: Vec<String> = Vec::new();
    stream.process(&mut |token| {
        if !terms.contains(&token.text) {
            terms.push(token.text.clone());
        }
    });
    Ok(terms)
}

fn rescore(phrase: &str, results: &[SearchResult]) -> Result<Vec<SearchResult>, RenormalizeError> {
    if results.is_empty() {
        return Ok(Vec::new());
    }

    let (schema, fields) = schema();
    let index = Index::create_in_ram(schema);

    let terms = phrase_terms(&index, fields.content, phrase)?;
    if terms.is_empty() {
        return Err(RenormalizeError::EmptyPhrase);
    }

    let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
    for (position, result) in results.iter().enumerate() {
        writer.add_document(doc!(
            fields.key => result.record.id.as_str(),
            fields.position => position as u64,
            fields.content => document_text(&result.record),
        ))?;
    }
    writer.commit()?;
    writer.wait_merging_threads()?;

    let clauses: Vec<(Occur, Box<dyn IndexQuery>)> = terms
        .iter()
        .flat_map(|text| {
            let term = Term::from_field_text(fields.content, text);
            [
                (
                    Occur::Should,
                    Box::new(TermQuery::new(term.clone(), IndexRecordOption::WithFreqs))
                        as Box<dyn IndexQuery>,
                ),
                (
                    Occur::Should,
                    Box::new(FuzzyTermQuery::new(term, FUZZY_DISTANCE, true)),
                ),
            ]
        })
        .collect();
    let index_query = BooleanQuery::new(clauses);

    let reader: IndexReader = index
        .reader_builder()
        .reload_policy(ReloadPolicy::Manual)
        .try_into()?;
    let searcher = reader.searcher();
    let hits = searcher.search(&index_query, &TopDocs::with_limit(results.len()))?;

    let mut rescored: Vec<(u64, SearchResult)> = Vec::with_capacity(hits.len());
    for (score, address) in hits {
        let doc: TantivyDocument = searcher.doc(address)?;
        let position = doc
            .get_first(fields.position)
            .and_then(|v| v.as_u64())
            .ok_or(RenormalizeError::UnknownHit(u64::from(address.doc_id)))?;
        let original = results
            .get(position as usize)
            .ok_or(RenormalizeError::UnknownHit(position))?;
        tracing::trace!(
            key = doc.get_first(fields.key).and_then(|v| v.as_str()).unwrap_or_default(),
            score,
            "rescored result"
        );
        let mut result = original.clone();
        result.relevance = Some(f64::from(score));
        rescored.push((position, result));
    }

    rescored.sort_by_key(|(position, _)| *position);
    Ok(rescored.into_iter().map(|(_, r)| r).collect())
}
