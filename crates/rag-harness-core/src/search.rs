//! Result ranking for the vector path and the keyword fallback.
//!
//! Both functions here are pure: the engine fetches candidates from a
//! [`VectorIndex`](crate::store::VectorIndex) and hands them over. This
//! keeps the ranking policy testable without a store.
//!
//! # Vector ranking
//!
//! 1. Over-fetch `top_k × over_fetch` candidates from the index.
//! 2. Multiply the score of every priority candidate by `boost_factor`.
//! 3. Sort by boosted score (desc), then raw score (desc), then id (asc).
//! 4. Truncate to `top_k`.
//!
//! # Keyword fallback
//!
//! Used only when the vector path fails. For every scanned chunk, count
//! case-insensitive literal occurrences of each query term longer than two
//! characters, divide by the chunk's word count, cap at `1.0`, drop zero
//! scores, sort descending and truncate to `top_k`.

use serde::{Deserialize, Serialize};

use crate::models::{ScoredPoint, SearchResult, StoredPoint};

/// Retrieval path selection.
///
/// [`Auto`](SearchStrategy::Auto) tries the vector path and hands off to
/// the keyword fallback on any failure. The other two force a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    #[default]
    Auto,
    Vector,
    Keyword,
}

/// Ranking tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankParams {
    /// Number of results to return.
    pub top_k: usize,
    /// Candidate multiplier applied to `top_k` when querying the index.
    pub over_fetch: usize,
    /// Score multiplier for priority documents.
    pub boost_factor: f32,
}

impl Default for RankParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            over_fetch: 3,
            boost_factor: 1.3,
        }
    }
}

impl RankParams {
    /// How many candidates to request from the index.
    pub fn candidate_count(&self) -> usize {
        self.top_k.saturating_mul(self.over_fetch.max(1))
    }
}

/// Name patterns that mark a document as priority at ingestion time.
#[derive(Debug, Clone, Default)]
pub struct PriorityRules {
    patterns: Vec<String>,
}

impl PriorityRules {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Case-insensitive substring match against any pattern.
    pub fn matches(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.patterns.iter().any(|p| lower.contains(p.as_str()))
    }
}

/// Boost, sort and truncate vector candidates.
pub fn rank(candidates: Vec<ScoredPoint>, params: &RankParams) -> Vec<SearchResult> {
    let mut scored: Vec<(u64, SearchResult)> = candidates
        .into_iter()
        .map(|hit| {
            let boosted = if hit.payload.priority {
                hit.score * params.boost_factor
            } else {
                hit.score
            };
            (
                hit.id,
                SearchResult {
                    filename: hit.payload.filename,
                    text: hit.payload.text,
                    similarity: hit.score,
                    boosted_similarity: boosted,
                    chunk_index: hit.payload.chunk_index,
                    total_chunks: hit.payload.total_chunks,
                    priority: hit.payload.priority,
                },
            )
        })
        .collect();

    scored.sort_by(|(id_a, a), (id_b, b)| {
        b.boosted_similarity
            .partial_cmp(&a.boosted_similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(id_a.cmp(id_b))
    });
    scored.truncate(params.top_k);
    scored.into_iter().map(|(_, r)| r).collect()
}

/// Query terms used by the keyword fallback: lowercase, stripped of
/// surrounding punctuation, longer than two chars.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|t| t.chars().count() > 2)
        .collect()
}

/// Literal term matching over scanned chunk payloads.
pub fn keyword_match(points: &[StoredPoint], query: &str, top_k: usize) -> Vec<SearchResult> {
    let terms = query_terms(query);
    if terms.is_empty() || top_k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(u64, SearchResult)> = points
        .iter()
        .filter_map(|p| {
            let words = p.payload.text.split_whitespace().count();
            if words == 0 {
                return None;
            }
            let lower = p.payload.text.to_lowercase();
            let hits: usize = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
            if hits == 0 {
                return None;
            }
            let score = (hits as f32 / words as f32).min(1.0);
            Some((
                p.id,
                SearchResult {
                    filename: p.payload.filename.clone(),
                    text: p.payload.text.clone(),
                    similarity: score,
                    boosted_similarity: score,
                    chunk_index: p.payload.chunk_index,
                    total_chunks: p.payload.total_chunks,
                    priority: p.payload.priority,
                },
            ))
        })
        .collect();

    scored.sort_by(|(id_a, a), (id_b, b)| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(id_a.cmp(id_b))
    });
    scored.truncate(top_k);
    scored.into_iter().map(|(_, r)| r).collect()
}
