//! Embedder trait, the hashing feature embedder, and vector utilities.
//!
//! [`Embedder`] is the stable seam between the engine and whatever turns
//! text into vectors. [`HashingEmbedder`] is the built-in implementation:
//! a deterministic lexical feature extractor, not a semantic model. Two
//! texts score high against each other when they share words, word pairs
//! and surface features; paraphrases do not.
//!
//! # Vector layout (384 dimensions)
//!
//! | Dimensions | Feature |
//! |------------|---------|
//! | `0..150`   | unigram TF × inverse-frequency weight, hashed |
//! | `150..250` | bigram frequency, hashed |
//! | `250..300` | trigram frequency, hashed |
//! | `300..303` | technical / configuration / action keyword density |
//! | `303..309` | question mark, digit, brackets, code keywords, avg word length, sentence count |
//! | `309..312` | constant coarse position prior |
//! | `312..384` | optional noise (off unless an amplitude is configured) |
//!
//! Hash collisions inside a band are intentional: they fold an unbounded
//! vocabulary into a fixed number of dimensions.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, RetrievalError};

/// Output dimension of [`HashingEmbedder`].
pub const EMBEDDING_DIMS: usize = 384;

const UNIGRAM_BAND: Range<usize> = 0..150;
const BIGRAM_BAND: Range<usize> = 150..250;
const TRIGRAM_BAND: Range<usize> = 250..300;

const TECHNICAL_DIM: usize = 300;
const CONFIGURATION_DIM: usize = 301;
const ACTION_DIM: usize = 302;

const QUESTION_DIM: usize = 303;
const DIGIT_DIM: usize = 304;
const BRACKET_DIM: usize = 305;
const CODE_DIM: usize = 306;
const AVG_WORD_LEN_DIM: usize = 307;
const SENTENCE_DIM: usize = 308;

/// Every text gets the same values here; they carry no position information.
const POSITION_PRIOR: [(usize, f32); 3] = [(309, 0.1), (310, 0.05), (311, 0.02)];

/// First dimension of the noise band.
pub const NOISE_START: usize = 312;

const TECHNICAL_TERMS: &[&str] = &[
    "api", "server", "database", "function", "error", "code", "system", "network", "query",
    "vector", "model", "service",
];
const CONFIGURATION_TERMS: &[&str] = &[
    "config", "configuration", "setting", "settings", "threshold", "parameter", "option",
    "size", "limit", "value", "default", "enable",
];
const ACTION_TERMS: &[&str] = &[
    "create", "delete", "update", "search", "install", "run", "start", "stop", "upload",
    "index", "deploy", "remove",
];
const CODE_TERMS: &[&str] = &[
    "function", "return", "class", "import", "const", "let", "var", "def", "struct", "impl",
    "async", "await",
];

/// Turns text into a fixed-size vector.
///
/// Implementations must be deterministic enough that the same text maps
/// to near-identical vectors, and must return exactly [`dims`](Embedder::dims)
/// values.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"hashing-v1"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic lexical feature embedder.
///
/// See the module docs for the vector layout. The noise band is filled
/// only when constructed with [`HashingEmbedder::with_noise`].
pub struct HashingEmbedder {
    noise: Option<Noise>,
}

struct Noise {
    amplitude: f32,
    rng: Mutex<StdRng>,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self { noise: None }
    }

    /// Fill the noise band with values in `[0, amplitude)`.
    ///
    /// With a seed the sequence is reproducible across runs; without one
    /// the generator is seeded from OS entropy. A non-positive amplitude
    /// disables noise.
    pub fn with_noise(amplitude: f32, seed: Option<u64>) -> Self {
        if amplitude <= 0.0 {
            return Self::new();
        }
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            noise: Some(Noise {
                amplitude,
                rng: Mutex::new(rng),
            }),
        }
    }

    /// Compute the feature vector synchronously.
    pub fn features(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; EMBEDDING_DIMS];
        let tokens = tokenize(text);

        if !tokens.is_empty() {
            write_unigrams(&mut v, &tokens);
            write_ngrams(&mut v, &tokens, 2, BIGRAM_BAND);
            write_ngrams(&mut v, &tokens, 3, TRIGRAM_BAND);
            write_keyword_density(&mut v, &tokens);
        }
        write_structure(&mut v, text, &tokens);
        for (dim, value) in POSITION_PRIOR {
            v[dim] = value;
        }

        if let Some(noise) = &self.noise {
            let mut rng = noise
                .rng
                .lock()
                .map_err(|_| RetrievalError::EmbeddingCompute("noise generator poisoned".into()))?;
            for slot in v.iter_mut().skip(NOISE_START) {
                *slot = rng.gen_range(0.0..noise.amplitude);
            }
        }

        if v.iter().any(|x| !x.is_finite()) {
            return Err(RetrievalError::EmbeddingCompute(
                "non-finite feature value".into(),
            ));
        }

        l2_normalize(&mut v);
        Ok(v)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing-v1"
    }

    fn dims(&self) -> usize {
        EMBEDDING_DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.features(text)
    }
}

/// Lowercase alphanumeric words longer than two characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

fn write_unigrams(v: &mut [f32], tokens: &[String]) {
    let total = tokens.len() as f32;
    let mut freq: HashMap<&str, usize> = HashMap::new();
    for t in tokens {
        *freq.entry(t.as_str()).or_insert(0) += 1;
    }
    for (word, count) in freq {
        let tf = count as f32 / total;
        // Within-document rarity; a cheap stand-in for corpus IDF.
        let idf = (total / count as f32).ln() + 1.0;
        v[band_slot(word, &UNIGRAM_BAND)] += tf * idf;
    }
}

fn write_ngrams(v: &mut [f32], tokens: &[String], n: usize, band: Range<usize>) {
    if tokens.len() < n {
        return;
    }
    let grams: Vec<String> = tokens.windows(n).map(|w| w.join(" ")).collect();
    let total = grams.len() as f32;
    for gram in &grams {
        v[band_slot(gram, &band)] += 1.0 / total;
    }
}

fn write_keyword_density(v: &mut [f32], tokens: &[String]) {
    let total = tokens.len() as f32;
    let density = |terms: &[&str]| {
        tokens.iter().filter(|t| terms.contains(&t.as_str())).count() as f32 / total
    };
    v[TECHNICAL_DIM] = density(TECHNICAL_TERMS);
    v[CONFIGURATION_DIM] = density(CONFIGURATION_TERMS);
    v[ACTION_DIM] = density(ACTION_TERMS);
}

fn write_structure(v: &mut [f32], text: &str, tokens: &[String]) {
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    v[QUESTION_DIM] = flag(text.contains('?'));
    v[DIGIT_DIM] = flag(text.chars().any(|c| c.is_ascii_digit()));
    v[BRACKET_DIM] = flag(text.chars().any(|c| "()[]{}<>".contains(c)));
    v[CODE_DIM] = flag(tokens.iter().any(|t| CODE_TERMS.contains(&t.as_str())));

    if !tokens.is_empty() {
        let chars: usize = tokens.iter().map(|t| t.chars().count()).sum();
        let avg = chars as f32 / tokens.len() as f32;
        v[AVG_WORD_LEN_DIM] = (avg / 10.0).min(1.0);
    }

    let sentences = text
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count();
    v[SENTENCE_DIM] = (sentences as f32 / 10.0).min(1.0);
}

fn band_slot(s: &str, band: &Range<usize>) -> usize {
    band.start + (string_hash(s) as usize) % band.len()
}

/// 31-multiplier rolling hash over the chars of `s`.
///
/// Stable across platforms and releases, unlike `std`'s `DefaultHasher`.
pub fn string_hash(s: &str) -> u32 {
    s.chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32))
}

/// Euclidean length of `v`.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length in place. Zero vectors are left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "The search threshold is 0.3 and chunk size is 512.";

    #[test]
    fn test_dimension_and_unit_norm() {
        let e = HashingEmbedder::new();
        for text in [SAMPLE, "a", "What is the API endpoint (v2)?", "Ünïcödé wörds everywhere"] {
            let v = e.features(text).unwrap();
            assert_eq!(v.len(), EMBEDDING_DIMS);
            assert!((l2_norm(&v) - 1.0).abs() < 1e-6, "norm for {:?}", text);
        }
    }

    #[test]
    fn test_deterministic_without_noise() {
        let e = HashingEmbedder::new();
        assert_eq!(e.features(SAMPLE).unwrap(), e.features(SAMPLE).unwrap());
    }

    #[test]
    fn test_same_text_similar_with_noise() {
        let e = HashingEmbedder::with_noise(0.01, None);
        let a = e.features(SAMPLE).unwrap();
        let b = e.features(SAMPLE).unwrap();
        let sim = cosine_similarity(&a[..NOISE_START], &b[..NOISE_START]);
        assert!(sim >= 0.999, "similarity was {}", sim);
        assert!(a[NOISE_START..].iter().any(|x| *x > 0.0));
    }

    #[test]
    fn test_seeded_noise_reproducible() {
        let a = HashingEmbedder::with_noise(0.05, Some(7)).features(SAMPLE).unwrap();
        let b = HashingEmbedder::with_noise(0.05, Some(7)).features(SAMPLE).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_lexical_overlap_ranks_higher() {
        let e = HashingEmbedder::new();
        let q = e.features("search threshold").unwrap();
        let related = e.features(SAMPLE).unwrap();
        let unrelated = e.features("Bananas grow in tropical climates near rivers.").unwrap();
        assert!(cosine_similarity(&q, &related) > cosine_similarity(&q, &unrelated));
    }

    #[test]
    fn test_empty_text_only_position_prior() {
        let v = HashingEmbedder::new().features("").unwrap();
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
        assert!(v[UNIGRAM_BAND].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_tokenize_filters_short_words() {
        assert_eq!(
            tokenize("It is A big-Deal, ok?"),
            vec!["big".to_string(), "deal".to_string()]
        );
    }

    #[test]
    fn test_string_hash_stable() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("a"), 97);
        assert_eq!(string_hash("ab"), 97 * 31 + 98);
    }

    #[test]
    fn test_normalize_zero_vector_unchanged() {
        let mut v = vec![0.0f32; 4];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0; 4]);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[tokio::test]
    async fn test_trait_embed_matches_features() {
        let e = HashingEmbedder::new();
        let via_trait = e.embed(SAMPLE).await.unwrap();
        assert_eq!(via_trait, e.features(SAMPLE).unwrap());
        assert_eq!(e.dims(), EMBEDDING_DIMS);
    }
}
