//! Sliding-window word chunker.
//!
//! Splits document text into overlapping [`Chunk`]s of at most
//! `chunk_words` words. Consecutive windows share `overlap_words` words so
//! that a sentence cut at a window edge still appears whole in one of the
//! two neighbouring chunks.
//!
//! # Algorithm
//!
//! 1. Split the text on whitespace.
//! 2. Slide a window of `chunk_words` words, advancing by
//!    `chunk_words - overlap_words`, until the window reaches the last word.
//! 3. Join each window with single spaces.
//! 4. Drop windows shorter than `min_chunk_words`, unless that would leave
//!    the document with no chunk at all.
//! 5. Number the surviving chunks `0..N` and stamp each with `N`.
//!
//! Empty (or whitespace-only) text produces no chunks.
//!
//! # Example
//!
//! ```rust
//! use rag_harness_core::chunk::{chunk_words, ChunkParams};
//!
//! let params = ChunkParams::new(4, 1, 1);
//! let chunks = chunk_words("notes.txt", "one two three four five six seven", &params);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].text, "one two three four");
//! assert_eq!(chunks[1].text, "four five six seven");
//! ```

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Window geometry for [`chunk_words`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    /// Maximum words per chunk.
    pub chunk_words: usize,
    /// Words shared by consecutive chunks. Must be smaller than `chunk_words`.
    pub overlap_words: usize,
    /// Windows with fewer words are discarded unless they are the only one.
    pub min_chunk_words: usize,
}

impl ChunkParams {
    pub fn new(chunk_words: usize, overlap_words: usize, min_chunk_words: usize) -> Self {
        Self {
            chunk_words,
            overlap_words,
            min_chunk_words,
        }
    }

    /// Distance between the starts of consecutive windows (always ≥ 1).
    fn step(&self) -> usize {
        self.chunk_words.max(1).saturating_sub(self.overlap_words).max(1)
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self::new(200, 40, 10)
    }
}

/// Split `text` into overlapping word windows owned by `document`.
///
/// # Guarantees
///
/// - Non-empty text yields at least one chunk.
/// - No chunk holds more than `chunk_words` words.
/// - Indices are contiguous `0..N` and every chunk carries `total == N`.
pub fn chunk_words(document: &str, text: &str, params: &ChunkParams) -> Vec<Chunk> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let size = params.chunk_words.max(1);
    let step = params.step();

    let mut windows: Vec<&[&str]> = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(words.len());
        windows.push(&words[start..end]);
        if end == words.len() {
            break;
        }
        start += step;
    }

    let first = windows[0];
    let mut kept: Vec<&[&str]> = windows
        .into_iter()
        .filter(|w| w.len() >= params.min_chunk_words)
        .collect();
    if kept.is_empty() {
        kept.push(first);
    }

    let total = kept.len();
    kept.into_iter()
        .enumerate()
        .map(|(index, window)| Chunk {
            document: document.to_string(),
            index,
            total,
            text: window.join(" "),
        })
        .collect()
}

/// SHA-256 of a document's full text, hex encoded.
///
/// Stored in every record payload so that a restarted process can tell
/// whether a document on disk still matches what is indexed.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
