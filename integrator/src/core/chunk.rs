//! Source chunks: bounded slices of one file paired with an embedding vector.

use serde::{Deserialize, Serialize};

/// One retrievable slice of a source file.
///
/// Immutable once created; a re-index rebuilds the whole set rather than
/// patching individual chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceChunk {
    /// Path relative to the indexed project root.
    pub path: String,
    /// Byte offset of the chunk start within the file.
    pub start: usize,
    /// Byte offset one past the chunk end.
    pub end: usize,
    /// Raw chunk text.
    pub text: String,
    /// Embedding vector for the chunk text.
    pub embedding: Vec<f32>,
}

/// Split `text` into byte spans of roughly `size` bytes with `overlap` bytes
/// shared between consecutive spans.
///
/// Spans never cross the end of `text` and always land on character
/// boundaries (snapped forward, so a span may run a few bytes long around
/// multi-byte characters). Returns an empty list for empty input.
pub fn chunk_spans(text: &str, size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let len = text.len();
    if len == 0 || size == 0 {
        return Vec::new();
    }

    let mut spans = Vec::new();
    let mut start = 0usize;
    loop {
        let mut end = (start + size).min(len);
        while end < len && !text.is_char_boundary(end) {
            end += 1;
        }
        spans.push((start, end));
        if end == len {
            break;
        }
        let mut next = end.saturating_sub(overlap);
        while !text.is_char_boundary(next) {
            next += 1;
        }
        // Overlap must not stall the window.
        if next <= start {
            next = end;
        }
        start = next;
    }
    spans
}

/// Cosine distance between two vectors, ascending (0 = identical direction).
///
/// Mismatched dimensions or zero-norm inputs yield the maximum distance
/// rather than an error, so retrieval stays total.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 1.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}
