//! Embedding seam: the capability that turns text into vectors.
//!
//! The trait decouples indexing and retrieval from any particular embedding
//! provider. The shipped [`HashEmbedder`] is fully deterministic and offline,
//! so indexing, retrieval, and tests need no network; hosted providers plug
//! in behind the same trait.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

/// Turns a piece of text into an embedding vector.
pub trait Embedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic feature-hashing embedder.
///
/// Tokens (lowercased alphanumeric runs) are hashed into a fixed-dimension
/// count vector, then L2-normalized. Stable across processes and runs, which
/// the persisted index relies on: query-time vectors must live in the same
/// space as index-time vectors.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        for token in tokens(text) {
            let slot = (fnv1a(token.as_bytes()) % self.dim as u64) as usize;
            vector[slot] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// Embed with a bounded number of attempts and a fixed pause between them.
///
/// Only transient provider failures are worth retrying; exhaustion is an
/// error for the caller to treat as fatal or to fold into an observation.
pub fn embed_with_retry(
    embedder: &dyn Embedder,
    text: &str,
    max_attempts: u32,
    backoff: Duration,
) -> Result<Vec<f32>> {
    let mut last_err = None;
    for attempt in 1..=max_attempts.max(1) {
        match embedder.embed(text) {
            Ok(vector) => return Ok(vector),
            Err(err) => {
                warn!(attempt, max_attempts, err = %err, "embedding attempt failed");
                last_err = Some(err);
                if attempt < max_attempts {
                    thread::sleep(backoff);
                }
            }
        }
    }
    Err(last_err.expect("at least one attempt ran"))
        .with_context(|| format!("embedding failed after {max_attempts} attempts"))
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chunk::cosine_distance;

    #[test]
    fn embeddings_are_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("const page = getPage(url)").expect("embed");
        let b = embedder.embed("const page = getPage(url)").expect("embed");
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn similar_text_is_closer_than_unrelated_text() {
        let embedder = HashEmbedder::new(128);
        let query = embedder.embed("fetch the header entry").expect("embed");
        let near = embedder
            .embed("export const getHeader = () => fetch header entry")
            .expect("embed");
        let far = embedder
            .embed("html body div span css padding margin")
            .expect("embed");

        assert!(cosine_distance(&query, &near) < cosine_distance(&query, &far));
    }

    #[test]
    fn empty_text_embeds_to_a_zero_vector() {
        let embedder = HashEmbedder::new(16);
        let v = embedder.embed("").expect("embed");
        assert_eq!(v.len(), 16);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn retry_gives_up_after_the_attempt_budget() {
        struct AlwaysFails;
        impl Embedder for AlwaysFails {
            fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Err(anyhow::anyhow!("provider unavailable"))
            }
        }

        let err = embed_with_retry(&AlwaysFails, "text", 2, Duration::from_millis(1))
            .expect_err("should exhaust");
        assert!(err.to_string().contains("after 2 attempts"));
    }
}
