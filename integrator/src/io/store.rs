//! Directory-backed chunk index: persisted wholesale, loaded read-only.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::chunk::{SourceChunk, cosine_distance};

/// Index-level bookkeeping persisted next to the chunk set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub file_count: usize,
    pub chunk_count: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_dim: usize,
}

/// Handle to the on-disk index directory.
///
/// `rebuild` replaces the store wholesale; there is no incremental patching.
/// The loop only ever sees a [`LoadedIndex`], which is immutable.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Replace the persisted index with `chunks`.
    pub fn rebuild(&self, meta: &StoreMeta, chunks: &[SourceChunk]) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)
                .with_context(|| format!("clear index dir {}", self.dir.display()))?;
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create index dir {}", self.dir.display()))?;

        write_json(&self.dir.join("meta.json"), meta)?;
        write_json(&self.dir.join("chunks.json"), &chunks)?;
        debug!(chunks = chunks.len(), dir = %self.dir.display(), "index rebuilt");
        Ok(())
    }

    /// Load the persisted index. A missing or never-built store loads as an
    /// empty index rather than an error.
    pub fn load(&self) -> Result<LoadedIndex> {
        let meta_path = self.dir.join("meta.json");
        let chunks_path = self.dir.join("chunks.json");
        if !meta_path.exists() || !chunks_path.exists() {
            return Ok(LoadedIndex::empty());
        }

        let meta: StoreMeta = read_json(&meta_path)?;
        let chunks: Vec<SourceChunk> = read_json(&chunks_path)?;
        debug!(chunks = chunks.len(), "index loaded");
        Ok(LoadedIndex {
            meta: Some(meta),
            chunks,
        })
    }
}

/// In-memory, read-only view of the index used by the loop.
#[derive(Debug, Clone, Default)]
pub struct LoadedIndex {
    meta: Option<StoreMeta>,
    chunks: Vec<SourceChunk>,
}

impl LoadedIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn meta(&self) -> Option<&StoreMeta> {
        self.meta.as_ref()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Up to `k` chunks by ascending cosine distance to `query`.
    ///
    /// Ordering is fully deterministic: ties break on path, then start
    /// offset. An empty index yields an empty list.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<&SourceChunk> {
        let mut scored: Vec<(f32, &SourceChunk)> = self
            .chunks
            .iter()
            .map(|chunk| (cosine_distance(query, &chunk.embedding), chunk))
            .collect();
        scored.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.1.path.cmp(&b.1.path))
                .then_with(|| a.1.start.cmp(&b.1.start))
        });
        scored.truncate(k);
        scored.into_iter().map(|(_, chunk)| chunk).collect()
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &buf).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, start: usize, embedding: Vec<f32>) -> SourceChunk {
        SourceChunk {
            path: path.to_string(),
            start,
            end: start + 10,
            text: format!("{path}:{start}"),
            embedding,
        }
    }

    fn meta(chunk_count: usize) -> StoreMeta {
        StoreMeta {
            file_count: 1,
            chunk_count,
            chunk_size: 1000,
            chunk_overlap: 100,
            embedding_dim: 2,
        }
    }

    #[test]
    fn rebuild_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ChunkStore::new(temp.path().join("index"));
        let chunks = vec![
            chunk("src/a.ts", 0, vec![1.0, 0.0]),
            chunk("src/b.ts", 0, vec![0.0, 1.0]),
        ];

        store.rebuild(&meta(2), &chunks).expect("rebuild");
        let index = store.load().expect("load");

        assert_eq!(index.len(), 2);
        assert_eq!(index.meta().map(|m| m.chunk_count), Some(2));
    }

    #[test]
    fn rebuild_replaces_the_previous_generation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ChunkStore::new(temp.path().join("index"));

        store
            .rebuild(&meta(1), &[chunk("src/old.ts", 0, vec![1.0, 0.0])])
            .expect("first rebuild");
        store
            .rebuild(&meta(1), &[chunk("src/new.ts", 0, vec![1.0, 0.0])])
            .expect("second rebuild");

        let index = store.load().expect("load");
        assert_eq!(index.len(), 1);
        assert_eq!(index.nearest(&[1.0, 0.0], 5)[0].path, "src/new.ts");
    }

    #[test]
    fn missing_store_loads_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ChunkStore::new(temp.path().join("never-built"));
        let index = store.load().expect("load");
        assert!(index.is_empty());
        assert!(index.nearest(&[1.0, 0.0], 5).is_empty());
    }

    #[test]
    fn nearest_is_bounded_and_ordered() {
        let index = LoadedIndex {
            meta: None,
            chunks: vec![
                chunk("src/far.ts", 0, vec![0.0, 1.0]),
                chunk("src/near.ts", 0, vec![1.0, 0.0]),
                chunk("src/mid.ts", 0, vec![0.7, 0.7]),
            ],
        };

        let hits = index.nearest(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "src/near.ts");
        assert_eq!(hits[1].path, "src/mid.ts");
    }

    #[test]
    fn nearest_ties_break_deterministically() {
        let index = LoadedIndex {
            meta: None,
            chunks: vec![
                chunk("src/b.ts", 0, vec![1.0, 0.0]),
                chunk("src/a.ts", 100, vec![1.0, 0.0]),
                chunk("src/a.ts", 0, vec![1.0, 0.0]),
            ],
        };

        let hits = index.nearest(&[1.0, 0.0], 3);
        let order: Vec<(&str, usize)> = hits.iter().map(|c| (c.path.as_str(), c.start)).collect();
        assert_eq!(order, vec![("src/a.ts", 0), ("src/a.ts", 100), ("src/b.ts", 0)]);
    }
}
