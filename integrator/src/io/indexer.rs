//! Project indexing: discover source files, chunk them, embed each chunk,
//! and rebuild the persisted store wholesale.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::chunk::{SourceChunk, chunk_spans};
use crate::io::config::IndexConfig;
use crate::io::embed::{Embedder, embed_with_retry};
use crate::io::store::{ChunkStore, StoreMeta};

/// Result of one indexing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    pub file_count: usize,
    pub chunk_count: usize,
}

/// Index all matching source files under `root` into `store`.
///
/// Discovery prunes the configured excluded directories and keeps files with
/// the configured extensions. Unreadable files are skipped with a warning.
/// Finding no files at all is not fatal: the store is rebuilt empty with a
/// warning and retrieval returns empty result sets.
pub fn index_project(
    root: &Path,
    store: &ChunkStore,
    cfg: &IndexConfig,
    embedder: &dyn Embedder,
) -> Result<IndexSummary> {
    info!(root = %root.display(), "indexing project sources");
    let backoff = Duration::from_secs(cfg.embed_retry_backoff_secs);

    let mut file_count = 0usize;
    let mut chunks: Vec<SourceChunk> = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry.file_name(), &cfg.exclude_dirs));
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() || !has_indexed_extension(entry.path(), &cfg.extensions) {
            continue;
        }

        let content = match std::fs::read_to_string(entry.path()) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %entry.path().display(), err = %err, "skipping unreadable file");
                continue;
            }
        };

        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        file_count += 1;

        for (start, end) in chunk_spans(&content, cfg.chunk_size, cfg.chunk_overlap) {
            let text = content[start..end].to_string();
            let embedding = embed_with_retry(embedder, &text, cfg.embed_max_retries, backoff)
                .with_context(|| format!("embed chunk {rel}:{start}"))?;
            chunks.push(SourceChunk {
                path: rel.clone(),
                start,
                end,
                text,
                embedding,
            });
        }
        debug!(path = %rel, "file chunked");
    }

    if file_count == 0 {
        warn!(
            root = %root.display(),
            "no source files matched the configured extensions; the index will be empty"
        );
    }

    let meta = StoreMeta {
        file_count,
        chunk_count: chunks.len(),
        chunk_size: cfg.chunk_size,
        chunk_overlap: cfg.chunk_overlap,
        embedding_dim: cfg.embedding_dim,
    };
    store.rebuild(&meta, &chunks)?;

    info!(file_count, chunk_count = chunks.len(), "indexing complete");
    Ok(IndexSummary {
        file_count,
        chunk_count: chunks.len(),
    })
}

fn is_excluded(file_name: &std::ffi::OsStr, exclude_dirs: &[String]) -> bool {
    let name = file_name.to_string_lossy();
    exclude_dirs.iter().any(|dir| dir.as_str() == name)
}

fn has_indexed_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().map(|e| e.to_string_lossy()) else {
        return false;
    };
    extensions.iter().any(|e| e.as_str() == ext)
}
