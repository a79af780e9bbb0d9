//! Document producers: turning files into embeddable chunks.
//!
//! The pipeline only depends on the [`DocumentProducer`] contract; what a
//! "document" means for a given file type is the producer's business.
//! [`TextProducer`] handles plain-text source files and splits oversized
//! content at newline-friendly boundaries.

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::{ChunkingConfig, IndexingConfig};
use crate::models::{file_extension, ChunkMetadata, DocumentChunk};

/// Turns a file into zero or more content chunks with metadata.
pub trait DocumentProducer: Send + Sync {
    /// Whether this producer can handle the file at all.
    fn supports(&self, path: &Path) -> bool;

    /// Produce chunks for the file. An empty result means the file has
    /// nothing worth indexing (the pipeline counts it as skipped, not
    /// failed).
    fn produce(&self, path: &Path) -> Result<Vec<DocumentChunk>>;
}

/// Producer for plain-text source files.
pub struct TextProducer {
    indexing: IndexingConfig,
    chunking: ChunkingConfig,
}

impl TextProducer {
    pub fn new(indexing: IndexingConfig, chunking: ChunkingConfig) -> Self {
        Self { indexing, chunking }
    }
}

impl DocumentProducer for TextProducer {
    fn supports(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.indexing.is_supported(&name.to_string_lossy()))
            .unwrap_or(false)
    }

    fn produce(&self, path: &Path) -> Result<Vec<DocumentChunk>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("could not stat {}", path.display()))?;
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let base = ChunkMetadata {
            file_name: file_name.clone(),
            file_path: path.to_string_lossy().to_string(),
            file_type: file_extension(&file_name),
            priority: self.indexing.priority_rank(&file_name),
            size: metadata.len(),
            last_modified,
            chunk_index: None,
            total_chunks: None,
        };

        if content.len() <= self.chunking.split_threshold {
            return Ok(vec![DocumentChunk {
                text: content,
                metadata: ChunkMetadata {
                    chunk_index: Some(0),
                    total_chunks: Some(1),
                    ..base
                },
            }]);
        }

        let pieces = split_into_chunks(
            &content,
            self.chunking.chunk_size,
            self.chunking.chunk_overlap,
        );
        let total = pieces.len();
        Ok(pieces
            .into_iter()
            .enumerate()
            .map(|(i, text)| DocumentChunk {
                text,
                metadata: ChunkMetadata {
                    chunk_index: Some(i),
                    total_chunks: Some(total),
                    ..base.clone()
                },
            })
            .collect())
    }
}

/// Split text into chunks of roughly `chunk_size` bytes with `overlap`
/// bytes carried into the next chunk. Prefers to break at a newline when
/// one exists past the half-chunk mark, so chunks tend to end on whole
/// lines. All boundaries are snapped to char boundaries.
pub fn split_into_chunks(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if chunk_size == 0 {
        return vec![text.to_string()];
    }
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = floor_char_boundary(text, (start + chunk_size).min(text.len()));

        if end < text.len() {
            if let Some(newline) = text[start..end].rfind('\n') {
                let candidate = start + newline;
                if candidate > start + chunk_size / 2 {
                    end = candidate;
                }
            }
        }

        chunks.push(text[start..end].to_string());
        start = floor_char_boundary(text, (start + step).max(end).min(text.len()));
    }

    chunks
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PRIORITY;
    use std::fs;
    use tempfile::TempDir;

    fn producer() -> TextProducer {
        TextProducer::new(IndexingConfig::default(), ChunkingConfig::default())
    }

    #[test]
    fn supports_follows_extension_table() {
        let p = producer();
        assert!(p.supports(Path::new("src/Main.java")));
        assert!(p.supports(Path::new("README.md")));
        assert!(!p.supports(Path::new("photo.png")));
    }

    #[test]
    fn small_file_is_one_chunk_with_metadata() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("UserController.java");
        fs::write(&path, "class UserController {}").unwrap();

        let chunks = producer().produce(&path).unwrap();
        assert_eq!(chunks.len(), 1);
        let meta = &chunks[0].metadata;
        assert_eq!(meta.file_name, "UserController.java");
        assert_eq!(meta.file_type, ".java");
        assert_eq!(meta.priority, 1);
        assert_eq!(meta.chunk_index, Some(0));
        assert_eq!(meta.total_chunks, Some(1));
    }

    #[test]
    fn empty_file_yields_no_chunks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.txt");
        fs::write(&path, "   \n  ").unwrap();
        assert!(producer().produce(&path).unwrap().is_empty());
    }

    #[test]
    fn large_file_splits_with_contiguous_indices() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.txt");
        let line = "some meaningful line of source text\n";
        let content = line.repeat(300); // well past the split threshold
        fs::write(&path, &content).unwrap();

        let chunks = producer().produce(&path).unwrap();
        assert!(chunks.len() > 1);
        let total = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.chunk_index, Some(i));
            assert_eq!(chunk.metadata.total_chunks, Some(total));
            assert!(chunk.metadata.priority == DEFAULT_PRIORITY);
        }
        // Every piece of the file appears in some chunk.
        assert!(chunks.iter().map(|c| c.text.len()).sum::<usize>() >= content.len() - 3000);
    }

    #[test]
    fn split_prefers_newline_boundaries() {
        let text = format!("{}\n{}", "a".repeat(700), "b".repeat(700));
        let chunks = split_into_chunks(&text, 1000, 100);
        assert!(chunks.len() >= 2);
        // First chunk ends at the newline past the half-chunk mark.
        assert_eq!(chunks[0], "a".repeat(700));
    }

    #[test]
    fn split_never_panics_on_multibyte_boundaries() {
        let text = "héllo wörld ünïcode ".repeat(500);
        let chunks = split_into_chunks(&text, 333, 50);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            // Each chunk is valid UTF-8 by construction; verify non-empty.
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn split_without_overlap_covers_text() {
        let text = "x".repeat(2500);
        let chunks = split_into_chunks(&text, 1000, 0);
        let rebuilt: String = chunks.concat();
        assert_eq!(rebuilt, text);
    }
}
