//! Vector collection lifecycle.
//!
//! One collection per indexed directory. The name is derived from the
//! directory path; creation, dimension validation, and destructive
//! recreation all live here so the pipeline never talks to the store's
//! collection routes directly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::store::{Distance, VectorStore};

/// Name used when a directory path sanitizes down to nothing.
pub const DEFAULT_COLLECTION: &str = "codebase-index";

/// The store's delete is asynchronous relative to an immediate recreate;
/// give it a moment to settle before creating the fresh collection.
const RECREATE_SETTLE: Duration = Duration::from_millis(500);

pub struct CollectionManager {
    store: Arc<dyn VectorStore>,
    dimension: usize,
}

impl CollectionManager {
    pub fn new(store: Arc<dyn VectorStore>, dimension: usize) -> Self {
        Self { store, dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Collection name for an indexing directory.
    ///
    /// Pure: separators are normalized, the last path segment is taken,
    /// anything outside `[A-Za-z0-9-]` becomes `-`, runs collapse, and the
    /// result is lowercased. Two spellings of the same directory (separator
    /// style, trailing slash) yield the same name; an empty result maps to
    /// [`DEFAULT_COLLECTION`].
    pub fn collection_name(directory: &str) -> String {
        let normalized = directory.replace('\\', "/");
        let last = normalized
            .split('/')
            .filter(|s| !s.is_empty())
            .next_back()
            .unwrap_or("");

        let mut name = String::with_capacity(last.len());
        for c in last.chars() {
            if c.is_ascii_alphanumeric() || c == '-' {
                name.push(c.to_ascii_lowercase());
            } else if !name.ends_with('-') {
                name.push('-');
            }
        }
        let name = name.trim_matches('-');

        if name.is_empty() {
            DEFAULT_COLLECTION.to_string()
        } else {
            name.to_string()
        }
    }

    /// Make sure the collection exists with the configured dimension.
    ///
    /// Missing → create. Present with the wrong dimension → treated as
    /// corruption: delete and recreate, losing the old vectors. That loss
    /// is the accepted trade-off; a mismatched collection can never serve
    /// correct similarity results.
    pub async fn ensure_collection(&self, name: &str) -> Result<()> {
        match self.store.describe_collection(name).await? {
            None => {
                info!(collection = name, dimension = self.dimension, "creating collection");
                self.store
                    .create_collection(name, self.dimension, Distance::Cosine)
                    .await
                    .with_context(|| format!("could not create collection '{}'", name))?;
            }
            Some(info) if info.dimension != self.dimension => {
                warn!(
                    collection = name,
                    found = info.dimension,
                    expected = self.dimension,
                    "collection dimension mismatch; deleting and recreating"
                );
                self.delete_and_recreate(name).await?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Drop the collection and create a fresh one. Used by restart and
    /// clear-cache operations; all previously stored vectors are lost.
    pub async fn delete_and_recreate(&self, name: &str) -> Result<()> {
        self.store
            .delete_collection(name)
            .await
            .with_context(|| format!("could not delete collection '{}'", name))?;

        tokio::time::sleep(RECREATE_SETTLE).await;

        self.store
            .create_collection(name, self.dimension, Distance::Cosine)
            .await
            .with_context(|| format!("could not recreate collection '{}'", name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryVectorStore;

    #[test]
    fn collection_name_sanitization() {
        assert_eq!(
            CollectionManager::collection_name("codebase/spring-ai"),
            "spring-ai"
        );
        assert_eq!(CollectionManager::collection_name("My Project!"), "my-project");
        assert_eq!(
            CollectionManager::collection_name("a__b..c"),
            "a-b-c"
        );
        assert_eq!(CollectionManager::collection_name(""), DEFAULT_COLLECTION);
        assert_eq!(CollectionManager::collection_name("///"), DEFAULT_COLLECTION);
    }

    #[test]
    fn collection_name_is_separator_insensitive() {
        let unix = CollectionManager::collection_name("repo/src/main");
        let windows = CollectionManager::collection_name("repo\\src\\main");
        let trailing = CollectionManager::collection_name("repo/src/main/");
        assert_eq!(unix, windows);
        assert_eq!(unix, trailing);
    }

    #[tokio::test]
    async fn ensure_collection_creates_once() {
        let store = Arc::new(MemoryVectorStore::new());
        let manager = CollectionManager::new(store.clone(), 768);

        manager.ensure_collection("repo").await.unwrap();
        manager.ensure_collection("repo").await.unwrap();

        // Second call observes "exists, correct dimension" and is a no-op.
        assert_eq!(store.create_calls(), 1);
        let info = store.describe_collection("repo").await.unwrap().unwrap();
        assert_eq!(info.dimension, 768);
    }

    #[tokio::test]
    async fn dimension_mismatch_forces_recreate() {
        let store = Arc::new(MemoryVectorStore::new());
        store
            .create_collection("repo", 4096, Distance::Cosine)
            .await
            .unwrap();

        let manager = CollectionManager::new(store.clone(), 768);
        manager.ensure_collection("repo").await.unwrap();

        assert_eq!(store.delete_calls(), 1);
        let info = store.describe_collection("repo").await.unwrap().unwrap();
        assert_eq!(info.dimension, 768);
    }

    #[tokio::test]
    async fn delete_and_recreate_yields_empty_collection() {
        let store = Arc::new(MemoryVectorStore::new());
        let manager = CollectionManager::new(store.clone(), 768);
        manager.ensure_collection("repo").await.unwrap();

        manager.delete_and_recreate("repo").await.unwrap();
        assert_eq!(store.point_count("repo"), 0);
        assert!(store.describe_collection("repo").await.unwrap().is_some());
    }
}
