//! Vector store boundary.
//!
//! Defines the [`VectorStore`] trait the pipeline and search strategies are
//! written against, and two implementations:
//!
//! - **[`HttpVectorStore`]** — talks to a Qdrant-style REST API for
//!   collections and points, and an Ollama-style `/api/embed` endpoint for
//!   embeddings. All calls are retried with exponential backoff on
//!   transient failures (network errors, 429, 5xx); other 4xx responses
//!   fail immediately.
//! - **[`MemoryVectorStore`]** — an in-process store with token-overlap
//!   scoring, used by tests and as an offline stand-in.
//!
//! "Not found" responses from describe/delete are not errors at this
//! boundary; absence is an answer, not a failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::{EmbeddingConfig, VectorConfig};
use crate::models::{normalize_path, ChunkMetadata, DocumentChunk, ScoredChunk};

/// Distance metric for a collection. Cosine is the only one the indexer
/// creates, matching the embedding model's training objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Cosine,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Cosine => "Cosine",
        }
    }
}

/// What the store reports about an existing collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionInfo {
    pub dimension: usize,
}

/// Narrow interface to the external vector store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and store chunks. Re-upserting chunks for the same file
    /// replaces the previous points for that file's chunk indices.
    async fn upsert(&self, collection: &str, chunks: &[DocumentChunk]) -> Result<()>;

    /// Similarity search for a free-text query.
    async fn similarity_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// `Ok(None)` when the collection does not exist.
    async fn describe_collection(&self, name: &str) -> Result<Option<CollectionInfo>>;

    async fn create_collection(&self, name: &str, dimension: usize, distance: Distance)
        -> Result<()>;

    /// Deleting a missing collection succeeds.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Best-effort removal of all points whose file path matches one of
    /// the given paths.
    async fn delete_by_path(&self, collection: &str, paths: &[String]) -> Result<()>;
}

/// Deterministic point id for a chunk: same file path + chunk index always
/// maps to the same id, so re-indexing a file overwrites its old points
/// instead of accumulating duplicates.
pub fn point_id(file_path: &str, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_path(file_path).as_bytes());
    hasher.update(b"|");
    hasher.update(chunk_index.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

// ============ HTTP store ============

/// Vector store client over HTTP: Qdrant-style collection/point routes,
/// Ollama-style embedding endpoint.
pub struct HttpVectorStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    embedding: EmbeddingConfig,
    max_retries: u32,
}

impl HttpVectorStore {
    pub fn new(vector: &VectorConfig, embedding: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(vector.timeout_secs))
            .build()?;

        let api_key = vector
            .api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok());

        Ok(Self {
            client,
            base_url: vector.url.trim_end_matches('/').to_string(),
            api_key,
            embedding: embedding.clone(),
            max_retries: vector.max_retries,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(ref key) = self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    /// Send a request, retrying transient failures with exponential
    /// backoff (1s, 2s, 4s, ... capped at 2^5). 429 and 5xx retry; other
    /// 4xx fail immediately with the response body.
    async fn send_with_retry<F>(&self, make_request: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match make_request().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
                        return Ok(response);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!("vector store error {}: {}", status, body));
                        continue;
                    }
                    let body = response.text().await.unwrap_or_default();
                    bail!("vector store error {}: {}", status, body);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("vector store call failed after retries")))
    }

    /// Embed a batch of texts via the Ollama-style `/api/embed` endpoint.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!(
            "{}/api/embed",
            self.embedding.url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.embedding.model,
            "input": texts,
        });

        let response = self
            .send_with_retry(|| {
                self.client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .json(&body)
            })
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            bail!(
                "embedding endpoint not found at {} (is the model server running?)",
                url
            );
        }

        let json: serde_json::Value = response.json().await?;
        parse_embed_response(&json)
    }
}

fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid embedding response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("invalid embedding response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

fn metadata_to_payload(chunk: &DocumentChunk) -> serde_json::Value {
    let mut payload = serde_json::to_value(&chunk.metadata).unwrap_or_default();
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("text".to_string(), serde_json::json!(chunk.text));
    }
    payload
}

fn payload_to_metadata(payload: &serde_json::Value) -> Option<(String, ChunkMetadata)> {
    let text = payload.get("text")?.as_str()?.to_string();
    let metadata: ChunkMetadata = serde_json::from_value(payload.clone()).ok()?;
    Some((text, metadata))
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn upsert(&self, collection: &str, chunks: &[DocumentChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embed(&texts).await?;
        if vectors.len() != chunks.len() {
            bail!(
                "embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        let points: Vec<serde_json::Value> = chunks
            .iter()
            .zip(vectors.iter())
            .map(|(chunk, vector)| {
                serde_json::json!({
                    "id": point_id(
                        &chunk.metadata.file_path,
                        chunk.metadata.chunk_index.unwrap_or(0),
                    ),
                    "vector": vector,
                    "payload": metadata_to_payload(chunk),
                })
            })
            .collect();

        let path = format!("/collections/{}/points?wait=true", collection);
        let body = serde_json::json!({ "points": points });
        let response = self
            .send_with_retry(|| self.request(reqwest::Method::PUT, &path).json(&body))
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            bail!("collection not found: {}", collection);
        }
        Ok(())
    }

    async fn similarity_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let query_vector = self
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response for query"))?;

        let path = format!("/collections/{}/points/search", collection);
        let body = serde_json::json!({
            "vector": query_vector,
            "limit": limit,
            "with_payload": true,
        });
        let response = self
            .send_with_retry(|| self.request(reqwest::Method::POST, &path).json(&body))
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            // No collection yet: nothing indexed, nothing to return.
            return Ok(Vec::new());
        }

        let json: serde_json::Value = response.json().await?;
        let hits = json
            .get("result")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::with_capacity(hits.len());
        for hit in &hits {
            let score = hit.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0);
            let Some(payload) = hit.get("payload") else {
                continue;
            };
            if let Some((text, metadata)) = payload_to_metadata(payload) {
                results.push(ScoredChunk {
                    text,
                    score,
                    metadata,
                });
            }
        }
        Ok(results)
    }

    async fn describe_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let path = format!("/collections/{}", name);
        let response = self
            .send_with_retry(|| self.request(reqwest::Method::GET, &path))
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let json: serde_json::Value = response.json().await?;
        let dimension = json
            .pointer("/result/config/params/vectors/size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow::anyhow!("collection description missing vector size"))?;

        Ok(Some(CollectionInfo {
            dimension: dimension as usize,
        }))
    }

    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        distance: Distance,
    ) -> Result<()> {
        let path = format!("/collections/{}", name);
        let body = serde_json::json!({
            "vectors": {
                "size": dimension,
                "distance": distance.as_str(),
            }
        });
        self.send_with_retry(|| self.request(reqwest::Method::PUT, &path).json(&body))
            .await?;
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let path = format!("/collections/{}", name);
        // NOT_FOUND passes through send_with_retry as success: deleting a
        // missing collection is a no-op, not a failure.
        self.send_with_retry(|| self.request(reqwest::Method::DELETE, &path))
            .await?;
        Ok(())
    }

    async fn delete_by_path(&self, collection: &str, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let path = format!("/collections/{}/points/delete", collection);
        let body = serde_json::json!({
            "filter": {
                "must": [{
                    "key": "file_path",
                    "match": { "any": paths },
                }]
            }
        });
        self.send_with_retry(|| self.request(reqwest::Method::POST, &path).json(&body))
            .await?;
        Ok(())
    }
}

// ============ In-memory store ============

struct MemoryCollection {
    dimension: usize,
    /// Point id → chunk. Deterministic ids give upsert-replace semantics.
    points: HashMap<String, DocumentChunk>,
}

/// In-process vector store used by tests and as an offline stand-in.
///
/// Similarity is token overlap between the query and the chunk text, which
/// is deterministic and needs no embedding model. Call counters expose how
/// often lifecycle operations actually hit the store.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: Mutex<HashMap<String, MemoryCollection>>,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    /// File paths in upsert arrival order, across all collections.
    upsert_log: Mutex<Vec<String>>,
    /// When true, every call fails; simulates an unreachable store.
    fail_all: std::sync::atomic::AtomicBool,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::Relaxed)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::Relaxed)
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.fail_all.store(unreachable, Ordering::Relaxed);
    }

    /// File paths in the order their chunks arrived.
    pub fn upsert_order(&self) -> Vec<String> {
        self.upsert_log.lock().unwrap().clone()
    }

    /// All stored chunks for a collection, unordered.
    pub fn chunks(&self, collection: &str) -> Vec<DocumentChunk> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.points.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn point_count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.points.len())
            .unwrap_or(0)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.fail_all.load(Ordering::Relaxed) {
            bail!("vector store unreachable");
        }
        Ok(())
    }
}

fn overlap_score(query: &str, text: &str) -> f64 {
    let query_tokens: Vec<String> = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let text_tokens: std::collections::HashSet<String> = tokenize(text).into_iter().collect();
    let hits = query_tokens
        .iter()
        .filter(|t| text_tokens.contains(*t))
        .count();
    hits as f64 / query_tokens.len() as f64
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, collection: &str, chunks: &[DocumentChunk]) -> Result<()> {
        self.check_reachable()?;
        let mut collections = self.collections.lock().unwrap();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow::anyhow!("collection not found: {}", collection))?;
        for chunk in chunks {
            let id = point_id(
                &chunk.metadata.file_path,
                chunk.metadata.chunk_index.unwrap_or(0),
            );
            coll.points.insert(id, chunk.clone());
        }
        if let Some(first) = chunks.first() {
            self.upsert_log
                .lock()
                .unwrap()
                .push(first.metadata.file_path.clone());
        }
        Ok(())
    }

    async fn similarity_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        self.check_reachable()?;
        let collections = self.collections.lock().unwrap();
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<ScoredChunk> = coll
            .points
            .values()
            .map(|chunk| ScoredChunk {
                text: chunk.text.clone(),
                score: overlap_score(query, &chunk.text),
                metadata: chunk.metadata.clone(),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.metadata.file_path.cmp(&b.metadata.file_path))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn describe_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        self.check_reachable()?;
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(name)
            .map(|c| CollectionInfo {
                dimension: c.dimension,
            }))
    }

    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        _distance: Distance,
    ) -> Result<()> {
        self.check_reachable()?;
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        self.collections.lock().unwrap().insert(
            name.to_string(),
            MemoryCollection {
                dimension,
                points: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.check_reachable()?;
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        self.collections.lock().unwrap().remove(name);
        Ok(())
    }

    async fn delete_by_path(&self, collection: &str, paths: &[String]) -> Result<()> {
        self.check_reachable()?;
        let normalized: Vec<String> = paths.iter().map(|p| normalize_path(p)).collect();
        let mut collections = self.collections.lock().unwrap();
        if let Some(coll) = collections.get_mut(collection) {
            coll.points
                .retain(|_, chunk| !normalized.contains(&normalize_path(&chunk.metadata.file_path)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chunk(path: &str, index: usize, text: &str) -> DocumentChunk {
        DocumentChunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
                file_path: path.to_string(),
                file_type: ".java".to_string(),
                priority: 1,
                size: text.len() as u64,
                last_modified: 0,
                chunk_index: Some(index),
                total_chunks: Some(1),
            },
        }
    }

    #[test]
    fn point_id_is_deterministic_and_path_normalized() {
        let a = point_id("/repo/src/Main.java", 0);
        let b = point_id("/repo/src/Main.java", 0);
        let c = point_id("\\repo\\src\\MAIN.JAVA", 0);
        let d = point_id("/repo/src/Main.java", 1);
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_ne!(a, d);
        // Shape is a valid UUID.
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn parse_embed_response_shape() {
        let json = serde_json::json!({ "embeddings": [[0.1, 0.2], [0.3, 0.4]] });
        let vecs = parse_embed_response(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0].len(), 2);

        let bad = serde_json::json!({ "data": [] });
        assert!(parse_embed_response(&bad).is_err());
    }

    #[test]
    fn payload_round_trip() {
        let chunk = make_chunk("/repo/src/Main.java", 2, "class Main {}");
        let payload = metadata_to_payload(&chunk);
        let (text, metadata) = payload_to_metadata(&payload).unwrap();
        assert_eq!(text, "class Main {}");
        assert_eq!(metadata, chunk.metadata);
    }

    #[tokio::test]
    async fn memory_store_upsert_replaces_points() {
        let store = MemoryVectorStore::new();
        store
            .create_collection("repo", 768, Distance::Cosine)
            .await
            .unwrap();

        let chunk = make_chunk("/repo/Main.java", 0, "first version");
        store.upsert("repo", &[chunk]).await.unwrap();
        let updated = make_chunk("/repo/Main.java", 0, "second version");
        store.upsert("repo", &[updated]).await.unwrap();

        assert_eq!(store.point_count("repo"), 1);
        assert_eq!(store.chunks("repo")[0].text, "second version");
    }

    #[tokio::test]
    async fn memory_store_search_orders_by_overlap() {
        let store = MemoryVectorStore::new();
        store
            .create_collection("repo", 768, Distance::Cosine)
            .await
            .unwrap();
        store
            .upsert(
                "repo",
                &[
                    make_chunk("/repo/A.java", 0, "user account login controller"),
                    make_chunk("/repo/B.java", 0, "database migration tooling"),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .similarity_search("repo", "user login", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.file_path, "/repo/A.java");
    }

    #[tokio::test]
    async fn memory_store_delete_by_path() {
        let store = MemoryVectorStore::new();
        store
            .create_collection("repo", 768, Distance::Cosine)
            .await
            .unwrap();
        store
            .upsert(
                "repo",
                &[
                    make_chunk("/repo/A.java", 0, "alpha"),
                    make_chunk("/repo/B.java", 0, "beta"),
                ],
            )
            .await
            .unwrap();

        store
            .delete_by_path("repo", &["\\repo\\A.JAVA".to_string()])
            .await
            .unwrap();
        assert_eq!(store.point_count("repo"), 1);
        assert_eq!(store.chunks("repo")[0].metadata.file_path, "/repo/B.java");
    }

    #[tokio::test]
    async fn memory_store_missing_collection_is_none() {
        let store = MemoryVectorStore::new();
        assert!(store.describe_collection("nope").await.unwrap().is_none());
        // Deleting a missing collection is tolerated.
        store.delete_collection("nope").await.unwrap();
    }
}
