//! Top-level search entry point.
//!
//! Classifies the query, always runs the lexical strategy, runs the vector
//! strategy unless the store is known to be unreachable, expands
//! endpoint-discovery queries into several targeted sub-queries, and hands
//! both result sets to the merger. Vector failures degrade the search to
//! lexical-only instead of failing it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::collection::CollectionManager;
use crate::config::SearchConfig;
use crate::lexical::LexicalSearchEngine;
use crate::merge;
use crate::models::{normalize_path, ScoredChunk, SearchResult, SourceKind};
use crate::query::{self, QueryProfile};
use crate::store::VectorStore;

/// Phrases that mark a query as endpoint/API discovery.
const ENDPOINT_TRIGGERS: &[&str] = &[
    "endpoint", "api", "rest", "route", "routes", "http", "url mapping",
];

/// Fixed sub-queries for endpoint discovery: route-declaration syntax,
/// API-path conventions, and HTTP-method/payload vocabulary. Higher recall
/// than any single phrasing of "show me the endpoints".
const ENDPOINT_SUB_QUERIES: &[&str] = &[
    "@app.route @GetMapping @PostMapping route decorator handler",
    "api path url mapping request handler endpoint definition",
    "GET POST PUT DELETE method json payload request body",
];

/// Outcome of one orchestrated search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub profile: QueryProfile,
    /// True when the vector channel contributed nothing and the results
    /// are lexical-only.
    pub used_fallback: bool,
}

pub struct SearchOrchestrator {
    store: Arc<dyn VectorStore>,
    lexical: Arc<LexicalSearchEngine>,
    config: SearchConfig,
    vector_available: AtomicBool,
}

impl SearchOrchestrator {
    pub fn new(
        store: Arc<dyn VectorStore>,
        lexical: Arc<LexicalSearchEngine>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            lexical,
            config,
            vector_available: AtomicBool::new(true),
        }
    }

    /// Forget a previous "store is down" verdict, e.g. after re-indexing.
    pub fn reset_vector_availability(&self) {
        self.vector_available.store(true, Ordering::Release);
    }

    pub fn vector_available(&self) -> bool {
        self.vector_available.load(Ordering::Acquire)
    }

    /// Run a hybrid search over `directory`, returning at most `limit`
    /// merged results. The directory is explicit: it picks both the
    /// lexical root and the vector collection, so concurrent callers with
    /// different directories never race on shared state.
    pub async fn search(&self, directory: &Path, query: &str, limit: usize) -> SearchOutcome {
        let profile = query::classify(query);
        debug!(
            query_type = ?profile.query_type,
            strategy = ?profile.strategy,
            complexity = profile.complexity,
            "classified query"
        );

        self.lexical.set_root(directory);
        let lexical_results = self.lexical.search(query);

        let collection = CollectionManager::collection_name(&directory.to_string_lossy());
        let (vector_results, vector_contributed) = if self.vector_available() {
            self.vector_strategy(&collection, query).await
        } else {
            debug!("vector store marked unavailable; lexical-only search");
            (Vec::new(), false)
        };

        let used_fallback = !vector_contributed;
        if used_fallback {
            info!("search degraded to lexical-only results");
        }

        let mut results = merge::merge_and_rank(query, vector_results, lexical_results);
        results.truncate(limit);

        SearchOutcome {
            results,
            profile,
            used_fallback,
        }
    }

    /// Vector channel: one similarity call for ordinary queries, a fanned
    /// multi-query expansion for endpoint discovery. Returns the results
    /// plus whether the channel actually contributed (at least one call
    /// succeeded).
    async fn vector_strategy(
        &self,
        collection: &str,
        query: &str,
    ) -> (Vec<SearchResult>, bool) {
        let queries = if is_endpoint_query(query) {
            expand_endpoint_query(query)
        } else {
            vec![query.to_string()]
        };

        let mut merged: HashMap<String, SearchResult> = HashMap::new();
        let mut succeeded = 0usize;

        for sub_query in &queries {
            // The store client retries transient failures internally; an
            // error here means the sub-query is spent, not the search.
            match self
                .store
                .similarity_search(collection, sub_query, self.config.vector_limit)
                .await
            {
                Ok(chunks) => {
                    succeeded += 1;
                    for chunk in chunks {
                        let result = scored_chunk_to_result(chunk);
                        let key = normalize_path(&result.file_path);
                        // Keep the best-scoring hit per file across all
                        // sub-queries.
                        match merged.entry(key) {
                            Entry::Occupied(mut entry) => {
                                if result.relevance_score > entry.get().relevance_score {
                                    entry.insert(result);
                                }
                            }
                            Entry::Vacant(entry) => {
                                entry.insert(result);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(sub_query = %sub_query, error = %e, "vector sub-query failed");
                }
            }
        }

        if succeeded == 0 {
            // Every call failed: remember the store is down so later
            // searches skip straight to lexical.
            self.vector_available.store(false, Ordering::Release);
            return (Vec::new(), false);
        }

        let mut results: Vec<SearchResult> = merged.into_values().collect();
        results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.file_path.cmp(&b.file_path))
        });
        results.truncate(self.config.vector_limit);
        let ok = !results.is_empty() || succeeded == queries.len();
        (results, ok)
    }
}

/// Whether the query asks for endpoint/API discovery.
pub fn is_endpoint_query(query: &str) -> bool {
    let lower = query.to_lowercase();
    ENDPOINT_TRIGGERS.iter().any(|t| lower.contains(t))
}

/// The original query plus the fixed endpoint sub-queries.
pub fn expand_endpoint_query(query: &str) -> Vec<String> {
    let mut queries = vec![query.to_string()];
    queries.extend(ENDPOINT_SUB_QUERIES.iter().map(|q| q.to_string()));
    queries
}

fn scored_chunk_to_result(chunk: ScoredChunk) -> SearchResult {
    let mut metadata = HashMap::new();
    metadata.insert("filetype".to_string(), chunk.metadata.file_type.clone());
    metadata.insert(
        "priority".to_string(),
        chunk.metadata.priority.to_string(),
    );
    if let Some(index) = chunk.metadata.chunk_index {
        metadata.insert("chunk".to_string(), index.to_string());
    }
    if let Some(total) = chunk.metadata.total_chunks {
        metadata.insert("total_chunks".to_string(), total.to_string());
    }

    SearchResult {
        file_name: chunk.metadata.file_name,
        file_path: chunk.metadata.file_path,
        content: chunk.text,
        relevance_score: chunk.score.clamp(0.0, 1.0),
        source: SourceKind::Vector,
        line_matches: Vec::new(),
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexingConfig;
    use crate::models::{ChunkMetadata, DocumentChunk};
    use crate::store::{Distance, MemoryVectorStore};
    use std::fs;
    use tempfile::TempDir;

    fn make_chunk(path: &str, text: &str) -> DocumentChunk {
        DocumentChunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
                file_path: path.to_string(),
                file_type: ".java".to_string(),
                priority: 1,
                size: text.len() as u64,
                last_modified: 0,
                chunk_index: Some(0),
                total_chunks: Some(1),
            },
        }
    }

    fn orchestrator(store: Arc<MemoryVectorStore>) -> SearchOrchestrator {
        let lexical = Arc::new(LexicalSearchEngine::new(
            IndexingConfig::default(),
            SearchConfig::default(),
        ));
        SearchOrchestrator::new(store, lexical, SearchConfig::default())
    }

    #[test]
    fn endpoint_trigger_detection() {
        assert!(is_endpoint_query("REST API endpoints"));
        assert!(is_endpoint_query("show me the routes"));
        assert!(is_endpoint_query("http handlers"));
        assert!(!is_endpoint_query("cache eviction policy"));
    }

    #[test]
    fn endpoint_expansion_has_at_least_three_sub_queries() {
        let queries = expand_endpoint_query("REST API endpoints");
        assert!(queries.len() >= 4); // original + 3 targeted
        assert_eq!(queries[0], "REST API endpoints");
        assert!(queries.iter().any(|q| q.contains("@app.route")));
        assert!(queries.iter().any(|q| q.contains("api path")));
        assert!(queries.iter().any(|q| q.contains("POST")));
    }

    #[tokio::test]
    async fn endpoint_search_deduplicates_across_sub_queries() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("empty.txt"), "nothing relevant").unwrap();

        let store = Arc::new(MemoryVectorStore::new());
        let collection =
            CollectionManager::collection_name(&tmp.path().to_string_lossy());
        store
            .create_collection(&collection, 768, Distance::Cosine)
            .await
            .unwrap();
        // One file matches several sub-queries: route decorator, api
        // path, and POST vocabulary all appear in its text.
        store
            .upsert(
                &collection,
                &[
                    make_chunk(
                        "/repo/ApiController.java",
                        "@app.route api path POST json endpoint handler",
                    ),
                    make_chunk("/repo/Billing.java", "invoice calculation logic"),
                ],
            )
            .await
            .unwrap();

        let orchestrator = orchestrator(store);
        let outcome = orchestrator
            .search(tmp.path(), "REST API endpoints", 10)
            .await;

        let api_hits = outcome
            .results
            .iter()
            .filter(|r| r.file_name == "ApiController.java")
            .count();
        assert_eq!(api_hits, 1, "no file path may appear twice");
        assert!(!outcome.used_fallback);
    }

    #[tokio::test]
    async fn unreachable_store_degrades_to_lexical_only() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("CacheService.java"),
            "public class CacheService { void evict() {} }",
        )
        .unwrap();

        let store = Arc::new(MemoryVectorStore::new());
        store.set_unreachable(true);
        let orchestrator = orchestrator(store.clone());

        let outcome = orchestrator.search(tmp.path(), "evict cache", 10).await;
        assert!(outcome.used_fallback);
        assert!(!outcome.results.is_empty());
        assert!(outcome
            .results
            .iter()
            .all(|r| r.source == SourceKind::Lexical));
        // The verdict sticks: the next search skips the store entirely.
        assert!(!orchestrator.vector_available());

        // Until someone resets it after the store recovers.
        store.set_unreachable(false);
        orchestrator.reset_vector_availability();
        assert!(orchestrator.vector_available());
    }

    #[tokio::test]
    async fn hybrid_results_join_both_channels() {
        let tmp = TempDir::new().unwrap();
        let file_path = tmp.path().join("PaymentService.java");
        fs::write(
            &file_path,
            "public class PaymentService { void charge() { payment gateway } }",
        )
        .unwrap();

        let store = Arc::new(MemoryVectorStore::new());
        let collection =
            CollectionManager::collection_name(&tmp.path().to_string_lossy());
        store
            .create_collection(&collection, 768, Distance::Cosine)
            .await
            .unwrap();
        store
            .upsert(
                &collection,
                &[make_chunk(
                    &file_path.to_string_lossy(),
                    "payment gateway charge logic",
                )],
            )
            .await
            .unwrap();

        let orchestrator = orchestrator(store);
        let outcome = orchestrator.search(tmp.path(), "payment gateway", 10).await;

        assert!(!outcome.used_fallback);
        let top = &outcome.results[0];
        assert_eq!(top.file_name, "PaymentService.java");
        assert_eq!(top.source, SourceKind::Hybrid);
    }

    #[tokio::test]
    async fn limit_is_respected() {
        let tmp = TempDir::new().unwrap();
        for i in 0..8 {
            fs::write(
                tmp.path().join(format!("Handler{}.java", i)),
                "shared keyword content here",
            )
            .unwrap();
        }
        let store = Arc::new(MemoryVectorStore::new());
        let orchestrator = orchestrator(store);

        let outcome = orchestrator
            .search(tmp.path(), "shared keyword", 3)
            .await;
        assert!(outcome.results.len() <= 3);
    }
}
