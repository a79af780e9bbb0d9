//! Core data types shared by the indexing pipeline and the search engine.
//!
//! These types represent the chunks that flow into the vector store and the
//! results that flow out of the search strategies and the merger.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata attached to every chunk pushed to the vector store.
///
/// Round-trips through the store payload so search results can be mapped
/// back to their source file without touching disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_name: String,
    pub file_path: String,
    pub file_type: String,
    pub priority: u32,
    pub size: u64,
    pub last_modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
}

/// A bounded slice of a file's text submitted as one embeddable unit.
///
/// Immutable once produced; owned by the pipeline until handed to the store.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A chunk returned from the vector store with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub text: String,
    pub score: f64,
    pub metadata: ChunkMetadata,
}

/// Which search channel(s) produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Found only by vector similarity search.
    Vector,
    /// Found only by the lexical file engine.
    Lexical,
    /// Corroborated by both channels.
    Hybrid,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Vector => "vector-only",
            SourceKind::Lexical => "file-only",
            SourceKind::Hybrid => "hybrid-enhanced",
        }
    }
}

/// A single matching line inside a file.
#[derive(Debug, Clone)]
pub struct LineMatch {
    /// 1-based line number.
    pub line_number: usize,
    pub line: String,
    pub term: String,
}

/// A ranked search result, merged from one or two underlying channels.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub file_name: String,
    pub file_path: String,
    pub content: String,
    pub relevance_score: f64,
    pub source: SourceKind,
    pub line_matches: Vec<LineMatch>,
    pub metadata: HashMap<String, String>,
}

/// Normalize a file path for joining results across search channels.
///
/// Case-insensitive, backslashes folded to forward slashes, trailing
/// separator trimmed. Two spellings of the same file must produce the
/// same key.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_end_matches('/').to_lowercase()
}

/// File extension including the leading dot, lowercased. Empty when the
/// name has no dot (or only a leading one, e.g. `.gitignore`).
pub fn file_extension(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name[idx..].to_lowercase(),
        _ => String::new(),
    }
}
