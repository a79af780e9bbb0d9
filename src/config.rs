use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
    /// Filename-pattern → priority rank. Lower rank indexes earlier;
    /// patterns are matched by substring against the file name.
    #[serde(default = "default_file_priorities")]
    pub file_priorities: HashMap<String, u32>,
    #[serde(default = "default_excluded_directories")]
    pub excluded_directories: Vec<String>,
    /// Extra glob patterns to exclude, e.g. `**/generated/**`.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,
    /// Files at or below this rank are indexed in the priority phase.
    #[serde(default = "default_priority_cutoff")]
    pub priority_cutoff: u32,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            supported_extensions: default_supported_extensions(),
            file_priorities: default_file_priorities(),
            excluded_directories: default_excluded_directories(),
            exclude_globs: Vec::new(),
            batch_size: default_batch_size(),
            max_file_size: default_max_file_size(),
            max_depth: default_max_depth(),
            worker_limit: default_worker_limit(),
            priority_cutoff: default_priority_cutoff(),
        }
    }
}

impl IndexingConfig {
    /// Priority rank for a file name: the lowest rank among matching
    /// patterns, or [`DEFAULT_PRIORITY`] when nothing matches.
    pub fn priority_rank(&self, file_name: &str) -> u32 {
        self.file_priorities
            .iter()
            .filter(|(pattern, _)| file_name.contains(pattern.as_str()))
            .map(|(_, rank)| *rank)
            .min()
            .unwrap_or(DEFAULT_PRIORITY)
    }

    pub fn is_supported(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.supported_extensions
            .iter()
            .any(|ext| lower.ends_with(ext.as_str()))
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy().to_lowercase();
        self.excluded_directories
            .iter()
            .any(|dir| path_str.contains(dir.as_str()))
    }

    /// Compile the configured exclude globs. Invalid patterns are dropped
    /// with a warning rather than failing the walk.
    pub fn exclude_globset(&self) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude_globs {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "invalid exclude glob");
                }
            }
        }
        builder.build().unwrap_or_else(|_| GlobSet::empty())
    }
}

/// Rank assigned to files that match no priority pattern.
pub const DEFAULT_PRIORITY: u32 = 10;

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Files whose content is at most this long are indexed as one chunk.
    #[serde(default = "default_split_threshold")]
    pub split_threshold: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            split_threshold: default_split_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_file_name")]
    pub file_name: String,
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_name: default_cache_file_name(),
            enabled: default_cache_enabled(),
        }
    }
}

impl CacheConfig {
    /// Cache file name for a specific indexing directory, so two
    /// directories never share incremental state.
    ///
    /// `codebase/spring-ai` → `.indexed_spring_ai_files_cache.txt`,
    /// `src` → `.indexed_src_files_cache.txt`. Falls back to the
    /// configured default name when the directory yields nothing usable.
    pub fn file_for(&self, directory: &str) -> String {
        let normalized = directory.replace('\\', "/");
        let last = normalized
            .split('/')
            .filter(|s| !s.is_empty())
            .next_back()
            .unwrap_or("");

        let mut clean = String::with_capacity(last.len());
        for c in last.chars() {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                clean.push(c.to_ascii_lowercase());
            } else {
                clean.push('_');
            }
        }
        let clean = clean.trim_matches('_');
        let mut collapsed = String::with_capacity(clean.len());
        for c in clean.chars() {
            if c == '_' && collapsed.ends_with('_') {
                continue;
            }
            collapsed.push(c);
        }

        if collapsed.is_empty() {
            self.file_name.clone()
        } else {
            format!(".indexed_{}_files_cache.txt", collapsed)
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_vector_url")]
    pub url: String,
    /// Environment variable holding the store API key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: default_vector_url(),
            api_key_env: None,
            dimension: default_dimension(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_vector_limit")]
    pub vector_limit: usize,
    #[serde(default = "default_min_lexical_score")]
    pub min_lexical_score: f64,
    /// Per-extension cap applied by the lexical diversity filter.
    #[serde(default = "default_max_per_extension")]
    pub max_per_extension: usize,
    #[serde(default = "default_max_lexical_file_size")]
    pub max_lexical_file_size: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            vector_limit: default_vector_limit(),
            min_lexical_score: default_min_lexical_score(),
            max_per_extension: default_max_per_extension(),
            max_lexical_file_size: default_max_lexical_file_size(),
        }
    }
}

fn default_supported_extensions() -> Vec<String> {
    [
        ".java", ".kt", ".scala", ".rs", ".go", ".py", ".rb", ".c", ".cpp", ".h", ".cs", ".swift",
        ".js", ".ts", ".jsp", ".php", ".html", ".css", ".sql", ".sh", ".cmd", ".xml",
        ".properties", ".yml", ".yaml", ".toml", ".json", ".conf", ".md", ".txt", ".adoc",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_file_priorities() -> HashMap<String, u32> {
    [
        ("Controller", 1),
        ("Service", 2),
        ("Repository", 3),
        ("Config", 4),
        ("Application", 5),
        (".java", 6),
        (".xml", 7),
        (".properties", 8),
        (".md", 9),
    ]
    .iter()
    .map(|(pattern, rank)| (pattern.to_string(), *rank))
    .collect()
}

fn default_excluded_directories() -> Vec<String> {
    ["target", ".git", "node_modules", ".idea", ".vscode", "build", "dist"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_batch_size() -> usize {
    20
}
fn default_max_file_size() -> u64 {
    1024 * 1024
}
fn default_max_depth() -> usize {
    10
}
fn default_worker_limit() -> usize {
    32
}
fn default_priority_cutoff() -> u32 {
    5
}
fn default_chunk_size() -> usize {
    3000
}
fn default_chunk_overlap() -> usize {
    500
}
fn default_split_threshold() -> usize {
    4000
}
fn default_cache_file_name() -> String {
    ".indexed_files_cache.txt".to_string()
}
fn default_cache_enabled() -> bool {
    true
}
fn default_vector_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_dimension() -> usize {
    768
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_max_results() -> usize {
    25
}
fn default_vector_limit() -> usize {
    50
}
fn default_min_lexical_score() -> f64 {
    0.1
}
fn default_max_per_extension() -> usize {
    8
}
fn default_max_lexical_file_size() -> u64 {
    2 * 1024 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}
