//! Lexical file search engine.
//!
//! Scores files directly against query terms, independent of the vector
//! store. This is the channel that keeps search alive while indexing is
//! still running or the store is unreachable.
//!
//! The per-file score is a fixed weighted blend:
//!
//! | signal | weight |
//! |--------|--------|
//! | TF-IDF over the corpus | 0.40 |
//! | positional (earlier is better) | 0.20 |
//! | declaration-context heuristic | 0.25 |
//! | fuzzy token similarity | 0.10 |
//! | file-type importance | 0.05 |
//!
//! IDF statistics are rebuilt whenever the search root changes. That scan
//! is O(corpus) and intentionally not incremental; it happens on root
//! change, not per query.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;
use walkdir::WalkDir;

use crate::config::{IndexingConfig, SearchConfig};
use crate::models::{file_extension, LineMatch, SearchResult, SourceKind};
use crate::query::extract_terms;

const TFIDF_WEIGHT: f64 = 0.40;
const POSITIONAL_WEIGHT: f64 = 0.20;
const DECLARATION_WEIGHT: f64 = 0.25;
const FUZZY_WEIGHT: f64 = 0.10;
const FILE_TYPE_WEIGHT: f64 = 0.05;

const MAX_LINE_MATCHES: usize = 15;

#[derive(Default)]
struct IdfStats {
    document_frequencies: HashMap<String, f64>,
    total_documents: usize,
}

pub struct LexicalSearchEngine {
    indexing: IndexingConfig,
    search: SearchConfig,
    root: Mutex<Option<PathBuf>>,
    idf: Mutex<IdfStats>,
}

impl LexicalSearchEngine {
    pub fn new(indexing: IndexingConfig, search: SearchConfig) -> Self {
        Self {
            indexing,
            search,
            root: Mutex::new(None),
            idf: Mutex::new(IdfStats::default()),
        }
    }

    /// Point the engine at a directory, rebuilding IDF statistics if the
    /// root actually changed.
    pub fn set_root(&self, directory: &Path) {
        {
            let root = self.root.lock().unwrap();
            if root.as_deref() == Some(directory) {
                return;
            }
        }
        let stats = self.build_document_frequencies(directory);
        *self.idf.lock().unwrap() = stats;
        *self.root.lock().unwrap() = Some(directory.to_path_buf());
    }

    /// Score every supported file under the root against the query.
    pub fn search(&self, query: &str) -> Vec<SearchResult> {
        let root = match self.root.lock().unwrap().clone() {
            Some(root) => root,
            None => return Vec::new(),
        };
        let terms = extract_terms(query);
        if terms.is_empty() && query.trim().is_empty() {
            return Vec::new();
        }

        let mut results: Vec<SearchResult> = Vec::new();
        for path in self.walk(&root) {
            match self.score_file(&path, query, &terms) {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                }
            }
        }

        results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.file_path.cmp(&b.file_path))
        });

        let diverse = self.diversity_filter(results);
        diverse
            .into_iter()
            .take(self.search.max_results)
            .collect()
    }

    fn score_file(
        &self,
        path: &Path,
        query: &str,
        terms: &[String],
    ) -> anyhow::Result<Option<SearchResult>> {
        let metadata = std::fs::metadata(path)?;
        if metadata.len() > self.search.max_lexical_file_size {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let content_lower = content.to_lowercase();
        let query_lower = query.to_lowercase();

        let tfidf = self.tfidf_score(&content_lower, terms);
        let positional = positional_score(&content_lower, terms);
        let declaration = declaration_score(&content_lower, &query_lower, terms);
        let fuzzy = fuzzy_score(&content_lower, &query_lower);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let type_importance = file_type_importance(&file_name);

        let score = tfidf * TFIDF_WEIGHT
            + positional * POSITIONAL_WEIGHT
            + declaration * DECLARATION_WEIGHT
            + fuzzy * FUZZY_WEIGHT
            + type_importance * FILE_TYPE_WEIGHT;

        if score <= self.search.min_lexical_score {
            return Ok(None);
        }

        let lines: Vec<&str> = content.lines().collect();
        let line_matches = find_line_matches(&lines, terms);
        let snippet = best_snippet(&lines, terms);

        Ok(Some(SearchResult {
            file_name,
            file_path: path.to_string_lossy().to_string(),
            content: snippet,
            relevance_score: score,
            source: SourceKind::Lexical,
            line_matches,
            metadata: HashMap::new(),
        }))
    }

    fn tfidf_score(&self, content_lower: &str, terms: &[String]) -> f64 {
        let word_count = content_lower.split_whitespace().count().max(1);
        let idf = self.idf.lock().unwrap();
        let total = idf.total_documents.max(1) as f64;

        terms
            .iter()
            .map(|term| {
                let occurrences = count_occurrences(content_lower, term);
                let tf = occurrences as f64 / word_count as f64;
                let df = idf
                    .document_frequencies
                    .get(term)
                    .copied()
                    .unwrap_or(1.0);
                tf * (total / df).ln().max(0.0)
            })
            .sum()
    }

    /// Limit how many results may share a file extension, preserving
    /// relative order within each extension.
    fn diversity_filter(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        let mut extension_counts: HashMap<String, usize> = HashMap::new();
        let mut diverse = Vec::with_capacity(results.len());
        for result in results {
            let extension = file_extension(&result.file_name);
            let count = extension_counts.entry(extension).or_insert(0);
            if *count < self.search.max_per_extension {
                *count += 1;
                diverse.push(result);
            }
        }
        diverse
    }

    fn build_document_frequencies(&self, directory: &Path) -> IdfStats {
        let mut stats = IdfStats::default();
        for path in self.walk(directory) {
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            for term in unique_terms(&content) {
                *stats.document_frequencies.entry(term).or_insert(0.0) += 1.0;
            }
            stats.total_documents += 1;
        }
        stats
    }

    fn walk(&self, directory: &Path) -> Vec<PathBuf> {
        let exclude_globs = self.indexing.exclude_globset();
        let mut files: Vec<PathBuf> = WalkDir::new(directory)
            .max_depth(self.indexing.max_depth)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| !self.indexing.is_excluded(path) && !exclude_globs.is_match(path))
            .filter(|path| {
                path.file_name()
                    .map(|n| self.indexing.is_supported(&n.to_string_lossy()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        files
    }
}

fn unique_terms(content: &str) -> HashSet<String> {
    content
        .split(|c: char| c.is_whitespace() || ",;.!?()[]{}\"'".contains(c))
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() > 2)
        .collect()
}

fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack.matches(needle).count()
}

/// Terms appearing earlier in the file score higher; linear decay with at
/// most a 50% penalty for appearing at the very end.
fn positional_score(content_lower: &str, terms: &[String]) -> f64 {
    if terms.is_empty() || content_lower.is_empty() {
        return 0.0;
    }
    let total: f64 = terms
        .iter()
        .filter_map(|term| content_lower.find(term.as_str()))
        .map(|pos| 1.0 - (pos as f64 / content_lower.len() as f64) * 0.5)
        .sum();
    total / terms.len() as f64
}

/// Reward matches inside declaration-like lines; comments still count but
/// at a lower weight.
fn declaration_score(content_lower: &str, query_lower: &str, terms: &[String]) -> f64 {
    let mut score: f64 = 0.0;
    let mut seen_kinds: HashSet<u8> = HashSet::new();

    for line in content_lower.lines() {
        let matched = terms.iter().any(|t| line.contains(t.as_str()))
            || (!query_lower.is_empty() && line.contains(query_lower));
        if !matched {
            continue;
        }
        let trimmed = line.trim_start();
        let is_comment =
            trimmed.starts_with("//") || trimmed.starts_with('*') || trimmed.starts_with('#');

        if is_comment {
            if seen_kinds.insert(4) {
                score += 0.8;
            }
        } else if is_method_declaration(trimmed) {
            if seen_kinds.insert(0) {
                score += 2.0;
            }
        } else if is_type_declaration(trimmed) {
            if seen_kinds.insert(1) {
                score += 1.8;
            }
        } else if trimmed.starts_with('@') {
            if seen_kinds.insert(2) {
                score += 1.5;
            }
        } else if is_field_declaration(trimmed) {
            if seen_kinds.insert(3) {
                score += 1.2;
            }
        }
    }

    score
}

fn is_method_declaration(line: &str) -> bool {
    let has_keyword = ["fn ", "def ", "public ", "private ", "protected ", "func "]
        .iter()
        .any(|kw| line.starts_with(kw) || line.contains(&format!(" {}", kw)));
    has_keyword && line.contains('(')
}

fn is_type_declaration(line: &str) -> bool {
    ["class ", "interface ", "enum ", "struct ", "trait "]
        .iter()
        .any(|kw| line.contains(kw))
}

fn is_field_declaration(line: &str) -> bool {
    ["let ", "const ", "static ", "final ", "val ", "var "]
        .iter()
        .any(|kw| line.starts_with(kw) || line.contains(&format!(" {}", kw)))
}

/// Best edit-distance similarity between the query and any file token of
/// comparable length.
fn fuzzy_score(content_lower: &str, query_lower: &str) -> f64 {
    if query_lower.is_empty() {
        return 0.0;
    }
    let mut best: f64 = 0.0;
    for word in content_lower.split_whitespace() {
        if word.len().abs_diff(query_lower.len()) <= 2 {
            let similarity = string_similarity(word, query_lower);
            if similarity > best {
                best = similarity;
            }
            if best >= 1.0 {
                break;
            }
        }
    }
    best
}

fn string_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    (max_len - edit_distance(a, b)) as f64 / max_len as f64
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Static importance by file role, spotted from the name.
pub fn file_type_importance(file_name: &str) -> f64 {
    let name = file_name.to_lowercase();
    if name.contains("test") {
        return 0.3;
    }
    if name.contains("controller") {
        return 1.0;
    }
    if name.contains("service") {
        return 0.9;
    }
    if name.contains("repository") || name.contains("dao") {
        return 0.8;
    }
    if name.contains("config") {
        return 0.7;
    }
    let extension = file_extension(&name);
    match extension.as_str() {
        ".java" | ".kt" | ".rs" | ".go" | ".py" | ".ts" | ".js" | ".rb" | ".c" | ".cpp" => 0.6,
        ".xml" | ".properties" | ".yml" | ".yaml" | ".toml" => 0.4,
        _ => 0.5,
    }
}

fn find_line_matches(lines: &[&str], terms: &[String]) -> Vec<LineMatch> {
    let mut matches = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let line_lower = line.to_lowercase();
        for term in terms {
            if line_lower.contains(term.as_str()) {
                matches.push(LineMatch {
                    line_number: i + 1,
                    line: line.trim().to_string(),
                    term: term.clone(),
                });
                break;
            }
        }
    }
    matches.truncate(MAX_LINE_MATCHES);
    matches
}

/// Context window around the line with the most term hits, with a `>>>`
/// marker on the matching line.
fn best_snippet(lines: &[&str], terms: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut best_line = 0;
    let mut best_hits = 0;
    for (i, line) in lines.iter().enumerate() {
        let line_lower = line.to_lowercase();
        let hits = terms
            .iter()
            .filter(|t| line_lower.contains(t.as_str()))
            .count();
        if hits > best_hits {
            best_hits = hits;
            best_line = i;
        }
    }

    let start = best_line.saturating_sub(2);
    let end = (best_line + 3).min(lines.len());
    let mut snippet = String::new();
    for (i, line) in lines.iter().enumerate().take(end).skip(start) {
        if i == best_line {
            snippet.push_str(">>> ");
        } else {
            snippet.push_str("    ");
        }
        snippet.push_str(line.trim());
        snippet.push('\n');
    }
    snippet.trim_end().to_string()
}
