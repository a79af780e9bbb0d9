//! Query classification.
//!
//! A pure function from a query string to a [`QueryProfile`]: extracted
//! terms, a detected query shape, a bounded complexity score, and a
//! recommended search strategy. No side effects, no failure modes: empty
//! input yields a well-formed empty profile.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Detected shape of a query, by ordered pattern precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// Imperative natural-language phrasing ("find all handlers that...").
    NaturalLanguage,
    /// Method-call shape: `identifier(args)`.
    Method,
    /// Capitalized type name combined with a class/interface keyword.
    Class,
    /// Annotation marker: `@Word`.
    Annotation,
    /// Dotted package/module path.
    PackagePath,
    /// Error and exception vocabulary.
    Error,
    /// Configuration vocabulary.
    Config,
    /// Test vocabulary.
    Test,
    Generic,
}

/// Which search channel the classifier expects to perform best.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyHint {
    VectorPreferred,
    LexicalPreferred,
    HybridBalanced,
}

/// Classification output. Derived, stateless, recomputed per query.
#[derive(Debug, Clone)]
pub struct QueryProfile {
    pub original_query: String,
    pub terms: Vec<String>,
    pub query_type: QueryType,
    /// In `[0, 1]`; used only to bias strategy choice, never for ranking.
    pub complexity: f64,
    pub strategy: StrategyHint,
}

const NATURAL_LANGUAGE_PREFIXES: &[&str] =
    &["find", "show", "get", "search", "list", "where", "how", "what"];

const STOP_WORDS: &[&str] = &[
    "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "from", "is",
    "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will", "would",
    "could", "should", "may", "might", "can", "this", "that", "these", "those", "i", "you", "he",
    "she", "it", "we", "they",
];

const CODE_KEYWORDS: &[&str] = &[
    "class", "interface", "struct", "trait", "enum", "method", "function", "variable", "field",
    "constructor", "public", "private", "protected", "static", "final", "abstract", "return",
    "throw", "catch", "try", "impl", "async",
];

const FRAMEWORK_KEYWORDS: &[&str] = &[
    "spring", "hibernate", "junit", "flask", "django", "express", "axum", "tokio", "controller",
    "service", "repository", "component", "autowired", "bean", "entity", "route", "endpoint",
    "middleware", "handler", "mock",
];

fn method_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\w+\s*\([^)]*\)").unwrap())
}

fn class_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b[A-Z][a-zA-Z0-9]*\b").unwrap())
}

fn annotation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"@\w+").unwrap())
}

fn package_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\w+(\.\w+)+\b").unwrap())
}

/// Classify a query. Pure and total.
pub fn classify(query: &str) -> QueryProfile {
    let terms = extract_terms(query);
    let query_type = detect_query_type(query);
    let complexity = complexity_score(query, &terms, query_type);
    let strategy = recommend_strategy(query_type, complexity);

    QueryProfile {
        original_query: query.to_string(),
        terms,
        query_type,
        complexity,
        strategy,
    }
}

/// Whitespace/punctuation-delimited terms, lowercased, stop words and
/// short tokens dropped, first occurrence order preserved.
pub fn extract_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .split(|c: char| c.is_whitespace() || ",;.!?()[]{}\"'".contains(c))
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() > 2)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn detect_query_type(query: &str) -> QueryType {
    let lower = query.to_lowercase();

    if NATURAL_LANGUAGE_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return QueryType::NaturalLanguage;
    }
    if method_pattern().is_match(query) {
        return QueryType::Method;
    }
    if class_token_pattern().is_match(query)
        && (lower.contains("class") || lower.contains("interface"))
    {
        return QueryType::Class;
    }
    if annotation_pattern().is_match(query) {
        return QueryType::Annotation;
    }
    if package_pattern().is_match(query) {
        return QueryType::PackagePath;
    }
    if lower.contains("error") || lower.contains("exception") || lower.contains("panic") {
        return QueryType::Error;
    }
    if lower.contains("config") || lower.contains("properties") || lower.contains("setting") {
        return QueryType::Config;
    }
    if lower.contains("test") || lower.contains("mock") || lower.contains("assert") {
        return QueryType::Test;
    }
    QueryType::Generic
}

fn complexity_score(query: &str, terms: &[String], query_type: QueryType) -> f64 {
    let lower = query.to_lowercase();
    let mut score = (terms.len() as f64 * 0.05).min(0.3);

    if query_type == QueryType::NaturalLanguage {
        score += 0.4;
    }

    let code_hits = lower
        .split_whitespace()
        .filter(|w| CODE_KEYWORDS.contains(w))
        .count();
    let framework_hits = lower
        .split_whitespace()
        .filter(|w| FRAMEWORK_KEYWORDS.contains(w))
        .count();
    score += code_hits as f64 * 0.1;
    score += framework_hits as f64 * 0.15;

    if method_pattern().is_match(query) {
        score += 0.2;
    }
    if class_token_pattern().is_match(query) {
        score += 0.15;
    }
    if annotation_pattern().is_match(query) {
        score += 0.1;
    }
    if package_pattern().is_match(query) {
        score += 0.1;
    }

    score.min(1.0)
}

fn recommend_strategy(query_type: QueryType, complexity: f64) -> StrategyHint {
    // Semantic phrasing benefits from embeddings; exact code shapes are
    // better served by literal matching.
    if query_type == QueryType::NaturalLanguage || complexity > 0.7 {
        return StrategyHint::VectorPreferred;
    }
    if query_type == QueryType::Method || query_type == QueryType::Annotation {
        return StrategyHint::LexicalPreferred;
    }
    StrategyHint::HybridBalanced
}
