//! Result merging and re-ranking.
//!
//! Joins vector-origin and lexical-origin result lists on normalized file
//! path, scores the combined set with a fixed weighting, and runs an
//! optional diversity pass over the top of the ranking. Corroborated
//! results (both channels agree) outrank uncorroborated ones at equal raw
//! score, and the final ordering is deterministic.

use std::collections::{HashMap, HashSet};

use crate::lexical::file_type_importance;
use crate::models::{normalize_path, SearchResult, SourceKind};

const VECTOR_WEIGHT: f64 = 0.6;
const LEXICAL_WEIGHT: f64 = 0.4;
const DUAL_MATCH_BONUS: f64 = 0.2;
const VECTOR_ONLY_FACTOR: f64 = 0.8;
const LEXICAL_ONLY_FACTOR: f64 = 0.9;
const ALIGNMENT_WEIGHT: f64 = 0.15;
const FILE_TYPE_WEIGHT: f64 = 0.1;

/// Per-rank decay applied to each channel before the join; vector lists
/// decay faster than lexical ones.
const VECTOR_POSITION_STEP: f64 = 0.1;
const LEXICAL_POSITION_STEP: f64 = 0.05;

/// Below this many results the diversity pass is skipped entirely.
const DIVERSITY_THRESHOLD: usize = 10;
/// Results guaranteed to keep their rank in the diversity pass.
const DIVERSITY_TOP_K: usize = 5;
/// Size of the diversity-favored window.
const DIVERSITY_WINDOW: usize = 20;
/// Total output cap after the fill pass.
const DIVERSITY_MAX: usize = 25;

struct CombinedResult {
    vector: Option<SearchResult>,
    lexical: Option<SearchResult>,
    vector_score: f64,
    lexical_score: f64,
}

/// Merge two channel result lists into one ranked, diversified list.
pub fn merge_and_rank(
    query: &str,
    vector_results: Vec<SearchResult>,
    lexical_results: Vec<SearchResult>,
) -> Vec<SearchResult> {
    let mut combined: HashMap<String, CombinedResult> = HashMap::new();

    // Channels are min-max normalized before combining so weights mean
    // the same thing regardless of each engine's raw score calibration.
    let vector_norm = normalized_scores(&vector_results);
    for (i, result) in vector_results.into_iter().enumerate() {
        let key = normalize_path(&result.file_path);
        let decayed = vector_norm[i] * (1.0 - i as f64 * VECTOR_POSITION_STEP).max(0.0);
        let entry = combined.entry(key).or_insert_with(empty_combined);
        entry.vector_score = decayed;
        entry.vector = Some(result);
    }

    let lexical_norm = normalized_scores(&lexical_results);
    for (i, result) in lexical_results.into_iter().enumerate() {
        let key = normalize_path(&result.file_path);
        let decayed = lexical_norm[i] * (1.0 - i as f64 * LEXICAL_POSITION_STEP).max(0.0);
        let entry = combined.entry(key).or_insert_with(empty_combined);
        entry.lexical_score = decayed;
        entry.lexical = Some(result);
    }

    let mut merged: Vec<SearchResult> = combined
        .into_values()
        .map(|entry| finalize(entry, query))
        .collect();

    merged.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.file_path.cmp(&b.file_path))
    });

    diversity_rerank(merged)
}

fn empty_combined() -> CombinedResult {
    CombinedResult {
        vector: None,
        lexical: None,
        vector_score: 0.0,
        lexical_score: 0.0,
    }
}

fn finalize(entry: CombinedResult, query: &str) -> SearchResult {
    let vector_only = entry.vector_score * VECTOR_ONLY_FACTOR;
    let lexical_only = entry.lexical_score * LEXICAL_ONLY_FACTOR;

    let (source, base) = match (&entry.vector, &entry.lexical) {
        (Some(_), Some(_)) => {
            let blended = entry.vector_score * VECTOR_WEIGHT
                + entry.lexical_score * LEXICAL_WEIGHT
                + DUAL_MATCH_BONUS;
            // A corroborated file never scores below what either channel
            // alone would have given it.
            (SourceKind::Hybrid, blended.max(vector_only).max(lexical_only))
        }
        (Some(_), None) => (SourceKind::Vector, vector_only),
        (None, Some(_)) => (SourceKind::Lexical, lexical_only),
        (None, None) => (SourceKind::Lexical, 0.0),
    };

    // Prefer vector content (the indexed chunk) but keep the lexical
    // channel's line matches, which vector payloads do not carry.
    let content = entry
        .vector
        .as_ref()
        .map(|r| r.content.clone())
        .or_else(|| entry.lexical.as_ref().map(|r| r.content.clone()))
        .unwrap_or_default();
    let line_matches = entry
        .lexical
        .as_ref()
        .map(|r| r.line_matches.clone())
        .or_else(|| entry.vector.as_ref().map(|r| r.line_matches.clone()))
        .unwrap_or_default();
    let reference = entry
        .vector
        .as_ref()
        .or(entry.lexical.as_ref())
        .expect("combined entry has at least one source");

    let alignment = query_alignment(&content, query);
    let importance = file_type_importance(&reference.file_name);
    let score =
        (base + alignment * ALIGNMENT_WEIGHT + importance * FILE_TYPE_WEIGHT).clamp(0.0, 1.0);

    SearchResult {
        file_name: reference.file_name.clone(),
        file_path: reference.file_path.clone(),
        content,
        relevance_score: score,
        source,
        line_matches,
        metadata: reference.metadata.clone(),
    }
}

fn normalized_scores(results: &[SearchResult]) -> Vec<f64> {
    if results.is_empty() {
        return Vec::new();
    }
    let min = results
        .iter()
        .map(|r| r.relevance_score)
        .fold(f64::INFINITY, f64::min);
    let max = results
        .iter()
        .map(|r| r.relevance_score)
        .fold(f64::NEG_INFINITY, f64::max);

    results
        .iter()
        .map(|r| {
            if (max - min).abs() < f64::EPSILON {
                1.0
            } else {
                (r.relevance_score - min) / (max - min)
            }
        })
        .collect()
}

/// How well the content echoes the query: exact phrase, per-term presence,
/// and a proximity bonus when terms sit close together.
fn query_alignment(content: &str, query: &str) -> f64 {
    if content.is_empty() || query.trim().is_empty() {
        return 0.0;
    }
    let content_lower = content.to_lowercase();
    let query_lower = query.to_lowercase();
    let mut alignment = 0.0;

    if content_lower.contains(&query_lower) {
        alignment += 0.5;
    }

    let mut positions: Vec<usize> = Vec::new();
    for term in query_lower.split_whitespace() {
        if let Some(pos) = content_lower.find(term) {
            positions.push(pos);
            alignment += 0.1;
        }
    }

    if positions.len() > 1 {
        positions.sort_unstable();
        let gaps: usize = positions.windows(2).map(|w| w[1] - w[0]).sum();
        let average_gap = gaps as f64 / (positions.len() - 1) as f64;
        alignment += (0.3 - average_gap / 1000.0).max(0.0);
    }

    alignment.min(1.0)
}

/// Greedy diversity pass: the top results keep their rank outright, then
/// remaining slots favor unseen extensions and parent directories before
/// falling back to raw rank order. Never drops a guaranteed-top result,
/// never produces more results than it was given.
fn diversity_rerank(results: Vec<SearchResult>) -> Vec<SearchResult> {
    if results.len() <= DIVERSITY_THRESHOLD {
        return results;
    }

    let mut output: Vec<SearchResult> = Vec::new();
    let mut picked: HashSet<String> = HashSet::new();
    let mut seen_extensions: HashSet<String> = HashSet::new();
    let mut seen_directories: HashSet<String> = HashSet::new();

    for result in &results {
        let extension = crate::models::file_extension(&result.file_name);
        let directory = parent_directory(&result.file_path);

        let take = output.len() < DIVERSITY_TOP_K
            || !seen_extensions.contains(&extension)
            || !seen_directories.contains(&directory);
        if take {
            picked.insert(normalize_path(&result.file_path));
            seen_extensions.insert(extension);
            seen_directories.insert(directory);
            output.push(result.clone());
            if output.len() >= DIVERSITY_WINDOW {
                break;
            }
        }
    }

    for result in &results {
        if output.len() >= DIVERSITY_MAX {
            break;
        }
        if picked.insert(normalize_path(&result.file_path)) {
            output.push(result.clone());
        }
    }

    output
}

fn parent_directory(file_path: &str) -> String {
    let normalized = normalize_path(file_path);
    match normalized.rsplit_once('/') {
        Some((dir, _)) => dir.rsplit('/').next().unwrap_or(dir).to_string(),
        None => "root".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_result(path: &str, score: f64, source: SourceKind) -> SearchResult {
        let file_name = path.rsplit('/').next().unwrap_or(path).to_string();
        SearchResult {
            file_name,
            file_path: path.to_string(),
            content: format!("content of {}", path),
            relevance_score: score,
            source,
            line_matches: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn empty_inputs_merge_to_empty() {
        assert!(merge_and_rank("query", Vec::new(), Vec::new()).is_empty());
    }

    #[test]
    fn join_is_keyed_on_normalized_path() {
        let vector = vec![make_result("/repo/src/Main.java", 0.9, SourceKind::Vector)];
        let lexical = vec![make_result("\\repo\\src\\MAIN.JAVA", 0.8, SourceKind::Lexical)];

        let merged = merge_and_rank("main", vector, lexical);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, SourceKind::Hybrid);
    }

    #[test]
    fn dual_match_scores_at_least_either_source_alone() {
        let query = "billing engine";
        let vector = vec![
            make_result("/repo/Both.java", 0.9, SourceKind::Vector),
            make_result("/repo/VectorOnly.java", 0.9, SourceKind::Vector),
        ];
        let lexical = vec![
            make_result("/repo/Both.java", 0.7, SourceKind::Lexical),
            make_result("/repo/LexicalOnly.java", 0.7, SourceKind::Lexical),
        ];

        let merged = merge_and_rank(query, vector, lexical);
        let score_of = |name: &str| {
            merged
                .iter()
                .find(|r| r.file_name == name)
                .map(|r| r.relevance_score)
                .unwrap()
        };

        assert!(score_of("Both.java") >= score_of("VectorOnly.java"));
        assert!(score_of("Both.java") >= score_of("LexicalOnly.java"));
        assert_eq!(
            merged
                .iter()
                .find(|r| r.file_name == "Both.java")
                .unwrap()
                .source,
            SourceKind::Hybrid
        );
    }

    #[test]
    fn scores_are_clamped_to_unit_interval() {
        let vector: Vec<SearchResult> = (0..5)
            .map(|i| {
                make_result(
                    &format!("/repo/Controller{}.java", i),
                    5.0 - i as f64,
                    SourceKind::Vector,
                )
            })
            .collect();
        let lexical: Vec<SearchResult> = (0..5)
            .map(|i| {
                make_result(
                    &format!("/repo/Controller{}.java", i),
                    12.0 - i as f64,
                    SourceKind::Lexical,
                )
            })
            .collect();

        let merged = merge_and_rank("controller", vector, lexical);
        for result in &merged {
            assert!((0.0..=1.0).contains(&result.relevance_score));
        }
    }

    #[test]
    fn ordering_is_descending_and_deterministic() {
        let lexical = vec![
            make_result("/repo/b.java", 0.5, SourceKind::Lexical),
            make_result("/repo/a.java", 0.5, SourceKind::Lexical),
        ];
        let merged = merge_and_rank("anything", Vec::new(), lexical.clone());
        let merged_again = merge_and_rank("anything", Vec::new(), lexical);

        let order: Vec<&str> = merged.iter().map(|r| r.file_path.as_str()).collect();
        let order_again: Vec<&str> = merged_again.iter().map(|r| r.file_path.as_str()).collect();
        assert_eq!(order, order_again);
        for pair in merged.windows(2) {
            assert!(pair[0].relevance_score >= pair[1].relevance_score);
        }
    }

    #[test]
    fn alignment_rewards_phrase_and_proximity() {
        let phrase = query_alignment("the billing engine runs here", "billing engine");
        let scattered = query_alignment(
            &format!("billing {} engine", "x".repeat(900)),
            "billing engine",
        );
        assert!(phrase > scattered);

        let nothing = query_alignment("unrelated content", "billing engine");
        assert_eq!(nothing, 0.0);
    }

    #[test]
    fn small_result_sets_skip_diversity() {
        let results: Vec<SearchResult> = (0..5)
            .map(|i| make_result(&format!("/repo/f{}.java", i), 0.9, SourceKind::Lexical))
            .collect();
        let reranked = diversity_rerank(results.clone());
        assert_eq!(reranked.len(), results.len());
        let order: Vec<&str> = reranked.iter().map(|r| r.file_path.as_str()).collect();
        let expected: Vec<&str> = results.iter().map(|r| r.file_path.as_str()).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn diversity_keeps_top_results_and_never_grows() {
        // 15 results, all the same extension and directory: the head of
        // the ranking survives untouched, the tail fills by rank.
        let results: Vec<SearchResult> = (0..15)
            .map(|i| {
                make_result(
                    &format!("/repo/pkg/f{:02}.java", i),
                    1.0 - i as f64 * 0.05,
                    SourceKind::Lexical,
                )
            })
            .collect();

        let reranked = diversity_rerank(results.clone());
        assert!(reranked.len() <= results.len());
        for i in 0..DIVERSITY_TOP_K {
            assert_eq!(reranked[i].file_path, results[i].file_path);
        }
        // No duplicates.
        let unique: HashSet<&str> = reranked.iter().map(|r| r.file_path.as_str()).collect();
        assert_eq!(unique.len(), reranked.len());
    }

    #[test]
    fn diversity_favors_unseen_extensions() {
        let mut results: Vec<SearchResult> = (0..12)
            .map(|i| {
                make_result(
                    &format!("/repo/java/f{:02}.java", i),
                    1.0 - i as f64 * 0.01,
                    SourceKind::Lexical,
                )
            })
            .collect();
        results.push(make_result("/repo/docs/readme.md", 0.2, SourceKind::Lexical));

        let reranked = diversity_rerank(results);
        // The markdown file jumps ahead of same-extension stragglers.
        let md_position = reranked
            .iter()
            .position(|r| r.file_name == "readme.md")
            .unwrap();
        assert!(md_position < reranked.len() - 1);
    }
}
