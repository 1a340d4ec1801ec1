
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::RelevanceScoringConfig;
use crate::vector::{Metadata, VectorSearchResult, store::now_millis};

/// Metadata key the per-component breakdown is written under
pub const RELEVANCE_SCORES_KEY: &str = "relevanceScores";

const MAX_AGE_MS: f64 = 365.0 * 24.0 * 60.0 * 60.0 * 1000.0;
const DEFAULT_RECENCY_SCORE: f32 = 0.5;
const BASE_METADATA_SCORE: f32 = 0.5;
const METADATA_MATCH_BONUS: f32 = 0.2;
const METADATA_TYPE_BONUS: f32 = 0.1;

/// Component scores behind one re-ranked result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub similarity: f32,
    pub recency: f32,
    pub metadata: f32,
    #[serde(rename = "final")]
    pub final_score: f32,
}

/// Re-ranks search results by a weighted blend of similarity, recency and
/// metadata signals
#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceScorer {
    config: RelevanceScoringConfig,
}

impl RelevanceScorer {
    #[inline]
    pub fn new(config: RelevanceScoringConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &RelevanceScoringConfig {
        &self.config
    }

    /// Re-rank `results` for `query` at the current time
    #[inline]
    pub fn score_results(
        &self,
        results: Vec<VectorSearchResult>,
        query: &str,
    ) -> Vec<VectorSearchResult> {
        self.score_results_at(results, query, now_millis())
    }

    /// Re-rank against an explicit clock.
    ///
    /// When disabled the input is returned untouched. Otherwise `similarity`
    /// is replaced by the weighted score and results are re-sorted descending;
    /// results carrying metadata get the breakdown under [`RELEVANCE_SCORES_KEY`].
    #[inline]
    pub fn score_results_at(
        &self,
        mut results: Vec<VectorSearchResult>,
        query: &str,
        now_ms: i64,
    ) -> Vec<VectorSearchResult> {
        if !self.config.enabled {
            return results;
        }

        let weights = self.config.weights;
        for result in &mut results {
            let similarity = result.similarity;
            let recency = recency_score(result.document.timestamp, now_ms);
            let metadata = metadata_score(result.document.metadata.as_ref(), query);
            let final_score = similarity * weights.similarity
                + recency * weights.recency
                + metadata * weights.metadata;

            result.similarity = final_score;

            if let Some(map) = result.document.metadata.as_mut() {
                map.insert(
                    RELEVANCE_SCORES_KEY.to_string(),
                    json!({
                        "similarity": similarity,
                        "recency": recency,
                        "metadata": metadata,
                        "final": final_score,
                    }),
                );
            }
        }

        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results
    }
}

/// `exp(-age / (max_age / 3))` with a one-year `max_age`; 0.5 without a timestamp
#[inline]
pub fn recency_score(timestamp: Option<i64>, now_ms: i64) -> f32 {
    let Some(timestamp) = timestamp else {
        return DEFAULT_RECENCY_SCORE;
    };

    let age = now_ms.saturating_sub(timestamp).max(0) as f64;
    (-age / (MAX_AGE_MS / 3.0)).exp() as f32
}

/// 0.5 base, +0.2 per value containing the query (case-insensitive), +0.1 for
/// `definition`/`reference` types, clamped to 1.0
#[inline]
pub fn metadata_score(metadata: Option<&Metadata>, query: &str) -> f32 {
    let Some(metadata) = metadata else {
        return BASE_METADATA_SCORE;
    };

    let needle = query.trim().to_lowercase();
    let mut score = BASE_METADATA_SCORE;

    if !needle.is_empty() {
        let matches = metadata
            .iter()
            .filter(|(key, _)| key.as_str() != RELEVANCE_SCORES_KEY)
            .filter(|(_, value)| value_text(value).contains(&needle))
            .count();
        score += METADATA_MATCH_BONUS * matches as f32;
    }

    if matches!(
        metadata.get("type").and_then(Value::as_str),
        Some("definition" | "reference")
    ) {
        score += METADATA_TYPE_BONUS;
    }

    score.min(1.0)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.to_lowercase(),
        other => other.to_string().to_lowercase(),
    }
}
