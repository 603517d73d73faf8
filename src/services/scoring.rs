//! Scoring contract between the evaluation coordinator and the text-generation backend.

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::Position;

/// One weighted rubric category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringCategory {
    /// Machine key used in scoring payloads.
    pub key: String,
    /// Label shown in scorecards.
    pub label: String,
    /// Multiplier applied to the raw score.
    pub weight: u32,
}

impl ScoringCategory {
    fn new(key: &str, label: &str, weight: u32) -> Self {
        Self {
            key: key.to_owned(),
            label: label.to_owned(),
            weight,
        }
    }
}

/// Categories and score range used to grade a debater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringRubric {
    /// Highest raw score of a category.
    pub max_category_score: u32,
    /// Ordered categories.
    pub categories: Vec<ScoringCategory>,
}

impl Default for ScoringRubric {
    fn default() -> Self {
        Self {
            max_category_score: 5,
            categories: vec![
                ScoringCategory::new("logic", "Logical consistency", 3),
                ScoringCategory::new("evidence", "Use of evidence", 3),
                ScoringCategory::new("rebuttal", "Rebuttal", 2),
                ScoringCategory::new("clarity", "Clarity", 2),
                ScoringCategory::new("expression", "Expression", 1),
                ScoringCategory::new("manners", "Manners", 1),
            ],
        }
    }
}

impl ScoringRubric {
    /// Best achievable weighted total (60 with the default rubric).
    pub fn max_total(&self) -> u32 {
        self.categories
            .iter()
            .map(|category| category.weight * self.max_category_score)
            .sum()
    }

    /// Weighted total of one scorecard. Missing categories count as zero and
    /// raw scores are capped at `max_category_score`.
    pub fn weighted_total(&self, scores: &CategoryScores) -> u32 {
        self.categories
            .iter()
            .map(|category| {
                let raw = scores
                    .get(&category.key)
                    .map_or(0, |score| score.score.min(self.max_category_score));
                raw * category.weight
            })
            .sum()
    }
}

/// Raw score of one category with the transcript excerpt that justified it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScore {
    /// Raw score in `0..=max_category_score`.
    pub score: u32,
    /// Supporting excerpt, if the scorer gave one.
    #[serde(default)]
    pub evidence: Option<String>,
}

/// Category key to score, in rubric order.
pub type CategoryScores = IndexMap<String, CategoryScore>;

/// Scorecard of one debater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebaterScore {
    /// Debater user id.
    pub user_id: String,
    /// Per-category scores.
    pub categories: CategoryScores,
}

/// Complete scoring result for a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScoreSheet {
    /// One scorecard per debater.
    pub debaters: Vec<DebaterScore>,
}

impl ScoreSheet {
    /// Scorecard of `user_id`.
    pub fn for_user(&self, user_id: &str) -> Option<&DebaterScore> {
        self.debaters.iter().find(|debater| debater.user_id == user_id)
    }
}

/// Debater as presented to the scorer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebaterRef {
    /// User id the scorecard must be attributed to.
    pub user_id: String,
    /// Display name used in the transcript.
    pub name: String,
    /// Role in the debate.
    pub position: Position,
}

/// Input of one scoring call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    /// Session being evaluated.
    pub session_id: Uuid,
    /// Debate topic.
    pub topic: String,
    /// Formatted transcript, one line per debate message.
    pub transcript: String,
    /// Display name of the participant that triggered the evaluation.
    pub self_name: String,
    /// User id of the other participant.
    pub opponent_id: String,
    /// Both debaters, proponent first.
    pub debaters: [DebaterRef; 2],
}

/// Failure of the scoring backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoringError {
    /// Network error, timeout, rate limit or unusable model output; worth retrying.
    #[error("scoring temporarily failed: {0}")]
    Transient(String),
    /// The request itself was rejected; retrying will not help.
    #[error("scoring rejected the request: {0}")]
    Validation(String),
}

impl ScoringError {
    /// Whether the caller may try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScoringError::Transient(_))
    }
}

/// Text-generation backend grading a debate transcript.
pub trait ScoringService: Send + Sync {
    /// Grade both debaters of a transcript.
    fn evaluate(&self, request: EvaluationRequest)
    -> BoxFuture<'static, Result<ScoreSheet, ScoringError>>;
}

/// Placeholder used when no scoring endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredScoring;

impl ScoringService for UnconfiguredScoring {
    fn evaluate(
        &self,
        _request: EvaluationRequest,
    ) -> BoxFuture<'static, Result<ScoreSheet, ScoringError>> {
        Box::pin(async { Err(ScoringError::Transient("no scoring backend configured".into())) })
    }
}
