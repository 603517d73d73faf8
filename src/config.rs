//! Application-level configuration loading: debate timing, rating, evaluation and store tuning.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationSeconds, serde_as};
use tracing::{info, warn};

use crate::{dao::store::transaction::RetryPolicy, services::scoring::ScoringRubric};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "DEBATE_BACK_CONFIG_PATH";

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Debate timer and message limits.
    pub debate: DebateSettings,
    /// Elo parameters.
    pub rating: RatingSettings,
    /// Evaluation coordinator tuning.
    pub evaluation: EvaluationSettings,
    /// Rubric used to weigh scores.
    pub scoring: ScoringRubric,
    /// Document store tuning.
    pub store: StoreSettings,
}

/// Debate timer and message limits.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DebateSettings {
    /// Length of the debate, counted from the session start time.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "duration_secs")]
    pub duration: Duration,
    /// Character budget of each participant over all their debate messages.
    pub max_debate_chars: usize,
    /// Longest accepted side-chat message.
    pub max_meta_chars: usize,
    /// Longest accepted topic.
    pub max_topic_chars: usize,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(300),
            max_debate_chars: 1000,
            max_meta_chars: 500,
            max_topic_chars: 300,
        }
    }
}

/// Elo parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RatingSettings {
    /// Rating given to new users.
    pub initial: i32,
    /// Maximum rating change per game.
    pub k_factor: f64,
    /// Upper bound of the rankings listing.
    pub max_rankings: usize,
}

impl Default for RatingSettings {
    fn default() -> Self {
        Self {
            initial: 1500,
            k_factor: 32.0,
            max_rankings: 100,
        }
    }
}

/// Who may run the evaluation once the debate is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolicy {
    /// Any participant; the claim keeps it exactly-once.
    #[default]
    AnyParticipant,
    /// Only the author of the last debate message.
    LastSpeaker,
}

/// Evaluation coordinator tuning.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    /// Election policy layered on top of the claim.
    pub trigger_policy: TriggerPolicy,
    /// How long a claim stays valid before another participant may take over.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "claim_lease_secs")]
    pub claim_lease: Duration,
    /// Outer timeout of the scoring call.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "scoring_timeout_secs")]
    pub scoring_timeout: Duration,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            trigger_policy: TriggerPolicy::AnyParticipant,
            claim_lease: Duration::from_secs(600),
            scoring_timeout: Duration::from_secs(540),
        }
    }
}

/// Document store tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Backoff for conflicting transactions.
    pub retry: RetryPolicy,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        duration_secs = config.debate.duration.as_secs(),
                        categories = config.scoring.categories.len(),
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent keys keep their defaults.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
