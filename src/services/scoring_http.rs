//! [`ScoringService`] backed by an OpenAI-compatible chat-completions endpoint.

use std::{env, fmt::Write as _, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::dao::models::Position;

use super::scoring::{
    CategoryScore, CategoryScores, DebaterScore, EvaluationRequest, ScoreSheet, ScoringError,
    ScoringRubric, ScoringService,
};

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Connection settings of [`HttpScoringService`].
#[derive(Debug, Clone)]
pub struct HttpScoringConfig {
    /// Full URL of the chat-completions route.
    pub endpoint: String,
    /// Bearer token, if the endpoint needs one.
    pub api_key: Option<String>,
    /// Model name sent with every request.
    pub model: String,
    /// Timeout of a single HTTP attempt.
    pub request_timeout: Duration,
    /// Pause before the single retry of a transient failure.
    pub retry_delay: Duration,
}

impl HttpScoringConfig {
    /// Read `SCORING_API_URL`, `SCORING_API_KEY` and `SCORING_MODEL`.
    ///
    /// Returns `None` when no endpoint is configured.
    pub fn from_env() -> Option<Self> {
        let endpoint = env::var("SCORING_API_URL").ok().filter(|url| !url.trim().is_empty())?;
        Some(Self {
            endpoint,
            api_key: env::var("SCORING_API_KEY").ok().filter(|key| !key.is_empty()),
            model: env::var("SCORING_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_owned()),
            request_timeout: Duration::from_secs(240),
            retry_delay: Duration::from_secs(1),
        })
    }
}

/// Scores transcripts with a language model.
#[derive(Clone)]
pub struct HttpScoringService {
    client: Client,
    config: Arc<HttpScoringConfig>,
    rubric: Arc<ScoringRubric>,
}

impl HttpScoringService {
    /// Build the HTTP client.
    pub fn new(config: HttpScoringConfig, rubric: ScoringRubric) -> Result<Self, ScoringError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| ScoringError::Validation(format!("cannot build HTTP client: {err}")))?;
        Ok(Self {
            client,
            config: Arc::new(config),
            rubric: Arc::new(rubric),
        })
    }

    async fn score(&self, request: EvaluationRequest) -> Result<ScoreSheet, ScoringError> {
        let body = json!({
            "model": self.config.model,
            "temperature": 0,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system_prompt(&self.rubric)},
                {"role": "user", "content": user_prompt(&request)},
            ],
        });

        let content = self.complete(&body).await?;
        parse_score_sheet(&content, &request, &self.rubric)
    }

    /// Send the completion request, retrying once on transient failures.
    async fn complete(&self, body: &serde_json::Value) -> Result<String, ScoringError> {
        let mut last_error = None;

        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }

            let mut builder = self.client.post(&self.config.endpoint).json(body);
            if let Some(key) = &self.config.api_key {
                builder = builder.bearer_auth(key);
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(err) => {
                    warn!(attempt, error = %err, "scoring request failed");
                    last_error = Some(ScoringError::Transient(format!("request failed: {err}")));
                    continue;
                }
            };

            let status = response.status();
            debug!(%status, attempt, "scoring response received");
            if status.is_success() {
                let completion: ChatCompletion = response.json().await.map_err(|err| {
                    ScoringError::Transient(format!("unreadable completion: {err}"))
                })?;
                return completion
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .ok_or_else(|| ScoringError::Transient("completion has no content".into()));
            }

            let text = response.text().await.unwrap_or_default();
            if is_transient(status) {
                warn!(%status, attempt, "transient scoring failure");
                last_error = Some(ScoringError::Transient(format!("endpoint returned {status}: {text}")));
                continue;
            }
            return Err(ScoringError::Validation(format!("endpoint returned {status}: {text}")));
        }

        Err(last_error.unwrap_or_else(|| ScoringError::Transient("scoring failed after retry".into())))
    }
}

impl ScoringService for HttpScoringService {
    fn evaluate(&self, request: EvaluationRequest) -> BoxFuture<'static, Result<ScoreSheet, ScoringError>> {
        let service = self.clone();
        Box::pin(async move { service.score(request).await })
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelVerdict {
    eval: std::collections::HashMap<String, std::collections::HashMap<String, ModelScore>>,
}

#[derive(Deserialize)]
struct ModelScore {
    score: f64,
    #[serde(default)]
    evidence: Option<String>,
}

fn system_prompt(rubric: &ScoringRubric) -> String {
    let mut prompt = String::from(
        "You are an impartial debate judge. Grade both debaters of the transcript on every \
         category below.\n",
    );
    for category in &rubric.categories {
        let _ = writeln!(
            prompt,
            "- \"{}\": {} (score 0-{})",
            category.key, category.label, rubric.max_category_score
        );
    }
    let _ = write!(
        prompt,
        "Answer with a JSON object of the form {{\"eval\": {{\"proponent\": {{<category>: \
         {{\"score\": <integer>, \"evidence\": <short quote>}}}}, \"opponent\": {{...}}}}}}. \
         Use the category keys exactly as listed."
    );
    prompt
}

fn user_prompt(request: &EvaluationRequest) -> String {
    let mut prompt = format!("Topic: {}\n", request.topic);
    for debater in &request.debaters {
        let _ = writeln!(prompt, "{}: {}", debater.position, debater.name);
    }
    let _ = write!(
        prompt,
        "Requested by: {}\n\nTranscript:\n{}",
        request.self_name, request.transcript
    );
    prompt
}

fn position_key(position: Position) -> &'static str {
    match position {
        Position::Proponent => "proponent",
        Position::Opponent => "opponent",
    }
}

/// Map the position-keyed verdict back to user ids.
fn parse_score_sheet(
    content: &str,
    request: &EvaluationRequest,
    rubric: &ScoringRubric,
) -> Result<ScoreSheet, ScoringError> {
    let verdict: ModelVerdict = serde_json::from_str(content)
        .map_err(|err| ScoringError::Transient(format!("model answer is not a verdict: {err}")))?;

    let mut debaters = Vec::with_capacity(request.debaters.len());
    for debater in &request.debaters {
        let key = position_key(debater.position);
        let scores = verdict
            .eval
            .get(key)
            .ok_or_else(|| ScoringError::Transient(format!("verdict lacks `{key}`")))?;

        let categories: CategoryScores = rubric
            .categories
            .iter()
            .filter_map(|category| {
                let raw = scores.get(&category.key)?;
                let score = raw.score.round().clamp(0.0, f64::from(rubric.max_category_score)) as u32;
                Some((
                    category.key.clone(),
                    CategoryScore {
                        score,
                        evidence: raw.evidence.clone().filter(|text| !text.trim().is_empty()),
                    },
                ))
            })
            .collect();

        debaters.push(DebaterScore {
            user_id: debater.user_id.clone(),
            categories,
        });
    }
    Ok(ScoreSheet { debaters })
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::services::scoring::DebaterRef;

    fn service(server: &MockServer) -> HttpScoringService {
        HttpScoringService::new(
            HttpScoringConfig {
                endpoint: format!("{}/v1/chat/completions", server.uri()),
                api_key: Some("test-key".into()),
                model: "judge".into(),
                request_timeout: Duration::from_secs(5),
                retry_delay: Duration::from_millis(10),
            },
            ScoringRubric::default(),
        )
        .unwrap()
    }

    fn request() -> EvaluationRequest {
        EvaluationRequest {
            session_id: Uuid::new_v4(),
            topic: "Remote work".into(),
            transcript: "Sam (Proponent): Fewer commutes.\nSam (Opponent): Less mentoring.".into(),
            self_name: "Sam".into(),
            opponent_id: "u2".into(),
            debaters: [
                DebaterRef {
                    user_id: "u1".into(),
                    name: "Sam".into(),
                    position: Position::Proponent,
                },
                DebaterRef {
                    user_id: "u2".into(),
                    name: "Sam".into(),
                    position: Position::Opponent,
                },
            ],
        }
    }

    fn completion(content: serde_json::Value) -> serde_json::Value {
        json!({"choices": [{"message": {"role": "assistant", "content": content.to_string()}}]})
    }

    fn verdict() -> serde_json::Value {
        json!({"eval": {
            "proponent": {"logic": {"score": 4, "evidence": "Fewer commutes."}, "manners": {"score": 9}},
            "opponent": {"logic": {"score": 2.6}, "clarity": {"score": 3, "evidence": ""}},
        }})
    }

    #[tokio::test]
    async fn maps_positions_to_user_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(verdict())))
            .expect(1)
            .mount(&server)
            .await;

        let sheet = service(&server).evaluate(request()).await.unwrap();

        let proponent = sheet.for_user("u1").unwrap();
        assert_eq!(proponent.categories["logic"].score, 4);
        assert_eq!(proponent.categories["logic"].evidence.as_deref(), Some("Fewer commutes."));
        assert_eq!(proponent.categories["manners"].score, 5);

        let opponent = sheet.for_user("u2").unwrap();
        assert_eq!(opponent.categories["logic"].score, 3);
        assert_eq!(opponent.categories["clarity"].evidence, None);
        assert!(!opponent.categories.contains_key("manners"));
    }

    #[tokio::test]
    async fn retries_once_on_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(verdict())))
            .mount(&server)
            .await;

        let sheet = service(&server).evaluate(request()).await.unwrap();
        assert_eq!(sheet.debaters.len(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_second_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let err = service(&server).evaluate(request()).await.unwrap_err();
        assert!(err.is_retryable(), "got {err:?}");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .expect(1)
            .mount(&server)
            .await;

        let err = service(&server).evaluate(request()).await.unwrap_err();
        assert_eq!(
            err,
            ScoringError::Validation("endpoint returned 400 Bad Request: bad model".into())
        );
    }

    #[tokio::test]
    async fn malformed_verdict_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion(json!({"eval": {"proponent": {}}}))),
            )
            .mount(&server)
            .await;

        let err = service(&server).evaluate(request()).await.unwrap_err();
        assert!(matches!(err, ScoringError::Transient(message) if message.contains("opponent")));
    }

    #[test]
    fn system_prompt_lists_rubric_keys() {
        let prompt = system_prompt(&ScoringRubric::default());
        for key in ["logic", "evidence", "rebuttal", "clarity", "expression", "manners"] {
            assert!(prompt.contains(&format!("\"{key}\"")), "missing {key}");
        }
    }
}
