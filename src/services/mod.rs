/// OpenAPI documentation generation.
pub mod documentation;
/// Evaluation coordinator: claim, scoring call and rating update.
pub mod evaluation;
/// Health check service.
pub mod health_service;
/// Topic-based pairing of waiting users.
pub mod matchmaker;
/// Elo rating arithmetic.
pub mod rating;
/// Scoring contract and rubric.
pub mod scoring;
/// Language-model scoring backend.
#[cfg(feature = "llm-scoring")]
pub mod scoring_http;
/// Session timer, messages and leave.
pub mod session_service;
/// Server-Sent Events forwarding from the store change feed.
pub mod sse_service;
/// Storage connection supervisor with degraded-mode fallback.
pub mod storage_supervisor;
/// Profiles and rankings.
pub mod user_service;
