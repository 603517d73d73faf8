use axum::Router;

use crate::state::SharedState;

/// Swagger UI.
pub mod docs;
/// Health check.
pub mod health;
/// Identity extraction from request headers.
pub mod identity;
/// Enqueue and rooms.
pub mod matchmaking;
/// Session reads, messages, leave and evaluation.
pub mod sessions;
/// Live update streams.
pub mod sse;
/// Profiles and rankings.
pub mod users;

/// Every REST, SSE and documentation route, bound to the shared state.
pub fn router(state: SharedState) -> Router<()> {
    Router::<SharedState>::new()
        .merge(health::router())
        .merge(matchmaking::router())
        .merge(sessions::router())
        .merge(users::router())
        .merge(sse::router())
        .merge(docs::router())
        .with_state(state)
}
