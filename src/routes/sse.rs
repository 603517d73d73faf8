use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use uuid::Uuid;

use crate::{
    error::AppError,
    identity::Identity,
    services::sse_service::{self, StreamScope},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sse/users/me",
    tag = "sse",
    params(("x-user-id" = String, Header, description = "Authenticated user id")),
    responses((status = 200, description = "Profile, session and lobby updates", content_type = "text/event-stream", body = String))
)]
/// Stream updates of the caller's profile, their sessions and the lobby.
pub async fn user_stream(
    State(state): State<SharedState>,
    identity: Identity,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let scope = StreamScope::User(identity.user_id.clone());
    sse_service::authorize(&state, &identity, &scope).await?;
    Ok(sse_service::to_sse_stream(state, scope))
}

#[utoipa::path(
    get,
    path = "/sse/sessions/{id}",
    tag = "sse",
    params(
        ("x-user-id" = String, Header, description = "Authenticated user id"),
        ("id" = Uuid, Path, description = "Session id")
    ),
    responses((status = 200, description = "Session and message updates", content_type = "text/event-stream", body = String))
)]
/// Stream session updates and new messages to a participant.
pub async fn session_stream(
    State(state): State<SharedState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let scope = StreamScope::Session(id);
    sse_service::authorize(&state, &identity, &scope).await?;
    Ok(sse_service::to_sse_stream(state, scope))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/users/me", get(user_stream))
        .route("/sse/sessions/{id}", get(session_stream))
}
