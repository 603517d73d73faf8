use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::session::{
        EvaluationResponse, LeaveResponse, MessageSummary, RemainingTimeResponse,
        SessionSummary, SubmitMessageRequest,
    },
    error::AppError,
    identity::Identity,
    services::{evaluation, session_service},
    state::SharedState,
};

/// Participant view of a session.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(
        ("x-user-id" = String, Header, description = "Authenticated user id"),
        ("id" = Uuid, Path, description = "Session id")
    ),
    responses(
        (status = 200, description = "Session", body = SessionSummary),
        (status = 403, description = "Caller is not a participant"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSummary>, AppError> {
    let view = session_service::get_session(&state, &identity, id).await?;
    Ok(Json(view.into()))
}

/// Remaining debate time according to the server clock.
#[utoipa::path(
    get,
    path = "/sessions/{id}/remaining",
    tag = "sessions",
    params(
        ("x-user-id" = String, Header, description = "Authenticated user id"),
        ("id" = Uuid, Path, description = "Session id")
    ),
    responses((status = 200, description = "Timer snapshot", body = RemainingTimeResponse))
)]
pub async fn remaining_time(
    State(state): State<SharedState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<RemainingTimeResponse>, AppError> {
    let timer = session_service::get_remaining_time(&state, &identity, id).await?;
    Ok(Json(timer.into()))
}

/// Leave a session; repeating the call is a no-op.
#[utoipa::path(
    post,
    path = "/sessions/{id}/leave",
    tag = "sessions",
    params(
        ("x-user-id" = String, Header, description = "Authenticated user id"),
        ("id" = Uuid, Path, description = "Session id")
    ),
    responses((status = 200, description = "Left", body = LeaveResponse))
)]
pub async fn leave_session(
    State(state): State<SharedState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<LeaveResponse>, AppError> {
    let outcome = session_service::leave_session(&state, &identity, id).await?;
    Ok(Json(outcome.into()))
}

/// Session log in store order.
#[utoipa::path(
    get,
    path = "/sessions/{id}/messages",
    tag = "sessions",
    params(
        ("x-user-id" = String, Header, description = "Authenticated user id"),
        ("id" = Uuid, Path, description = "Session id")
    ),
    responses((status = 200, description = "Messages", body = [MessageSummary]))
)]
pub async fn list_messages(
    State(state): State<SharedState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<MessageSummary>>, AppError> {
    let messages = session_service::list_messages(&state, &identity, id).await?;
    Ok(Json(messages.into_iter().map(MessageSummary::from).collect()))
}

/// Post a debate or side-chat message.
#[utoipa::path(
    post,
    path = "/sessions/{id}/messages",
    tag = "sessions",
    params(
        ("x-user-id" = String, Header, description = "Authenticated user id"),
        ("id" = Uuid, Path, description = "Session id")
    ),
    request_body = SubmitMessageRequest,
    responses(
        (status = 200, description = "Stored message", body = MessageSummary),
        (status = 400, description = "Empty text, too long or budget exceeded"),
        (status = 409, description = "Debate closed")
    )
)]
pub async fn submit_message(
    State(state): State<SharedState>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SubmitMessageRequest>>,
) -> Result<Json<MessageSummary>, AppError> {
    let message = session_service::submit_message(&state, &identity, id, payload.into()).await?;
    Ok(Json(message.into()))
}

/// Score the finished debate and update both ratings.
///
/// The scoring call can take minutes; no shorter timeout is applied here.
#[utoipa::path(
    post,
    path = "/sessions/{id}/evaluate",
    tag = "sessions",
    params(
        ("x-user-id" = String, Header, description = "Authenticated user id"),
        ("id" = Uuid, Path, description = "Session id")
    ),
    responses(
        (status = 200, description = "Evaluation outcome", body = EvaluationResponse),
        (status = 409, description = "Debate still running"),
        (status = 502, description = "Scoring backend rejected the request"),
        (status = 503, description = "Scoring backend temporarily failed; retry later")
    )
)]
pub async fn evaluate(
    State(state): State<SharedState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<EvaluationResponse>, AppError> {
    let outcome = evaluation::trigger_evaluation(&state, &identity, id).await?;
    Ok(Json(outcome.into()))
}

/// Configure the session routes.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/remaining", get(remaining_time))
        .route("/sessions/{id}/leave", post(leave_session))
        .route("/sessions/{id}/messages", get(list_messages).post(submit_message))
        .route("/sessions/{id}/evaluate", post(evaluate))
}
