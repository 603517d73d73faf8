use axum::{
    Json, Router,
    extract::State,
    routing::{delete, get, post},
};
use axum_valid::Valid;

use crate::{
    dto::matchmaking::{CancelWaitingResponse, EnqueueRequestDto, EnqueueResponse, RoomSummary},
    error::AppError,
    identity::Identity,
    services::matchmaker,
    state::SharedState,
};

/// Pair the caller with a waiting user of the same topic, or open a room.
#[utoipa::path(
    post,
    path = "/matchmaking/enqueue",
    tag = "matchmaking",
    params(("x-user-id" = String, Header, description = "Authenticated user id")),
    request_body = EnqueueRequestDto,
    responses(
        (status = 200, description = "Matched or waiting", body = EnqueueResponse),
        (status = 400, description = "Invalid topic"),
        (status = 404, description = "Requested room not found or topic mismatch"),
        (status = 409, description = "Caller already in an active session, or too much contention")
    )
)]
pub async fn enqueue(
    State(state): State<SharedState>,
    identity: Identity,
    Valid(Json(payload)): Valid<Json<EnqueueRequestDto>>,
) -> Result<Json<EnqueueResponse>, AppError> {
    let outcome = matchmaker::enqueue(&state, &identity, payload.into()).await?;
    Ok(Json(outcome.into()))
}

/// List rooms the caller could join.
#[utoipa::path(
    get,
    path = "/rooms",
    tag = "matchmaking",
    params(("x-user-id" = String, Header, description = "Authenticated user id")),
    responses((status = 200, description = "Open rooms, oldest first", body = [RoomSummary]))
)]
pub async fn list_rooms(
    State(state): State<SharedState>,
    identity: Identity,
) -> Result<Json<Vec<RoomSummary>>, AppError> {
    let rooms = matchmaker::list_rooms(&state, &identity).await?;
    Ok(Json(rooms.into_iter().map(RoomSummary::from).collect()))
}

/// Leave the waiting list.
#[utoipa::path(
    delete,
    path = "/rooms/mine",
    tag = "matchmaking",
    params(("x-user-id" = String, Header, description = "Authenticated user id")),
    responses((status = 200, description = "Waiting entry removed (or none existed)", body = CancelWaitingResponse))
)]
pub async fn cancel_waiting(
    State(state): State<SharedState>,
    identity: Identity,
) -> Result<Json<CancelWaitingResponse>, AppError> {
    let removed = matchmaker::cancel_waiting(&state, &identity).await?;
    Ok(Json(CancelWaitingResponse { removed }))
}

/// Configure the matchmaking routes.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/matchmaking/enqueue", post(enqueue))
        .route("/rooms", get(list_rooms))
        .route("/rooms/mine", delete(cancel_waiting))
}
