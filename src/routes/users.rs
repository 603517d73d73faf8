use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use axum_valid::Valid;

use crate::{
    dto::user::{RankingItem, RankingsQuery, UpdateProfileRequest, UserProfile},
    error::AppError,
    identity::Identity,
    services::user_service,
    state::SharedState,
};

/// Caller's profile, created on first access.
#[utoipa::path(
    get,
    path = "/users/me",
    tag = "users",
    params(
        ("x-user-id" = String, Header, description = "Authenticated user id"),
        ("x-user-name" = Option<String>, Header, description = "Display name used when the profile is created")
    ),
    responses((status = 200, description = "Profile", body = UserProfile))
)]
pub async fn get_profile(
    State(state): State<SharedState>,
    identity: Identity,
) -> Result<Json<UserProfile>, AppError> {
    let user = user_service::get_profile(&state, &identity).await?;
    Ok(Json(user.into()))
}

/// Change the caller's display name or avatar.
#[utoipa::path(
    put,
    path = "/users/me",
    tag = "users",
    params(("x-user-id" = String, Header, description = "Authenticated user id")),
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated profile", body = UserProfile),
        (status = 400, description = "Invalid display name or avatar URL")
    )
)]
pub async fn update_profile(
    State(state): State<SharedState>,
    identity: Identity,
    Valid(Json(payload)): Valid<Json<UpdateProfileRequest>>,
) -> Result<Json<UserProfile>, AppError> {
    let user = user_service::update_profile(&state, &identity, payload.into()).await?;
    Ok(Json(user.into()))
}

/// Highest rated users.
#[utoipa::path(
    get,
    path = "/rankings",
    tag = "users",
    params(RankingsQuery),
    responses((status = 200, description = "Rankings", body = [RankingItem]))
)]
pub async fn rankings(
    State(state): State<SharedState>,
    Query(query): Query<RankingsQuery>,
) -> Result<Json<Vec<RankingItem>>, AppError> {
    let entries = user_service::rankings(&state, query.limit).await?;
    Ok(Json(entries.into_iter().map(RankingItem::from).collect()))
}

/// Configure the user routes.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/users/me", get(get_profile).put(update_profile))
        .route("/rankings", get(rankings))
}
