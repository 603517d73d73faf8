use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document of the debate backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::matchmaking::enqueue,
        crate::routes::matchmaking::list_rooms,
        crate::routes::matchmaking::cancel_waiting,
        crate::routes::sessions::get_session,
        crate::routes::sessions::remaining_time,
        crate::routes::sessions::leave_session,
        crate::routes::sessions::list_messages,
        crate::routes::sessions::submit_message,
        crate::routes::sessions::evaluate,
        crate::routes::users::get_profile,
        crate::routes::users::update_profile,
        crate::routes::users::rankings,
        crate::routes::sse::user_stream,
        crate::routes::sse::session_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::common::PositionDto,
            crate::dto::common::MessageKindDto,
            crate::dto::common::SessionPhaseDto,
            crate::dto::matchmaking::EnqueueRequestDto,
            crate::dto::matchmaking::EnqueueResponse,
            crate::dto::matchmaking::RoomSummary,
            crate::dto::matchmaking::CancelWaitingResponse,
            crate::dto::session::SessionSummary,
            crate::dto::session::RemainingTimeResponse,
            crate::dto::session::LeaveResponse,
            crate::dto::session::SubmitMessageRequest,
            crate::dto::session::MessageSummary,
            crate::dto::session::EvaluationResponse,
            crate::dto::user::UserProfile,
            crate::dto::user::UpdateProfileRequest,
            crate::dto::user::RankingItem,
            crate::dto::sse::ResyncEvent,
            crate::dto::sse::SessionUpdatedEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "matchmaking", description = "Topic lobby and pairing"),
        (name = "sessions", description = "Debate sessions, messages and evaluation"),
        (name = "users", description = "Profiles and rankings"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
