use serde::Serialize;
use utoipa::ToSchema;

/// Payload of the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `ok`, or `degraded` while no document store is reachable.
    pub status: String,
}

impl HealthResponse {
    /// Store installed and answering.
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }

    /// Running without a usable store; every store-backed route answers 503.
    pub fn degraded() -> Self {
        Self {
            status: "degraded".to_string(),
        }
    }
}
