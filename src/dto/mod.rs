use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Enums shared by several payloads.
pub mod common;
/// Health check payload.
pub mod health;
/// Enqueue and room payloads.
pub mod matchmaking;
/// Session, message and evaluation payloads.
pub mod session;
/// Server-sent event payloads.
pub mod sse;
/// Profile and rankings payloads.
pub mod user;
pub mod validation;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
