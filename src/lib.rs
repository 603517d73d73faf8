//! Library crate for debate-back, exposing modules for binaries and integration tests.

pub mod clock;
pub mod config;
/// Persistence: entities, storage errors and document stores.
pub mod dao;
/// Request and response payloads of the HTTP and SSE surface.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
pub mod identity;
/// axum routers and handlers.
pub mod routes;
/// Matchmaking, sessions, evaluation, rating and supporting services.
pub mod services;
/// Shared application state and the evaluation phase machine.
pub mod state;
