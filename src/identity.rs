//! Caller identity handed to every core operation.

use crate::error::ServiceError;

/// Longest accepted display name.
pub const MAX_DISPLAY_NAME_CHARS: usize = 64;

/// Authenticated caller, as asserted by the upstream authentication proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id.
    pub user_id: String,
    /// Display name, falling back to the user id when the proxy sends none.
    pub display_name: String,
}

impl Identity {
    /// Validate and normalise raw identity values.
    pub fn new(user_id: &str, display_name: Option<&str>) -> Result<Self, ServiceError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ServiceError::Unauthenticated("missing user id".into()));
        }
        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(user_id);

        Ok(Self {
            user_id: user_id.to_owned(),
            display_name: display_name.chars().take(MAX_DISPLAY_NAME_CHARS).collect(),
        })
    }
}
