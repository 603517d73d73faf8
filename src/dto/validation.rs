//! Validation helpers for DTOs.

use validator::ValidationError;

/// Accepts an empty string (clears the avatar) or an `http(s)` URL without whitespace.
pub fn validate_avatar_url(url: &str) -> Result<(), ValidationError> {
    let url = url.trim();
    if url.is_empty() {
        return Ok(());
    }

    let has_scheme = url.starts_with("https://") || url.starts_with("http://");
    if !has_scheme || url.chars().any(char::is_whitespace) {
        let mut err = ValidationError::new("avatar_url_format");
        err.message = Some("Avatar URL must be an http(s) URL".into());
        return Err(err);
    }

    Ok(())
}

/// Rejects strings that are empty once trimmed.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Value must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_url_accepts_http_and_empty() {
        assert!(validate_avatar_url("").is_ok());
        assert!(validate_avatar_url("https://cdn.example.org/a.png").is_ok());
        assert!(validate_avatar_url("http://localhost/a.png").is_ok());
    }

    #[test]
    fn avatar_url_rejects_other_values() {
        assert!(validate_avatar_url("ftp://example.org/a.png").is_err());
        assert!(validate_avatar_url("javascript:alert(1)").is_err());
        assert!(validate_avatar_url("https://example.org/a b.png").is_err());
    }

    #[test]
    fn blank_values_are_rejected() {
        assert!(validate_not_blank("  \t").is_err());
        assert!(validate_not_blank(" x ").is_ok());
    }
}
