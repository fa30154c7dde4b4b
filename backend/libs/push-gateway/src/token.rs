use crate::error::GatewayError;

/// APNs device tokens are 32 bytes rendered as hex
pub const DEVICE_TOKEN_LEN: usize = 64;

const MASK_PREFIX_LEN: usize = 8;

/// Validate device token format (`^[a-fA-F0-9]{64}$`)
pub fn validate_device_token(device_token: &str) -> Result<(), GatewayError> {
    if device_token.len() != DEVICE_TOKEN_LEN {
        return Err(GatewayError::InvalidToken(format!(
            "expected {} chars, got {}",
            DEVICE_TOKEN_LEN,
            device_token.len()
        )));
    }

    if !device_token.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(GatewayError::InvalidToken(
            "token must be hexadecimal".to_string(),
        ));
    }

    Ok(())
}

/// Canonical stored form of a token: trimmed, lowercase hex
pub fn normalize_device_token(device_token: &str) -> String {
    device_token.trim().to_ascii_lowercase()
}

/// Render a token for logs: the first 8 characters followed by an ellipsis.
pub fn mask_token(device_token: &str) -> String {
    let prefix: String = device_token.chars().take(MASK_PREFIX_LEN).collect();
    format!("{}...", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "0123456789abcdef0123456789ABCDEF0123456789abcdef0123456789abcdef";

    #[test]
    fn test_valid_token_format() {
        assert!(validate_device_token(VALID).is_ok());
    }

    #[test]
    fn test_invalid_token_too_short() {
        let err = validate_device_token("0123456789abcdef").unwrap_err();
        assert!(matches!(err, GatewayError::InvalidToken(_)));
    }

    #[test]
    fn test_invalid_token_non_hex() {
        let token = "z".repeat(DEVICE_TOKEN_LEN);
        assert!(validate_device_token(&token).is_err());
    }

    #[test]
    fn test_mask_token_hides_tail() {
        let masked = mask_token(VALID);
        assert_eq!(masked, "01234567...");
        assert!(!masked.contains("abcdef0123"));
    }

    #[test]
    fn test_mask_short_token() {
        assert_eq!(mask_token("abc"), "abc...");
    }

    #[test]
    fn test_normalize_folds_case_and_whitespace() {
        let normalized = normalize_device_token(&format!(" {} ", VALID));
        assert_eq!(normalized, VALID.to_ascii_lowercase());
        assert!(validate_device_token(&normalized).is_ok());
    }
}
