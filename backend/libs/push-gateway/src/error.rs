use thiserror::Error;

/// Push Gateway Error Types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Invalid device token: {0}")]
    InvalidToken(String),

    #[error("Push rejected by provider (status {status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Push transport failure: {0}")]
    Transport(String),

    #[error("Push gateway configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// True when the provider reports that the token itself is unusable
    /// (malformed, unregistered, or bound to another topic).
    pub fn is_invalid_token(&self) -> bool {
        match self {
            GatewayError::InvalidToken(_) => true,
            GatewayError::Rejected { status, reason } => {
                *status == 410 || (*status == 400 && is_token_reason(reason))
            }
            _ => false,
        }
    }
}

fn is_token_reason(reason: &str) -> bool {
    let lower = reason.to_lowercase();
    lower.contains("baddevicetoken")
        || lower.contains("unregistered")
        || lower.contains("devicetokennotfortopic")
        || lower.contains("expiredtoken")
}

impl From<GatewayError> for String {
    fn from(err: GatewayError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_token_classification() {
        assert!(GatewayError::InvalidToken("abc".into()).is_invalid_token());
        assert!(GatewayError::Rejected {
            status: 410,
            reason: "Unregistered".into()
        }
        .is_invalid_token());
        assert!(GatewayError::Rejected {
            status: 400,
            reason: "BadDeviceToken".into()
        }
        .is_invalid_token());
    }

    #[test]
    fn test_transient_errors_are_not_token_errors() {
        assert!(!GatewayError::Transport("connection reset".into()).is_invalid_token());
        assert!(!GatewayError::Rejected {
            status: 400,
            reason: "PayloadTooLarge".into()
        }
        .is_invalid_token());
        assert!(!GatewayError::Rejected {
            status: 503,
            reason: "ServiceUnavailable".into()
        }
        .is_invalid_token());
    }
}
