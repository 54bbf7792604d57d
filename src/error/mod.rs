//! Error taxonomy for the camera client.
//!
//! | Variant | Raised by | Fatal |
//! |---------|-----------|-------|
//! | `ConfigValidation` | client construction | yes, client is never built |
//! | `CredentialExchange` | either token exchange | no, refresh is retried |
//! | `MissingCredential` | a fetch with no derived token cached | no |
//! | `NotInitialized` | one-shot calls before `init()` | no |
//! | `InvalidArgument` | `unsubscribe` with a bad kind | no |
//! | `Transport` | the HTTP collaborator | no |
//! | `InvalidResponse` | an unparseable domain API body | no |

use thiserror::Error;

use crate::auth::TokenKind;
use crate::traits::HttpError;

/// Result alias used across the crate.
pub type CamResult<T> = Result<T, CamError>;

/// Every error the client surfaces.
///
/// `Clone` because a single failed poll tick is delivered to every
/// subscriber of a channel.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CamError {
    /// Construction-time configuration problem.
    #[error("{0}")]
    ConfigValidation(String),

    /// A primary or derived token exchange failed.
    #[error("Failed to exchange {kind} token: {message}")]
    CredentialExchange { kind: TokenKind, message: String },

    /// A fetch needed the derived token but none is cached.
    #[error("No derived token is cached; the client must be initialized first.")]
    MissingCredential,

    /// A one-shot call was made before `init()` completed.
    #[error("{0}")]
    NotInitialized(String),

    /// A caller passed an unusable argument.
    #[error("{0}")]
    InvalidArgument(String),

    /// Opaque pass-through from the HTTP collaborator.
    #[error(transparent)]
    Transport(#[from] HttpError),

    /// The domain API answered with a body we could not decode.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl CamError {
    /// Short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            CamError::ConfigValidation(_) => "E_CONFIG",
            CamError::CredentialExchange { .. } => "E_CRED_EXCHANGE",
            CamError::MissingCredential => "E_CRED_MISSING",
            CamError::NotInitialized(_) => "E_NOT_INIT",
            CamError::InvalidArgument(_) => "E_ARG",
            CamError::Transport(_) => "E_TRANSPORT",
            CamError::InvalidResponse(_) => "E_RESPONSE",
        }
    }

    pub(crate) fn exchange(kind: TokenKind, message: impl Into<String>) -> Self {
        CamError::CredentialExchange {
            kind,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CamError {
    fn from(err: serde_json::Error) -> Self {
        CamError::InvalidResponse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_message_is_verbatim() {
        let err = CamError::ConfigValidation("The property: nestId is not defined.".to_string());
        assert_eq!(err.to_string(), "The property: nestId is not defined.");
        assert_eq!(err.error_code(), "E_CONFIG");
    }

    #[test]
    fn test_transport_is_transparent() {
        let err: CamError = HttpError::Timeout("30s".to_string()).into();
        assert_eq!(err.to_string(), "Request timeout: 30s");
        assert!(matches!(err, CamError::Transport(_)));
    }

    #[test]
    fn test_exchange_display_names_the_stage() {
        let err = CamError::exchange(TokenKind::Derived, "missing jwt field");
        assert_eq!(
            err.to_string(),
            "Failed to exchange derived token: missing jwt field"
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: CamError = json_err.into();
        assert!(matches!(err, CamError::InvalidResponse(_)));
    }
}
