//! Authentication: the primary -> derived token chain.
//!
//! - [`exchange`] talks to the authorization service.
//! - [`credentials`] caches the resulting tokens and coordinates refreshes.

pub mod credentials;
pub mod exchange;

use serde::{Deserialize, Serialize};

pub use credentials::CredentialManager;
pub use exchange::{OAuthExchange, TokenExchange};

/// Which link of the credential chain a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived access token obtained from the refresh credential.
    Primary,
    /// Token derived from the primary token, sent to the camera API.
    Derived,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Primary => write!(f, "primary"),
            TokenKind::Derived => write!(f, "derived"),
        }
    }
}
