//! Credential parsing for the Substreams endpoint.
//!
//! Two credential shapes are accepted:
//! - a JWT (`header.payload.signature`) sent as a bearer token
//! - an API key, sent as `x-api-key`
//!
//! Legacy `server_…` keys used to be exchanged for a JWT at startup; that
//! exchange no longer exists, so they are rejected before any connection.

use serde::{Deserialize, Serialize};

use crate::error::SinkError;

const LEGACY_KEY_PREFIX: &str = "server_";

/// A validated endpoint credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Credential {
    /// JSON Web Token, sent as `authorization: Bearer <jwt>`.
    Jwt(String),
    /// API key, sent as `x-api-key: <key>`.
    ApiKey(String),
}

impl Credential {
    /// Classify and validate a raw credential string.
    pub fn parse(raw: &str) -> Result<Self, SinkError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SinkError::Authorization("credential is empty".into()));
        }
        if raw.starts_with(LEGACY_KEY_PREFIX) {
            return Err(SinkError::Authorization(
                "legacy 'server_' keys are no longer accepted, use an API key or a JWT".into(),
            ));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(SinkError::Authorization(
                "credential contains whitespace or control characters".into(),
            ));
        }

        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() == 3 {
            if segments.iter().any(|s| s.is_empty()) {
                return Err(SinkError::Authorization("malformed JWT: empty segment".into()));
            }
            return Ok(Self::Jwt(raw.to_string()));
        }
        Ok(Self::ApiKey(raw.to_string()))
    }

    /// Header name/value pair to attach to stream requests.
    pub fn header(&self) -> (&'static str, String) {
        match self {
            Self::Jwt(token) => ("authorization", format!("Bearer {token}")),
            Self::ApiKey(key) => ("x-api-key", key.clone()),
        }
    }

    pub fn secret(&self) -> &str {
        match self {
            Self::Jwt(s) | Self::ApiKey(s) => s,
        }
    }
}

// Never print the secret itself.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jwt(_) => f.write_str("Credential::Jwt(***)"),
            Self::ApiKey(_) => f.write_str("Credential::ApiKey(***)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_is_sent_as_bearer() {
        let cred = Credential::parse("eyJhbGciOi.eyJzdWIiOi.c2lnbmF0dXJl").unwrap();
        assert!(matches!(cred, Credential::Jwt(_)));
        let (name, value) = cred.header();
        assert_eq!(name, "authorization");
        assert_eq!(value, "Bearer eyJhbGciOi.eyJzdWIiOi.c2lnbmF0dXJl");
    }

    #[test]
    fn api_key_is_sent_as_header() {
        let key = "a".repeat(48);
        let cred = Credential::parse(&key).unwrap();
        assert_eq!(cred.header(), ("x-api-key", key));
    }

    #[test]
    fn legacy_server_key_is_rejected() {
        let err = Credential::parse("server_0123456789abcdef").unwrap_err();
        assert!(err.is_startup());
        assert!(err.to_string().contains("legacy"));
    }

    #[test]
    fn malformed_credentials_are_rejected() {
        assert!(Credential::parse("   ").is_err());
        assert!(Credential::parse("two words").is_err());
        assert!(Credential::parse("a..c").is_err());
    }

    #[test]
    fn debug_hides_secret() {
        let cred = Credential::parse("supersecretkey").unwrap();
        assert!(!format!("{cred:?}").contains("supersecret"));
    }
}
