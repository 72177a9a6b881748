//! Cursor token: the opaque resumption point handed out by the stream.

use serde::{Deserialize, Serialize};

/// Opaque resumption token.
///
/// The sink never looks inside a cursor: it is produced by the stream emitter
/// and persisted verbatim by a `CursorStore`. The empty token means "no
/// checkpoint", i.e. start from the configured start block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CursorToken(String);

impl CursorToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The "no checkpoint" token.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for CursorToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CursorToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for CursorToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CursorToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_means_no_checkpoint() {
        assert!(CursorToken::empty().is_empty());
        assert!(CursorToken::default().is_empty());
        assert!(!CursorToken::from("abc123").is_empty());
    }

    #[test]
    fn token_serializes_as_plain_string() {
        let token = CursorToken::new("c1:abc");
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"c1:abc\"");
    }
}
