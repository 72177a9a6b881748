//! Cursor persistence contract: restores the stream position after a restart.
//!
//! A store keeps exactly one token: the latest cursor the stream handed out.
//! On restart the supervisor reads it back and resumes from there instead of
//! re-streaming from the configured start block.

use async_trait::async_trait;

use crate::cursor::CursorToken;
use crate::error::CursorError;

/// Trait for reading and writing the resumption cursor.
///
/// Implementations include `MemoryCursorStore` (here), and `FileCursorStore` /
/// `HttpCursorStore` in `substreams-sink-cursor`.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the persisted cursor.
    ///
    /// A missing checkpoint is not an error: return `CursorToken::empty()`.
    async fn read(&self) -> Result<CursorToken, CursorError>;

    /// Overwrite the persisted cursor.
    async fn write(&self, token: &CursorToken) -> Result<(), CursorError>;

    /// Human-readable location (path or URL) for logs.
    fn location(&self) -> &str;
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::sync::Mutex;

/// In-memory cursor store for tests and ephemeral sinks.
///
/// Keeps every write so tests can assert the persisted order.
#[derive(Default)]
pub struct MemoryCursorStore {
    writes: Mutex<Vec<CursorToken>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an already persisted cursor.
    pub fn with_cursor(token: impl Into<CursorToken>) -> Self {
        Self {
            writes: Mutex::new(vec![token.into()]),
        }
    }

    /// Every token written so far, oldest first.
    pub fn history(&self) -> Vec<CursorToken> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn read(&self) -> Result<CursorToken, CursorError> {
        Ok(self.writes.lock().unwrap().last().cloned().unwrap_or_default())
    }

    async fn write(&self, token: &CursorToken) -> Result<(), CursorError> {
        self.writes.lock().unwrap().push(token.clone());
        Ok(())
    }

    fn location(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryCursorStore::new();

        // No checkpoint initially
        assert!(store.read().await.unwrap().is_empty());

        store.write(&CursorToken::from("abc123")).await.unwrap();
        assert_eq!(store.read().await.unwrap().as_str(), "abc123");
    }

    #[tokio::test]
    async fn latest_write_wins() {
        let store = MemoryCursorStore::with_cursor("a");
        store.write(&CursorToken::from("b")).await.unwrap();
        store.write(&CursorToken::from("c")).await.unwrap();

        assert_eq!(store.read().await.unwrap().as_str(), "c");
        let history: Vec<_> = store.history().into_iter().map(CursorToken::into_inner).collect();
        assert_eq!(history, ["a", "b", "c"]);
    }
}
