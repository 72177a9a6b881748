//! Stream lifecycle signals: the single contract between the stream emitter
//! and everything the supervisor attaches to it.

use serde::{Deserialize, Serialize};

use crate::cursor::CursorToken;

// ─── BlockClock ──────────────────────────────────────────────────────────────

/// Height and wall-clock time of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockClock {
    /// Block number.
    pub number: u64,
    /// Block id / hash.
    #[serde(default)]
    pub id: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

// ─── StreamSignal ────────────────────────────────────────────────────────────

/// A lifecycle signal delivered by the stream emitter.
///
/// Signals are delivered in production order through one channel; the
/// supervisor routes each of them to the metrics bridge, the cursor writer and
/// the watchdog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamSignal {
    /// Session negotiated with the upstream endpoint.
    #[serde(rename_all = "camelCase")]
    Session {
        trace_id: String,
        resolved_start_block: u64,
        linear_handoff_block: u64,
        max_parallel_workers: u64,
    },

    /// Package resolved and output module selected.
    #[serde(rename_all = "camelCase")]
    Manifest { module_hash: String },

    /// Per-block clock.
    Clock(BlockClock),

    /// A decoded data message for one block.
    #[serde(rename_all = "camelCase")]
    Block {
        clock: BlockClock,
        /// Size in bytes of the serialized module output.
        size_bytes: u64,
    },

    /// Chain reorganization: everything after `last_valid_block` is undone.
    #[serde(rename_all = "camelCase")]
    Undo {
        last_valid_block: u64,
        #[serde(default)]
        last_valid_cursor: CursorToken,
    },

    /// Upstream processing telemetry.
    #[serde(rename_all = "camelCase")]
    Progress { total_bytes_read: u64 },

    /// A new checkpoint token.
    Cursor { cursor: CursorToken },

    /// The stream ended; `error` is set when it ended abnormally.
    Close {
        #[serde(default)]
        error: Option<String>,
    },

    /// Unrecoverable upstream error.
    FatalError { error: String },
}

impl StreamSignal {
    /// Short signal name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session { .. } => "session",
            Self::Manifest { .. } => "manifest",
            Self::Clock(_) => "clock",
            Self::Block { .. } => "block",
            Self::Undo { .. } => "undo",
            Self::Progress { .. } => "progress",
            Self::Cursor { .. } => "cursor",
            Self::Close { .. } => "close",
            Self::FatalError { .. } => "fatalError",
        }
    }

    /// The block clock carried by this signal, if any.
    pub fn clock(&self) -> Option<&BlockClock> {
        match self {
            Self::Clock(clock) | Self::Block { clock, .. } => Some(clock),
            _ => None,
        }
    }

    pub fn cursor(token: impl Into<CursorToken>) -> Self {
        Self::Cursor {
            cursor: token.into(),
        }
    }

    pub fn clock_at(number: u64, timestamp: i64) -> Self {
        Self::Clock(BlockClock {
            number,
            id: String::new(),
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_exposes_embedded_clock() {
        let signal = StreamSignal::Block {
            clock: BlockClock {
                number: 42,
                id: "0xabc".into(),
                timestamp: 1_700_000_000,
            },
            size_bytes: 512,
        };
        assert_eq!(signal.clock().map(|c| c.number), Some(42));
        assert_eq!(signal.kind(), "block");
        assert!(StreamSignal::cursor("x").clock().is_none());
    }

    #[test]
    fn signals_decode_from_tagged_json() {
        let line = r#"{"type":"session","traceId":"t-1","resolvedStartBlock":10,"linearHandoffBlock":20,"maxParallelWorkers":4}"#;
        let signal: StreamSignal = serde_json::from_str(line).unwrap();
        assert_eq!(
            signal,
            StreamSignal::Session {
                trace_id: "t-1".into(),
                resolved_start_block: 10,
                linear_handoff_block: 20,
                max_parallel_workers: 4,
            }
        );

        let close: StreamSignal = serde_json::from_str(r#"{"type":"close"}"#).unwrap();
        assert_eq!(close, StreamSignal::Close { error: None });

        let cursor: StreamSignal = serde_json::from_str(r#"{"type":"cursor","cursor":"X"}"#).unwrap();
        assert_eq!(cursor, StreamSignal::cursor("X"));
    }
}
