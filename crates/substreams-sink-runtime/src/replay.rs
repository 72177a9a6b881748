//! Replay emitter: streams signals recorded as newline-delimited JSON.
//!
//! One [`StreamSignal`] per line, e.g.
//!
//! ```text
//! {"type":"clock","number":1,"id":"0x01","timestamp":1700000000}
//! {"type":"cursor","cursor":"c1"}
//! {"type":"close"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. A non-empty start
//! cursor resumes right after the matching `cursor` line. A recording that
//! ends without `close` is closed cleanly.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use substreams_sink_core::cursor::CursorToken;
use substreams_sink_core::emitter::{EmitterFactory, EmitterRequest, SignalSender, StreamEmitter};
use substreams_sink_core::error::SinkError;
use substreams_sink_core::signal::StreamSignal;

/// Where the recording comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaySource {
    File(PathBuf),
    Stdin,
}

impl ReplaySource {
    /// `-` selects stdin.
    pub fn parse(raw: &str) -> Self {
        if raw == "-" {
            Self::Stdin
        } else {
            Self::File(PathBuf::from(raw))
        }
    }

    async fn read_all(&self) -> Result<String, SinkError> {
        match self {
            Self::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| SinkError::Emitter(format!("cannot read replay file {}: {e}", path.display()))),
            Self::Stdin => {
                let mut buf = String::new();
                tokio::io::stdin()
                    .read_to_string(&mut buf)
                    .await
                    .map_err(|e| SinkError::Emitter(format!("cannot read replay from stdin: {e}")))?;
                Ok(buf)
            }
        }
    }
}

/// Parse a recording. Errors name the offending line (1-based).
pub fn parse_recording(text: &str) -> Result<Vec<StreamSignal>, SinkError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(idx, line)| {
            serde_json::from_str(line.trim())
                .map_err(|e| SinkError::Emitter(format!("replay line {}: {e}", idx + 1)))
        })
        .collect()
}

/// Signals after the `cursor` line equal to `start`, or all of them.
fn resume_after(signals: Vec<StreamSignal>, start: &CursorToken) -> Vec<StreamSignal> {
    if start.is_empty() {
        return signals;
    }
    let position = signals
        .iter()
        .position(|s| matches!(s, StreamSignal::Cursor { cursor } if cursor == start));
    match position {
        Some(idx) => signals.into_iter().skip(idx + 1).collect(),
        None => {
            tracing::warn!(cursor = %start, "start cursor not found in recording, replaying from the beginning");
            signals
        }
    }
}

/// Builds [`ReplayEmitter`]s over one source.
#[derive(Debug, Clone)]
pub struct ReplayFactory {
    source: ReplaySource,
    pace: Option<Duration>,
}

impl ReplayFactory {
    pub fn new(source: ReplaySource) -> Self {
        Self { source, pace: None }
    }

    /// Wait `pace` between signals.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }
}

impl EmitterFactory for ReplayFactory {
    fn create(&self, request: EmitterRequest) -> Result<Box<dyn StreamEmitter>, SinkError> {
        tracing::debug!(
            source = ?self.source,
            module = %request.output_module,
            start_cursor = %request.start_cursor,
            "replay emitter created"
        );
        Ok(Box::new(ReplayEmitter {
            source: self.source.clone(),
            pace: self.pace,
            start_cursor: request.start_cursor,
        }))
    }
}

pub struct ReplayEmitter {
    source: ReplaySource,
    pace: Option<Duration>,
    start_cursor: CursorToken,
}

#[async_trait]
impl StreamEmitter for ReplayEmitter {
    async fn stream(self: Box<Self>, signals: SignalSender) -> Result<(), SinkError> {
        let text = self.source.read_all().await?;
        let recording = resume_after(parse_recording(&text)?, &self.start_cursor);

        let mut closed = false;
        for signal in recording {
            closed = matches!(signal, StreamSignal::Close { .. } | StreamSignal::FatalError { .. });
            if signals.send(signal).await.is_err() {
                return Ok(());
            }
            if closed {
                break;
            }
            if let Some(pace) = self.pace {
                tokio::time::sleep(pace).await;
            }
        }
        if !closed {
            let _ = signals.send(StreamSignal::Close { error: None }).await;
        }
        Ok(())
    }
}
