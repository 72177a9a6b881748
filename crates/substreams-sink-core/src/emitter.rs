//! Stream emitter contract: the external collaborator that talks to the
//! Substreams endpoint and turns the response stream into [`StreamSignal`]s.
//!
//! The supervisor only ever builds an emitter from an [`EmitterRequest`] and
//! starts it; everything after that flows back through the signal channel.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::auth::Credential;
use crate::config::RunConfiguration;
use crate::cursor::CursorToken;
use crate::error::SinkError;
use crate::signal::StreamSignal;

/// Sending half of the signal channel handed to an emitter.
pub type SignalSender = mpsc::Sender<StreamSignal>;

/// Everything an emitter needs to open a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitterRequest {
    pub endpoint: String,
    pub manifest: String,
    pub credential: Credential,
    pub headers: IndexMap<String, String>,
    pub output_module: String,
    pub params: Vec<String>,
    pub start_block: i64,
    pub stop_block: Option<u64>,
    pub production_mode: bool,
    pub final_blocks_only: bool,
    pub plaintext: bool,
    /// Resume point; empty = start from `start_block`.
    pub start_cursor: CursorToken,
}

impl EmitterRequest {
    pub fn from_config(config: &RunConfiguration, start_cursor: CursorToken) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            manifest: config.manifest.clone(),
            credential: config.credential.clone(),
            headers: config.headers.clone(),
            output_module: config.module_name.clone(),
            params: config.params_list(),
            start_block: config.start_block,
            stop_block: config.stop_block,
            production_mode: config.production_mode,
            final_blocks_only: config.final_blocks_only,
            plaintext: config.plaintext,
            start_cursor,
        }
    }
}

/// A started stream.
///
/// Implementations push signals in production order and finish with either
/// `StreamSignal::Close` or `StreamSignal::FatalError`. Returning without one
/// of those is treated as a stream fault by the supervisor.
#[async_trait]
pub trait StreamEmitter: Send {
    async fn stream(self: Box<Self>, signals: SignalSender) -> Result<(), SinkError>;
}

/// Builds emitters from resolved requests.
pub trait EmitterFactory: Send + Sync {
    fn create(&self, request: EmitterRequest) -> Result<Box<dyn StreamEmitter>, SinkError>;
}
