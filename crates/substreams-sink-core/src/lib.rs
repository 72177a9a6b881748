//! substreams-sink-core: foundation for a resumable, observable Substreams sink.
//!
//! # Architecture
//!
//! ```text
//! RunOptions + Environment ─► resolve() ─► RunConfiguration
//!                                              │
//!                 CursorStore::read ◄──────────┤
//!                                              ▼
//!                 EmitterFactory::create(EmitterRequest)
//!                                              │
//!                              StreamSignal stream (session, clock, block, …)
//!                                              │
//!                  ┌───────────────────────────┼────────────────────┐
//!                  ▼                           ▼                    ▼
//!            Metrics bridge          Cursor write-back       Watchdog (this crate)
//! ```

pub mod auth;
pub mod checkpoint;
pub mod config;
pub mod cursor;
pub mod emitter;
pub mod error;
pub mod signal;
pub mod watchdog;

pub use auth::Credential;
pub use checkpoint::{CursorStore, MemoryCursorStore};
pub use config::{resolve, CursorBackend, Environment, RunConfiguration, RunOptions};
pub use cursor::CursorToken;
pub use emitter::{EmitterFactory, EmitterRequest, SignalSender, StreamEmitter};
pub use error::{ConfigError, CursorError, SinkError};
pub use signal::{BlockClock, StreamSignal};
pub use watchdog::{Completion, Watchdog, WatchdogPhase, WatchdogVerdict};
