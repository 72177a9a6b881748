//! substreams-sink-runtime: runs one sink from configuration to termination.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use substreams_sink_core::config::{ProcessEnv, RunOptions};
//! use substreams_sink_runtime::{ReplayFactory, ReplaySource, Supervisor};
//!
//! let factory = Arc::new(ReplayFactory::new(ReplaySource::parse("signals.jsonl")));
//! let supervisor = Supervisor::from_options(&RunOptions::default(), &ProcessEnv, factory)?;
//! let completion = supervisor.run().await?;
//! ```

pub mod replay;
pub mod supervisor;

pub use replay::{parse_recording, ReplayEmitter, ReplayFactory, ReplaySource};
pub use supervisor::{SignalRouter, Supervisor};
