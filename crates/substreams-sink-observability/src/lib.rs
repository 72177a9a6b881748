//! # substreams-sink-observability
//!
//! Prometheus metrics, health endpoint and structured logging for Substreams
//! sinks.
//!
//! ## Built-in metrics (all prefixed `substreams_sink_`)
//! - `data_message_count`, `data_message_bytes` (counters)
//! - `backprocessing_completion` (gauge, latched to 1)
//! - `head_block_number`, `head_block_timestamp`, `head_block_time_drift` (gauges)
//! - `undo_message_count`, `progress_message_count`, `error_count` (counters)
//! - `progress_total_bytes_read` (gauge)
//! - `session{..}`, `manifest{..}` (info gauges)
//!
//! ## Structured logging
//! Text or JSON logs on stderr through `tracing-subscriber`.

pub mod metrics;
pub mod server;
pub mod tracing_setup;

pub use self::metrics::{sample_value, ManifestDescriptor, MetricsBridge, MetricsReader};
pub use server::{router, serve};
pub use tracing_setup::{init_tracing, LogConfig};
