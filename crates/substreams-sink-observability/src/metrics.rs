//! Metrics bridge: stream signals → Prometheus series.
//!
//! Every bridge owns its own recorder, so several sinks (or tests) can live in
//! one process without sharing a global registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use metrics::{Counter, Gauge, Label};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use serde::{Deserialize, Serialize};

use substreams_sink_core::config::RunConfiguration;
use substreams_sink_core::signal::{BlockClock, StreamSignal};

const DATA_MESSAGE_COUNT: &str = "substreams_sink_data_message_count";
const DATA_MESSAGE_BYTES: &str = "substreams_sink_data_message_bytes";
const BACKPROCESSING_COMPLETION: &str = "substreams_sink_backprocessing_completion";
const HEAD_BLOCK_NUMBER: &str = "substreams_sink_head_block_number";
const HEAD_BLOCK_TIMESTAMP: &str = "substreams_sink_head_block_timestamp";
const HEAD_BLOCK_TIME_DRIFT: &str = "substreams_sink_head_block_time_drift";
const UNDO_MESSAGE_COUNT: &str = "substreams_sink_undo_message_count";
const PROGRESS_MESSAGE_COUNT: &str = "substreams_sink_progress_message_count";
const PROGRESS_TOTAL_BYTES_READ: &str = "substreams_sink_progress_total_bytes_read";
const ERROR_COUNT: &str = "substreams_sink_error_count";
const SESSION: &str = "substreams_sink_session";
const MANIFEST: &str = "substreams_sink_manifest";

/// Static run facts attached to the `manifest` series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDescriptor {
    pub manifest: String,
    pub endpoint: String,
    pub start_block: String,
    pub stop_block: String,
    pub production_mode: bool,
}

impl ManifestDescriptor {
    pub fn from_config(config: &RunConfiguration) -> Self {
        Self {
            manifest: config.manifest.clone(),
            endpoint: config.endpoint.clone(),
            start_block: config.start_block.to_string(),
            stop_block: config.stop_block.map(|b| b.to_string()).unwrap_or_default(),
            production_mode: config.production_mode,
        }
    }
}

/// Read side of the bridge, shared with the HTTP endpoint.
#[derive(Clone)]
pub struct MetricsReader {
    handle: PrometheusHandle,
    messages: Arc<AtomicU64>,
}

impl MetricsReader {
    /// Prometheus text exposition.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Data messages received so far.
    pub fn message_count(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn has_messages(&self) -> bool {
        self.message_count() > 0
    }
}

/// Translates stream signals into metric updates.
pub struct MetricsBridge {
    recorder: PrometheusRecorder,
    descriptor: ManifestDescriptor,
    messages: Arc<AtomicU64>,

    data_message_count: Counter,
    data_message_bytes: Counter,
    backprocessing_completion: Gauge,
    backprocessing_latched: bool,
    head_block_number: Gauge,
    head_block_timestamp: Gauge,
    head_block_time_drift: Gauge,
    undo_message_count: Counter,
    progress_message_count: Counter,
    progress_total_bytes_read: Gauge,
    error_count: Counter,

    session: Option<Gauge>,
    manifest_logged: bool,
}

impl MetricsBridge {
    /// `labels` are attached to every series.
    pub fn new(labels: &IndexMap<String, String>, descriptor: ManifestDescriptor) -> Self {
        let recorder = labels
            .iter()
            .fold(PrometheusBuilder::new(), |builder, (k, v)| builder.add_global_label(k, v))
            .build_recorder();

        let (
            data_message_count,
            data_message_bytes,
            backprocessing_completion,
            head_block_number,
            head_block_timestamp,
            head_block_time_drift,
            undo_message_count,
            progress_message_count,
            progress_total_bytes_read,
            error_count,
        ) = metrics::with_local_recorder(&recorder, || {
            metrics::describe_counter!(DATA_MESSAGE_COUNT, "Number of data messages received");
            metrics::describe_counter!(DATA_MESSAGE_BYTES, "Total size of data messages received, in bytes");
            metrics::describe_gauge!(BACKPROCESSING_COMPLETION, "1 once the first data message was received");
            metrics::describe_gauge!(HEAD_BLOCK_NUMBER, "Last processed block number");
            metrics::describe_gauge!(HEAD_BLOCK_TIMESTAMP, "Timestamp of the last processed block");
            metrics::describe_gauge!(HEAD_BLOCK_TIME_DRIFT, "Seconds between now and the last block timestamp");
            metrics::describe_counter!(UNDO_MESSAGE_COUNT, "Number of undo signals received");
            metrics::describe_counter!(PROGRESS_MESSAGE_COUNT, "Number of progress signals received");
            metrics::describe_gauge!(PROGRESS_TOTAL_BYTES_READ, "Total bytes read reported by progress signals");
            metrics::describe_counter!(ERROR_COUNT, "Number of stream errors reported");
            metrics::describe_gauge!(SESSION, "Current stream session");
            metrics::describe_gauge!(MANIFEST, "Manifest and run parameters");
            (
                metrics::counter!(DATA_MESSAGE_COUNT),
                metrics::counter!(DATA_MESSAGE_BYTES),
                metrics::gauge!(BACKPROCESSING_COMPLETION),
                metrics::gauge!(HEAD_BLOCK_NUMBER),
                metrics::gauge!(HEAD_BLOCK_TIMESTAMP),
                metrics::gauge!(HEAD_BLOCK_TIME_DRIFT),
                metrics::counter!(UNDO_MESSAGE_COUNT),
                metrics::counter!(PROGRESS_MESSAGE_COUNT),
                metrics::gauge!(PROGRESS_TOTAL_BYTES_READ),
                metrics::counter!(ERROR_COUNT),
            )
        });

        Self {
            recorder,
            descriptor,
            messages: Arc::new(AtomicU64::new(0)),
            data_message_count,
            data_message_bytes,
            backprocessing_completion,
            backprocessing_latched: false,
            head_block_number,
            head_block_timestamp,
            head_block_time_drift,
            undo_message_count,
            progress_message_count,
            progress_total_bytes_read,
            error_count,
            session: None,
            manifest_logged: false,
        }
    }

    pub fn reader(&self) -> MetricsReader {
        MetricsReader {
            handle: self.recorder.handle(),
            messages: self.messages.clone(),
        }
    }

    pub fn render(&self) -> String {
        self.recorder.handle().render()
    }

    /// Record one signal, using the wall clock for the drift gauge.
    pub fn observe(&mut self, signal: &StreamSignal) {
        self.observe_at(signal, chrono::Utc::now().timestamp());
    }

    /// Record one signal as of `now_secs` (unix seconds).
    pub fn observe_at(&mut self, signal: &StreamSignal, now_secs: i64) {
        match signal {
            StreamSignal::Session {
                trace_id,
                resolved_start_block,
                linear_handoff_block,
                max_parallel_workers,
            } => {
                if let Some(previous) = self.session.take() {
                    previous.set(0.0);
                }
                let labels = vec![
                    Label::new("trace_id", trace_id.clone()),
                    Label::new("resolved_start_block", resolved_start_block.to_string()),
                    Label::new("linear_handoff_block", linear_handoff_block.to_string()),
                    Label::new("max_parallel_workers", max_parallel_workers.to_string()),
                ];
                let gauge = metrics::with_local_recorder(&self.recorder, || metrics::gauge!(SESSION, labels));
                gauge.set(1.0);
                self.session = Some(gauge);
            }
            StreamSignal::Manifest { module_hash } => {
                let d = &self.descriptor;
                let labels = vec![
                    Label::new("module_hash", module_hash.clone()),
                    Label::new("manifest", d.manifest.clone()),
                    Label::new("endpoint", d.endpoint.clone()),
                    Label::new("start_block", d.start_block.clone()),
                    Label::new("stop_block", d.stop_block.clone()),
                    Label::new("production_mode", d.production_mode.to_string()),
                ];
                metrics::with_local_recorder(&self.recorder, || metrics::gauge!(MANIFEST, labels)).set(1.0);
                if !self.manifest_logged {
                    self.manifest_logged = true;
                    tracing::info!(
                        module_hash = %module_hash,
                        manifest = %d.manifest,
                        endpoint = %d.endpoint,
                        start_block = %d.start_block,
                        stop_block = %d.stop_block,
                        production_mode = d.production_mode,
                        "stream manifest resolved"
                    );
                }
            }
            StreamSignal::Clock(clock) => self.record_clock(clock, now_secs),
            StreamSignal::Block { clock, size_bytes } => {
                self.data_message_count.increment(1);
                self.data_message_bytes.increment(*size_bytes);
                self.messages.fetch_add(1, Ordering::Relaxed);
                if !self.backprocessing_latched {
                    self.backprocessing_latched = true;
                    self.backprocessing_completion.set(1.0);
                }
                self.record_clock(clock, now_secs);
            }
            StreamSignal::Undo { .. } => self.undo_message_count.increment(1),
            StreamSignal::Progress { total_bytes_read } => {
                self.progress_message_count.increment(1);
                self.progress_total_bytes_read.set(*total_bytes_read as f64);
            }
            StreamSignal::Close { error: Some(_) } | StreamSignal::FatalError { .. } => {
                self.error_count.increment(1);
            }
            StreamSignal::Close { error: None } | StreamSignal::Cursor { .. } => {}
        }
    }

    fn record_clock(&self, clock: &BlockClock, now_secs: i64) {
        self.head_block_number.set(clock.number as f64);
        self.head_block_timestamp.set(clock.timestamp as f64);
        self.head_block_time_drift.set((now_secs - clock.timestamp) as f64);
    }
}

/// Value of the first series named `name` whose labels contain every `labels`
/// pair, parsed from Prometheus text exposition.
pub fn sample_value(rendered: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    rendered
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let (series, value) = line.rsplit_once(' ')?;
            let (series_name, series_labels) = match series.split_once('{') {
                Some((n, rest)) => (n, rest.trim_end_matches('}')),
                None => (series, ""),
            };
            (series_name == name).then_some((series_labels, value))
        })
        .find(|(series_labels, _)| {
            labels
                .iter()
                .all(|(k, v)| series_labels.contains(&format!("{k}=\"{v}\"")))
        })
        .and_then(|(_, value)| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> MetricsBridge {
        MetricsBridge::new(&IndexMap::new(), ManifestDescriptor::default())
    }

    fn block(number: u64, timestamp: i64, size_bytes: u64) -> StreamSignal {
        StreamSignal::Block {
            clock: BlockClock {
                number,
                id: String::new(),
                timestamp,
            },
            size_bytes,
        }
    }

    #[test]
    fn block_updates_counters_and_head() {
        let mut b = bridge();
        b.observe_at(&block(42, 1_000, 512), 1_010);

        let out = b.render();
        assert_eq!(sample_value(&out, DATA_MESSAGE_COUNT, &[]), Some(1.0));
        assert_eq!(sample_value(&out, DATA_MESSAGE_BYTES, &[]), Some(512.0));
        assert_eq!(sample_value(&out, HEAD_BLOCK_NUMBER, &[]), Some(42.0));
        assert_eq!(sample_value(&out, HEAD_BLOCK_TIMESTAMP, &[]), Some(1_000.0));
        assert_eq!(b.reader().message_count(), 1);
    }

    #[test]
    fn backprocessing_completion_latches() {
        let mut b = bridge();
        b.observe_at(&block(1, 0, 10), 0);
        b.observe_at(&block(2, 0, 10), 0);
        b.observe_at(&StreamSignal::clock_at(3, 0), 0);

        let out = b.render();
        assert_eq!(sample_value(&out, BACKPROCESSING_COMPLETION, &[]), Some(1.0));
        assert_eq!(sample_value(&out, DATA_MESSAGE_COUNT, &[]), Some(2.0));
    }

    #[test]
    fn clock_drift_is_now_minus_timestamp() {
        let mut b = bridge();
        b.observe_at(&StreamSignal::clock_at(7, 1_700_000_000), 1_700_000_030);
        assert_eq!(sample_value(&b.render(), HEAD_BLOCK_TIME_DRIFT, &[]), Some(30.0));

        // Block from the future: negative drift.
        b.observe_at(&StreamSignal::clock_at(8, 1_700_000_040), 1_700_000_030);
        assert_eq!(sample_value(&b.render(), HEAD_BLOCK_TIME_DRIFT, &[]), Some(-10.0));
    }

    #[test]
    fn undo_progress_and_errors() {
        let mut b = bridge();
        b.observe_at(
            &StreamSignal::Undo {
                last_valid_block: 9,
                last_valid_cursor: "c9".into(),
            },
            0,
        );
        b.observe_at(&StreamSignal::Progress { total_bytes_read: 4096 }, 0);
        b.observe_at(&StreamSignal::FatalError { error: "boom".into() }, 0);
        b.observe_at(
            &StreamSignal::Close {
                error: Some("reset".into()),
            },
            0,
        );

        let out = b.render();
        assert_eq!(sample_value(&out, UNDO_MESSAGE_COUNT, &[]), Some(1.0));
        assert_eq!(sample_value(&out, PROGRESS_MESSAGE_COUNT, &[]), Some(1.0));
        assert_eq!(sample_value(&out, PROGRESS_TOTAL_BYTES_READ, &[]), Some(4096.0));
        assert_eq!(sample_value(&out, ERROR_COUNT, &[]), Some(2.0));
        assert!(!b.reader().has_messages());
    }

    #[test]
    fn new_session_zeroes_previous_series() {
        let mut b = bridge();
        let session = |trace: &str| StreamSignal::Session {
            trace_id: trace.into(),
            resolved_start_block: 100,
            linear_handoff_block: 200,
            max_parallel_workers: 10,
        };
        b.observe_at(&session("t1"), 0);
        b.observe_at(&session("t2"), 0);

        let out = b.render();
        assert_eq!(sample_value(&out, SESSION, &[("trace_id", "t1")]), Some(0.0));
        assert_eq!(
            sample_value(&out, SESSION, &[("trace_id", "t2"), ("resolved_start_block", "100")]),
            Some(1.0)
        );
    }

    #[test]
    fn manifest_series_carries_run_facts() {
        let descriptor = ManifestDescriptor {
            manifest: "spkg.io/eth.spkg".into(),
            endpoint: "mainnet.eth.streamingfast.io:443".into(),
            start_block: "-1".into(),
            stop_block: "100".into(),
            production_mode: true,
        };
        let mut b = MetricsBridge::new(&IndexMap::new(), descriptor);
        b.observe_at(
            &StreamSignal::Manifest {
                module_hash: "abc".into(),
            },
            0,
        );

        let out = b.render();
        assert_eq!(
            sample_value(
                &out,
                MANIFEST,
                &[("module_hash", "abc"), ("stop_block", "100"), ("production_mode", "true")]
            ),
            Some(1.0)
        );
    }

    #[test]
    fn static_labels_apply_to_every_series() {
        let labels: IndexMap<String, String> = [("network".to_string(), "mainnet".to_string())].into_iter().collect();
        let mut b = MetricsBridge::new(&labels, ManifestDescriptor::default());
        b.observe_at(&block(1, 0, 1), 0);

        let out = b.render();
        assert_eq!(sample_value(&out, DATA_MESSAGE_COUNT, &[("network", "mainnet")]), Some(1.0));
        assert_eq!(sample_value(&out, HEAD_BLOCK_NUMBER, &[("network", "mainnet")]), Some(1.0));
    }

    #[test]
    fn bridges_do_not_share_registries() {
        let mut a = bridge();
        let b = bridge();
        a.observe_at(&block(1, 0, 1), 0);
        assert_eq!(sample_value(&a.render(), DATA_MESSAGE_COUNT, &[]), Some(1.0));
        assert_ne!(sample_value(&b.render(), DATA_MESSAGE_COUNT, &[]), Some(1.0));
    }
}
