//! The stream supervisor: composition root of a sink run.
//!
//! # Wiring
//! resolve config → open cursor store → read starting cursor → build emitter
//! → attach metrics → attach cursor write-back → attach watchdog → stream.
//!
//! # Run loop
//! One task owns the signal receiver, the watchdog tick and the drain
//! deadline. Every signal goes through [`SignalRouter::route`]; the first
//! terminal verdict ends the loop. The cursor writer is flushed before
//! returning; after a fault the flush is bounded by [`FAULT_FLUSH_TIMEOUT`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use substreams_sink_core::checkpoint::CursorStore;
use substreams_sink_core::config::{resolve, Environment, RunConfiguration, RunOptions};
use substreams_sink_core::cursor::CursorToken;
use substreams_sink_core::emitter::{EmitterFactory, EmitterRequest};
use substreams_sink_core::error::SinkError;
use substreams_sink_core::signal::StreamSignal;
use substreams_sink_core::watchdog::{Completion, Watchdog, WatchdogVerdict, CHECK_INACTIVITY_INTERVAL};
use substreams_sink_cursor::{CursorWriter, RetryPolicy, WriterStats};
use substreams_sink_observability::{ManifestDescriptor, MetricsBridge, MetricsReader};

/// Signals buffered between the emitter and the run loop.
const SIGNAL_BUFFER: usize = 1024;

/// How long to keep draining after the stop block when the inactivity check
/// is disabled.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on pending cursor writes once the run has faulted.
pub const FAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

// ─── SignalRouter ────────────────────────────────────────────────────────────

/// Fans each signal out to metrics, cursor write-back and the watchdog, in
/// that order.
pub struct SignalRouter {
    metrics: MetricsBridge,
    cursors: CursorWriter,
    watchdog: Watchdog,
}

impl SignalRouter {
    pub fn new(metrics: MetricsBridge, cursors: CursorWriter, watchdog: Watchdog) -> Self {
        Self {
            metrics,
            cursors,
            watchdog,
        }
    }

    pub fn route(&mut self, signal: &StreamSignal, now: Instant) -> WatchdogVerdict {
        tracing::trace!(kind = signal.kind(), "signal");
        self.metrics.observe(signal);
        if let StreamSignal::Cursor { cursor } = signal {
            if !cursor.is_empty() {
                self.cursors.submit(cursor.clone());
            }
        }
        self.watchdog.observe(signal, now.into_std())
    }

    pub fn tick(&mut self, now: Instant) -> WatchdogVerdict {
        self.watchdog.tick(now.into_std())
    }

    pub fn is_ticking(&self) -> bool {
        self.watchdog.is_ticking()
    }

    /// Tear down, waiting for queued cursor writes.
    pub async fn finish(self) -> WriterStats {
        self.cursors.flush().await
    }

    /// Tear down, abandoning cursor writes still pending after `limit`.
    pub async fn finish_within(self, limit: Duration) -> WriterStats {
        self.cursors.flush_within(limit).await
    }
}

// ─── Supervisor ──────────────────────────────────────────────────────────────

/// Owns one sink run from configuration to termination.
pub struct Supervisor {
    config: Arc<RunConfiguration>,
    store: Arc<dyn CursorStore>,
    factory: Arc<dyn EmitterFactory>,
    metrics: MetricsBridge,
    retry: RetryPolicy,
}

impl Supervisor {
    /// Resolve the configuration and open the cursor store.
    ///
    /// Fails before any network or file access when a required option is
    /// missing or the credential is rejected.
    pub fn from_options(
        options: &RunOptions,
        env: &dyn Environment,
        factory: Arc<dyn EmitterFactory>,
    ) -> Result<Self, SinkError> {
        let config = resolve(options, env)?;
        Self::from_config(config, factory)
    }

    pub fn from_config(config: RunConfiguration, factory: Arc<dyn EmitterFactory>) -> Result<Self, SinkError> {
        let store = substreams_sink_cursor::open(&config.cursor).map_err(SinkError::CursorSetup)?;
        Ok(Self::with_store(config, store, factory))
    }

    /// Use an already-built cursor store.
    pub fn with_store(
        config: RunConfiguration,
        store: Arc<dyn CursorStore>,
        factory: Arc<dyn EmitterFactory>,
    ) -> Self {
        let metrics = MetricsBridge::new(&config.metrics.labels, ManifestDescriptor::from_config(&config));
        Self {
            config: Arc::new(config),
            store,
            factory,
            metrics,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &Arc<RunConfiguration> {
        &self.config
    }

    /// Read handle for the metrics / health endpoint.
    pub fn metrics(&self) -> MetricsReader {
        self.metrics.reader()
    }

    /// Run until the stream completes or faults.
    pub async fn run(self) -> Result<Completion, SinkError> {
        let Self {
            config,
            store,
            factory,
            metrics,
            retry,
        } = self;

        if config.delay_before_start_ms > 0 {
            tracing::info!(delay_ms = config.delay_before_start_ms, "delaying start");
            tokio::time::sleep(Duration::from_millis(config.delay_before_start_ms)).await;
        }

        let start_cursor = read_start_cursor(store.as_ref()).await;
        tracing::info!(
            endpoint = %config.endpoint,
            manifest = %config.manifest,
            module = %config.module_name,
            start_block = config.start_block,
            stop_block = ?config.stop_block,
            cursor_location = store.location(),
            resuming = !start_cursor.is_empty(),
            "starting sink"
        );

        let emitter = factory.create(EmitterRequest::from_config(&config, start_cursor))?;

        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        let emitter_task = tokio::spawn(emitter.stream(tx));

        let router = SignalRouter::new(
            metrics,
            CursorWriter::spawn(store, retry),
            Watchdog::new(config.inactivity_seconds, config.stop_block),
        );

        let drain_timeout = match config.inactivity_seconds {
            0 => DEFAULT_DRAIN_TIMEOUT,
            secs => Duration::from_secs(secs),
        };
        let (outcome, router) = run_loop(router, rx, emitter_task, drain_timeout).await;

        let stats = match &outcome {
            Ok(_) => router.finish().await,
            Err(_) => router.finish_within(FAULT_FLUSH_TIMEOUT).await,
        };
        tracing::info!(
            persisted = stats.persisted,
            failed = stats.failed,
            coalesced = stats.coalesced,
            last_cursor = ?stats.last_persisted.as_ref().map(CursorToken::as_str),
            "cursor writer flushed"
        );

        match &outcome {
            Ok(completion) => tracing::info!(?completion, "sink completed"),
            Err(e) => tracing::error!(error = %e, "sink terminated"),
        }
        outcome
    }
}

/// A read failure is not fatal: the run starts from the configured block.
async fn read_start_cursor(store: &dyn CursorStore) -> CursorToken {
    match store.read().await {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(
                error = %SinkError::CursorRead(e),
                location = store.location(),
                "starting without cursor"
            );
            CursorToken::empty()
        }
    }
}

async fn run_loop(
    mut router: SignalRouter,
    mut rx: mpsc::Receiver<StreamSignal>,
    mut emitter_task: JoinHandle<Result<(), SinkError>>,
    drain_timeout: Duration,
) -> (Result<Completion, SinkError>, SignalRouter) {
    let mut ticker = tokio::time::interval(CHECK_INACTIVITY_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Set once the stop block was reached; the stream is drained until close.
    let mut stopped: Option<(Completion, Instant)> = None;

    let outcome = loop {
        let drain_deadline = stopped.map(|(_, deadline)| deadline);
        tokio::select! {
            signal = rx.recv() => {
                let Some(signal) = signal else {
                    break match stopped {
                        Some((completion, _)) => Ok(completion),
                        None => Err(emitter_exit(&mut emitter_task).await),
                    };
                };
                match router.route(&signal, Instant::now()) {
                    WatchdogVerdict::Continue => {}
                    WatchdogVerdict::Completed(completion @ Completion::StopBlockReached { .. }) => {
                        tracing::debug!(drain_secs = drain_timeout.as_secs(), "draining stream after stop block");
                        stopped = Some((completion, Instant::now() + drain_timeout));
                    }
                    WatchdogVerdict::Completed(completion) => {
                        break Ok(stopped.map(|(c, _)| c).unwrap_or(completion));
                    }
                    WatchdogVerdict::Faulted(e) => break Err(e),
                }
            }
            _ = ticker.tick(), if router.is_ticking() => {
                if let WatchdogVerdict::Faulted(e) = router.tick(Instant::now()) {
                    break Err(e);
                }
            }
            _ = sleep_until_deadline(drain_deadline), if drain_deadline.is_some() => {
                tracing::warn!("stream not closed after stop block, finishing");
                if let Some((completion, _)) = stopped {
                    break Ok(completion);
                }
            }
        }
    };

    // The emitter may still be streaming after a fault or an early stop.
    emitter_task.abort();
    drop(rx);
    (outcome, router)
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The signal channel closed without a terminal signal.
async fn emitter_exit(task: &mut JoinHandle<Result<(), SinkError>>) -> SinkError {
    match task.await {
        Ok(Err(e)) => e,
        Ok(Ok(())) => SinkError::Stream("stream ended without a close signal".into()),
        Err(e) => SinkError::Emitter(e.to_string()),
    }
}
