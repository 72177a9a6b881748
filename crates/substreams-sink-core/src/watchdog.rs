//! Inactivity watchdog: decides when the sink must stop.
//!
//! State transitions:
//! - `Idle` → `Active`:          first cursor / clock / block / progress signal
//! - `Active` → `Active`:        activity resets the inactivity timer
//! - `Active` → `Faulted`:       no activity for longer than the timeout
//! - any → `GracefulStop`:       stop block reached, or clean `close`
//! - any → `Faulted`:            `close` with an error, or `fatalError`
//!
//! The watchdog never retries anything. A fault is terminal and is meant to
//! end the process so an external supervisor restarts it from the last
//! persisted cursor.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::SinkError;
use crate::signal::StreamSignal;

/// How often the supervisor calls [`Watchdog::tick`].
pub const CHECK_INACTIVITY_INTERVAL: Duration = Duration::from_secs(1);

/// Watchdog phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchdogPhase {
    /// Waiting for the first activity signal; silence is expected.
    Idle,
    /// Stream is flowing; inactivity is being checked.
    Active,
    /// Stream finished; no more checks.
    GracefulStop,
    /// Terminal failure.
    Faulted,
}

impl std::fmt::Display for WatchdogPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::GracefulStop => write!(f, "graceful-stop"),
            Self::Faulted => write!(f, "faulted"),
        }
    }
}

/// Why the stream completed without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Completion {
    /// The last block before the configured stop block was observed.
    StopBlockReached { block: u64 },
    /// The emitter closed the stream cleanly.
    StreamClosed,
}

/// Outcome of feeding the watchdog a signal or a tick.
#[derive(Debug)]
pub enum WatchdogVerdict {
    Continue,
    Completed(Completion),
    Faulted(SinkError),
}

/// Mutable liveness bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchdogState {
    /// Time of the last signal that proved forward progress.
    pub last_activity: Option<Instant>,
    /// Set by the first activity signal.
    pub started: bool,
    /// Set once the end of the stream was observed.
    pub finished: bool,
    /// Highest `total_bytes_read` seen in progress signals.
    pub cumulative_bytes_read: u64,
}

/// Inactivity watchdog state machine.
///
/// Owned by the supervisor's dispatch loop; time is passed in so the state
/// machine can be driven deterministically.
#[derive(Debug)]
pub struct Watchdog {
    timeout: Option<Duration>,
    stop_block: Option<u64>,
    phase: WatchdogPhase,
    state: WatchdogState,
}

impl Watchdog {
    /// `inactivity_seconds == 0` disables the inactivity check.
    pub fn new(inactivity_seconds: u64, stop_block: Option<u64>) -> Self {
        Self {
            timeout: (inactivity_seconds > 0).then(|| Duration::from_secs(inactivity_seconds)),
            stop_block,
            phase: WatchdogPhase::Idle,
            state: WatchdogState::default(),
        }
    }

    pub fn phase(&self) -> WatchdogPhase {
        self.phase
    }

    pub fn state(&self) -> &WatchdogState {
        &self.state
    }

    /// Returns `true` while periodic checks are still meaningful.
    pub fn is_ticking(&self) -> bool {
        matches!(self.phase, WatchdogPhase::Idle | WatchdogPhase::Active)
    }

    /// Feed one stream signal.
    pub fn observe(&mut self, signal: &StreamSignal, now: Instant) -> WatchdogVerdict {
        match self.phase {
            WatchdogPhase::Faulted => return WatchdogVerdict::Continue,
            WatchdogPhase::GracefulStop => return self.observe_after_stop(signal),
            WatchdogPhase::Idle | WatchdogPhase::Active => {}
        }

        match signal {
            StreamSignal::Clock(clock) | StreamSignal::Block { clock, .. } => {
                self.touch(now);
                if let Some(stop) = self.stop_block {
                    if clock.number.saturating_add(1) >= stop {
                        tracing::info!(block = clock.number, stop_block = stop, "stop block reached");
                        self.finish();
                        return WatchdogVerdict::Completed(Completion::StopBlockReached {
                            block: clock.number,
                        });
                    }
                }
                WatchdogVerdict::Continue
            }
            StreamSignal::Cursor { .. } => {
                self.touch(now);
                WatchdogVerdict::Continue
            }
            StreamSignal::Progress { total_bytes_read } => {
                if *total_bytes_read > self.state.cumulative_bytes_read {
                    self.state.cumulative_bytes_read = *total_bytes_read;
                    self.touch(now);
                } else if !self.state.started {
                    self.touch(now);
                }
                // Unchanged byte count: busy but stuck, the timer keeps running.
                WatchdogVerdict::Continue
            }
            StreamSignal::Close { error: None } => {
                tracing::info!("stream closed");
                self.finish();
                WatchdogVerdict::Completed(Completion::StreamClosed)
            }
            StreamSignal::Close { error: Some(error) } => {
                tracing::error!(%error, "stream closed with error");
                self.phase = WatchdogPhase::Faulted;
                WatchdogVerdict::Faulted(SinkError::Stream(error.clone()))
            }
            StreamSignal::FatalError { error } => {
                tracing::error!(%error, "stream fatal error");
                self.phase = WatchdogPhase::Faulted;
                WatchdogVerdict::Faulted(SinkError::Fatal(error.clone()))
            }
            StreamSignal::Session { .. } | StreamSignal::Manifest { .. } | StreamSignal::Undo { .. } => {
                WatchdogVerdict::Continue
            }
        }
    }

    /// Periodic liveness check.
    pub fn tick(&mut self, now: Instant) -> WatchdogVerdict {
        if self.phase != WatchdogPhase::Active {
            return WatchdogVerdict::Continue;
        }
        let (Some(timeout), Some(last)) = (self.timeout, self.state.last_activity) else {
            return WatchdogVerdict::Continue;
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed > timeout {
            tracing::error!(
                elapsed_secs = elapsed.as_secs(),
                timeout_secs = timeout.as_secs(),
                "process will exit due to inactivity"
            );
            self.phase = WatchdogPhase::Faulted;
            return WatchdogVerdict::Faulted(SinkError::Inactivity {
                elapsed_secs: elapsed.as_secs(),
                timeout_secs: timeout.as_secs(),
            });
        }
        WatchdogVerdict::Continue
    }

    /// After the stop block, only the end of the stream matters; errors no
    /// longer turn into faults.
    fn observe_after_stop(&mut self, signal: &StreamSignal) -> WatchdogVerdict {
        match signal {
            StreamSignal::Close { error } => {
                if let Some(error) = error {
                    tracing::warn!(%error, "stream closed with error after stop block, ignoring");
                }
                WatchdogVerdict::Completed(Completion::StreamClosed)
            }
            StreamSignal::FatalError { error } => {
                tracing::warn!(%error, "fatal error after stop block, ignoring");
                WatchdogVerdict::Completed(Completion::StreamClosed)
            }
            _ => WatchdogVerdict::Continue,
        }
    }

    fn touch(&mut self, now: Instant) {
        if !self.state.started {
            self.state.started = true;
            self.phase = WatchdogPhase::Active;
            tracing::debug!("first stream activity, inactivity checks armed");
        }
        self.state.last_activity = Some(now);
    }

    fn finish(&mut self) {
        self.state.finished = true;
        self.phase = WatchdogPhase::GracefulStop;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    /// Tick once per second from `from` to `to` (inclusive); return the first
    /// second at which the watchdog faulted.
    fn first_fault(dog: &mut Watchdog, base: Instant, from: u64, to: u64) -> Option<u64> {
        (from..=to).find(|&t| matches!(dog.tick(at(base, t)), WatchdogVerdict::Faulted(_)))
    }

    #[test]
    fn idle_silence_never_faults() {
        let base = Instant::now();
        let mut dog = Watchdog::new(5, None);
        assert_eq!(first_fault(&mut dog, base, 0, 120), None);
        assert_eq!(dog.phase(), WatchdogPhase::Idle);
    }

    #[test]
    fn faults_after_timeout_without_activity() {
        let base = Instant::now();
        let mut dog = Watchdog::new(5, None);
        dog.observe(&StreamSignal::clock_at(1, 0), base);
        assert_eq!(dog.phase(), WatchdogPhase::Active);

        let fault = first_fault(&mut dog, base, 1, 20).expect("should fault");
        assert!((5..=6).contains(&fault), "faulted at t={fault}");
        assert_eq!(dog.phase(), WatchdogPhase::Faulted);
    }

    #[test]
    fn progress_with_more_bytes_defers_fault() {
        let base = Instant::now();
        let mut dog = Watchdog::new(5, None);
        dog.observe(&StreamSignal::Progress { total_bytes_read: 100 }, base);

        assert_eq!(first_fault(&mut dog, base, 1, 3), None);
        dog.observe(&StreamSignal::Progress { total_bytes_read: 200 }, at(base, 4));

        let fault = first_fault(&mut dog, base, 4, 30).expect("should fault");
        assert!((9..=10).contains(&fault), "faulted at t={fault}");
    }

    #[test]
    fn unchanged_progress_does_not_reset_timer() {
        let base = Instant::now();
        let mut dog = Watchdog::new(5, None);
        dog.observe(&StreamSignal::Progress { total_bytes_read: 100 }, base);
        dog.observe(&StreamSignal::Progress { total_bytes_read: 100 }, at(base, 4));

        assert_eq!(dog.state().last_activity, Some(base));
        assert_eq!(dog.state().cumulative_bytes_read, 100);
        let fault = first_fault(&mut dog, base, 1, 20).expect("should fault");
        assert!((5..=6).contains(&fault));
    }

    #[test]
    fn cursor_resets_timer() {
        let base = Instant::now();
        let mut dog = Watchdog::new(5, None);
        dog.observe(&StreamSignal::cursor("a"), base);
        dog.observe(&StreamSignal::cursor("b"), at(base, 3));
        assert_eq!(dog.state().last_activity, Some(at(base, 3)));
    }

    #[test]
    fn stop_block_leads_to_graceful_stop() {
        let base = Instant::now();
        let mut dog = Watchdog::new(5, Some(100));

        let verdict = dog.observe(&StreamSignal::clock_at(98, 0), base);
        assert!(matches!(verdict, WatchdogVerdict::Continue));

        let verdict = dog.observe(
            &StreamSignal::Block {
                clock: crate::signal::BlockClock {
                    number: 99,
                    id: String::new(),
                    timestamp: 0,
                },
                size_bytes: 10,
            },
            at(base, 1),
        );
        assert!(matches!(
            verdict,
            WatchdogVerdict::Completed(Completion::StopBlockReached { block: 99 })
        ));
        assert_eq!(dog.phase(), WatchdogPhase::GracefulStop);
        assert!(dog.state().finished);
        assert!(!dog.is_ticking());

        // Silence afterwards never turns into a fault.
        assert_eq!(first_fault(&mut dog, base, 2, 600), None);
    }

    #[test]
    fn close_after_stop_block_completes_even_with_error() {
        let base = Instant::now();
        let mut dog = Watchdog::new(5, Some(10));
        dog.observe(&StreamSignal::clock_at(9, 0), base);
        let verdict = dog.observe(&StreamSignal::Close { error: Some("eof".into()) }, base);
        assert!(matches!(verdict, WatchdogVerdict::Completed(Completion::StreamClosed)));
    }

    #[test]
    fn clean_close_is_graceful() {
        let base = Instant::now();
        let mut dog = Watchdog::new(5, None);
        let verdict = dog.observe(&StreamSignal::Close { error: None }, base);
        assert!(matches!(verdict, WatchdogVerdict::Completed(Completion::StreamClosed)));
        assert_eq!(dog.phase(), WatchdogPhase::GracefulStop);
    }

    #[test]
    fn close_with_error_faults() {
        let base = Instant::now();
        let mut dog = Watchdog::new(5, None);
        let verdict = dog.observe(&StreamSignal::Close { error: Some("rpc reset".into()) }, base);
        assert!(matches!(verdict, WatchdogVerdict::Faulted(SinkError::Stream(ref e)) if e == "rpc reset"));
        assert_eq!(dog.phase(), WatchdogPhase::Faulted);
    }

    #[test]
    fn fatal_error_faults() {
        let base = Instant::now();
        let mut dog = Watchdog::new(5, None);
        let verdict = dog.observe(&StreamSignal::FatalError { error: "bad module".into() }, base);
        assert!(matches!(verdict, WatchdogVerdict::Faulted(SinkError::Fatal(_))));
    }

    #[test]
    fn zero_timeout_disables_inactivity_check() {
        let base = Instant::now();
        let mut dog = Watchdog::new(0, None);
        dog.observe(&StreamSignal::clock_at(1, 0), base);
        assert_eq!(first_fault(&mut dog, base, 1, 10_000), None);
    }

    #[test]
    fn session_and_undo_are_not_activity() {
        let base = Instant::now();
        let mut dog = Watchdog::new(5, None);
        dog.observe(
            &StreamSignal::Undo {
                last_valid_block: 1,
                last_valid_cursor: Default::default(),
            },
            base,
        );
        assert_eq!(dog.phase(), WatchdogPhase::Idle);
        assert!(!dog.state().started);
    }
}
