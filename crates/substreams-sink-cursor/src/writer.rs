//! Ordered cursor write-back.
//!
//! Cursors are queued in emission order and persisted by a single worker
//! task. A write starts only after the previous one finished, retries
//! included, so the store always ends up holding the newest token. Tokens
//! queued behind an in-flight write are coalesced: only the newest is
//! written next.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use substreams_sink_core::checkpoint::CursorStore;
use substreams_sink_core::cursor::CursorToken;

use crate::retry::RetryPolicy;

/// Outcome of a writer's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Tokens durably written.
    pub persisted: u64,
    /// Tokens given up on after the retry budget, or superseded while retrying.
    pub failed: u64,
    /// Tokens replaced by a newer one before their write started.
    pub coalesced: u64,
    /// Last token that reached the store.
    pub last_persisted: Option<CursorToken>,
}

impl WriterStats {
    fn handled(&self) -> u64 {
        self.persisted + self.failed + self.coalesced
    }
}

type SharedStats = Arc<Mutex<WriterStats>>;

fn update(stats: &SharedStats, f: impl FnOnce(&mut WriterStats)) {
    f(&mut stats.lock().unwrap_or_else(PoisonError::into_inner));
}

fn snapshot(stats: &SharedStats) -> WriterStats {
    stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Handle to the write-back worker.
pub struct CursorWriter {
    tx: mpsc::UnboundedSender<CursorToken>,
    worker: JoinHandle<()>,
    stats: SharedStats,
    submitted: AtomicU64,
}

impl CursorWriter {
    /// Start the worker on the current runtime.
    pub fn spawn(store: Arc<dyn CursorStore>, retry: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = SharedStats::default();
        let worker = tokio::spawn(write_loop(store, retry, rx, stats.clone()));
        Self {
            tx,
            worker,
            stats,
            submitted: AtomicU64::new(0),
        }
    }

    /// Queue a token. Never blocks.
    pub fn submit(&self, token: CursorToken) {
        if self.tx.send(token).is_err() {
            tracing::warn!("cursor writer stopped, dropping cursor");
            return;
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Close the queue and wait until every queued token was handled.
    pub async fn flush(self) -> WriterStats {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "cursor writer task failed");
        }
        snapshot(&self.stats)
    }

    /// Like [`flush`](Self::flush), but stop the worker once `limit` has
    /// elapsed. Tokens not handled by then are abandoned.
    pub async fn flush_within(self, limit: Duration) -> WriterStats {
        let Self {
            tx,
            mut worker,
            stats,
            submitted,
        } = self;
        drop(tx);

        match tokio::time::timeout(limit, &mut worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "cursor writer task failed"),
            Err(_) => {
                worker.abort();
                let stats = snapshot(&stats);
                tracing::warn!(
                    abandoned = submitted.load(Ordering::Relaxed).saturating_sub(stats.handled()),
                    last_cursor = ?stats.last_persisted.as_ref().map(CursorToken::as_str),
                    limit_ms = limit.as_millis() as u64,
                    "cursor writer did not drain in time, abandoning queued cursors"
                );
            }
        }
        snapshot(&stats)
    }
}

/// Replace `token` with the newest queued one. Returns how many were skipped.
fn take_newest(rx: &mut mpsc::UnboundedReceiver<CursorToken>, token: &mut CursorToken) -> u64 {
    let mut skipped = 0;
    while let Ok(newer) = rx.try_recv() {
        *token = newer;
        skipped += 1;
    }
    skipped
}

async fn write_loop(
    store: Arc<dyn CursorStore>,
    retry: RetryPolicy,
    mut rx: mpsc::UnboundedReceiver<CursorToken>,
    stats: SharedStats,
) {
    while let Some(mut token) = rx.recv().await {
        let skipped = take_newest(&mut rx, &mut token);
        if skipped > 0 {
            tracing::trace!(skipped, "cursors coalesced");
            update(&stats, |s| s.coalesced += skipped);
        }

        let mut failures = 0u32;
        loop {
            match store.write(&token).await {
                Ok(()) => {
                    tracing::trace!(cursor = %token, location = store.location(), "cursor persisted");
                    update(&stats, |s| {
                        s.persisted += 1;
                        s.last_persisted = Some(token);
                    });
                    break;
                }
                Err(e) => {
                    failures += 1;
                    // A newer cursor is already queued: it supersedes this one.
                    if !rx.is_empty() {
                        tracing::warn!(error = %e, location = store.location(), "cursor write failed, superseded by newer cursor");
                        update(&stats, |s| s.failed += 1);
                        break;
                    }
                    match retry.next_delay(failures) {
                        Some(delay) => {
                            tracing::warn!(
                                error = %e,
                                attempt = failures,
                                delay_ms = delay.as_millis() as u64,
                                location = store.location(),
                                "cursor write failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            if !rx.is_empty() {
                                tracing::debug!(location = store.location(), "cursor superseded during retry backoff");
                                update(&stats, |s| s.failed += 1);
                                break;
                            }
                        }
                        None => {
                            tracing::error!(error = %e, attempts = failures, location = store.location(), "cursor write abandoned");
                            update(&stats, |s| s.failed += 1);
                            break;
                        }
                    }
                }
            }
        }
    }
}
