//! AutoCommitter (C6): a periodic task that flushes acks at
//! `auto_commit_interval`, mirroring the shape of the teacher's ping-task
//! sleep loop but acting on the ledger instead of a stream keep-alive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::dispatch::{DispatchPump, Job};
use super::estimator::DeadlineEstimator;
use super::ledger::PendingLedger;

pub struct AutoCommitter;

impl AutoCommitter {
    /// Spawns the auto-commit loop. `reset` is signalled by a manual
    /// `commit()` to restart the period timer (§4.6 — "manual commit resets
    /// the period timer").
    pub fn spawn(
        ledger: Arc<Mutex<PendingLedger>>,
        pump: Arc<DispatchPump>,
        estimator: Arc<DeadlineEstimator>,
        interval: Duration,
        reset: Arc<Notify>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = reset.notified() => continue,
                    _ = tokio::time::sleep(interval) => {}
                }

                let ack_ids = {
                    let mut guard = ledger.lock().await;
                    let outstanding = guard.outstanding_ack_ids();
                    guard.request_ack(&outstanding);
                    guard.drain_terminals()
                };
                let now = Instant::now();
                let ids: Vec<String> = ack_ids
                    .into_iter()
                    .filter(|t| t.kind == super::ledger::TerminalKind::Ack)
                    .map(|t| {
                        estimator.observe(now.saturating_duration_since(t.admit_time));
                        t.ack_id
                    })
                    .collect();
                if !ids.is_empty() {
                    trace!(count = ids.len(), "auto-committing outstanding messages");
                    pump.enqueue(Job::Ack(ids));
                }
            }
            trace!("auto committer stopped");
        })
    }
}
