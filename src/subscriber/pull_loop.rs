//! PullLoop (C5): replenishes the caller-facing Available buffer,
//! grounded on the teacher ecosystem's `Subscription::pull` (a direct,
//! blocking `PullRequest`) rather than the streaming variant, per this
//! document's §6 narrow interface.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::ledger::PendingLedger;
use super::message::{decode, PulledMessage};
use crate::apiv1::SubscriberStub;
use crate::backoff::Backoff;
use crate::config::{SubscriberConfig, LEDGER_CAPACITY_MULTIPLIER};
use crate::error::{Error, Kind};

/// Shared, caller-visible state: the ordered buffer of admitted-but-not-yet-
/// returned messages, plus the latest fatal error the loop observed (§7
/// propagation policy — background tasks never propagate directly).
#[derive(Default)]
pub(crate) struct Available {
    pub(crate) buffer: VecDeque<PulledMessage>,
    pub(crate) fatal: Option<Error>,
    /// Caller-requested suppression via `Subscriber::pause`/`resume`.
    pub(crate) paused: bool,
    /// Internal back-pressure from `CAPACITY_EXCEEDED` (§7) — distinct from
    /// `paused` so a capacity overflow doesn't require the caller to notice
    /// and call `resume()`; the pull loop clears this itself once the ledger
    /// drains back under capacity.
    pub(crate) capacity_paused: bool,
}

pub struct PullLoop;

impl PullLoop {
    /// Spawns the pull loop. `notify` is signalled every time the buffer
    /// gains messages (or a fatal error is recorded), waking blocked
    /// `pull(timeout)` callers.
    pub fn spawn(
        stub: Arc<dyn SubscriberStub>,
        subscription: String,
        ledger: Arc<Mutex<PendingLedger>>,
        available: Arc<Mutex<Available>>,
        notify: Arc<Notify>,
        config: Arc<SubscriberConfig>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let capacity_limit = config.max_pull_records * LEDGER_CAPACITY_MULTIPLIER;

        tokio::spawn(async move {
            let mut backoff = Backoff::new(config.retry_backoff);
            loop {
                if cancel.is_cancelled() {
                    break;
                }

                let (paused, capacity_paused, buffer_nonempty) = {
                    let guard = available.lock().await;
                    (guard.paused, guard.capacity_paused, !guard.buffer.is_empty())
                };

                if capacity_paused {
                    let under_capacity = ledger.lock().await.len() < capacity_limit;
                    if under_capacity {
                        available.lock().await.capacity_paused = false;
                    } else {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => continue,
                        }
                    }
                }

                if paused || buffer_nonempty {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => continue,
                    }
                }

                let response = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = stub.pull(&subscription, config.max_pull_records as i32, config.ack_request_timeout) => r,
                };

                match response {
                    Ok(resp) => {
                        backoff.reset();
                        let now = Instant::now();
                        let mut decoded = Vec::with_capacity(resp.received_messages.len());
                        let mut fatal = None;
                        for rm in resp.received_messages {
                            let Some(msg) = rm.message else { continue };
                            let delivery_attempt = (rm.delivery_attempt > 0).then_some(rm.delivery_attempt as usize);
                            match decode(&rm.ack_id, msg, delivery_attempt) {
                                Ok(pulled) => decoded.push(pulled),
                                Err(e) => {
                                    fatal = Some(e);
                                    break;
                                }
                            }
                        }

                        if let Some(e) = fatal {
                            let mut guard = available.lock().await;
                            guard.fatal = Some(e);
                            drop(guard);
                            notify.notify_waiters();
                            continue;
                        }

                        if decoded.is_empty() {
                            continue;
                        }

                        let ack_ids: Vec<(String, i64)> =
                            decoded.iter().map(|m| (m.ack_id.clone(), m.synthetic_offset)).collect();

                        let admit_result = {
                            let mut guard = ledger.lock().await;
                            guard.admit(&ack_ids, now, initial_lease(&config), capacity_limit)
                        };

                        match admit_result {
                            Ok(()) => {
                                trace!(count = decoded.len(), "admitted pulled messages");
                                let mut guard = available.lock().await;
                                guard.buffer.extend(decoded);
                                drop(guard);
                                notify.notify_waiters();
                            }
                            Err(e @ Error::CapacityExceeded { .. }) => {
                                warn!(error = %e, "ledger over capacity, pausing admission until it drains");
                                let mut guard = available.lock().await;
                                guard.capacity_paused = true;
                                drop(guard);
                            }
                            Err(e) => {
                                let mut guard = available.lock().await;
                                guard.fatal = Some(e);
                                drop(guard);
                                notify.notify_waiters();
                            }
                        }
                    }
                    Err(status) => {
                        let kind = Kind::of_code(status.code());
                        if kind == Kind::Retriable {
                            let delay = backoff.next_delay();
                            debug!(error = %status, ?delay, "retriable pull failure, retrying");
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(delay) => {}
                            }
                        } else {
                            let mut guard = available.lock().await;
                            guard.fatal = Some(Error::rpc("pull", status));
                            drop(guard);
                            notify.notify_waiters();
                        }
                    }
                }
            }
            trace!("pull loop stopped");
        })
    }
}

fn initial_lease(config: &SubscriberConfig) -> std::time::Duration {
    config.created_subscription_deadline
}
