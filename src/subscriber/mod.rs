//! Subscriber façade (C7): the public operations over a single subscription,
//! wiring together the background components (C1–C6) the way the teacher's
//! `Subscription` type owns its receive/ping task pair.

mod auto_commit;
mod dispatch;
mod estimator;
mod ledger;
mod message;
mod naming;
mod pull_loop;
mod renewer;

pub use message::PulledMessage;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::apiv1::SubscriberStub;
use crate::config::SubscriberConfig;
use crate::error::{Error, Result};

use auto_commit::AutoCommitter;
use dispatch::{DispatchPump, Job};
use estimator::DeadlineEstimator;
use ledger::PendingLedger;
use pull_loop::{Available, PullLoop};

/// Lifecycle state of §4.7's state machine. Stored as an atomic byte so
/// `pull`/`commit` can check it without taking the façade's async lock.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Terminated = 4,
    Failed = 5,
}

impl State {
    fn from_u8(v: u8) -> State {
        match v {
            0 => State::New,
            1 => State::Starting,
            2 => State::Running,
            3 => State::Stopping,
            4 => State::Terminated,
            _ => State::Failed,
        }
    }
}

/// Drains outstanding acks on `stop_async` for up to this long before
/// abandoning the rest to server-side redelivery (§4.7, §5).
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

struct Tasks {
    renewer: tokio::task::JoinHandle<()>,
    puller: tokio::task::JoinHandle<()>,
    auto_committer: Option<tokio::task::JoinHandle<()>>,
}

/// The subscriber runtime for a single subscription. Owns its
/// [`PendingLedger`], [`DispatchPump`], [`DeadlineEstimator`], and background
/// tasks exclusively; none are shared across subscriptions.
pub struct Subscriber {
    stub: Arc<dyn SubscriberStub>,
    subscription: String,
    config: Arc<SubscriberConfig>,

    state: AtomicU8,
    ledger: Arc<Mutex<PendingLedger>>,
    estimator: Arc<DeadlineEstimator>,
    pump: Arc<DispatchPump>,
    available: Arc<Mutex<Available>>,
    notify: Arc<Notify>,
    commit_reset: Arc<Notify>,
    cancel: CancellationToken,
    dispatch_worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
    tasks: Mutex<Option<Tasks>>,
}

impl Subscriber {
    /// Resolves (and optionally auto-creates) the subscription, then
    /// constructs a `Subscriber` in the `New` state. Does not start any
    /// background task — call [`Subscriber::start_async`] for that.
    pub async fn connect(
        stub: Arc<dyn SubscriberStub>,
        project: &str,
        topic: &str,
        group_id: &str,
        config: SubscriberConfig,
    ) -> Result<Self> {
        let config = config.build()?;
        let subscription = naming::subscription_name(project, topic, group_id);
        let topic_name = naming::topic_name(project, topic);
        naming::ensure_subscription(
            stub.as_ref(),
            &subscription,
            &topic_name,
            config.allow_subscription_creation,
            config.created_subscription_deadline.as_secs() as i32,
        )
        .await?;

        let cancel = CancellationToken::new();
        let config = Arc::new(config);
        let (pump, dispatch_worker) =
            DispatchPump::spawn(stub.clone(), subscription.clone(), config.clone(), cancel.clone());

        Ok(Self {
            stub,
            subscription,
            config,
            state: AtomicU8::new(State::New as u8),
            ledger: Arc::new(Mutex::new(PendingLedger::new())),
            estimator: Arc::new(DeadlineEstimator::new()),
            pump,
            available: Arc::new(Mutex::new(Available::default())),
            notify: Arc::new(Notify::new()),
            commit_reset: Arc::new(Notify::new()),
            cancel,
            dispatch_worker: Mutex::new(Some(dispatch_worker)),
            tasks: Mutex::new(None),
        })
    }

    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, s: State) {
        self.state.store(s as u8, Ordering::SeqCst);
    }

    fn fail(&self, err: Error) -> Error {
        warn!(error = %err, "subscriber entering Failed state");
        self.set_state(State::Failed);
        err
    }

    /// The server-side subscription resource name.
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Spawns the lease renewer, pull loop, and (if configured) auto
    /// committer. Transitions `New -> Starting -> Running`.
    pub async fn start_async(&self) -> Result<()> {
        if self.state() != State::New {
            return Err(Error::Terminated {
                state: "subscriber already started",
            });
        }
        self.set_state(State::Starting);

        let puller = PullLoop::spawn(
            self.stub.clone(),
            self.subscription.clone(),
            self.ledger.clone(),
            self.available.clone(),
            self.notify.clone(),
            self.config.clone(),
            self.cancel.clone(),
        );

        let renewer = renewer::LeaseRenewer::spawn(
            self.ledger.clone(),
            self.estimator.clone(),
            self.pump.clone(),
            self.config.clone(),
            self.cancel.clone(),
        );

        let auto_committer = if self.config.auto_commit {
            Some(AutoCommitter::spawn(
                self.ledger.clone(),
                self.pump.clone(),
                self.estimator.clone(),
                self.config.auto_commit_interval,
                self.commit_reset.clone(),
                self.cancel.clone(),
            ))
        } else {
            None
        };

        *self.tasks.lock().await = Some(Tasks {
            renewer,
            puller,
            auto_committer,
        });

        self.set_state(State::Running);
        info!(subscription = %self.subscription, "subscriber started");
        Ok(())
    }

    /// Returns up to `max_pull_records` already-admitted messages, blocking
    /// at most `timeout` for the pull loop to admit more (§4.5).
    pub async fn pull(&self, timeout: Duration) -> Result<Vec<PulledMessage>> {
        if let State::Failed | State::Terminated = self.state() {
            return Err(Error::Terminated {
                state: "subscriber is not running",
            });
        }

        let deadline = Instant::now() + timeout;
        loop {
            let (batch, fatal) = {
                let mut guard = self.available.lock().await;
                let take = guard.buffer.len().min(self.config.max_pull_records);
                let batch: Vec<_> = guard.buffer.drain(..take).collect();
                (batch, guard.fatal.take())
            };

            if let Some(err) = fatal {
                return Err(self.fail(err));
            }
            if !batch.is_empty() {
                return Ok(batch);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = self.notify.notified() => continue,
                _ = tokio::time::sleep(remaining) => return Ok(Vec::new()),
            }
        }
    }

    /// Marks every currently-admitted message for acknowledgement. When
    /// `sync`, blocks until every ack_id in scope has an observed RPC
    /// outcome (§4.7, §8 "Sync commit completion").
    pub async fn commit(&self, sync: bool) -> Result<()> {
        self.commit_reset.notify_waiters();
        let ack_ids = {
            let mut guard = self.ledger.lock().await;
            let outstanding = guard.outstanding_ack_ids();
            guard.request_ack(&outstanding);
            guard.drain_terminals()
        };
        self.dispatch_terminals(ack_ids, sync).await;
        Ok(())
    }

    /// As [`Subscriber::commit`], but restricted to messages with
    /// `synthetic_offset <= offset`.
    pub async fn commit_before(&self, sync: bool, offset: i64) -> Result<()> {
        self.commit_reset.notify_waiters();
        let ack_ids = {
            let mut guard = self.ledger.lock().await;
            guard.request_ack_before(offset);
            guard.drain_terminals()
        };
        self.dispatch_terminals(ack_ids, sync).await;
        Ok(())
    }

    async fn dispatch_terminals(&self, terminals: Vec<ledger::Terminal>, sync: bool) {
        let now = Instant::now();
        let mut acks = Vec::new();
        let mut nacks = Vec::new();
        for t in terminals {
            match t.kind {
                ledger::TerminalKind::Ack => {
                    self.estimator.observe(now.saturating_duration_since(t.admit_time));
                    acks.push(t.ack_id);
                }
                ledger::TerminalKind::Nack => nacks.push(t.ack_id),
            }
        }
        if sync {
            self.pump.flush_sync(Job::Ack(acks)).await;
            self.pump.flush_sync(Job::Nack(nacks)).await;
        } else {
            self.pump.enqueue(Job::Ack(acks));
            self.pump.enqueue(Job::Nack(nacks));
        }
    }

    /// Directly delegates to the `seek` RPC (§9 — no "lazy seek" queuing;
    /// that belongs to an external collaborator).
    pub async fn seek(&self, time: prost_types::Timestamp) -> Result<()> {
        self.stub
            .seek_to_time(&self.subscription, time)
            .await
            .map_err(|e| Error::rpc("seek", e))
    }

    /// Suppresses new pull RPCs. Already-admitted messages already in the
    /// Available buffer are still returned normally by `pull` (§4.5, §9).
    pub async fn pause(&self) {
        self.available.lock().await.paused = true;
    }

    pub async fn resume(&self) {
        self.available.lock().await.paused = false;
        self.notify.notify_waiters();
    }

    /// Cancels background tasks, drains outstanding acks with a bounded
    /// deadline, and transitions to `Terminated`.
    pub async fn stop_async(&self) -> Result<()> {
        self.set_state(State::Stopping);
        self.cancel.cancel();

        if let Some(tasks) = self.tasks.lock().await.take() {
            let _ = tasks.renewer.await;
            let _ = tasks.puller.await;
            if let Some(ac) = tasks.auto_committer {
                let _ = ac.await;
            }
        }

        let ack_ids = {
            let mut guard = self.ledger.lock().await;
            let outstanding = guard.outstanding_ack_ids();
            guard.request_ack(&outstanding);
            guard.drain_terminals()
        };
        let now = Instant::now();
        let ids: Vec<String> = ack_ids
            .into_iter()
            .filter(|t| t.kind == ledger::TerminalKind::Ack)
            .map(|t| {
                self.estimator.observe(now.saturating_duration_since(t.admit_time));
                t.ack_id
            })
            .collect();

        if !ids.is_empty() {
            let flush = self.pump.flush_sync(Job::Ack(ids));
            if tokio::time::timeout(DRAIN_DEADLINE, flush).await.is_err() {
                warn!("drain deadline elapsed before all acks were flushed");
            }
        }

        if let Some(worker) = self.dispatch_worker.lock().await.take() {
            let _ = tokio::time::timeout(DRAIN_DEADLINE, worker).await;
        }

        if self.config.allow_subscription_deletion {
            let stub = self.stub.clone();
            let subscription = self.subscription.clone();
            tokio::spawn(async move {
                if let Err(e) = stub.delete_subscription(&subscription).await {
                    warn!(error = %e, %subscription, "best-effort delete_subscription failed");
                }
            });
        }

        self.set_state(State::Terminated);
        info!(subscription = %self.subscription, "subscriber stopped");
        Ok(())
    }
}
