//! LeaseRenewer (C4): a periodic task driving the ledger and dispatch pump
//! to extend leases before expiry, in the shape of the teacher's ping-task
//! loop (`sleep` in a cancellable loop) generalized to do real work on each
//! tick instead of just pinging a stream.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::dispatch::{DispatchPump, Job};
use super::estimator::DeadlineEstimator;
use super::ledger::PendingLedger;
use crate::config::{LEASE_MARGIN, SubscriberConfig};

pub struct LeaseRenewer;

impl LeaseRenewer {
    /// Spawns the renewer loop, ticking every `LEASE_MARGIN / 2` until
    /// `cancel` fires. The final tick is skipped on cancellation (§4.4) —
    /// the façade is responsible for draining the last batch of acks.
    pub fn spawn(
        ledger: Arc<Mutex<PendingLedger>>,
        estimator: Arc<DeadlineEstimator>,
        pump: Arc<DispatchPump>,
        config: Arc<SubscriberConfig>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let period = LEASE_MARGIN / 2;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }

                let d = estimator.propose();
                let now = Instant::now();
                let need_extension = {
                    let mut guard = ledger.lock().await;
                    guard.snapshot_extensions(now, config.max_ack_extension_period, LEASE_MARGIN)
                };

                if need_extension.is_empty() {
                    continue;
                }

                let mut extended = Vec::with_capacity(need_extension.len());
                {
                    let mut guard = ledger.lock().await;
                    for ack_id in &need_extension {
                        if guard.extend(ack_id, d, now) {
                            extended.push(ack_id.clone());
                        }
                    }
                }

                trace!(count = extended.len(), deadline = ?d, "extending leases");
                pump.enqueue(Job::Modify(extended, d.as_secs() as i32));
            }
            trace!("lease renewer stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apiv1::SubscriberStub;
    use async_trait::async_trait;
    use google_cloud_googleapis::pubsub::v1::PullResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tonic::Status;

    #[derive(Debug, Default)]
    struct CountingStub {
        modify_calls: AtomicUsize,
    }

    #[async_trait]
    impl SubscriberStub for CountingStub {
        async fn pull(&self, _s: &str, _m: i32, _t: Duration) -> Result<PullResponse, Status> {
            unimplemented!()
        }
        async fn acknowledge(&self, _s: &str, _ids: Vec<String>, _t: Duration) -> Result<(), Status> {
            unimplemented!()
        }
        async fn modify_ack_deadline(
            &self,
            _s: &str,
            _ids: Vec<String>,
            _secs: i32,
            _t: Duration,
        ) -> Result<(), Status> {
            self.modify_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn seek_to_time(&self, _s: &str, _t: prost_types::Timestamp) -> Result<(), Status> {
            unimplemented!()
        }
        async fn get_subscription(
            &self,
            _s: &str,
        ) -> Result<google_cloud_googleapis::pubsub::v1::Subscription, Status> {
            unimplemented!()
        }
        async fn create_subscription(
            &self,
            _n: &str,
            _t: &str,
            _d: i32,
        ) -> Result<google_cloud_googleapis::pubsub::v1::Subscription, Status> {
            unimplemented!()
        }
        async fn delete_subscription(&self, _s: &str) -> Result<(), Status> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn dispatches_modify_for_messages_needing_extension() {
        let ledger = Arc::new(Mutex::new(PendingLedger::new()));
        let now = Instant::now();
        {
            let mut guard = ledger.lock().await;
            // Already within LEASE_MARGIN of its deadline, so the very first
            // tick (once it fires) would pick it up; here we drive the same
            // snapshot/extend/dispatch sequence the renewer's tick performs,
            // without waiting on the real timer.
            guard
                .admit(&[("A".into(), 1)], now, Duration::from_secs(1), 100)
                .unwrap();
        }

        let stub = Arc::new(CountingStub::default());
        let dyn_stub: Arc<dyn SubscriberStub> = stub.clone();
        let cancel = CancellationToken::new();
        let config = Arc::new(SubscriberConfig::default());
        let (pump, worker) = DispatchPump::spawn(dyn_stub, "sub".into(), config.clone(), cancel.clone());

        let need_extension = {
            let mut guard = ledger.lock().await;
            guard.snapshot_extensions(now, config.max_ack_extension_period, LEASE_MARGIN)
        };
        assert_eq!(need_extension, vec!["A".to_string()]);

        pump.flush_sync(Job::Modify(need_extension, 30)).await;
        assert_eq!(stub.modify_calls.load(Ordering::SeqCst), 1);

        cancel.cancel();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn stops_promptly_on_cancellation() {
        let ledger = Arc::new(Mutex::new(PendingLedger::new()));
        let stub: Arc<dyn SubscriberStub> = Arc::new(CountingStub::default());
        let cancel = CancellationToken::new();
        let config = Arc::new(SubscriberConfig::default());
        let (pump, _worker) = DispatchPump::spawn(stub, "sub".into(), config.clone(), cancel.clone());
        let estimator = Arc::new(DeadlineEstimator::new());

        let handle = LeaseRenewer::spawn(ledger, estimator, pump, config, cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("renewer should stop promptly after cancellation")
            .unwrap();
    }
}
