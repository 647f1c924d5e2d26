//! End-to-end scenarios against a hand-written `SubscriberStub` fake,
//! exercising the façade's public surface the way the teacher's own
//! `#[tokio::test]`-driven integration tests exercise a fake transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use google_cloud_googleapis::pubsub::v1::{PubsubMessage, PullResponse, ReceivedMessage, Subscription};
use google_cloud_pubsub_consumer::apiv1::SubscriberStub;
use google_cloud_pubsub_consumer::{Subscriber, SubscriberConfig};
use tokio::sync::Mutex;
use tonic::{Code, Status};

fn received(ack_id: &str, offset: &str) -> ReceivedMessage {
    let mut attributes = HashMap::new();
    attributes.insert("offset".to_string(), offset.to_string());
    ReceivedMessage {
        ack_id: ack_id.to_string(),
        message: Some(PubsubMessage {
            data: b"payload".to_vec(),
            attributes,
            ..Default::default()
        }),
        delivery_attempt: 0,
    }
}

#[derive(Default)]
struct FakeStub {
    pull_calls: AtomicUsize,
    pull_script: Mutex<Vec<Result<Vec<ReceivedMessage>, Code>>>,
    ack_calls: Mutex<Vec<Vec<String>>>,
}

impl std::fmt::Debug for FakeStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeStub").finish()
    }
}

#[async_trait]
impl SubscriberStub for FakeStub {
    async fn pull(&self, _subscription: &str, _max: i32, _timeout: Duration) -> Result<PullResponse, Status> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.pull_script.lock().await;
        if script.is_empty() {
            return Ok(PullResponse {
                received_messages: Vec::new(),
            });
        }
        match script.remove(0) {
            Ok(received_messages) => Ok(PullResponse { received_messages }),
            Err(code) => Err(Status::new(code, "injected failure")),
        }
    }

    async fn acknowledge(&self, _subscription: &str, ack_ids: Vec<String>, _timeout: Duration) -> Result<(), Status> {
        self.ack_calls.lock().await.push(ack_ids);
        Ok(())
    }

    async fn modify_ack_deadline(
        &self,
        _subscription: &str,
        _ack_ids: Vec<String>,
        _seconds: i32,
        _timeout: Duration,
    ) -> Result<(), Status> {
        Ok(())
    }

    async fn seek_to_time(&self, _subscription: &str, _time: prost_types::Timestamp) -> Result<(), Status> {
        Ok(())
    }

    async fn get_subscription(&self, _subscription: &str) -> Result<Subscription, Status> {
        Ok(Subscription::default())
    }

    async fn create_subscription(&self, _name: &str, _topic: &str, _deadline: i32) -> Result<Subscription, Status> {
        Err(Status::new(Code::AlreadyExists, "unused in this test"))
    }

    async fn delete_subscription(&self, _subscription: &str) -> Result<(), Status> {
        Ok(())
    }
}

#[ctor::ctor]
fn init() {
    let _ = tracing_subscriber::fmt().try_init();
}

async fn connect(stub: Arc<FakeStub>, config: SubscriberConfig) -> Subscriber {
    let dyn_stub: Arc<dyn SubscriberStub> = stub;
    Subscriber::connect(dyn_stub, "proj", "orders", "billing", config)
        .await
        .unwrap()
}

#[tokio::test]
async fn transient_pull_failure_then_success() {
    let stub = Arc::new(FakeStub::default());
    *stub.pull_script.lock().await = vec![
        Err(Code::Unavailable),
        Ok(vec![received("A", "1")]),
    ];

    let sub = connect(
        stub.clone(),
        SubscriberConfig {
            retry_backoff: Duration::from_millis(10),
            ..Default::default()
        },
    )
    .await;
    sub.start_async().await.unwrap();

    let batch = sub.pull(Duration::from_secs(2)).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].ack_id, "A");
    assert!(stub.pull_calls.load(Ordering::SeqCst) >= 2);

    sub.stop_async().await.unwrap();
}

#[tokio::test]
async fn shutdown_drains_outstanding_acks() {
    let stub = Arc::new(FakeStub::default());
    *stub.pull_script.lock().await = vec![Ok(vec![
        received("A", "1"),
        received("B", "2"),
        received("C", "3"),
    ])];

    let sub = connect(stub.clone(), SubscriberConfig::default()).await;
    sub.start_async().await.unwrap();

    let batch = sub.pull(Duration::from_secs(1)).await.unwrap();
    assert_eq!(batch.len(), 3);

    // No manual commit: stop_async is responsible for draining these.
    sub.stop_async().await.unwrap();

    let calls = stub.ack_calls.lock().await;
    assert_eq!(calls.len(), 1);
    let mut acked = calls[0].clone();
    acked.sort();
    assert_eq!(acked, vec!["A".to_string(), "B".to_string(), "C".to_string()]);
}

#[tokio::test]
async fn pause_suppresses_new_pulls_but_drains_available_buffer() {
    let stub = Arc::new(FakeStub::default());
    *stub.pull_script.lock().await = vec![Ok(vec![received("A", "1")])];

    let sub = connect(stub.clone(), SubscriberConfig::default()).await;
    sub.pause().await;
    sub.start_async().await.unwrap();

    // Paused: no batch should arrive even though the stub has one queued.
    let batch = sub.pull(Duration::from_millis(100)).await.unwrap();
    assert!(batch.is_empty());

    sub.resume().await;
    let batch = sub.pull(Duration::from_secs(1)).await.unwrap();
    assert_eq!(batch.len(), 1);

    sub.stop_async().await.unwrap();
}
