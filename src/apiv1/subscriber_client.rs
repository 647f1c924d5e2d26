//! Thin, retrying wrapper around the generated pub/sub tonic client,
//! grounded on the teacher ecosystem's `apiv1::subscriber_client::SubscriberClient`
//! (one method per RPC, each taking its own call options) but narrowed to
//! exactly the operations §6 names and trimmed of the snapshot/push-config
//! surface the core does not need.

use std::time::Duration;

use async_trait::async_trait;
use google_cloud_googleapis::pubsub::v1::subscriber_client::SubscriberClient as InternalSubscriberClient;
use google_cloud_googleapis::pubsub::v1::{
    AcknowledgeRequest, DeleteSubscriptionRequest, GetSubscriptionRequest, ModifyAckDeadlineRequest, PullRequest,
    PullResponse, SeekRequest, Subscription,
};
use tonic::transport::Channel;
use tonic::{Code, Status};

/// The narrow RPC surface the core depends on (§6). Production code only
/// ever sees `dyn SubscriberStub`; tests substitute an in-memory fake.
#[async_trait]
pub trait SubscriberStub: Send + Sync + std::fmt::Debug {
    async fn pull(&self, subscription: &str, max_messages: i32, timeout: Duration) -> Result<PullResponse, Status>;

    async fn acknowledge(&self, subscription: &str, ack_ids: Vec<String>, timeout: Duration) -> Result<(), Status>;

    async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_ids: Vec<String>,
        ack_deadline_seconds: i32,
        timeout: Duration,
    ) -> Result<(), Status>;

    async fn seek_to_time(&self, subscription: &str, time: prost_types::Timestamp) -> Result<(), Status>;

    async fn get_subscription(&self, subscription: &str) -> Result<Subscription, Status>;

    async fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        ack_deadline_seconds: i32,
    ) -> Result<Subscription, Status>;

    /// Best-effort; callers are expected to spawn this and only log the result
    /// (§9 design notes — fire-and-forget is acceptable for unsubscribe).
    async fn delete_subscription(&self, subscription: &str) -> Result<(), Status>;
}

/// Wraps `google_cloud_googleapis`'s generated client over a concrete
/// [`tonic::transport::Channel`].
#[derive(Debug, Clone)]
pub struct SubscriberClient {
    inner: InternalSubscriberClient<Channel>,
}

impl SubscriberClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: InternalSubscriberClient::new(channel),
        }
    }

    async fn with_timeout<T>(
        timeout: Duration,
        fut: impl std::future::Future<Output = Result<T, Status>>,
    ) -> Result<T, Status> {
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Status::new(Code::DeadlineExceeded, "ack_request_timeout elapsed")),
        }
    }
}

#[async_trait]
impl SubscriberStub for SubscriberClient {
    async fn pull(&self, subscription: &str, max_messages: i32, timeout: Duration) -> Result<PullResponse, Status> {
        let mut client = self.inner.clone();
        #[allow(deprecated)]
        let req = PullRequest {
            subscription: subscription.to_string(),
            return_immediately: false,
            max_messages,
        };
        Self::with_timeout(timeout, async move { client.pull(req).await.map(|r| r.into_inner()) }).await
    }

    async fn acknowledge(&self, subscription: &str, ack_ids: Vec<String>, timeout: Duration) -> Result<(), Status> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        let mut client = self.inner.clone();
        let req = AcknowledgeRequest {
            subscription: subscription.to_string(),
            ack_ids,
        };
        Self::with_timeout(timeout, async move { client.acknowledge(req).await.map(|r| r.into_inner()) }).await
    }

    async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_ids: Vec<String>,
        ack_deadline_seconds: i32,
        timeout: Duration,
    ) -> Result<(), Status> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        let mut client = self.inner.clone();
        let req = ModifyAckDeadlineRequest {
            subscription: subscription.to_string(),
            ack_ids,
            ack_deadline_seconds,
        };
        Self::with_timeout(timeout, async move {
            client.modify_ack_deadline(req).await.map(|r| r.into_inner())
        })
        .await
    }

    async fn seek_to_time(&self, subscription: &str, time: prost_types::Timestamp) -> Result<(), Status> {
        let mut client = self.inner.clone();
        let req = SeekRequest {
            subscription: subscription.to_string(),
            target: Some(google_cloud_googleapis::pubsub::v1::seek_request::Target::Time(time)),
        };
        client.seek(req).await.map(|_| ())
    }

    async fn get_subscription(&self, subscription: &str) -> Result<Subscription, Status> {
        let mut client = self.inner.clone();
        let req = GetSubscriptionRequest {
            subscription: subscription.to_string(),
        };
        client.get_subscription(req).await.map(|r| r.into_inner())
    }

    async fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        ack_deadline_seconds: i32,
    ) -> Result<Subscription, Status> {
        let mut client = self.inner.clone();
        let req = Subscription {
            name: name.to_string(),
            topic: topic.to_string(),
            ack_deadline_seconds,
            ..Default::default()
        };
        client.create_subscription(req).await.map(|r| r.into_inner())
    }

    async fn delete_subscription(&self, subscription: &str) -> Result<(), Status> {
        let mut client = self.inner.clone();
        let req = DeleteSubscriptionRequest {
            subscription: subscription.to_string(),
        };
        client.delete_subscription(req).await.map(|r| r.into_inner())
    }
}
