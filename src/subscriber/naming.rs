//! Subscription naming and auto-creation (§6), grounded on the teacher
//! ecosystem's `Subscription::exists`/`Subscription::create` pair.

use tonic::Code;

use crate::apiv1::SubscriberStub;
use crate::error::Error;

/// `projects/<project>/subscriptions/<topic>_<group_id>`.
pub fn subscription_name(project: &str, topic: &str, group_id: &str) -> String {
    format!("projects/{project}/subscriptions/{topic}_{group_id}")
}

pub fn topic_name(project: &str, topic: &str) -> String {
    format!("projects/{project}/topics/{topic}")
}

/// Ensures the subscription exists, creating it against `topic` if
/// `get_subscription` returns `NOT_FOUND` and `allow_creation` is set.
/// Any other failure from `get_subscription` is surfaced as-is.
pub async fn ensure_subscription(
    stub: &dyn SubscriberStub,
    subscription: &str,
    topic: &str,
    allow_creation: bool,
    created_deadline_seconds: i32,
) -> Result<(), Error> {
    match stub.get_subscription(subscription).await {
        Ok(_) => Ok(()),
        Err(status) if status.code() == Code::NotFound => {
            if !allow_creation {
                return Err(Error::SubscriptionNotFound(subscription.to_string()));
            }
            stub.create_subscription(subscription, topic, created_deadline_seconds)
                .await
                .map(|_| ())
                .map_err(|status| Error::rpc("create_subscription", status))
        }
        Err(status) => Err(Error::rpc("get_subscription", status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_subscription_and_topic_names() {
        assert_eq!(
            subscription_name("proj", "orders", "billing"),
            "projects/proj/subscriptions/orders_billing"
        );
        assert_eq!(topic_name("proj", "orders"), "projects/proj/topics/orders");
    }
}
