//! Streaming-pull consumer runtime for a single Google Cloud Pub/Sub
//! subscription: a partitioned-log-style `pull`/`commit`/`seek` surface over
//! the native ack-deadline/lease model, in the shape of the teacher
//! ecosystem's `google-cloud-rust` subscriber.
//!
//! The public entry point is [`subscriber::Subscriber`], constructed with
//! [`subscriber::Subscriber::connect`] and an [`apiv1::SubscriberStub`]
//! (almost always [`apiv1::SubscriberClient`], a thin wrapper around the
//! generated tonic/prost stubs). Everything else in this crate is either a
//! background component the façade owns, or ambient support (errors,
//! backoff, configuration).

pub mod apiv1;
pub mod backoff;
pub mod config;
pub mod error;
pub mod subscriber;

pub use config::SubscriberConfig;
pub use error::{Error, Kind, Result};
pub use subscriber::{PulledMessage, Subscriber};
