//! apiv1 client layer (C8): the narrow interface of §6 over the generated
//! pub/sub stubs, in the vein of the teacher's `apiv1::subscriber_client`.

pub mod subscriber_client;

pub use subscriber_client::{SubscriberClient, SubscriberStub};
