//! Message conventions (§6): decoding the wire-level `PubsubMessage` into the
//! caller-facing [`PulledMessage`], and the bookkeeping [`Envelope`] the
//! ledger keeps while a message is outstanding.

use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use google_cloud_googleapis::pubsub::v1::PubsubMessage;

use crate::error::Error;

const KEY_ATTRIBUTE: &str = "key";
const OFFSET_ATTRIBUTE: &str = "offset";

/// A single lease state, monotone per invariant 4 of §3: `Outstanding` may
/// move to `AckPending`, `NackPending`, or `Expired`; `AckPending` may move
/// to `Acked`; nothing moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Outstanding,
    AckPending,
    NackPending,
    Acked,
    Expired,
}

/// A message as surfaced to the caller from [`crate::subscriber::Subscriber::pull`].
#[derive(Debug, Clone)]
pub struct PulledMessage {
    pub ack_id: String,
    pub value: Vec<u8>,
    pub key: Option<Vec<u8>>,
    pub synthetic_offset: i64,
    pub publish_time_millis: i64,
    pub delivery_attempt: Option<usize>,
}

/// Decodes the `key` and `offset` attributes per §6's message conventions.
///
/// A missing `offset` attribute yields `0`; an attribute present but not a
/// valid non-negative base-10 integer is a fatal [`Error::UnparsableOffset`]
/// on the pull path (§7, and the negative-offset open question resolved in
/// the design notes).
pub fn decode(ack_id: &str, message: PubsubMessage, delivery_attempt: Option<usize>) -> Result<PulledMessage, Error> {
    let key = match message.attributes.get(KEY_ATTRIBUTE) {
        Some(b64) => Some(BASE64.decode(b64).map_err(|_| Error::InvalidKeyEncoding {
            ack_id: ack_id.to_string(),
            raw: b64.clone(),
        })?),
        None => None,
    };

    let synthetic_offset = match message.attributes.get(OFFSET_ATTRIBUTE) {
        None => 0,
        Some(raw) => {
            let parsed: i64 = raw.parse().map_err(|_| Error::UnparsableOffset {
                ack_id: ack_id.to_string(),
                raw: raw.clone(),
            })?;
            if parsed < 0 {
                return Err(Error::UnparsableOffset {
                    ack_id: ack_id.to_string(),
                    raw: raw.clone(),
                });
            }
            parsed
        }
    };

    let publish_time_millis = message
        .publish_time
        .map(|t| t.seconds * 1000 + (t.nanos as i64) / 1_000_000)
        .unwrap_or(0);

    Ok(PulledMessage {
        ack_id: ack_id.to_string(),
        value: message.data,
        key,
        synthetic_offset,
        publish_time_millis,
        delivery_attempt,
    })
}

/// The ledger's private bookkeeping record for one outstanding message
/// (§3 "Message envelope"). Never surfaced to callers directly.
#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    pub(crate) ack_id: String,
    pub(crate) synthetic_offset: i64,
    pub(crate) admit_time: Instant,
    pub(crate) current_deadline: Instant,
    pub(crate) extensions_used: std::time::Duration,
    pub(crate) state: State,
}

impl Envelope {
    pub(crate) fn new(ack_id: String, synthetic_offset: i64, now: Instant, initial_lease: std::time::Duration) -> Self {
        Self {
            ack_id,
            synthetic_offset,
            admit_time: now,
            current_deadline: now + initial_lease,
            extensions_used: std::time::Duration::ZERO,
            state: State::Outstanding,
        }
    }
}
