//! Crate-wide error taxonomy (C9).
//!
//! Every fallible operation in this crate returns [`Error`]. [`Kind`]
//! classifies a [`tonic::Status`] into the buckets the rest of the runtime
//! reasons about: retry here, surface to the caller, or treat as a
//! not-found that may warrant auto-creation.

use tonic::{Code, Status};

/// The classification used to drive retry/propagation decisions.
///
/// This is deliberately a separate type from [`Error`]: several distinct
/// `Error` variants (a failed `pull`, a failed `acknowledge`, ...) can share
/// the same `Kind`, and components only need the `Kind` to decide what to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Transient; retry with backoff.
    Retriable,
    /// `get_subscription` returned `NOT_FOUND`.
    NotFound,
    /// A message attribute was fatally malformed on the pull path: the
    /// `offset` attribute wasn't a valid non-negative base-10 integer, or the
    /// `key` attribute wasn't valid base64.
    UnparsableOffset,
    /// The ledger is full; back-pressure the pull loop.
    CapacityExceeded,
    /// Non-retriable server rejection; subscriber should move to `Failed`.
    Terminal,
    /// Caller-initiated cancellation.
    Cancelled,
}

impl Kind {
    /// Classifies a gRPC status code the way every RPC-calling component
    /// (`DispatchPump`, `PullLoop`, `apiv1::SubscriberClient`) needs to.
    pub fn of_code(code: Code) -> Kind {
        match code {
            Code::Unavailable | Code::DeadlineExceeded | Code::ResourceExhausted | Code::Aborted | Code::Internal => {
                Kind::Retriable
            }
            Code::NotFound => Kind::NotFound,
            Code::Cancelled => Kind::Cancelled,
            _ => Kind::Terminal,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("rpc {method} failed: {status}")]
    Rpc { method: &'static str, status: Status },

    #[error("offset attribute {raw:?} on ack_id {ack_id} is not a valid non-negative base-10 integer")]
    UnparsableOffset { ack_id: String, raw: String },

    #[error("key attribute {raw:?} on ack_id {ack_id} is not valid base64")]
    InvalidKeyEncoding { ack_id: String, raw: String },

    #[error("pending ledger capacity exceeded: {outstanding} outstanding >= {limit} limit")]
    CapacityExceeded { outstanding: usize, limit: usize },

    #[error("subscription {0} not found and allow_subscription_creation is false")]
    SubscriptionNotFound(String),

    #[error("invalid subscriber configuration: {0}")]
    InvalidConfig(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("subscriber is in terminal state {state:?} and cannot serve new requests")]
    Terminated { state: &'static str },
}

impl Error {
    pub fn kind(&self) -> Kind {
        match self {
            Error::Rpc { status, .. } => Kind::of_code(status.code()),
            Error::UnparsableOffset { .. } => Kind::UnparsableOffset,
            Error::InvalidKeyEncoding { .. } => Kind::UnparsableOffset,
            Error::CapacityExceeded { .. } => Kind::CapacityExceeded,
            Error::SubscriptionNotFound(_) => Kind::NotFound,
            Error::InvalidConfig(_) => Kind::Terminal,
            Error::Cancelled => Kind::Cancelled,
            Error::Terminated { .. } => Kind::Terminal,
        }
    }

    /// True if the operation that produced this error is safe to retry
    /// without further caller involvement.
    pub fn is_retriable(&self) -> bool {
        self.kind() == Kind::Retriable
    }

    pub(crate) fn rpc(method: &'static str, status: Status) -> Error {
        Error::Rpc { method, status }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_retriable_codes() {
        for code in [Code::Unavailable, Code::DeadlineExceeded, Code::ResourceExhausted] {
            assert_eq!(Kind::of_code(code), Kind::Retriable, "{code:?}");
        }
    }

    #[test]
    fn classifies_terminal_codes() {
        for code in [Code::PermissionDenied, Code::Unauthenticated, Code::InvalidArgument] {
            assert_eq!(Kind::of_code(code), Kind::Terminal, "{code:?}");
        }
    }

    #[test]
    fn rpc_error_inherits_status_kind() {
        let err = Error::rpc("pull", Status::unavailable("try again"));
        assert!(err.is_retriable());
    }
}
