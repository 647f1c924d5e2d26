//! Subscriber configuration (C10): the options table of the specification's
//! data model section, with validated defaults in the style of the teacher's
//! `LeaseExtensionSetting`/`SubscriberConfig` `Default` implementations.

use std::time::Duration;

use crate::error::Error;

/// Lower/upper bound on any single lease extension, mirrored from
/// `LeaseExtensionSetting::MIN_DURATION_PER_LEASE_EXTENSION` /
/// `MAX_DURATION_PER_LEASE_EXTENSION` in the upstream lease manager.
pub const MIN_LEASE: Duration = Duration::from_secs(10);
pub const MAX_LEASE: Duration = Duration::from_secs(600);

/// Margin before a lease expiry at which the renewer considers a message
/// due for extension.
pub const LEASE_MARGIN: Duration = Duration::from_secs(60);

/// Upper bound on outstanding messages relative to `max_pull_records`.
pub const LEDGER_CAPACITY_MULTIPLIER: usize = 2;

/// Coalescing window for the dispatch pump's ack/modify-ack batching.
pub const DISPATCH_COALESCE_WINDOW: Duration = Duration::from_millis(100);

/// Maximum number of ack/modify-ack RPC batches in flight at once.
pub const MAX_INFLIGHT_BATCHES: usize = 4;

/// Validated, defaulted configuration consumed by every component in
/// `subscriber::*`. Constructed once per [`crate::subscriber::Subscriber`]
/// and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub auto_commit: bool,
    pub auto_commit_interval: Duration,
    pub max_pull_records: usize,
    pub max_ack_extension_period: Duration,
    pub max_per_request_changes: usize,
    pub retry_backoff: Duration,
    pub ack_request_timeout: Duration,
    pub created_subscription_deadline: Duration,
    pub allow_subscription_creation: bool,
    pub allow_subscription_deletion: bool,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            auto_commit: false,
            auto_commit_interval: Duration::from_secs(1),
            max_pull_records: 1000,
            max_ack_extension_period: Duration::from_secs(60 * 60),
            max_per_request_changes: 2500,
            retry_backoff: Duration::from_millis(100),
            ack_request_timeout: Duration::from_secs(10),
            created_subscription_deadline: Duration::from_secs(60),
            allow_subscription_creation: false,
            allow_subscription_deletion: false,
        }
    }
}

impl SubscriberConfig {
    /// Validates cross-field constraints eagerly, instead of letting a
    /// nonsensical value (e.g. `max_per_request_changes == 0`) silently wedge
    /// the dispatch pump the first time it tries to batch anything.
    pub fn build(self) -> Result<Self, Error> {
        if self.max_pull_records == 0 {
            return Err(Error::InvalidConfig("max_pull_records must be > 0".into()));
        }
        if self.max_per_request_changes == 0 {
            return Err(Error::InvalidConfig("max_per_request_changes must be > 0".into()));
        }
        if self.max_ack_extension_period < MIN_LEASE {
            return Err(Error::InvalidConfig(format!(
                "max_ack_extension_period must be >= {MIN_LEASE:?}"
            )));
        }
        if self.auto_commit && self.auto_commit_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "auto_commit_interval must be > 0 when auto_commit is enabled".into(),
            ));
        }
        Ok(self)
    }
}
