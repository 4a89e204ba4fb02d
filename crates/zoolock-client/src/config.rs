//! Client and per-lock configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of times an empty sibling listing is retried.
pub const DEFAULT_LISTING_RETRIES: u32 = 3;

/// Default delay between empty-listing retries in milliseconds.
pub const DEFAULT_LISTING_RETRY_DELAY_MS: u64 = 20;

/// Default lock root.
pub const DEFAULT_ROOT: &str = "/zoolock";

/// Configuration for a lock client.
///
/// The `default_*` values apply to `LockOptions` fields the caller leaves unset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockClientConfig {
    /// Root node under which contender nodes are created
    pub root: String,
    /// Retries when the sibling listing comes back empty
    pub listing_retries: u32,
    /// Delay between empty-listing retries in milliseconds
    pub listing_retry_delay_ms: u64,
    /// Acquisition timeout in milliseconds (0 = none)
    pub default_timeout_ms: u64,
    /// Admission cap (0 = unlimited)
    pub default_max_child_lock_limit: usize,
    /// Maximum hold time after acquisition in milliseconds (0 = none)
    pub default_lease_ms: u64,
}

impl Default for LockClientConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
            listing_retries: DEFAULT_LISTING_RETRIES,
            listing_retry_delay_ms: DEFAULT_LISTING_RETRY_DELAY_MS,
            default_timeout_ms: 0,
            default_max_child_lock_limit: 0,
            default_lease_ms: 0,
        }
    }
}

impl LockClientConfig {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            ..Default::default()
        }
    }

    /// Set empty-listing retry policy
    pub fn with_listing_retries(mut self, retries: u32, delay_ms: u64) -> Self {
        self.listing_retries = retries;
        self.listing_retry_delay_ms = delay_ms;
        self
    }

    /// Set the acquisition timeout used when a lock call does not give one
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Set the admission cap used when a lock call does not give one
    pub fn with_default_max_child_lock_limit(mut self, limit: usize) -> Self {
        self.default_max_child_lock_limit = limit;
        self
    }

    /// Set the lease used when a lock call does not give one
    pub fn with_default_lease_ms(mut self, lease_ms: u64) -> Self {
        self.default_lease_ms = lease_ms;
        self
    }

    pub fn listing_retry_delay(&self) -> Duration {
        Duration::from_millis(self.listing_retry_delay_ms)
    }

    /// Fill unset option fields from the configured defaults.
    pub fn resolve(&self, options: LockOptions) -> LockOptions {
        LockOptions {
            timeout: options.timeout.or_else(|| non_zero_ms(self.default_timeout_ms)),
            max_child_lock_limit: options
                .max_child_lock_limit
                .or((self.default_max_child_lock_limit > 0)
                    .then_some(self.default_max_child_lock_limit)),
            lease: options.lease.or_else(|| non_zero_ms(self.default_lease_ms)),
        }
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Options for a single `lock()` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LockOptions {
    /// Give up if the lock is not acquired within this duration
    pub timeout: Option<Duration>,
    /// Reject the call if this many contenders are already ahead of it
    pub max_child_lock_limit: Option<usize>,
    /// Force-release the lock this long after it was acquired
    pub lease: Option<Duration>,
}

impl LockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_timeout_ms(self, timeout_ms: u64) -> Self {
        self.with_timeout(Duration::from_millis(timeout_ms))
    }

    pub fn with_max_child_lock_limit(mut self, limit: usize) -> Self {
        self.max_child_lock_limit = Some(limit);
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Timeout, if armed. A zero duration counts as unset.
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|t| !t.is_zero())
    }

    /// Admission cap, if any. Zero counts as unlimited.
    pub fn effective_limit(&self) -> Option<usize> {
        self.max_child_lock_limit.filter(|l| *l > 0)
    }

    pub fn effective_lease(&self) -> Option<Duration> {
        self.lease.filter(|l| !l.is_zero())
    }
}
