//! Dynamically issued credentials and their propagation delay.
//!
//! Freshly issued dynamic credentials (e.g. temporary object-storage keys)
//! are rejected by dependent systems for a short grace window. The session
//! never waits on its own; whoever hands the lease to a dependent system
//! calls [`DynamicLease::wait_until_ready`] first.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Default grace window before dependent systems accept a new lease.
pub const DEFAULT_PROPAGATION_DELAY: Duration = Duration::from_secs(10);

pub struct DynamicLease {
    pub lease_id: String,
    pub role: String,
    pub lease_duration: Duration,
    pub renewable: bool,
    /// Wall-clock issuance, for display
    pub issued_at: DateTime<Utc>,
    issued_instant: Instant,
    data: BTreeMap<String, SecretString>,
}

impl DynamicLease {
    pub fn new(
        lease_id: impl Into<String>,
        role: impl Into<String>,
        lease_duration: Duration,
        renewable: bool,
        data: BTreeMap<String, SecretString>,
    ) -> Self {
        Self {
            lease_id: lease_id.into(),
            role: role.into(),
            lease_duration,
            renewable,
            issued_at: Utc::now(),
            issued_instant: Instant::now(),
            data,
        }
    }

    /// A field of the issued credential (e.g. `access_key`).
    pub fn field(&self, name: &str) -> Option<&SecretString> {
        self.data.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    /// Time left until the lease is usable by dependent systems.
    pub fn remaining_delay(&self, propagation_delay: Duration) -> Duration {
        propagation_delay.saturating_sub(self.issued_instant.elapsed())
    }

    pub fn is_ready(&self, propagation_delay: Duration) -> bool {
        self.remaining_delay(propagation_delay).is_zero()
    }

    /// Block until `propagation_delay` has elapsed since issuance.
    ///
    /// Returns how long it actually slept.
    pub fn wait_until_ready(&self, propagation_delay: Duration) -> Duration {
        let remaining = self.remaining_delay(propagation_delay);
        if !remaining.is_zero() {
            log::info!(
                "waiting {:.1?} for lease {} to propagate",
                remaining,
                self.lease_id
            );
            std::thread::sleep(remaining);
        }
        remaining
    }

    pub fn is_expired(&self) -> bool {
        !self.lease_duration.is_zero() && self.issued_instant.elapsed() >= self.lease_duration
    }
}

impl fmt::Debug for DynamicLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicLease")
            .field("lease_id", &self.lease_id)
            .field("role", &self.role)
            .field("lease_duration", &self.lease_duration)
            .field("issued_at", &self.issued_at)
            .field("fields", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}
