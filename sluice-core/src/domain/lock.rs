//! Lease and lock domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted lock state, one per lock name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub name: String,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Incremented on every successful acquisition, never reset
    pub fencing_token: i64,
}

impl LockRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A holder's proof of ownership
///
/// Valid only while `now < expires_at`. Every write gated by the lock must
/// carry `fencing_token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub name: String,
    pub holder_id: String,
    pub fencing_token: i64,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ttl: chrono::Duration,
}

impl Lease {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// True once half of the TTL has been consumed
    pub fn renew_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - self.ttl / 2
    }

    /// The same lease with a new expiry
    pub fn extended(&self, expires_at: DateTime<Utc>) -> Lease {
        Lease {
            expires_at,
            ..self.clone()
        }
    }
}

/// Result of an acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(Lease),
    /// Held by someone else (or the store could not confirm otherwise)
    Busy,
}

/// Result of a renewal attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed(Lease),
    /// The lease is gone; the caller must stop acting as holder
    Expired,
}
