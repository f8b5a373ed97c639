//! Lock manager
//!
//! Leased mutual exclusion over the shared document store. Acquisition is a
//! single conditional write that bumps the fencing token; renewal and every
//! lock-gated write must present the current token.
//!
//! Revocation is cooperative: a holder whose renewal fails must stop acting
//! as holder immediately.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::Clock;
use sluice_core::domain::lock::{AcquireOutcome, Lease, LockRecord, RenewOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::StoreResult;

/// Store trait for lock records
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Acquires `name` if it is free or its current lease expired at `now`
    ///
    /// Must be a single conditional write. The new record carries
    /// `previous_token + 1` (1 for a name never locked before).
    async fn try_acquire(
        &self,
        name: &str,
        holder_id: &str,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<AcquireOutcome>;

    /// Extends `lease` to `now + ttl` if its token is still current and unexpired
    async fn renew(&self, lease: &Lease, now: DateTime<Utc>) -> StoreResult<RenewOutcome>;

    /// Expires `lease` at `now` if its token is still current
    ///
    /// The record is kept so the fencing token keeps increasing.
    async fn release(&self, lease: &Lease, now: DateTime<Utc>) -> StoreResult<()>;

    /// Reads the current record for `name`
    async fn get(&self, name: &str) -> StoreResult<Option<LockRecord>>;
}

/// Converts a configured TTL into a chrono duration
pub fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::TimeDelta::MAX)
}

/// Lock manager with fail-closed semantics
///
/// Wraps a [`LockStore`] and a [`Clock`]. Store failures never grant or
/// extend a lease.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    /// Creates a new lock manager
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The clock used for every lease decision
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Tries to acquire `name` for `holder_id`
    ///
    /// Store unavailability is reported as `Busy`.
    pub async fn try_acquire(&self, name: &str, holder_id: &str, ttl: Duration) -> AcquireOutcome {
        let now = self.clock.now();

        match self
            .store
            .try_acquire(name, holder_id, chrono_ttl(ttl), now)
            .await
        {
            Ok(AcquireOutcome::Acquired(lease)) => {
                debug!(
                    lock = name,
                    holder = holder_id,
                    token = lease.fencing_token,
                    "Lease acquired"
                );
                AcquireOutcome::Acquired(lease)
            }
            Ok(AcquireOutcome::Busy) => AcquireOutcome::Busy,
            Err(e) => {
                warn!(lock = name, "Lock store error, treating lock as busy: {}", e);
                AcquireOutcome::Busy
            }
        }
    }

    /// Renews `lease` for another TTL
    ///
    /// A lease that already expired locally is never renewed, and a store
    /// failure is reported as `Expired` since ownership cannot be proven.
    pub async fn renew(&self, lease: &Lease) -> RenewOutcome {
        let now = self.clock.now();

        if !lease.is_valid(now) {
            warn!(
                lock = %lease.name,
                token = lease.fencing_token,
                "Lease expired before renewal"
            );
            return RenewOutcome::Expired;
        }

        match self.store.renew(lease, now).await {
            Ok(RenewOutcome::Renewed(renewed)) => {
                debug!(lock = %renewed.name, expires_at = %renewed.expires_at, "Lease renewed");
                RenewOutcome::Renewed(renewed)
            }
            Ok(RenewOutcome::Expired) => {
                warn!(
                    lock = %lease.name,
                    token = lease.fencing_token,
                    "Lease was reclaimed by another holder"
                );
                RenewOutcome::Expired
            }
            Err(e) => {
                warn!(lock = %lease.name, "Lock store error during renewal: {}", e);
                RenewOutcome::Expired
            }
        }
    }

    /// Releases `lease`
    ///
    /// Failures are logged only; the lease runs out on its own.
    pub async fn release(&self, lease: &Lease) {
        let now = self.clock.now();

        if let Err(e) = self.store.release(lease, now).await {
            warn!(lock = %lease.name, "Failed to release lease: {}", e);
        }
    }
}
