//! Lock collection
//!
//! Handles all database operations related to leases.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::domain::lock::{AcquireOutcome, Lease, LockRecord, RenewOutcome};

use super::PgStore;
use crate::error::StoreResult;
use crate::lock::LockStore;

#[async_trait]
impl LockStore for PgStore {
    async fn try_acquire(
        &self,
        name: &str,
        holder_id: &str,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<AcquireOutcome> {
        let expires_at = now + ttl;

        // Insert a fresh lock, or take over an expired one with the next token
        let token = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO locks (name, holder_id, acquired_at, expires_at, fencing_token)
            VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT (name) DO UPDATE
            SET holder_id = EXCLUDED.holder_id,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at,
                fencing_token = locks.fencing_token + 1
            WHERE locks.expires_at <= $3
            RETURNING fencing_token
            "#,
        )
        .bind(name)
        .bind(holder_id)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match token {
            Some(fencing_token) => AcquireOutcome::Acquired(Lease {
                name: name.to_string(),
                holder_id: holder_id.to_string(),
                fencing_token,
                acquired_at: now,
                expires_at,
                ttl,
            }),
            None => AcquireOutcome::Busy,
        })
    }

    async fn renew(&self, lease: &Lease, now: DateTime<Utc>) -> StoreResult<RenewOutcome> {
        let expires_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            UPDATE locks
            SET expires_at = $4
            WHERE name = $1 AND fencing_token = $2 AND holder_id = $3 AND expires_at > $5
            RETURNING expires_at
            "#,
        )
        .bind(&lease.name)
        .bind(lease.fencing_token)
        .bind(&lease.holder_id)
        .bind(now + lease.ttl)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match expires_at {
            Some(expires_at) => RenewOutcome::Renewed(lease.extended(expires_at)),
            None => RenewOutcome::Expired,
        })
    }

    async fn release(&self, lease: &Lease, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE locks
            SET expires_at = LEAST(expires_at, $3)
            WHERE name = $1 AND fencing_token = $2
            "#,
        )
        .bind(&lease.name)
        .bind(lease.fencing_token)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, name: &str) -> StoreResult<Option<LockRecord>> {
        let row = sqlx::query_as::<_, LockRow>(
            r#"
            SELECT name, holder_id, acquired_at, expires_at, fencing_token
            FROM locks
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LockRow {
    name: String,
    holder_id: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    fencing_token: i64,
}

impl From<LockRow> for LockRecord {
    fn from(row: LockRow) -> Self {
        LockRecord {
            name: row.name,
            holder_id: row.holder_id,
            acquired_at: row.acquired_at,
            expires_at: row.expires_at,
            fencing_token: row.fencing_token,
        }
    }
}
