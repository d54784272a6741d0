//! Idempotency guard for financial events.
//!
//! Payment providers deliver webhooks at least once; this guard is the only
//! mechanism preventing duplicate financial side effects under retries. It is
//! an atomic "set if not exists" with a TTL: the first `acquire` for a key
//! within the TTL window returns true, every later one returns false and the
//! caller must short-circuit with an "already processed" result.
//!
//! The guard is checked BEFORE any mutating work. Store errors propagate -
//! a failed lookup is never treated as "already processed", and a missing
//! entry is never a reason to skip dedup.

use std::time::Duration;

use chrono::Utc;
use rusqlite::params;

use crate::db::DbPool;
use crate::error::Result;

/// TTL for sale-event keys. Must exceed the provider's maximum retry window
/// (Stripe retries for up to 3 days; 7 days is comfortable headroom).
pub const SALE_EVENT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Clone)]
pub struct IdempotencyGuard {
    pool: DbPool,
}

impl IdempotencyGuard {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Claim `namespace:key` for `ttl`. Returns true only for the first
    /// caller within the TTL window; the claim is a single atomic statement
    /// (no read-then-write), so concurrent retries race safely.
    ///
    /// An expired entry counts as absent and may be re-claimed.
    pub fn acquire(&self, namespace: &str, key: &str, ttl: Duration) -> Result<bool> {
        let conn = self.pool.get()?;
        let full_key = format!("{}:{}", namespace, key);
        let now = Utc::now().timestamp();
        let expires_at = now + ttl.as_secs() as i64;

        // SETNX-with-TTL: insert wins outright; on conflict the upsert only
        // takes effect when the existing entry has expired. `changes()` is 0
        // iff the key is still held.
        let affected = conn.execute(
            "INSERT INTO idempotency_keys (key, created_at, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE
               SET created_at = excluded.created_at, expires_at = excluded.expires_at
               WHERE idempotency_keys.expires_at <= ?2",
            params![full_key, now, expires_at],
        )?;
        Ok(affected > 0)
    }

    /// Drop expired keys. Called opportunistically from a startup/maintenance
    /// path; correctness never depends on it (acquire checks expiry itself).
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let deleted = conn.execute(
            "DELETE FROM idempotency_keys WHERE expires_at <= ?1",
            params![Utc::now().timestamp()],
        )?;
        Ok(deleted)
    }
}
