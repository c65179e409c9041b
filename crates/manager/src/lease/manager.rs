// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AuditService, ControllerEventType};
use crate::error::ManagerError;
use crate::lease::ControllerLease;

/// Arbitrates who may drive a session and mints the tokens that authenticate
/// each action. Multiple concurrent leases per session are normal; there is
/// no cross-lease mutual exclusion (spec §4.2).
pub struct LeaseManager {
    pool: PgPool,
    audit: Arc<AuditService>,
}

impl LeaseManager {
    pub fn new(pool: PgPool, audit: Arc<AuditService>) -> Self {
        Self { pool, audit }
    }

    pub async fn acquire(
        &self,
        session_id: Uuid,
        requester: &str,
        ttl: chrono::Duration,
        reason: Option<&str>,
    ) -> Result<ControllerLease, ManagerError> {
        let id = Uuid::new_v4();
        let expires_at = chrono::Utc::now() + ttl;

        let row: LeaseRow = sqlx::query_as(
            r#"
            INSERT INTO controller_lease
                (id, session_id, controller_account, issuing_account, issued_at, expires_at, reason, revoked_at, expired_at)
            VALUES ($1, $2, $3, $3, now(), $4, $5, NULL, NULL)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(session_id)
        .bind(requester)
        .bind(expires_at)
        .bind(reason)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(err = %e, "lease acquire failed");
            ManagerError::Unavailable
        })?;

        let lease: ControllerLease = row.into();

        self.audit
            .record(
                session_id,
                ControllerEventType::Acquired,
                Some(requester),
                Some(requester),
                Some(lease.id),
                json!({"reason": reason}),
            )
            .await
            .map_err(|_| ManagerError::Unavailable)?;

        Ok(lease)
    }

    /// Selects a lease by id and classifies it into the three distinct
    /// failure modes `renew` must report (spec §4.2): unknown, revoked,
    /// expired. `Ok` means the lease is live as of `now`.
    async fn classify_lease(&self, lease_token: Uuid, now: chrono::DateTime<chrono::Utc>) -> Result<LeaseRow, ManagerError> {
        let row: Option<LeaseRow> = sqlx::query_as(r#"SELECT * FROM controller_lease WHERE id = $1"#)
            .bind(lease_token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|_| ManagerError::Unavailable)?;

        let row = row.ok_or(ManagerError::LeaseNotFound)?;
        if row.revoked_at.is_some() {
            return Err(ManagerError::LeaseRevoked);
        }
        if row.expires_at <= now {
            return Err(ManagerError::LeaseExpired);
        }
        Ok(row)
    }

    /// Extends expiry in place; never allocates a new token. A sibling
    /// lease's expiry must be untouched. Distinguishes `unknown`, `revoked`,
    /// and `expired` as three separate failure modes (spec §4.2) rather than
    /// collapsing them into one not-found-shaped error.
    pub async fn renew(
        &self,
        lease_token: Uuid,
        ttl: chrono::Duration,
    ) -> Result<ControllerLease, ManagerError> {
        let now = chrono::Utc::now();
        let new_expiry = now + ttl;

        self.classify_lease(lease_token, now).await?;

        let row: Option<LeaseRow> = sqlx::query_as(
            r#"
            UPDATE controller_lease
            SET expires_at = $2
            WHERE id = $1 AND revoked_at IS NULL AND expires_at > $3
            RETURNING *
            "#,
        )
        .bind(lease_token)
        .bind(new_expiry)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| ManagerError::Unavailable)?;

        let row = match row {
            Some(row) => row,
            // Classified as live just above but the update still missed the
            // row: it was revoked or crossed expiry between the two queries.
            // Re-classify against the current state to report which.
            None => {
                return Err(match self.classify_lease(lease_token, chrono::Utc::now()).await {
                    Err(e) => e,
                    Ok(_) => ManagerError::Unavailable,
                });
            }
        };

        let lease: ControllerLease = row.into();
        self.audit
            .record(
                lease.session_id,
                ControllerEventType::Renewed,
                lease.controller_account.as_deref(),
                Some(&lease.issuing_account),
                Some(lease.id),
                json!({}),
            )
            .await
            .map_err(|_| ManagerError::Unavailable)?;

        Ok(lease)
    }

    /// Idempotent: releasing an already-released lease is a no-op success.
    pub async fn release(&self, lease_token: Uuid) -> Result<(), ManagerError> {
        let row: Option<LeaseRow> = sqlx::query_as(
            r#"
            UPDATE controller_lease
            SET revoked_at = now()
            WHERE id = $1 AND revoked_at IS NULL
            RETURNING *
            "#,
        )
        .bind(lease_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| ManagerError::Unavailable)?;

        if let Some(row) = row {
            let lease: ControllerLease = row.into();
            self.audit
                .record(
                    lease.session_id,
                    ControllerEventType::Released,
                    lease.controller_account.as_deref(),
                    Some(&lease.issuing_account),
                    Some(lease.id),
                    json!({}),
                )
                .await
                .map_err(|_| ManagerError::Unavailable)?;
        }

        Ok(())
    }

    /// Mass-revokes all active leases for a session ("emergency stop").
    pub async fn revoke(&self, session_id: Uuid, reason: &str) -> Result<usize, ManagerError> {
        let rows: Vec<LeaseRow> = sqlx::query_as(
            r#"
            UPDATE controller_lease
            SET revoked_at = now()
            WHERE session_id = $1 AND revoked_at IS NULL
            RETURNING *
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|_| ManagerError::Unavailable)?;

        for row in &rows {
            let lease: ControllerLease = row.clone().into();
            self.audit
                .record(
                    session_id,
                    ControllerEventType::Revoked,
                    lease.controller_account.as_deref(),
                    Some(&lease.issuing_account),
                    Some(lease.id),
                    json!({"reason": reason}),
                )
                .await
                .map_err(|_| ManagerError::Unavailable)?;
        }

        Ok(rows.len())
    }

    /// Returns the lease if the token is live, unrevoked, unexpired, and its
    /// embedded `session_id` equals `target_session_id`.
    pub async fn validate(
        &self,
        lease_token: Uuid,
        target_session_id: Uuid,
    ) -> Result<ControllerLease, ManagerError> {
        let row: Option<LeaseRow> = sqlx::query_as(r#"SELECT * FROM controller_lease WHERE id = $1"#)
            .bind(lease_token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|_| ManagerError::Unavailable)?;

        let Some(row) = row else { return Err(ManagerError::MissingLease) };
        let lease: ControllerLease = row.into();

        if lease.revoked_at.is_some() {
            return Err(ManagerError::MissingLease);
        }
        if lease.expires_at <= chrono::Utc::now() {
            return Err(ManagerError::MissingLease);
        }
        if lease.session_id != target_session_id {
            return Err(ManagerError::TargetMismatch);
        }

        Ok(lease)
    }

    /// Scan for expired leases and mark `expired_at` for audit/cleanup
    /// bookkeeping. Must never set `revoked_at` — expiry is not revocation.
    pub async fn sweep_expired(&self, grace: chrono::Duration) -> Result<usize, ManagerError> {
        let cutoff = chrono::Utc::now() - grace;
        let result = sqlx::query(
            r#"
            UPDATE controller_lease
            SET expired_at = now()
            WHERE revoked_at IS NULL AND expired_at IS NULL AND expires_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|_| ManagerError::Unavailable)?;

        Ok(result.rows_affected() as usize)
    }
}

#[derive(sqlx::FromRow, Clone)]
struct LeaseRow {
    id: Uuid,
    session_id: Uuid,
    controller_account: Option<String>,
    issuing_account: String,
    issued_at: chrono::DateTime<chrono::Utc>,
    expires_at: chrono::DateTime<chrono::Utc>,
    reason: Option<String>,
    revoked_at: Option<chrono::DateTime<chrono::Utc>>,
    expired_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<LeaseRow> for ControllerLease {
    fn from(row: LeaseRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            controller_account: row.controller_account,
            issuing_account: row.issuing_account,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            reason: row.reason,
            revoked_at: row.revoked_at,
            expired_at: row.expired_at,
        }
    }
}
