// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audit::{AuditService, ControllerEventType};
use crate::error::ManagerError;
use crate::session::directory::{DirectoryError, SessionDirectory};
use crate::session::{
    HarnessKind, Session, SessionRuntime, TransportHints, TransportMode,
};

/// Response to `register`.
pub struct RegisterOutcome {
    pub session: Session,
    pub transport_hints: TransportHints,
}

/// Response to `attach_owned`.
pub struct AttachOwnedOutcome {
    pub attached_count: usize,
    pub duplicates: usize,
}

/// Durable session store plus the transient runtime cache.
///
/// Runtime updates never touch the session row's version; only registration
/// and attach transitions cause a durable write (spec §4.1).
pub struct SessionRegistry {
    pool: PgPool,
    manager_url: String,
    directory: Arc<dyn SessionDirectory>,
    audit: Arc<AuditService>,
    runtime: RwLock<HashMap<Uuid, SessionRuntime>>,
}

impl SessionRegistry {
    pub fn new(
        pool: PgPool,
        manager_url: String,
        directory: Arc<dyn SessionDirectory>,
        audit: Arc<AuditService>,
    ) -> Self {
        Self { pool, manager_url, directory, audit, runtime: RwLock::new(HashMap::new()) }
    }

    /// Idempotent on `(private_beach_id, origin_session_id)`. `private_beach_id`
    /// is optional at registration time — a session may register before it is
    /// attached to any beach.
    pub async fn register(
        &self,
        private_beach_id: Option<&str>,
        origin_session_id: &str,
        harness_kind: HarnessKind,
        capabilities: serde_json::Value,
        metadata: serde_json::Value,
    ) -> Result<RegisterOutcome, ManagerError> {
        let existing: Option<SessionRow> = sqlx::query_as(
            r#"SELECT * FROM session WHERE private_beach_id IS NOT DISTINCT FROM $1 AND origin_session_id = $2"#,
        )
        .bind(private_beach_id)
        .bind(origin_session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(err = %e, "session lookup failed");
            ManagerError::Unavailable
        })?;

        let (row, is_new) = if let Some(row) = existing {
            (row, false)
        } else {
            let id = Uuid::new_v4();
            let row: SessionRow = sqlx::query_as(
                r#"
                INSERT INTO session
                    (id, private_beach_id, origin_session_id, harness_kind, capabilities,
                     transport_mode, fast_path_ready, join_code, metadata, created_at, attached_at)
                VALUES ($1, $2, $3, $4, $5, 'http_fallback', false, NULL, $6, now(), NULL)
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(private_beach_id)
            .bind(origin_session_id)
            .bind(harness_kind_str(harness_kind))
            .bind(&capabilities)
            .bind(&metadata)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(err = %e, "session insert failed");
                ManagerError::Unavailable
            })?;
            (row, true)
        };

        let session: Session = row.into();

        if is_new {
            self.audit
                .record(
                    session.id,
                    ControllerEventType::Registered,
                    None,
                    None,
                    None,
                    json!({"origin_session_id": origin_session_id, "private_beach_id": private_beach_id}),
                )
                .await
                .map_err(|e| {
                    tracing::error!(err = %e, "audit write failed for registration");
                    ManagerError::Unavailable
                })?;
        }

        let transport_hints = TransportHints::new(&self.manager_url, session.id);
        Ok(RegisterOutcome { session, transport_hints })
    }

    pub async fn attach_by_code(
        &self,
        private_beach_id: &str,
        session_id: Uuid,
        code: &str,
        requester: &str,
    ) -> Result<Session, ManagerError> {
        match self.directory.verify_code(session_id, code).await {
            Ok(true) => {}
            Ok(false) => return Err(ManagerError::Forbidden),
            Err(DirectoryError::Unreachable) => return Err(ManagerError::Unavailable),
            Err(DirectoryError::Invalid) => return Err(ManagerError::Forbidden),
        }

        let row: SessionRow = sqlx::query_as(
            r#"
            UPDATE session
            SET private_beach_id = $1, attached_at = now()
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(private_beach_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(err = %e, "attach-by-code update failed");
            ManagerError::Unavailable
        })?
        .ok_or(ManagerError::SessionNotFound)?;

        let session: Session = row.into();

        self.audit
            .record(
                session.id,
                ControllerEventType::Attached,
                Some(requester),
                None,
                None,
                json!({"method": "code", "private_beach_id": private_beach_id}),
            )
            .await
            .map_err(|_| ManagerError::Unavailable)?;

        Ok(session)
    }

    pub async fn attach_owned(
        &self,
        private_beach_id: &str,
        session_ids: &[Uuid],
        requester: &str,
    ) -> Result<AttachOwnedOutcome, ManagerError> {
        let mut attached = 0usize;
        let mut duplicates = 0usize;

        for &session_id in session_ids {
            match self.directory.verify_ownership(session_id, requester).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(DirectoryError::Unreachable) => return Err(ManagerError::Unavailable),
                Err(DirectoryError::Invalid) => continue,
            }

            let row: Option<AttachOwnedRow> = sqlx::query_as(
                r#"
                WITH prev AS (
                    SELECT attached_at FROM session WHERE id = $2 FOR UPDATE
                )
                UPDATE session
                SET private_beach_id = $1,
                    attached_at = CASE WHEN attached_at IS NULL THEN now() ELSE attached_at END
                FROM prev
                WHERE session.id = $2
                RETURNING session.*, prev.attached_at AS was_attached
                "#,
            )
            .bind(private_beach_id)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|_| ManagerError::Unavailable)?;

            let Some(row) = row else { continue };
            let already_attached = row.was_attached.is_some();
            if already_attached {
                duplicates += 1;
                continue;
            }

            attached += 1;
            self.audit
                .record(
                    session_id,
                    ControllerEventType::Attached,
                    Some(requester),
                    None,
                    None,
                    json!({"method": "owned", "private_beach_id": private_beach_id}),
                )
                .await
                .map_err(|_| ManagerError::Unavailable)?;
        }

        Ok(AttachOwnedOutcome { attached_count: attached, duplicates })
    }

    /// List sessions attached to `private_beach_id`.
    pub async fn list(&self, private_beach_id: &str) -> Result<Vec<Session>, ManagerError> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"SELECT * FROM session WHERE private_beach_id = $1 AND attached_at IS NOT NULL"#,
        )
        .bind(private_beach_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|_| ManagerError::Unavailable)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Session, ManagerError> {
        let row: Option<SessionRow> = sqlx::query_as(r#"SELECT * FROM session WHERE id = $1"#)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|_| ManagerError::Unavailable)?;

        row.map(Into::into).ok_or(ManagerError::SessionNotFound)
    }

    pub async fn set_fast_path_ready(
        &self,
        session_id: Uuid,
        ready: bool,
    ) -> Result<(), ManagerError> {
        sqlx::query(r#"UPDATE session SET fast_path_ready = $1 WHERE id = $2"#)
            .bind(ready)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|_| ManagerError::Unavailable)?;
        Ok(())
    }

    pub async fn set_transport_mode(
        &self,
        session_id: Uuid,
        mode: TransportMode,
    ) -> Result<(), ManagerError> {
        sqlx::query(r#"UPDATE session SET transport_mode = $1 WHERE id = $2"#)
            .bind(transport_mode_str(mode))
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|_| ManagerError::Unavailable)?;
        Ok(())
    }

    /// Updates the in-memory runtime cache only; the durable
    /// `session_runtime` row is written by [`Self::flush_runtime_to_db`] on a
    /// timer, not on every call (§4.1: "observed, not authoritative").
    pub async fn update_runtime(
        &self,
        session_id: Uuid,
        health: Option<chrono::DateTime<chrono::Utc>>,
        snapshot_ref: Option<String>,
    ) {
        let mut runtime = self.runtime.write().await;
        let entry = runtime.entry(session_id).or_default();
        if let Some(h) = health {
            entry.last_health_at = Some(h);
        }
        if let Some(s) = snapshot_ref {
            entry.last_snapshot_ref = Some(s);
        }
    }

    pub async fn runtime_snapshot(&self, session_id: Uuid) -> SessionRuntime {
        self.runtime.read().await.get(&session_id).cloned().unwrap_or_default()
    }

    pub async fn mark_offline(&self, session_id: Uuid, offline: bool) {
        let mut runtime = self.runtime.write().await;
        runtime.entry(session_id).or_default().offline = offline;
    }

    /// Snapshot of every session id with a runtime entry, for the stale
    /// session sweeper to scan without holding the lock during I/O.
    pub async fn runtime_ids(&self) -> Vec<Uuid> {
        self.runtime.read().await.keys().copied().collect()
    }

    /// Upsert the in-memory runtime cache into the durable `session_runtime`
    /// table. Called periodically rather than on every `update_runtime` call
    /// (§4.1: frequent health pings should not each cost a DB round trip).
    pub async fn flush_runtime_to_db(&self) -> Result<usize, ManagerError> {
        let snapshot: Vec<(Uuid, SessionRuntime)> = {
            let runtime = self.runtime.read().await;
            runtime.iter().map(|(id, rt)| (*id, rt.clone())).collect()
        };

        for (session_id, rt) in &snapshot {
            sqlx::query(
                r#"
                INSERT INTO session_runtime (session_id, last_health_at, last_snapshot_ref, offline)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (session_id) DO UPDATE SET
                    last_health_at = EXCLUDED.last_health_at,
                    last_snapshot_ref = EXCLUDED.last_snapshot_ref,
                    offline = EXCLUDED.offline
                "#,
            )
            .bind(session_id)
            .bind(rt.last_health_at)
            .bind(&rt.last_snapshot_ref)
            .bind(rt.offline)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, session_id = %session_id, "session_runtime flush failed");
                ManagerError::Unavailable
            })?;
        }

        Ok(snapshot.len())
    }
}

fn harness_kind_str(k: HarnessKind) -> &'static str {
    match k {
        HarnessKind::Terminal => "terminal",
        HarnessKind::Gui => "gui",
        HarnessKind::Custom => "custom",
    }
}

fn transport_mode_str(m: TransportMode) -> &'static str {
    match m {
        TransportMode::FastPath => "fast_path",
        TransportMode::HttpFallback => "http_fallback",
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    private_beach_id: Option<String>,
    origin_session_id: String,
    harness_kind: String,
    capabilities: serde_json::Value,
    transport_mode: String,
    fast_path_ready: bool,
    join_code: Option<String>,
    metadata: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
    attached_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(sqlx::FromRow)]
struct AttachOwnedRow {
    #[sqlx(flatten)]
    session: SessionRow,
    was_attached: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            private_beach_id: row.private_beach_id,
            origin_session_id: row.origin_session_id,
            harness_kind: match row.harness_kind.as_str() {
                "gui" => HarnessKind::Gui,
                "custom" => HarnessKind::Custom,
                _ => HarnessKind::Terminal,
            },
            capabilities: row.capabilities,
            transport_mode: match row.transport_mode.as_str() {
                "fast_path" => TransportMode::FastPath,
                _ => TransportMode::HttpFallback,
            },
            fast_path_ready: row.fast_path_ready,
            join_code: row.join_code,
            metadata: row.metadata,
            created_at: row.created_at,
            attached_at: row.attached_at,
        }
    }
}
