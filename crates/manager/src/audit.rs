// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only audit log (`controller_event`). Writes happen before the
//! triggering response is returned to the caller (spec invariant: the audit
//! record is durable before any side effect it describes is visible).

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerEventType {
    Registered,
    Attached,
    Acquired,
    Renewed,
    Released,
    Preempted,
    Revoked,
    GateDrop,
    AckTimeout,
}

impl ControllerEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Attached => "attached",
            Self::Acquired => "acquired",
            Self::Renewed => "renewed",
            Self::Released => "released",
            Self::Preempted => "preempted",
            Self::Revoked => "revoked",
            Self::GateDrop => "gate_drop",
            Self::AckTimeout => "ack_timeout",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub event_type: String,
    pub controller_id: Option<String>,
    pub issuing_account: Option<String>,
    pub lease_id: Option<Uuid>,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    pub payload: serde_json::Value,
}

/// Append-only audit service backed by the `controller_event` table.
pub struct AuditService {
    pool: PgPool,
}

impl AuditService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        session_id: Uuid,
        event_type: ControllerEventType,
        controller_id: Option<&str>,
        issuing_account: Option<&str>,
        lease_id: Option<Uuid>,
        payload: serde_json::Value,
    ) -> Result<ControllerEvent, sqlx::Error> {
        let row: ControllerEventRow = sqlx::query_as(
            r#"
            INSERT INTO controller_event
                (id, session_id, event_type, controller_id, issuing_account, lease_id, occurred_at, payload)
            VALUES ($1, $2, $3, $4, $5, $6, now(), $7)
            RETURNING id, session_id, event_type, controller_id, issuing_account, lease_id, occurred_at, payload
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(event_type.as_str())
        .bind(controller_id)
        .bind(issuing_account)
        .bind(lease_id)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    pub async fn list_for_session(
        &self,
        session_id: Uuid,
        limit: i64,
        before: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<ControllerEvent>, sqlx::Error> {
        let rows: Vec<ControllerEventRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, event_type, controller_id, issuing_account, lease_id, occurred_at, payload
            FROM controller_event
            WHERE session_id = $1 AND ($2::timestamptz IS NULL OR occurred_at < $2)
            ORDER BY occurred_at DESC
            LIMIT $3
            "#,
        )
        .bind(session_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(sqlx::FromRow)]
struct ControllerEventRow {
    id: Uuid,
    session_id: Uuid,
    event_type: String,
    controller_id: Option<String>,
    issuing_account: Option<String>,
    lease_id: Option<Uuid>,
    occurred_at: chrono::DateTime<chrono::Utc>,
    payload: serde_json::Value,
}

impl From<ControllerEventRow> for ControllerEvent {
    fn from(row: ControllerEventRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            event_type: row.event_type,
            controller_id: row.controller_id,
            issuing_account: row.issuing_account,
            lease_id: row.lease_id,
            occurred_at: row.occurred_at,
            payload: row.payload,
        }
    }
}
