use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use jitgate_application::AuditRepository;
use jitgate_core::{AppError, AppResult};
use jitgate_domain::{AuditEvent, AuditEventType};

/// PostgreSQL-backed repository for the append-only audit trail.
#[derive(Clone)]
pub struct PostgresAuditRepository {
    pool: PgPool,
}

impl PostgresAuditRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct AuditEventRow {
    request_id: Uuid,
    event_id: Uuid,
    event_time: DateTime<Utc>,
    event_type: String,
    account_id: String,
    channel_id: String,
    actor_chat_id: Option<String>,
    actor_email: String,
    details: serde_json::Value,
}

impl AuditEventRow {
    fn into_event(self) -> AppResult<AuditEvent> {
        let details: BTreeMap<String, String> = serde_json::from_value(self.details)
            .map_err(|error| {
                AppError::Internal(format!("failed to decode audit event details: {error}"))
            })?;

        Ok(AuditEvent {
            request_id: self.request_id,
            event_id: self.event_id,
            event_time: self.event_time,
            event_type: AuditEventType::parse(self.event_type.as_str())?,
            account_id: self.account_id,
            channel_id: self.channel_id,
            actor_chat_id: self.actor_chat_id,
            actor_email: self.actor_email,
            details,
        })
    }
}

#[async_trait]
impl AuditRepository for PostgresAuditRepository {
    async fn append(&self, event: &AuditEvent) -> AppResult<()> {
        let details = serde_json::to_value(&event.details).map_err(|error| {
            AppError::Internal(format!("failed to encode audit event details: {error}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO audit_events (
                request_id,
                event_sort,
                event_id,
                event_time,
                event_type,
                account_id,
                channel_id,
                actor_chat_id,
                actor_email,
                details
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.request_id)
        .bind(event.sort_key())
        .bind(event.event_id)
        .bind(event.event_time)
        .bind(event.event_type.as_str())
        .bind(event.account_id.as_str())
        .bind(event.channel_id.as_str())
        .bind(event.actor_chat_id.as_deref())
        .bind(event.actor_email.as_str())
        .bind(details)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to append audit event for request '{}': {error}",
                event.request_id
            ))
        })?;

        Ok(())
    }

    async fn list_by_request(&self, request_id: Uuid) -> AppResult<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditEventRow>(
            r#"
            SELECT
                request_id,
                event_id,
                event_time,
                event_type,
                account_id,
                channel_id,
                actor_chat_id,
                actor_email,
                details
            FROM audit_events
            WHERE request_id = $1
            ORDER BY event_sort ASC
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list audit events: {error}")))?;

        rows.into_iter().map(AuditEventRow::into_event).collect()
    }
}
