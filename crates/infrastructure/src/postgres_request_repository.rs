use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use jitgate_application::{RequestPage, RequestQuery, RequestRepository, StatusUpdate};
use jitgate_core::{AppError, AppResult};
use jitgate_domain::{AccessRequest, RequestStatus};

/// PostgreSQL-backed repository for access requests.
///
/// The conditional status update is a single `UPDATE ... WHERE status = $n`;
/// the row count discriminates success from a stale status or a missing row.
#[derive(Clone)]
pub struct PostgresRequestRepository {
    pool: PgPool,
}

impl PostgresRequestRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct RequestRow {
    request_id: Uuid,
    account_id: String,
    channel_id: String,
    requester_chat_id: String,
    requester_email: String,
    ticket_ref: Option<String>,
    reason: Option<String>,
    requested_duration_minutes: i32,
    status: String,
    created_at: DateTime<Utc>,
    approved_at: Option<DateTime<Utc>>,
    denied_at: Option<DateTime<Utc>>,
    grant_time: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
    expired_at: Option<DateTime<Utc>>,
    end_time: DateTime<Utc>,
    approver_chat_id: Option<String>,
    approver_email: Option<String>,
    identity_user_id: String,
    error_details: Option<String>,
}

impl RequestRow {
    fn into_request(self) -> AppResult<AccessRequest> {
        Ok(AccessRequest {
            request_id: self.request_id,
            account_id: self.account_id,
            channel_id: self.channel_id,
            requester_chat_id: self.requester_chat_id,
            requester_email: self.requester_email,
            ticket_ref: self.ticket_ref,
            reason: self.reason,
            requested_duration_minutes: self.requested_duration_minutes,
            status: RequestStatus::parse(self.status.as_str())?,
            created_at: self.created_at,
            approved_at: self.approved_at,
            denied_at: self.denied_at,
            grant_time: self.grant_time,
            revoked_at: self.revoked_at,
            expired_at: self.expired_at,
            end_time: self.end_time,
            approver_chat_id: self.approver_chat_id,
            approver_email: self.approver_email,
            identity_user_id: self.identity_user_id,
            error_details: self.error_details,
        })
    }
}

const SELECT_REQUEST: &str = r#"
    SELECT
        request_id,
        account_id,
        channel_id,
        requester_chat_id,
        requester_email,
        ticket_ref,
        reason,
        requested_duration_minutes,
        status,
        created_at,
        approved_at,
        denied_at,
        grant_time,
        revoked_at,
        expired_at,
        end_time,
        approver_chat_id,
        approver_email,
        identity_user_id,
        error_details
    FROM access_requests
"#;

/// Encodes the keyset pagination cursor: `created_at|request_id`.
fn encode_next_token(request: &AccessRequest) -> String {
    format!(
        "{}|{}",
        request.created_at.to_rfc3339(),
        request.request_id
    )
}

/// Decodes a pagination cursor back into its `(created_at, request_id)` pair.
fn decode_next_token(token: &str) -> AppResult<(DateTime<Utc>, Uuid)> {
    let (created_at, request_id) = token
        .split_once('|')
        .ok_or_else(|| AppError::Validation(format!("invalid next_token '{token}'")))?;
    let created_at = DateTime::parse_from_rfc3339(created_at)
        .map_err(|error| AppError::Validation(format!("invalid next_token timestamp: {error}")))?
        .with_timezone(&Utc);
    let request_id = Uuid::parse_str(request_id)
        .map_err(|error| AppError::Validation(format!("invalid next_token id: {error}")))?;
    Ok((created_at, request_id))
}

#[async_trait]
impl RequestRepository for PostgresRequestRepository {
    async fn create(&self, request: &AccessRequest) -> AppResult<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO access_requests (
                request_id,
                account_id,
                channel_id,
                requester_chat_id,
                requester_email,
                ticket_ref,
                reason,
                requested_duration_minutes,
                status,
                created_at,
                end_time,
                identity_user_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (request_id)
            DO NOTHING
            "#,
        )
        .bind(request.request_id)
        .bind(request.account_id.as_str())
        .bind(request.channel_id.as_str())
        .bind(request.requester_chat_id.as_str())
        .bind(request.requester_email.as_str())
        .bind(request.ticket_ref.as_deref())
        .bind(request.reason.as_deref())
        .bind(request.requested_duration_minutes)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.end_time)
        .bind(request.identity_user_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to create request '{}': {error}",
                request.request_id
            ))
        })?;

        if inserted.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "request {} already exists",
                request.request_id
            )));
        }

        Ok(())
    }

    async fn find(&self, request_id: Uuid) -> AppResult<Option<AccessRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(&format!(
            "{SELECT_REQUEST} WHERE request_id = $1"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to load request: {error}")))?;

        row.map(RequestRow::into_request).transpose()
    }

    async fn conditional_update_status(
        &self,
        request_id: Uuid,
        expected: RequestStatus,
        update: StatusUpdate,
    ) -> AppResult<()> {
        let target = update.target_status();
        let updated = sqlx::query(
            r#"
            UPDATE access_requests
            SET
                status = $3,
                approved_at = COALESCE($4, approved_at),
                denied_at = COALESCE($5, denied_at),
                grant_time = COALESCE($6, grant_time),
                revoked_at = COALESCE($7, revoked_at),
                expired_at = COALESCE($8, expired_at),
                approver_chat_id = COALESCE($9, approver_chat_id),
                approver_email = COALESCE($10, approver_email),
                error_details = COALESCE($11, error_details)
            WHERE request_id = $1
              AND status = $2
            "#,
        )
        .bind(request_id)
        .bind(expected.as_str())
        .bind(target.as_str())
        .bind(update.approved_at)
        .bind(update.denied_at)
        .bind(update.grant_time)
        .bind(update.revoked_at)
        .bind(update.expired_at)
        .bind(update.approver_chat_id.as_deref())
        .bind(update.approver_email.as_deref())
        .bind(update.error_details.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to update request '{request_id}' status: {error}"
            ))
        })?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        // Zero rows: distinguish a stale status from a missing request.
        let current = sqlx::query_scalar::<_, String>(
            "SELECT status FROM access_requests WHERE request_id = $1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to re-read request '{request_id}' status: {error}"
            ))
        })?;

        match current {
            Some(status) => Err(AppError::Conflict(format!(
                "request {request_id} is in status {status}, expected {}",
                expected.as_str()
            ))),
            None => Err(AppError::NotFound(format!(
                "request {request_id} not found"
            ))),
        }
    }

    async fn query(&self, query: &RequestQuery) -> AppResult<RequestPage> {
        let cursor = query
            .next_token
            .as_deref()
            .map(decode_next_token)
            .transpose()?;
        let (cursor_created_at, cursor_request_id) = match cursor {
            Some((created_at, request_id)) => (Some(created_at), Some(request_id)),
            None => (None, None),
        };

        let limit = query.limit.clamp(1, 200) as i64;

        // Fetch one extra row to know whether a further page exists.
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            {SELECT_REQUEST}
            WHERE ($1::TEXT IS NULL OR channel_id = $1)
              AND ($2::TEXT IS NULL OR account_id = $2)
              AND ($3::TEXT IS NULL OR requester_email = $3)
              AND ($4::TEXT IS NULL OR status = $4)
              AND ($5::TIMESTAMPTZ IS NULL OR created_at >= $5)
              AND ($6::TIMESTAMPTZ IS NULL OR created_at <= $6)
              AND (
                    $7::TIMESTAMPTZ IS NULL
                    OR (created_at, request_id) < ($7, $8::UUID)
                  )
            ORDER BY created_at DESC, request_id DESC
            LIMIT $9
            "#
        ))
        .bind(query.channel_id.as_deref())
        .bind(query.account_id.as_deref())
        .bind(query.requester_email.as_deref())
        .bind(query.status.map(|status| status.as_str()))
        .bind(query.start_date)
        .bind(query.end_date)
        .bind(cursor_created_at)
        .bind(cursor_request_id)
        .bind(limit + 1)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to query requests: {error}")))?;

        let mut items = rows
            .into_iter()
            .map(RequestRow::into_request)
            .collect::<AppResult<Vec<_>>>()?;

        let next_token = if items.len() > limit as usize {
            items.truncate(limit as usize);
            items.last().map(encode_next_token)
        } else {
            None
        };

        Ok(RequestPage { items, next_token })
    }

    async fn list_expired_grants(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<AccessRequest>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            {SELECT_REQUEST}
            WHERE status = $1
              AND end_time <= $2
            ORDER BY end_time ASC
            "#
        ))
        .bind(RequestStatus::Granted.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list expired grants: {error}"))
        })?;

        rows.into_iter().map(RequestRow::into_request).collect()
    }
}
