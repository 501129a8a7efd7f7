use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use jitgate_application::BindingRepository;
use jitgate_core::{AppError, AppResult};
use jitgate_domain::{ChannelBinding, ChannelBindingInput};

/// PostgreSQL-backed repository for channel bindings.
#[derive(Clone)]
pub struct PostgresBindingRepository {
    pool: PgPool,
}

impl PostgresBindingRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct BindingRow {
    channel_id: String,
    account_id: String,
    approver_chat_ids: Vec<String>,
    allow_self_approval: bool,
    max_request_hours: i32,
    updated_at: DateTime<Utc>,
}

impl BindingRow {
    fn into_binding(self) -> AppResult<ChannelBinding> {
        ChannelBinding::new(ChannelBindingInput {
            channel_id: self.channel_id,
            account_id: self.account_id,
            approver_chat_ids: self.approver_chat_ids,
            allow_self_approval: self.allow_self_approval,
            max_request_hours: self.max_request_hours,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_BINDING: &str = r#"
    SELECT
        channel_id,
        account_id,
        approver_chat_ids,
        allow_self_approval,
        max_request_hours,
        updated_at
    FROM channel_bindings
"#;

#[async_trait]
impl BindingRepository for PostgresBindingRepository {
    async fn save(&self, binding: &ChannelBinding) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO channel_bindings (
                channel_id,
                account_id,
                approver_chat_ids,
                allow_self_approval,
                max_request_hours,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (channel_id, account_id)
            DO UPDATE SET
                approver_chat_ids = EXCLUDED.approver_chat_ids,
                allow_self_approval = EXCLUDED.allow_self_approval,
                max_request_hours = EXCLUDED.max_request_hours,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(binding.channel_id())
        .bind(binding.account_id())
        .bind(binding.approver_chat_ids())
        .bind(binding.allow_self_approval())
        .bind(binding.max_request_hours())
        .bind(binding.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to save binding for channel '{}' and account '{}': {error}",
                binding.channel_id(),
                binding.account_id()
            ))
        })?;

        Ok(())
    }

    async fn find(&self, channel_id: &str, account_id: &str) -> AppResult<Option<ChannelBinding>> {
        let row = sqlx::query_as::<_, BindingRow>(&format!(
            "{SELECT_BINDING} WHERE channel_id = $1 AND account_id = $2"
        ))
        .bind(channel_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to load binding: {error}")))?;

        row.map(BindingRow::into_binding).transpose()
    }

    async fn list_by_channel(&self, channel_id: &str) -> AppResult<Vec<ChannelBinding>> {
        let rows = sqlx::query_as::<_, BindingRow>(&format!(
            "{SELECT_BINDING} WHERE channel_id = $1 ORDER BY account_id"
        ))
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list bindings for channel: {error}"))
        })?;

        rows.into_iter().map(BindingRow::into_binding).collect()
    }

    async fn find_by_account(&self, account_id: &str) -> AppResult<Option<ChannelBinding>> {
        let row = sqlx::query_as::<_, BindingRow>(&format!(
            "{SELECT_BINDING} WHERE account_id = $1 LIMIT 1"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to look up binding by account: {error}"))
        })?;

        row.map(BindingRow::into_binding).transpose()
    }
}
