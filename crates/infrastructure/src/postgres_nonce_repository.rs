use async_trait::async_trait;
use sqlx::PgPool;

use jitgate_application::NonceRepository;
use jitgate_core::{AppError, AppResult};

/// PostgreSQL-backed repository for replay-protection nonces.
///
/// Uniqueness is the table's composite primary key; the put is an
/// `ON CONFLICT DO NOTHING` insert so a replayed nonce surfaces as zero rows
/// written rather than an error.
#[derive(Clone)]
pub struct PostgresNonceRepository {
    pool: PgPool,
}

impl PostgresNonceRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NonceRepository for PostgresNonceRepository {
    async fn put_once(&self, key_id: &str, nonce: &str, expires_at: i64) -> AppResult<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO signing_nonces (key_id, nonce, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key_id, nonce)
            DO NOTHING
            "#,
        )
        .bind(key_id)
        .bind(nonce)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to store nonce: {error}")))?;

        Ok(inserted.rows_affected() == 1)
    }

    async fn exists(&self, key_id: &str, nonce: &str) -> AppResult<bool> {
        let found = sqlx::query_scalar::<_, i32>(
            "SELECT 1 FROM signing_nonces WHERE key_id = $1 AND nonce = $2",
        )
        .bind(key_id)
        .bind(nonce)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to check nonce: {error}")))?;

        Ok(found.is_some())
    }

    async fn purge_expired(&self, now_epoch_seconds: i64) -> AppResult<u64> {
        let deleted = sqlx::query("DELETE FROM signing_nonces WHERE expires_at <= $1")
            .bind(now_epoch_seconds)
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to purge expired nonces: {error}"))
            })?;

        Ok(deleted.rows_affected())
    }
}
