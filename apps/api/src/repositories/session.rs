//! Session repository for centralized database operations

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::utils::SESSION_COLUMNS;
use crate::models::session::Session;

/// Repository for server-side session rows
#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    /// Create a new SessionRepository instance
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create a new session record in the database
    ///
    /// # Arguments
    /// * `session_id` - Pre-generated UUID for the session
    /// * `user_id` - ID of the user who owns this session
    /// * `token_hash` - SHA-256 hex of the opaque session token
    /// * `ip_address` - Optional client IP address
    /// * `user_agent` - Optional client user agent string
    /// * `expires_at` - Session expiration timestamp
    ///
    /// # Returns
    /// * `Ok(Session)` - The stored session
    /// * `Err(sqlx::Error)` - If a database error occurs
    pub async fn create(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        token_hash: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, sqlx::Error> {
        sqlx::query_as::<_, Session>(&format!(
            r#"
            INSERT INTO sessions (id, user_id, token_hash, ip_address, user_agent, expires_at)
            VALUES ($1, $2, $3, $4::inet, $5, $6)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(user_id)
        .bind(token_hash)
        .bind(ip_address)
        .bind(user_agent)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
    }

    /// Find an active, unexpired session by the hash of its cookie token
    pub async fn find_active_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {}
            FROM sessions
            WHERE token_hash = $1 AND is_active = true AND expires_at > NOW()
            "#,
            SESSION_COLUMNS
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
    }

    /// Check that a session is active, unexpired and owned by the given user
    pub async fn is_active(&self, session_id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sessions
                WHERE id = $1 AND user_id = $2 AND is_active = true AND expires_at > NOW()
            )
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }

    /// Update `last_active_at`
    pub async fn touch(&self, session_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE sessions SET last_active_at = NOW() WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Slide the expiry of an active session
    ///
    /// # Returns
    /// * `Ok(false)` - If the session is no longer active
    pub async fn extend(&self, session_id: Uuid, expires_at: DateTime<Utc>) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET expires_at = $2, last_active_at = NOW()
            WHERE id = $1 AND is_active = true
            "#,
        )
        .bind(session_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// List a user's active, unexpired sessions, most recently used first
    pub async fn list_active_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {}
            FROM sessions
            WHERE user_id = $1 AND is_active = true AND expires_at > NOW()
            ORDER BY last_active_at DESC
            "#,
            SESSION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Deactivate a single session (logout)
    ///
    /// # Returns
    /// * `Ok(true)` - If the session was deactivated
    /// * `Ok(false)` - If no session with the given ID exists
    pub async fn deactivate(&self, session_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE sessions SET is_active = false WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deactivate a session only if it belongs to the given user
    ///
    /// # Returns
    /// * `Ok(false)` - If the session does not exist, is not owned or already inactive
    pub async fn deactivate_owned(&self, session_id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET is_active = false
            WHERE id = $1 AND user_id = $2 AND is_active = true
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deactivate all active sessions for a user (logout all)
    ///
    /// # Returns
    /// * `Ok(u64)` - The number of sessions that were deactivated
    pub async fn deactivate_all_for_user(&self, user_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = false WHERE user_id = $1 AND is_active = true",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deactivate every active session of a user except one
    pub async fn deactivate_others(&self, user_id: Uuid, keep_session_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET is_active = false
            WHERE user_id = $1 AND id <> $2 AND is_active = true
            "#,
        )
        .bind(user_id)
        .bind(keep_session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Delete expired sessions from the database
    ///
    /// Called periodically by the session sweeper.
    ///
    /// # Arguments
    /// * `batch_size` - Maximum number of sessions to delete per call (prevents long locks)
    ///
    /// # Returns
    /// * `Ok(u64)` - The number of expired sessions that were deleted
    pub async fn delete_expired(&self, batch_size: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE id IN (
                SELECT id FROM sessions
                WHERE expires_at < NOW()
                LIMIT $1
            )
            "#,
        )
        .bind(batch_size)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
