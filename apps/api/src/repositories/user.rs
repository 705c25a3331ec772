//! User repository for centralized database operations

use sqlx::PgPool;
use uuid::Uuid;

use super::utils::{normalize_email, USER_COLUMNS};
use crate::models::user::{User, UserRole};

/// Repository for user database operations
///
/// Centralizes all user-related database queries so the auth guard and the
/// services share the same SQL.
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new UserRepository instance
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Find a user by their unique ID
    ///
    /// # Returns
    /// * `Ok(Some(User))` - If the user exists
    /// * `Ok(None)` - If no user with the given ID exists
    /// * `Err(sqlx::Error)` - If a database error occurs
    pub async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Find a user by their email address (case-insensitive)
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
    }

    /// Find a user by their linked Google account subject
    pub async fn find_by_google_id(&self, google_id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE google_id = $1",
            USER_COLUMNS
        ))
        .bind(google_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Check if an email address is already registered
    pub async fn email_exists(&self, email: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(r#"SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)"#)
            .bind(normalize_email(email))
            .fetch_one(&self.pool)
            .await
    }

    /// Create a new local (password) user
    ///
    /// # Arguments
    /// * `email` - User's email address (must be unique)
    /// * `password_hash` - Pre-hashed password (Argon2id)
    /// * `display_name` - User's display name
    /// * `role` - User's role
    ///
    /// # Returns
    /// * `Ok(User)` - The newly created user
    /// * `Err(sqlx::Error)` - If a database error occurs (including unique constraint violations)
    pub async fn create(
        &self,
        email: &str,
        password_hash: &str,
        display_name: &str,
        role: UserRole,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, password_hash, display_name, role)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(normalize_email(email))
        .bind(password_hash)
        .bind(display_name)
        .bind(role)
        .fetch_one(&self.pool)
        .await
    }

    /// Create a password-less user from a Google profile
    pub async fn create_from_google(
        &self,
        email: &str,
        display_name: &str,
        avatar_url: Option<&str>,
        google_id: &str,
        email_verified: bool,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, display_name, avatar_url, role, google_id, email_verified)
            VALUES ($1, $2, $3, 'user', $4, $5)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(normalize_email(email))
        .bind(display_name)
        .bind(avatar_url)
        .bind(google_id)
        .bind(email_verified)
        .fetch_one(&self.pool)
        .await
    }

    /// Link a Google account to an existing user
    ///
    /// The avatar is only filled in when the user has none.
    pub async fn link_google(
        &self,
        user_id: Uuid,
        google_id: &str,
        avatar_url: Option<&str>,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET google_id = $2,
                avatar_url = COALESCE(avatar_url, $3),
                email_verified = true,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(google_id)
        .bind(avatar_url)
        .fetch_one(&self.pool)
        .await
    }

    /// Replace a user's password hash
    pub async fn update_password(&self, user_id: Uuid, password_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Change a user's role
    ///
    /// # Returns
    /// * `Ok(None)` - If no user with the given ID exists
    pub async fn update_role(&self, user_id: Uuid, role: UserRole) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET role = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(role)
        .fetch_optional(&self.pool)
        .await
    }

    /// Record a successful sign-in
    pub async fn touch_last_login(&self, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
