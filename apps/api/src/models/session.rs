//! Server-side session model

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Session record from the sessions table
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    /// Unique session identifier (the `sid` claim of access tokens)
    pub id: Uuid,

    /// User who owns this session
    pub user_id: Uuid,

    /// SHA-256 hex of the opaque `peak_sid` cookie value
    pub token_hash: String,

    /// Client IP address (read back as text from the INET column)
    pub ip_address: Option<String>,

    /// Client user agent string
    pub user_agent: Option<String>,

    /// Whether session is currently active
    pub is_active: bool,

    /// Last activity timestamp
    pub last_active_at: DateTime<Utc>,

    /// Session expiration timestamp
    pub expires_at: DateTime<Utc>,

    /// Session creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Active and not yet expired
    pub fn is_valid(&self) -> bool {
        self.is_active && self.expires_at > Utc::now()
    }
}

/// Session entry in `GET /api/auth/sessions`
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// The session making this request
    pub current: bool,
}

impl SessionResponse {
    pub fn from_session(session: Session, current_session_id: Uuid) -> Self {
        Self {
            current: session.id == current_session_id,
            id: session.id,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            last_active_at: session.last_active_at,
            expires_at: session.expires_at,
            created_at: session.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(is_active: bool, expires_in: Duration) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "ab".repeat(32),
            ip_address: Some("203.0.113.5".to_string()),
            user_agent: None,
            is_active,
            last_active_at: now,
            expires_at: now + expires_in,
            created_at: now,
        }
    }

    #[test]
    fn test_session_validity() {
        assert!(session(true, Duration::hours(1)).is_valid());
        assert!(!session(false, Duration::hours(1)).is_valid());
        assert!(!session(true, Duration::seconds(-1)).is_valid());
    }

    #[test]
    fn test_session_response_flags_current() {
        let s = session(true, Duration::hours(1));
        let id = s.id;
        assert!(SessionResponse::from_session(s.clone(), id).current);
        assert!(!SessionResponse::from_session(s, Uuid::new_v4()).current);
    }
}
