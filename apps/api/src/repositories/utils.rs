//! Shared SQL fragments for repositories

/// SQL columns for user queries
pub const USER_COLUMNS: &str = r#"
    id, email, password_hash, display_name, avatar_url,
    role, google_id, email_verified, last_login_at,
    created_at, updated_at
"#;

/// SQL columns for session queries
///
/// `ip_address` is an INET column and is read back as text.
pub const SESSION_COLUMNS: &str = r#"
    id, user_id, token_hash, host(ip_address) AS ip_address, user_agent,
    is_active, last_active_at, expires_at, created_at
"#;

/// Normalize an email address for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Reader@Peakium.COM "), "reader@peakium.com");
    }

    #[test]
    fn test_session_columns_read_ip_as_text() {
        assert!(SESSION_COLUMNS.contains("host(ip_address) AS ip_address"));
    }
}
