//! Business logic services for PeakSelf
//!
//! - Local authentication and session management
//! - Google sign-in
//! - CSRF token issuance
//! - Health checks
//! - Expired session cleanup

pub mod auth;
pub mod csrf;
pub mod health;
pub mod oauth;
pub mod session_sweeper;

pub use auth::{AuthConfig, AuthService, IssuedSession};
pub use csrf::CsrfService;
pub use health::HealthService;
pub use oauth::GoogleOAuthService;
