//! HTTP route handlers for the PeakSelf API
//!
//! Every router here is nested under `/api` by [`crate::app::build_router`]:
//! - Local authentication and sessions
//! - Google sign-in
//! - CSRF token issuance
//! - Client error reporting
//! - Admin user management
//! - Health checks

pub mod admin;
pub mod auth;
pub mod csrf;
pub mod errors;
pub mod health;
pub mod oauth;

pub use admin::{admin_router, AdminState};
pub use auth::{auth_router, AuthRateLimits, AuthState};
pub use csrf::{csrf_router, CsrfState};
pub use errors::{errors_router, ErrorReportState};
pub use health::{health_router, HealthState};
pub use oauth::{oauth_router, OAuthState};
