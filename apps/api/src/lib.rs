//! PeakSelf API library
//!
//! This module exposes the core API components for use in integration tests
//! and by the server and migration binaries.

pub mod app;
pub mod config;
pub mod cookies;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod telemetry;

// Re-export commonly used types
pub use app::{build_router, AppState};
pub use config::Config;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use services::{AuthConfig, AuthService};
