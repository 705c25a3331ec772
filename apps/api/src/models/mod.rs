//! Database models and types for PeakSelf
//!
//! This module contains SQLx models for:
//! - Users, roles and JWT claims
//! - Server-side sessions

pub mod session;
pub mod user;

pub use session::{Session, SessionResponse};
pub use user::{AuthResponse, Claims, RequestMetadata, User, UserResponse, UserRole};
