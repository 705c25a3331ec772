//! Admin user management
//!
//! - `PATCH /admin/users/:id/role` - Change a user's role
//! - `DELETE /admin/users/:id/sessions` - Sign a user out everywhere
//!
//! Both require `AdminUser`, whose role is re-read from the database.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{delete, patch},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiJson, ApiPath, ApiResult};
use crate::middleware::AdminUser;
use crate::models::user::{UserResponse, UserRole};
use crate::services::AuthService;

#[derive(Clone)]
pub struct AdminState {
    pub auth_service: Arc<AuthService>,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/users/:id/role", patch(update_role))
        .route("/users/:id/sessions", delete(revoke_user_sessions))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: UserRole,
}

#[derive(Debug, Serialize)]
pub struct RevokeSessionsResponse {
    pub user_id: Uuid,
    pub revoked_sessions: u64,
}

/// Change a user's role
///
/// # Response
/// - 200 OK with the updated user
/// - 403 Forbidden: admins cannot change their own role
/// - 404 Not Found: no such user
async fn update_role(
    State(state): State<AdminState>,
    ApiPath(user_id): ApiPath<Uuid>,
    admin: AdminUser,
    ApiJson(request): ApiJson<UpdateRoleRequest>,
) -> ApiResult<Json<UserResponse>> {
    if user_id == admin.user.id {
        return Err(ApiError::Forbidden(
            "admins cannot change their own role".to_string(),
        ));
    }

    let user = state
        .auth_service
        .users()
        .update_role(user_id, request.role)
        .await?
        .ok_or_else(|| ApiError::not_found("user", user_id.to_string()))?;

    tracing::info!(
        admin_id = %admin.user.id,
        user_id = %user.id,
        role = %user.role,
        "User role changed"
    );

    Ok(Json(user.into()))
}

/// Revoke every session of a user
async fn revoke_user_sessions(
    State(state): State<AdminState>,
    ApiPath(user_id): ApiPath<Uuid>,
    admin: AdminUser,
) -> ApiResult<Json<RevokeSessionsResponse>> {
    if state.auth_service.users().find_by_id(user_id).await?.is_none() {
        return Err(ApiError::not_found("user", user_id.to_string()));
    }

    let revoked = state.auth_service.logout_all(user_id).await?;

    tracing::info!(
        admin_id = %admin.user.id,
        user_id = %user_id,
        revoked_sessions = revoked,
        "Admin revoked user sessions"
    );

    Ok(Json(RevokeSessionsResponse {
        user_id,
        revoked_sessions: revoked,
    }))
}
