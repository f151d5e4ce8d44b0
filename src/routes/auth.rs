use crate::config::AppConfig;
use crate::error::ServiceError;
use crate::models::ApiResponse;
use crate::security::{AuthUser, issue_token};
use crate::state::AppState;
use crate::users::{self, LoginRequest, PublicUser, RegisterRequest, UpdateProfileRequest, User};
use axum::{
    Extension, Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub token: String,
    pub user: PublicUser,
}

/// Create a customer account and sign it in.
///
/// - Method: `POST`
/// - Path: `/api/auth/register`
/// - Body: `RegisterRequest`
/// - Response: `201` with `{success, token, user}`; `409` on a taken
///   username or email.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response, ServiceError> {
    crate::metrics::inc_requests("/api/auth/register");
    let user = users::register(&state.db, &state.config, payload).await?;
    session_response(StatusCode::CREATED, &user, &state.config)
}

/// Sign in with username or email. Attempts are throttled per identifier.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, ServiceError> {
    crate::metrics::inc_requests("/api/auth/login");
    let identifier = payload.username.trim().to_string();
    if let Err(retry_after) = state.login_throttle.consume(&identifier).await {
        info!(target = "storefront.auth", identifier = %identifier, retry_after, "login throttled");
        return Err(ServiceError::too_many_requests("login", retry_after));
    }
    let user = users::authenticate(&state.db, payload).await?;
    state.login_throttle.reset(&identifier).await;
    info!(target = "storefront.auth", user_id = %user.id, "login succeeded");
    session_response(StatusCode::OK, &user, &state.config)
}

/// Clears the session cookie. Bearer tokens simply expire.
pub async fn logout() -> Response {
    (
        [(header::SET_COOKIE, "token=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax")],
        Json(ApiResponse::message("Logged out")),
    )
        .into_response()
}

pub async fn me(Extension(AuthUser(user)): Extension<AuthUser>) -> Json<ApiResponse<PublicUser>> {
    Json(ApiResponse::data(user.public_profile()))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<PublicUser>>, ServiceError> {
    crate::metrics::inc_requests("/api/auth/me");
    let user = users::update_profile(&state.db, &state.config, user, payload).await?;
    Ok(Json(
        ApiResponse::data(user.public_profile()).with_message("Profile updated successfully"),
    ))
}

/// Every account, newest first. Admin only.
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<PublicUser>>>, ServiceError> {
    let users: Vec<PublicUser> = state
        .db
        .list_users()
        .await
        .map_err(|err| ServiceError::from_store("users", err))?
        .iter()
        .map(User::public_profile)
        .collect();
    let count = users.len();
    Ok(Json(ApiResponse::data(users).with_count(count)))
}

fn session_response(
    status: StatusCode,
    user: &User,
    config: &AppConfig,
) -> Result<Response, ServiceError> {
    let token = issue_token(user, config).map_err(|err| {
        error!(target = "storefront.auth", error = %err, "token issue failed");
        ServiceError::internal("auth", "Could not create session").with_detail(err.to_string())
    })?;
    let secure = if config.is_development() { "" } else { "; Secure" };
    let cookie = format!(
        "token={token}; HttpOnly; Path=/; Max-Age={}; SameSite=Lax{secure}",
        config.jwt_ttl_hours * 3600
    );
    let body = AuthResponse {
        success: true,
        token,
        user: user.public_profile(),
    };
    Ok((status, [(header::SET_COOKIE, cookie)], Json(body)).into_response())
}
