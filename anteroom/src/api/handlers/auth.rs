use axum::{extract::State, http::HeaderMap, Json};
use tracing::{debug, info};

use crate::{
    api::models::auth::{AuthResponse, AuthSuccessResponse, LoginRequest, LoginResponse, LogoutResponse, UserResponse},
    auth::current_user::{session_token_from_headers, CurrentUser},
    errors::Error,
    AppState,
};

/// Authenticate with email and password
///
/// Credential verification lives entirely inside the identity store; this
/// handler only exchanges credentials for a session and sets the cookie.
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<LoginResponse, Error> {
    let session = state.store.sign_in(&request.email, &request.password).await?;

    let user = state
        .store
        .get_user(&session.token)
        .await?
        .ok_or_else(|| Error::Internal {
            operation: "load identity for fresh session".to_string(),
        })?;

    info!(user_id = %user.id, "user logged in");

    // Set session cookie
    let cookie = create_session_cookie(&session.token, &state.config);

    let auth_response = AuthResponse {
        user: UserResponse {
            id: user.id,
            email: user.email,
        },
        message: "Login successful".to_string(),
    };

    Ok(LoginResponse { auth_response, cookie })
}

/// Destroy the current session and clear the cookie
///
/// Logging out without a live session still succeeds and still clears the
/// cookie, so a stale browser state can always recover.
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<LogoutResponse, Error> {
    if let Some(token) = session_token_from_headers(&headers, &state.config.session.cookie_name) {
        state.store.sign_out(&token).await?;
    } else {
        debug!("logout without a session cookie, nothing to revoke");
    }

    // Expired cookie to clear the session, same attributes as login sets
    let cookie = create_clearing_cookie(&state.config);

    let auth_response = AuthSuccessResponse {
        message: "Logout successful".to_string(),
    };

    Ok(LogoutResponse { auth_response, cookie })
}

/// Who the current session belongs to
///
/// Rejects with 401 when no valid session cookie is present.
#[tracing::instrument(skip_all)]
pub async fn me(current_user: CurrentUser) -> Json<UserResponse> {
    Json(UserResponse {
        id: current_user.identity.id,
        email: current_user.identity.email,
    })
}

fn create_session_cookie(token: &str, config: &crate::config::Config) -> String {
    let session = &config.session;
    format!(
        "{}={}; {}; Max-Age={}",
        session.cookie_name,
        token,
        cookie_attributes(session),
        session.timeout.as_secs()
    )
}

fn create_clearing_cookie(config: &crate::config::Config) -> String {
    let session = &config.session;
    format!("{}=; {}; Max-Age=0", session.cookie_name, cookie_attributes(session))
}

/// Shared attribute string so the session cookie and its clearing cookie can
/// never disagree. `Secure` is present or absent, never `Secure=false`.
fn cookie_attributes(session: &crate::config::SessionConfig) -> String {
    let mut attributes = format!("Path=/; HttpOnly; SameSite={}", session.cookie_same_site);
    if session.cookie_secure {
        attributes.push_str("; Secure");
    }
    attributes
}
