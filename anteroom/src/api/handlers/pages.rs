//! Page handlers for the routes the guard protects (and the public sign-in
//! page it redirects to). The real dashboard frontend lives elsewhere; these
//! handlers exist so every policy target is a servable route.

use axum::{
    extract::State,
    http::HeaderMap,
    response::{Html, IntoResponse, Redirect, Response},
};
use tracing::{debug, warn};

use crate::{
    auth::{resolver, CurrentUser},
    AppState,
};

pub async fn sign_in_page() -> Html<&'static str> {
    Html("<!doctype html><title>Sign in</title><h1>Sign in</h1>")
}

pub async fn user_dashboard() -> Html<&'static str> {
    Html("<!doctype html><title>Dashboard</title><h1>User dashboard</h1>")
}

pub async fn admin_dashboard() -> Html<&'static str> {
    Html("<!doctype html><title>Admin</title><h1>Admin dashboard</h1>")
}

pub async fn admin_users_page() -> Html<&'static str> {
    Html("<!doctype html><title>Users</title><h1>User management</h1>")
}

/// Landing page for the protected root: sends each visitor to the home for
/// their role. An unresolvable role goes to sign-in, same as the guard.
#[tracing::instrument(skip_all)]
pub async fn dashboard_redirector(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let current_user = match CurrentUser::try_from_headers(&headers, &state).await {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "session lookup failed on dashboard landing, failing closed");
            None
        }
    };

    let target = match resolver::resolve_role(&state.store, current_user.as_ref()).await {
        resolver::RoleResolution::Resolved(role) => state.policy.home_for(role).to_string(),
        resolver::RoleResolution::Unresolved => state.policy.sign_in_path().to_string(),
    };
    debug!(target, "dashboard landing redirect");
    Redirect::temporary(&target).into_response()
}
