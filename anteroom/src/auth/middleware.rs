use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::{debug, trace, warn};

use crate::{
    auth::{current_user::CurrentUser, policy::AdmissionDecision, resolver},
    AppState,
};

/// What the guard decided to do with a request.
pub(crate) enum GuardOutcome {
    /// Hand the (unmodified) request to the inner service.
    Forward(Request),
    /// Short-circuit with a temporary redirect to this path.
    Redirect(String),
}

/// Implementation for route_guard_middleware. Total: store failures degrade
/// to an unresolved role and the policy fails closed, so a broken identity
/// store can never expose a protected page (or a 500) to an anonymous client.
pub(crate) async fn route_guard(state: AppState, request: Request) -> GuardOutcome {
    let path = request.uri().path().to_string();

    // Public paths skip session lookup entirely.
    if !state.policy.is_protected(&path) {
        trace!(path, "path is public, guard not engaged");
        return GuardOutcome::Forward(request);
    }
    debug!(path, "guarding protected path");

    let (mut parts, body) = request.into_parts();
    let current_user = match CurrentUser::try_from_parts(&mut parts, &state).await {
        Ok(user) => user,
        Err(e) => {
            warn!(path, error = %e, "session lookup failed, failing closed");
            None
        }
    };
    let request = Request::from_parts(parts, body);

    let resolution = resolver::resolve_role(&state.store, current_user.as_ref()).await;
    match state.policy.decide(resolution, &path) {
        AdmissionDecision::Allow => GuardOutcome::Forward(request),
        AdmissionDecision::Redirect(target) => {
            debug!(path, target, "guard redirecting request");
            GuardOutcome::Redirect(target)
        }
    }
}

/// Middleware that admits or redirects every request under the protected
/// prefix before any handler runs. Redirects are 307 so method and body
/// survive the hop.
pub async fn route_guard_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match route_guard(state, request).await {
        GuardOutcome::Forward(request) => next.run(request).await,
        GuardOutcome::Redirect(target) => Redirect::temporary(&target).into_response(),
    }
}
