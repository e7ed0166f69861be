use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{debug, trace};

use crate::{
    errors::{Error, Result},
    store::{Session, UserIdentity},
    AppState,
};

/// The authenticated principal behind a request: the live session plus the
/// identity (with metadata bag) the store attached to it.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub session: Session,
    pub identity: UserIdentity,
}

/// Pull the session token out of the request's cookie header, if any.
///
/// Returns:
/// - None: no cookie header, or no cookie with the configured name
/// - Some(token): the raw opaque token; validity is the store's business
pub fn session_token_from_parts(parts: &Parts, cookie_name: &str) -> Option<String> {
    session_token_from_headers(&parts.headers, cookie_name)
}

/// Same as [`session_token_from_parts`] for handlers that only have headers.
pub fn session_token_from_headers(headers: &axum::http::HeaderMap, cookie_name: &str) -> Option<String> {
    let cookie_header = headers.get(axum::http::header::COOKIE)?;
    let cookie_str = cookie_header.to_str().ok()?;

    for cookie in cookie_str.split(';') {
        let cookie = cookie.trim();
        if let Some((name, value)) = cookie.split_once('=') {
            if name == cookie_name {
                return Some(value.to_string());
            }
        }
    }
    None
}

impl CurrentUser {
    /// Resolve the request's cookie into a session + identity pair.
    ///
    /// `Ok(None)` means anonymous (no cookie, or the token is expired or
    /// unknown). `Err` is reserved for store failures.
    pub async fn try_from_parts(parts: &Parts, state: &AppState) -> Result<Option<CurrentUser>> {
        Self::try_from_headers(&parts.headers, state).await
    }

    /// Headers-only variant for handlers outside the extractor path.
    pub async fn try_from_headers(headers: &axum::http::HeaderMap, state: &AppState) -> Result<Option<CurrentUser>> {
        let Some(token) = session_token_from_headers(headers, &state.config.session.cookie_name) else {
            trace!("no session cookie on request");
            return Ok(None);
        };

        let Some(session) = state.store.get_session(&token).await? else {
            debug!("session cookie present but token is expired or unknown");
            return Ok(None);
        };
        let Some(identity) = state.store.get_user(&token).await? else {
            debug!(user_id = %session.user_id, "session has no backing identity");
            return Ok(None);
        };

        Ok(Some(CurrentUser { session, identity }))
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        CurrentUser::try_from_parts(parts, state)
            .await?
            .ok_or(Error::Unauthenticated { message: None })
    }
}
