//! Role resolution.
//!
//! A user's role can live in two places: the identity's metadata bag (a
//! fast, possibly stale cache) and the durable profile record. Resolution
//! prefers the metadata fast path and falls back to a profile read; on a
//! successful fallback it lazily writes the role back into metadata so the
//! next resolution for this session skips the profile round-trip.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::auth::CurrentUser;
use crate::store::IdentityStore;
use crate::types::abbrev_uuid;

pub const ROLE_METADATA_KEY: &str = "role";

/// The two roles the dashboard distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    /// Parse a stored role string. Anything other than the two known values
    /// is treated as absent, never as an error.
    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a resolution pass. `Unresolved` covers every failure mode:
/// no session, store unreachable, missing profile, unrecognized role string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleResolution {
    Resolved(Role),
    Unresolved,
}

impl RoleResolution {
    pub fn role(&self) -> Option<Role> {
        match self {
            RoleResolution::Resolved(role) => Some(*role),
            RoleResolution::Unresolved => None,
        }
    }
}

/// Resolve the role for the current user, if any.
///
/// Never fails: store errors degrade to `Unresolved` and callers fail
/// closed on that. The profile fallback schedules a metadata write-back
/// that is never awaited; its failure only delays fast-path convergence.
#[instrument(skip_all, fields(user_id = tracing::field::Empty))]
pub async fn resolve_role(store: &Arc<dyn IdentityStore>, user: Option<&CurrentUser>) -> RoleResolution {
    let Some(user) = user else {
        return RoleResolution::Unresolved;
    };
    tracing::Span::current().record("user_id", abbrev_uuid(&user.identity.id).as_str());

    // Fast path: a valid cached role costs zero store reads.
    if let Some(role) = user
        .identity
        .metadata
        .get(ROLE_METADATA_KEY)
        .and_then(Value::as_str)
        .and_then(Role::parse)
    {
        debug!(%role, "role resolved from metadata");
        return RoleResolution::Resolved(role);
    }

    let profile = match store.read_profile(user.identity.id).await {
        Ok(profile) => profile,
        Err(e) => {
            warn!(error = %e, "profile read failed, treating role as unresolved");
            return RoleResolution::Unresolved;
        }
    };

    let Some(role) = profile.as_ref().and_then(|p| Role::parse(&p.role)) else {
        debug!("profile missing or carries no recognizable role");
        return RoleResolution::Unresolved;
    };

    // Lazy write-back so the next pass for this session takes the fast
    // path. Fire and forget: the resolution outcome never depends on it.
    let store = Arc::clone(store);
    let token = user.session.token.clone();
    let user_id = abbrev_uuid(&user.identity.id);
    tokio::spawn(async move {
        let mut fields = Map::new();
        fields.insert(ROLE_METADATA_KEY.to_string(), Value::String(role.as_str().to_string()));
        if let Err(e) = store.update_user_metadata(&token, fields).await {
            debug!(user_id = %user_id, error = %e, "role metadata write-back failed");
        }
    });

    debug!(%role, "role resolved from profile");
    RoleResolution::Resolved(role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    async fn current_user(store: &InMemoryStore, email: &str, password: &str) -> CurrentUser {
        let session = store.sign_in(email, password).await.unwrap();
        let identity = store.get_user(&session.token).await.unwrap().unwrap();
        CurrentUser { session, identity }
    }

    fn as_dyn(store: Arc<InMemoryStore>) -> Arc<dyn IdentityStore> {
        store
    }

    #[tokio::test]
    async fn test_no_session_is_unresolved() {
        let store = as_dyn(Arc::new(InMemoryStore::new()));
        assert_eq!(resolve_role(&store, None).await, RoleResolution::Unresolved);
    }

    #[tokio::test]
    async fn test_metadata_fast_path_skips_profile_read() {
        let raw = Arc::new(InMemoryStore::new());
        let id = raw.sign_up("a@example.com", "a", "pw").unwrap();
        raw.set_metadata_role(id, "admin");
        let user = current_user(&raw, "a@example.com", "pw").await;

        let store = as_dyn(raw.clone());
        let resolution = resolve_role(&store, Some(&user)).await;

        assert_eq!(resolution, RoleResolution::Resolved(Role::Admin));
        assert_eq!(raw.profile_read_count(), 0);
    }

    #[tokio::test]
    async fn test_profile_fallback_resolves_and_writes_back() {
        let raw = Arc::new(InMemoryStore::new());
        let id = raw.sign_up("a@example.com", "a", "pw").unwrap();
        raw.set_profile_role(id, "admin");
        let user = current_user(&raw, "a@example.com", "pw").await;

        let store = as_dyn(raw.clone());
        let resolution = resolve_role(&store, Some(&user)).await;
        assert_eq!(resolution, RoleResolution::Resolved(Role::Admin));
        assert_eq!(raw.profile_read_count(), 1);

        // The write-back is async; poll until the metadata cache converges.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let identity = raw.get_user(&user.session.token).await.unwrap().unwrap();
            if identity.metadata.get(ROLE_METADATA_KEY) == Some(&serde_json::json!("admin")) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "metadata write-back never landed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Next pass takes the fast path: no further profile reads.
        let refreshed = current_user(&raw, "a@example.com", "pw").await;
        let resolution = resolve_role(&store, Some(&refreshed)).await;
        assert_eq!(resolution, RoleResolution::Resolved(Role::Admin));
        assert_eq!(raw.profile_read_count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_resolution_yields_the_same_role() {
        let raw = Arc::new(InMemoryStore::new());
        let id = raw.sign_up("a@example.com", "a", "pw").unwrap();
        raw.set_metadata_role(id, "admin");
        let user = current_user(&raw, "a@example.com", "pw").await;

        let store = as_dyn(raw.clone());
        let first = resolve_role(&store, Some(&user)).await;
        let second = resolve_role(&store, Some(&user)).await;

        assert_eq!(first, RoleResolution::Resolved(Role::Admin));
        assert_eq!(second, first);
        assert_eq!(raw.profile_read_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_metadata_role_falls_back_to_profile() {
        let raw = Arc::new(InMemoryStore::new());
        let id = raw.sign_up("a@example.com", "a", "pw").unwrap();
        raw.set_metadata_role(id, "superuser");
        let user = current_user(&raw, "a@example.com", "pw").await;

        let store = as_dyn(raw.clone());
        let resolution = resolve_role(&store, Some(&user)).await;
        assert_eq!(resolution, RoleResolution::Resolved(Role::User));
        assert_eq!(raw.profile_read_count(), 1);
    }

    #[tokio::test]
    async fn test_profile_read_failure_is_unresolved() {
        let raw = Arc::new(InMemoryStore::new());
        raw.sign_up("a@example.com", "a", "pw").unwrap();
        let user = current_user(&raw, "a@example.com", "pw").await;
        raw.fail_profile_reads(true);

        let store = as_dyn(raw.clone());
        assert_eq!(resolve_role(&store, Some(&user)).await, RoleResolution::Unresolved);
    }

    #[tokio::test]
    async fn test_invalid_profile_role_is_unresolved() {
        let raw = Arc::new(InMemoryStore::new());
        let id = raw.sign_up("a@example.com", "a", "pw").unwrap();
        raw.set_profile_role(id, "root");
        let user = current_user(&raw, "a@example.com", "pw").await;

        let store = as_dyn(raw.clone());
        assert_eq!(resolve_role(&store, Some(&user)).await, RoleResolution::Unresolved);
    }

    #[tokio::test]
    async fn test_write_back_failure_does_not_affect_resolution() {
        let raw = Arc::new(InMemoryStore::new());
        let id = raw.sign_up("a@example.com", "a", "pw").unwrap();
        raw.set_profile_role(id, "admin");
        raw.fail_metadata_writes(true);
        let user = current_user(&raw, "a@example.com", "pw").await;

        let store = as_dyn(raw.clone());
        assert_eq!(
            resolve_role(&store, Some(&user)).await,
            RoleResolution::Resolved(Role::Admin)
        );
    }
}
