//! In-memory implementation of the Identity & Profile Store.
//!
//! Suitable for development, demos and tests; nothing is persisted across
//! restarts. Credentials live in memory as supplied - real credential
//! handling (hashing, token signing) belongs to a production store backend,
//! not to this crate.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::{AuthEvent, IdentityStore, Profile, ProfileUpdate, Session, StoreError, StoreResult, UserIdentity};
use crate::types::UserId;

/// Default lifetime for sessions created by [`InMemoryStore::sign_in`].
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// In-memory store backend.
///
/// Fault-injection toggles let tests exercise the fail-closed paths of the
/// guards without a real backend: flipping `fail_profile_reads` makes every
/// `read_profile` call return [`StoreError::Unreachable`], and so on.
pub struct InMemoryStore {
    sessions: DashMap<String, Session>,
    identities: DashMap<UserId, UserIdentity>,
    profiles: DashMap<UserId, Profile>,
    credentials: DashMap<String, (UserId, String)>,
    events: broadcast::Sender<AuthEvent>,
    session_ttl: Duration,
    profile_reads: AtomicUsize,
    profile_read_delay_ms: AtomicU64,
    fail_session_reads: AtomicBool,
    fail_profile_reads: AtomicBool,
    fail_metadata_writes: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_session_ttl(DEFAULT_SESSION_TTL)
    }

    pub fn with_session_ttl(session_ttl: Duration) -> Self {
        // Small buffer; a lagged receiver only misses triggers, and the next
        // event still causes a full re-resolution from authoritative state.
        let (events, _) = broadcast::channel(64);
        Self {
            sessions: DashMap::new(),
            identities: DashMap::new(),
            profiles: DashMap::new(),
            credentials: DashMap::new(),
            events,
            session_ttl,
            profile_reads: AtomicUsize::new(0),
            profile_read_delay_ms: AtomicU64::new(0),
            fail_session_reads: AtomicBool::new(false),
            fail_profile_reads: AtomicBool::new(false),
            fail_metadata_writes: AtomicBool::new(false),
        }
    }

    /// Register a new user. The profile is created with role `user`; the
    /// metadata bag starts empty (no cached role).
    pub fn sign_up(&self, email: &str, username: &str, password: &str) -> StoreResult<UserId> {
        if self.credentials.contains_key(email) {
            return Err(StoreError::Other(anyhow::anyhow!(
                "an account with email {email} already exists"
            )));
        }

        let id = Uuid::new_v4();
        self.identities.insert(
            id,
            UserIdentity {
                id,
                email: email.to_string(),
                metadata: Map::new(),
            },
        );
        self.profiles.insert(
            id,
            Profile {
                id,
                username: username.to_string(),
                email: email.to_string(),
                avatar_url: None,
                role: "user".to_string(),
            },
        );
        self.credentials.insert(email.to_string(), (id, password.to_string()));
        Ok(id)
    }

    /// Overwrite the durable profile role. Stands in for the administrative
    /// role-change flow, which lives outside this crate.
    pub fn set_profile_role(&self, id: UserId, role: &str) {
        if let Some(mut profile) = self.profiles.get_mut(&id) {
            profile.role = role.to_string();
        }
    }

    /// Seed the metadata role cache directly, bypassing the session-scoped
    /// `update_user_metadata` call.
    pub fn set_metadata_role(&self, id: UserId, role: &str) {
        if let Some(mut identity) = self.identities.get_mut(&id) {
            identity.metadata.insert("role".to_string(), Value::String(role.to_string()));
        }
    }

    /// Rotate the token of a live session, firing [`AuthEvent::TokenRefreshed`].
    pub fn refresh(&self, token: &str) -> StoreResult<Session> {
        let (_, old) = self
            .sessions
            .remove(token)
            .ok_or_else(|| StoreError::Other(anyhow::anyhow!("no session for token")))?;

        let rotated = Session {
            token: Uuid::new_v4().to_string(),
            user_id: old.user_id,
            expires_at: Utc::now() + self.session_ttl,
        };
        self.sessions.insert(rotated.token.clone(), rotated.clone());
        let _ = self.events.send(AuthEvent::TokenRefreshed { user_id: rotated.user_id });
        Ok(rotated)
    }

    /// Number of `read_profile` calls served so far. Lets tests assert the
    /// metadata fast path really skips the store round-trip.
    pub fn profile_read_count(&self) -> usize {
        self.profile_reads.load(Ordering::SeqCst)
    }

    /// Make every `read_profile` call take at least this long. Lets tests
    /// hold a resolution pass in flight while newer triggers land.
    pub fn set_profile_read_delay(&self, delay: Duration) {
        self.profile_read_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_session_reads(&self, fail: bool) {
        self.fail_session_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_profile_reads(&self, fail: bool) {
        self.fail_profile_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_metadata_writes(&self, fail: bool) {
        self.fail_metadata_writes.store(fail, Ordering::SeqCst);
    }

    fn unreachable(what: &str) -> StoreError {
        StoreError::Unreachable {
            message: format!("{what} unavailable (injected fault)"),
        }
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn get_session(&self, token: &str) -> StoreResult<Option<Session>> {
        if self.fail_session_reads.load(Ordering::SeqCst) {
            return Err(Self::unreachable("session lookup"));
        }

        let Some(session) = self.sessions.get(token).map(|s| s.clone()) else {
            return Ok(None);
        };
        if session.is_expired(Utc::now()) {
            self.sessions.remove(token);
            debug!(user_id = %session.user_id, "dropping expired session");
            return Ok(None);
        }
        Ok(Some(session))
    }

    async fn get_user(&self, token: &str) -> StoreResult<Option<UserIdentity>> {
        let Some(session) = self.get_session(token).await? else {
            return Ok(None);
        };
        Ok(self.identities.get(&session.user_id).map(|i| i.clone()))
    }

    async fn read_profile(&self, id: UserId) -> StoreResult<Option<Profile>> {
        if self.fail_profile_reads.load(Ordering::SeqCst) {
            return Err(Self::unreachable("profile read"));
        }
        let delay_ms = self.profile_read_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        self.profile_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.profiles.get(&id).map(|p| p.clone()))
    }

    async fn update_profile(&self, id: UserId, fields: ProfileUpdate) -> StoreResult<()> {
        let mut profile = self
            .profiles
            .get_mut(&id)
            .ok_or_else(|| StoreError::Other(anyhow::anyhow!("no profile for user {id}")))?;
        if let Some(username) = fields.username {
            profile.username = username;
        }
        if let Some(avatar_url) = fields.avatar_url {
            profile.avatar_url = Some(avatar_url);
        }
        Ok(())
    }

    async fn update_user_metadata(&self, token: &str, fields: Map<String, Value>) -> StoreResult<()> {
        if self.fail_metadata_writes.load(Ordering::SeqCst) {
            return Err(Self::unreachable("metadata update"));
        }

        let Some(session) = self.get_session(token).await? else {
            return Err(StoreError::Other(anyhow::anyhow!("no session for token")));
        };
        let user_id = session.user_id;
        {
            let mut identity = self
                .identities
                .get_mut(&user_id)
                .ok_or_else(|| StoreError::Other(anyhow::anyhow!("no identity for user {user_id}")))?;
            for (key, value) in fields {
                identity.metadata.insert(key, value);
            }
        }
        let _ = self.events.send(AuthEvent::MetadataUpdated { user_id });
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> StoreResult<Session> {
        let Some(entry) = self.credentials.get(email) else {
            return Err(StoreError::InvalidCredentials);
        };
        let (user_id, stored_password) = entry.clone();
        if stored_password != password {
            return Err(StoreError::InvalidCredentials);
        }

        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id,
            expires_at: Utc::now() + self.session_ttl,
        };
        self.sessions.insert(session.token.clone(), session.clone());
        let _ = self.events.send(AuthEvent::SignedIn { user_id });
        Ok(session)
    }

    async fn sign_out(&self, token: &str) -> StoreResult<()> {
        if let Some((_, session)) = self.sessions.remove(token) {
            let _ = self.events.send(AuthEvent::SignedOut { user_id: session.user_id });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_in_creates_session_and_fires_event() {
        let store = InMemoryStore::new();
        let id = store.sign_up("a@example.com", "a", "hunter2").unwrap();
        let mut events = store.subscribe();

        let session = store.sign_in("a@example.com", "hunter2").await.unwrap();
        assert_eq!(session.user_id, id);
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedIn { user_id: id });

        let looked_up = store.get_session(&session.token).await.unwrap();
        assert_eq!(looked_up, Some(session));
    }

    #[tokio::test]
    async fn test_sign_in_rejects_bad_password() {
        let store = InMemoryStore::new();
        store.sign_up("a@example.com", "a", "hunter2").unwrap();

        let err = store.sign_in("a@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_sign_out_destroys_session() {
        let store = InMemoryStore::new();
        let id = store.sign_up("a@example.com", "a", "hunter2").unwrap();
        let session = store.sign_in("a@example.com", "hunter2").await.unwrap();
        let mut events = store.subscribe();

        store.sign_out(&session.token).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut { user_id: id });
        assert_eq!(store.get_session(&session.token).await.unwrap(), None);

        // Idempotent: a second sign-out is a no-op.
        store.sign_out(&session.token).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_sessions_are_invisible() {
        let store = InMemoryStore::with_session_ttl(Duration::ZERO);
        store.sign_up("a@example.com", "a", "hunter2").unwrap();
        let session = store.sign_in("a@example.com", "hunter2").await.unwrap();

        assert_eq!(store.get_session(&session.token).await.unwrap(), None);
        assert_eq!(store.get_user(&session.token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let store = InMemoryStore::new();
        let id = store.sign_up("a@example.com", "a", "hunter2").unwrap();
        let session = store.sign_in("a@example.com", "hunter2").await.unwrap();

        let rotated = store.refresh(&session.token).unwrap();
        assert_ne!(rotated.token, session.token);
        assert_eq!(rotated.user_id, id);
        assert_eq!(store.get_session(&session.token).await.unwrap(), None);
        assert!(store.get_session(&rotated.token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_metadata_update_merges_and_notifies() {
        let store = InMemoryStore::new();
        let id = store.sign_up("a@example.com", "a", "hunter2").unwrap();
        let session = store.sign_in("a@example.com", "hunter2").await.unwrap();
        let mut events = store.subscribe();

        let mut fields = Map::new();
        fields.insert("role".to_string(), Value::String("admin".to_string()));
        store.update_user_metadata(&session.token, fields).await.unwrap();

        assert_eq!(events.recv().await.unwrap(), AuthEvent::MetadataUpdated { user_id: id });
        let identity = store.get_user(&session.token).await.unwrap().unwrap();
        assert_eq!(identity.metadata.get("role"), Some(&Value::String("admin".to_string())));
    }

    #[tokio::test]
    async fn test_update_profile_leaves_unset_fields_alone() {
        let store = InMemoryStore::new();
        let id = store.sign_up("a@example.com", "a", "hunter2").unwrap();

        store
            .update_profile(
                id,
                ProfileUpdate {
                    avatar_url: Some("https://cdn.example.com/a.png".to_string()),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap();

        let profile = store.read_profile(id).await.unwrap().unwrap();
        assert_eq!(profile.username, "a");
        assert_eq!(profile.avatar_url.as_deref(), Some("https://cdn.example.com/a.png"));
        assert_eq!(profile.role, "user");
    }

    #[tokio::test]
    async fn test_injected_faults_surface_as_unreachable() {
        let store = InMemoryStore::new();
        let id = store.sign_up("a@example.com", "a", "hunter2").unwrap();

        store.fail_profile_reads(true);
        assert!(matches!(
            store.read_profile(id).await.unwrap_err(),
            StoreError::Unreachable { .. }
        ));

        store.fail_profile_reads(false);
        assert!(store.read_profile(id).await.unwrap().is_some());
    }
}
