//! Identity & Profile Store interface.
//!
//! The store owns all durable auth state: session tokens, user identities
//! with their metadata bag, and one profile record per user. Everything in
//! this crate treats the store as an external collaborator reached through
//! the [`IdentityStore`] trait; the guards never mutate session or profile
//! state except through the store's own mutation calls.
//!
//! Two sources can carry a role for the same user:
//!
//! - `UserIdentity.metadata["role"]` - a lightweight cache attached to the
//!   session's identity, possibly stale or absent
//! - `Profile.role` - the durable source of truth
//!
//! The role resolver ([`crate::auth::resolver`]) reconciles the two; the
//! store itself makes no consistency promises between them.

pub mod in_memory;

pub use in_memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::types::UserId;

/// A live authenticated session.
///
/// Owned exclusively by the store; the guards only ever read it. The token is
/// opaque - nothing outside the store parses or verifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// The identity attached to a session, including its mutable metadata bag.
///
/// Metadata may carry a `role` key and an `avatar_url` key among others.
/// Treated as a cache: it can lag behind the profile record until the next
/// explicit refresh or lazy write-back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    pub email: String,
    pub metadata: Map<String, Value>,
}

/// The durable per-user record. `role` is stored as a raw string so that an
/// out-of-band value never fails deserialization; the resolver decides what
/// counts as a valid role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub role: String,
}

/// Partial update for a profile record. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

/// Auth state changes published by the store.
///
/// Fires for changes made through this client's store handle: sign-in,
/// sign-out, token refresh, and metadata updates. There is no cross-client
/// propagation guarantee; staleness is bounded by the next navigation or
/// explicit refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { user_id: UserId },
    SignedOut { user_id: UserId },
    TokenRefreshed { user_id: UserId },
    MetadataUpdated { user_id: UserId },
}

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing service could not be reached or answered with an error.
    #[error("identity store unreachable: {message}")]
    Unreachable { message: String },

    /// Sign-in rejected the supplied credentials.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Unexpected backend failure with full context chain.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The Identity & Profile Store, as consumed by the guards.
///
/// Every method is a suspension point: callers are blocked until the external
/// call resolves. Mutation calls (`sign_out`, `update_user_metadata`,
/// `update_profile`) are atomic from the caller's perspective.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up the session for an opaque token. Expired or unknown tokens
    /// yield `None`, never an error.
    async fn get_session(&self, token: &str) -> StoreResult<Option<Session>>;

    /// Fetch the identity (with metadata bag) behind a session token.
    async fn get_user(&self, token: &str) -> StoreResult<Option<UserIdentity>>;

    /// Read the durable profile record for a user.
    async fn read_profile(&self, id: UserId) -> StoreResult<Option<Profile>>;

    /// Apply a partial update to a profile record.
    async fn update_profile(&self, id: UserId, fields: ProfileUpdate) -> StoreResult<()>;

    /// Merge fields into the metadata bag of the identity behind `token`.
    async fn update_user_metadata(&self, token: &str, fields: Map<String, Value>) -> StoreResult<()>;

    /// Create a session for the given credentials.
    async fn sign_in(&self, email: &str, password: &str) -> StoreResult<Session>;

    /// Destroy the session behind `token`. Signing out an already-dead
    /// session is a no-op, not an error.
    async fn sign_out(&self, token: &str) -> StoreResult<()>;

    /// Subscribe to auth state changes from this store handle.
    ///
    /// The underlying subscription is released when the receiver is dropped,
    /// on every exit path.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
