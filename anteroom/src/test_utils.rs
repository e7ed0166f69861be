//! Shared constructors for unit tests.

use std::sync::Arc;

use crate::auth::policy::RoutePolicy;
use crate::config::Config;
use crate::store::{IdentityStore, InMemoryStore};
use crate::AppState;

/// A config with the secure cookie flag off, matching test servers that
/// speak plain HTTP.
pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.session.cookie_secure = false;
    config
}

/// Fresh app state over an empty in-memory store. The raw store handle is
/// returned alongside so tests can seed accounts and inject faults.
pub fn create_test_state() -> (AppState, Arc<InMemoryStore>) {
    let config = create_test_config();
    let raw = Arc::new(InMemoryStore::new());
    let store: Arc<dyn IdentityStore> = raw.clone();
    let policy = RoutePolicy::new(&config.routes);
    let state = AppState::builder().store(store).config(config).policy(policy).build();
    (state, raw)
}

/// Create an account with the given profile role, sign it in, and return a
/// cookie header value carrying the session token.
pub async fn signed_in_cookie(store: &InMemoryStore, role: &str) -> String {
    let email = format!("{role}@example.com");
    let id = store.sign_up(&email, role, "password").unwrap();
    store.set_profile_role(id, role);
    let session = store.sign_in(&email, "password").await.unwrap();
    format!("anteroom_session={}", session.token)
}
