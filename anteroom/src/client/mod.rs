//! Client-time guard.
//!
//! A tab-scoped watcher over one protected path. It resolves the current
//! role immediately on spawn and again on every auth state change, and
//! publishes the admission outcome through a watch channel. Whatever
//! renders the protected content gates on that channel: content is only
//! renderable while the published state is [`GuardState::Authorized`].
//!
//! Concurrency discipline: every resolution pass carries a generation
//! number taken when it is triggered. A pass only publishes its outcome if
//! no newer pass has been triggered since, so a stale decision computed
//! against old session state can never overwrite a fresher one. There is
//! no `Authorized` back to `Loading` transition; `Loading` is only ever
//! the initial state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::auth::{
    listener::SessionChangeListener,
    policy::{AdmissionDecision, RoutePolicy},
    resolver, CurrentUser,
};
use crate::store::IdentityStore;

/// What the guarded view is allowed to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardState {
    /// First resolution pass has not finished; show nothing protected.
    Loading,
    /// The current user is admitted to the guarded path.
    Authorized,
    /// The client should navigate to this path instead.
    Redirecting(String),
}

/// The tab's credential slot, standing in for the browser cookie jar.
///
/// Shared between the guard and whatever performs sign-in and sign-out for
/// this tab, so a sign-out can clear the token before the store event lands.
#[derive(Debug, Clone, Default)]
pub struct TabSession(Arc<RwLock<Option<String>>>);

impl TabSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, token: Option<String>) {
        *self.0.write().await = token;
    }

    pub async fn get(&self) -> Option<String> {
        self.0.read().await.clone()
    }
}

/// Handle to a running client-time guard. Dropping the handle (or calling
/// [`ClientGuard::shutdown`]) cancels the watcher task and releases the
/// store subscription.
pub struct ClientGuard {
    state_rx: watch::Receiver<GuardState>,
    cancel: CancellationToken,
}

impl ClientGuard {
    /// Start guarding `path` for the tab behind `tab_session`.
    ///
    /// Subscribes to the session change listener before returning, so no
    /// auth event fired after this call can be missed.
    pub fn spawn(store: Arc<dyn IdentityStore>, policy: RoutePolicy, path: String, tab_session: TabSession) -> Self {
        let (state_tx, state_rx) = watch::channel(GuardState::Loading);
        let cancel = CancellationToken::new();
        let listener = SessionChangeListener::subscribe(&store);

        let watcher = Watcher {
            store,
            policy,
            path,
            tab_session,
            state_tx: Arc::new(state_tx),
            generation: Arc::new(AtomicU64::new(0)),
            cancel: cancel.clone(),
        };
        tokio::spawn(watcher.run(listener));

        Self { state_rx, cancel }
    }

    /// The latest published state.
    pub fn state(&self) -> GuardState {
        self.state_rx.borrow().clone()
    }

    /// A fresh receiver for callers that want to await transitions.
    pub fn watch(&self) -> watch::Receiver<GuardState> {
        self.state_rx.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Watcher {
    store: Arc<dyn IdentityStore>,
    policy: RoutePolicy,
    path: String,
    tab_session: TabSession,
    state_tx: Arc<watch::Sender<GuardState>>,
    generation: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl Watcher {
    async fn run(self, mut listener: SessionChangeListener) {
        self.trigger_pass();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    trace!(path = %self.path, "client guard torn down");
                    break;
                }
                event = listener.changed() => match event {
                    Some(event) => {
                        debug!(path = %self.path, ?event, "auth state changed, re-resolving");
                        self.trigger_pass();
                    }
                    None => {
                        debug!(path = %self.path, "store event channel closed, stopping guard");
                        break;
                    }
                },
            }
        }
        // Listener dropped here, releasing the store subscription.
    }

    /// Allocate the next generation and run a resolution pass on its own
    /// task, so a slow store call never blocks newer triggers.
    fn trigger_pass(&self) {
        let pass_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let store = Arc::clone(&self.store);
        let policy = self.policy.clone();
        let path = self.path.clone();
        let tab_session = self.tab_session.clone();
        let state_tx = Arc::clone(&self.state_tx);
        let generation = Arc::clone(&self.generation);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let state = resolution_pass(&store, &policy, &path, &tab_session).await;

            // Superseded or torn down: a newer pass owns the outcome now.
            if cancel.is_cancelled() || generation.load(Ordering::SeqCst) != pass_generation {
                trace!(path, pass_generation, "resolution pass superseded, discarding outcome");
                return;
            }
            let _ = state_tx.send(state);
        });
    }
}

/// One full resolution pass: tab token to session to role to admission.
/// Store failures degrade to an unresolved role, so the pass fails closed.
#[instrument(skip_all, fields(path = %path))]
async fn resolution_pass(
    store: &Arc<dyn IdentityStore>,
    policy: &RoutePolicy,
    path: &str,
    tab_session: &TabSession,
) -> GuardState {
    let current_user = match tab_session.get().await {
        Some(token) => fetch_current_user(store, &token).await,
        None => None,
    };

    let resolution = resolver::resolve_role(store, current_user.as_ref()).await;
    match policy.decide(resolution, path) {
        AdmissionDecision::Allow => GuardState::Authorized,
        AdmissionDecision::Redirect(target) => GuardState::Redirecting(target),
    }
}

async fn fetch_current_user(store: &Arc<dyn IdentityStore>, token: &str) -> Option<CurrentUser> {
    let session = match store.get_session(token).await {
        Ok(session) => session?,
        Err(e) => {
            debug!(error = %e, "session lookup failed during client pass");
            return None;
        }
    };
    let identity = match store.get_user(token).await {
        Ok(identity) => identity?,
        Err(e) => {
            debug!(error = %e, "identity lookup failed during client pass");
            return None;
        }
    };
    Some(CurrentUser { session, identity })
}
