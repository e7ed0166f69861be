//! Session change listener.
//!
//! Thin wrapper over the store's broadcast channel. The underlying
//! subscription is released when the listener is dropped, which covers
//! every exit path of the consuming task including panics.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use crate::store::{AuthEvent, IdentityStore};

pub struct SessionChangeListener {
    rx: broadcast::Receiver<AuthEvent>,
}

impl SessionChangeListener {
    pub fn subscribe(store: &Arc<dyn IdentityStore>) -> Self {
        Self { rx: store.subscribe() }
    }

    /// Wait for the next auth state change.
    ///
    /// Returns `None` once the store side has shut down. A lagged receiver
    /// skips the missed events and keeps listening; every delivered event
    /// triggers a full re-resolution anyway, so dropped events only coalesce
    /// triggers, never lose state.
    pub async fn changed(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "session change listener lagged, coalescing triggers");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
