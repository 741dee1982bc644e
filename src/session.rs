//! The authenticated session, per spec §4.3.
//!
//! Session and keystore lifetimes are coupled in one direction only: any
//! transition that clears the session must precede or accompany a keystore
//! zeroize, but auto-lock may zeroize keys while the session token remains
//! valid until explicit logout (spec §3 Session invariant).

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultSession {
    pub token: String,
    pub user_id: String,
    pub expires_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Updated,
    Cleared,
}

type Listener = Box<dyn Fn(SessionEvent) + Send + Sync>;

/// Holds at most one session. Reads are racy-but-safe: a caller that
/// observes `None` simply treats the request as unauthenticated (spec §5).
pub struct SessionStore {
    session: Mutex<Option<VaultSession>>,
    listeners: Mutex<Vec<Listener>>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn on_event<F>(&self, listener: F)
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    fn notify(&self, event: SessionEvent) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(event);
        }
    }

    pub fn set(&self, session: VaultSession) {
        *self.session.lock().unwrap() = Some(session);
        self.notify(SessionEvent::Updated);
    }

    pub fn clear(&self) {
        *self.session.lock().unwrap() = None;
        self.notify(SessionEvent::Cleared);
    }

    pub fn get(&self) -> Option<VaultSession> {
        self.session.lock().unwrap().clone()
    }

    /// Handle a 401 observed anywhere in the crate: clears the session.
    /// Callers must pair this with a keystore zeroize (see the
    /// `Unauthenticated` branch in [`crate::sync::SyncEngine::save_now_reporting`]).
    pub fn on_unauthenticated(&self) {
        self.clear();
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        // `new()` returns `Arc<Self>`; `Default` is provided for callers
        // embedding a bare `SessionStore` behind their own `Arc`/`Mutex`.
        Self {
            session: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }
}
