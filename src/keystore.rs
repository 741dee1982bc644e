//! Volatile post-unlock key material, per spec §4.2.
//!
//! The keystore is the only place `MK`/`KEK`/`MAK` live. Nothing here ever
//! reaches disk, a log line, or a cache keyed by user-observable state.
//! Reset/lock is driven by a single outstanding auto-lock timer, built on
//! the same [`crate::debounced::Debouncer`] the manifest store's autosave
//! debounce uses.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::crypto::{clone_secret, SecretBytes};
use crate::debounced::Debouncer;
use crate::error::CoreError;

/// AAD context bound into the WMK and manifest envelopes for this vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AadContext {
    pub user_id: String,
    pub vault_id: String,
    pub wmk_label: String,
    pub manifest_label: String,
}

struct Unlocked {
    mk: SecretBytes,
    kek: SecretBytes,
    mak: SecretBytes,
    aad: AadContext,
}

enum State {
    Locked,
    Unlocked(Unlocked),
}

/// Broadcasts fired on state transitions; the sync/session layers wire
/// these into their own higher-level events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeystoreEvent {
    Updated,
    Locked,
}

type Listener = Box<dyn Fn(KeystoreEvent) + Send + Sync>;

pub struct Keystore {
    state: Mutex<State>,
    listeners: Mutex<Vec<Listener>>,
    idle_timeout: Mutex<Duration>,
    timer: Debouncer,
}

impl Keystore {
    pub fn new(idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Locked),
            listeners: Mutex::new(Vec::new()),
            idle_timeout: Mutex::new(idle_timeout),
            timer: Debouncer::new(),
        })
    }

    pub fn on_event<F>(&self, listener: F)
    where
        F: Fn(KeystoreEvent) + Send + Sync + 'static,
    {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    fn notify(&self, event: KeystoreEvent) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(event);
        }
    }

    pub fn is_unlocked(&self) -> bool {
        matches!(*self.state.lock().unwrap(), State::Unlocked(_))
    }

    /// Replace the current state with fresh key material, starting (or
    /// resetting) the auto-lock timer. Any prior buffers are dropped,
    /// wiping them via `SecretBytes`'s zeroize-on-drop.
    pub fn set(self: &Arc<Self>, mk: SecretBytes, kek: SecretBytes, mak: SecretBytes, aad: AadContext, expires_at_ms: u64, now_ms: u64) {
        *self.state.lock().unwrap() = State::Unlocked(Unlocked { mk, kek, mak, aad });
        self.restart_timer(expires_at_ms, now_ms);
        self.notify(KeystoreEvent::Updated);
    }

    /// Returns a copy of MAK; fails with `Locked` otherwise. Resets the
    /// auto-lock timer, per spec §4.2 ("any access resets the timer") —
    /// callers pass the current expiry/time since the keystore has no
    /// clock of its own.
    pub fn get_mak(self: &Arc<Self>, expires_at_ms: u64, now_ms: u64) -> Result<SecretBytes, CoreError> {
        let mak = match &*self.state.lock().unwrap() {
            State::Unlocked(u) => clone_secret(&u.mak),
            State::Locked => return Err(CoreError::Locked),
        };
        self.restart_timer(expires_at_ms, now_ms);
        Ok(mak)
    }

    pub fn get_kek(self: &Arc<Self>, expires_at_ms: u64, now_ms: u64) -> Result<SecretBytes, CoreError> {
        let kek = match &*self.state.lock().unwrap() {
            State::Unlocked(u) => clone_secret(&u.kek),
            State::Locked => return Err(CoreError::Locked),
        };
        self.restart_timer(expires_at_ms, now_ms);
        Ok(kek)
    }

    pub fn get_mk(self: &Arc<Self>, expires_at_ms: u64, now_ms: u64) -> Result<SecretBytes, CoreError> {
        let mk = match &*self.state.lock().unwrap() {
            State::Unlocked(u) => clone_secret(&u.mk),
            State::Locked => return Err(CoreError::Locked),
        };
        self.restart_timer(expires_at_ms, now_ms);
        Ok(mk)
    }

    pub fn get_aad_context(&self) -> Option<AadContext> {
        match &*self.state.lock().unwrap() {
            State::Unlocked(u) => Some(u.aad.clone()),
            State::Locked => None,
        }
    }

    /// Replace the idle timeout used by future `restart_timer` calls
    /// (settings change, per spec §4.8); does not itself reschedule.
    pub fn set_idle_timeout(&self, timeout: Duration) {
        *self.idle_timeout.lock().unwrap() = timeout;
    }

    /// Wipe all key material and the AAD context, stop the timer, and
    /// notify subscribers. Idempotent.
    pub fn zeroize(&self) {
        *self.state.lock().unwrap() = State::Locked;
        self.timer.cancel();
        self.notify(KeystoreEvent::Locked);
    }

    /// Schedule (replacing any pending) a fire at `now + min(idle_timeout,
    /// expires_at - now)`; fires immediately if already expired.
    fn restart_timer(self: &Arc<Self>, expires_at_ms: u64, now_ms: u64) {
        let idle_timeout = *self.idle_timeout.lock().unwrap();
        let remaining_to_expiry = expires_at_ms.saturating_sub(now_ms);
        let delay = Duration::from_millis(remaining_to_expiry).min(idle_timeout);

        if delay.is_zero() {
            self.zeroize();
            return;
        }

        let this = self.clone();
        self.timer.fire_after(delay, async move {
            this.zeroize();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{clone_secret, generate_mk};

    fn aad() -> AadContext {
        AadContext {
            user_id: "u1".to_string(),
            vault_id: "v1".to_string(),
            wmk_label: "wmk_v1".to_string(),
            manifest_label: "manifest_v1".to_string(),
        }
    }

    #[test]
    fn locked_keystore_rejects_key_access() {
        let keystore = Keystore::new(Duration::from_secs(60));
        assert!(!keystore.is_unlocked());
        assert!(matches!(keystore.get_mak(1_000, 0), Err(CoreError::Locked)));
    }

    #[tokio::test]
    async fn set_then_get_round_trips_keys() {
        let keystore = Keystore::new(Duration::from_secs(60));
        let mk = generate_mk();
        let kek = generate_mk();
        let mak = generate_mk();
        keystore.set(mk, kek, clone_secret(&mak), aad(), 1_000_000, 0);

        assert!(keystore.is_unlocked());
        let fetched = keystore.get_mak(1_000_000, 0).unwrap();
        use secrecy::ExposeSecret;
        assert_eq!(fetched.expose_secret(), mak.expose_secret());
    }

    #[tokio::test]
    async fn zeroize_locks_and_drops_aad_context() {
        let keystore = Keystore::new(Duration::from_secs(60));
        keystore.set(generate_mk(), generate_mk(), generate_mk(), aad(), 1_000_000, 0);
        keystore.zeroize();

        assert!(!keystore.is_unlocked());
        assert!(keystore.get_aad_context().is_none());
    }

    #[tokio::test]
    async fn expired_session_locks_immediately_on_set() {
        let keystore = Keystore::new(Duration::from_secs(60));
        keystore.set(generate_mk(), generate_mk(), generate_mk(), aad(), 500, 1_000);
        tokio::task::yield_now().await;
        assert!(!keystore.is_unlocked());
    }
}
