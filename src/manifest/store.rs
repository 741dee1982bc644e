//! The manifest state machine, per spec §4.6.
//!
//! `idle -> (load) -> loaded -> (apply) -> dirty -> (set_saving) -> saving
//! -> (ack_saved) -> loaded`, with `saving -> (set_offline) -> offline` and
//! `offline -> (apply) -> dirty`. Any state can `reset()` back to `idle`.
//!
//! Subscribers are notified synchronously after each transition, outside
//! the state lock, so a listener that calls back into the store does not
//! deadlock (it still must not re-enter — see module docs on the crate
//! root for the no-recursive-mutation rule this relies on).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::CoreError;

use super::model::Manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Loaded,
    Dirty,
    Saving,
    Offline,
}

/// A point-in-time snapshot handed to the sync engine for one save attempt.
#[derive(Debug, Clone)]
pub struct SaveData {
    pub manifest: Manifest,
    pub etag: Option<String>,
    pub server_version: u64,
}

/// The manifest plus the server bookkeeping needed for the next merge
/// (the last manifest this store knows the server accepted).
struct Inner {
    manifest: Manifest,
    base_snapshot: Manifest,
    status: Status,
    etag: Option<String>,
    server_version: u64,
    /// Set when `apply` runs while `status == Saving`; per spec §5 the
    /// in-flight save still completes normally, but the store re-enters
    /// `dirty` instead of `loaded`/`offline` once it does.
    dirty_since_save_started: bool,
}

type Listener = Box<dyn Fn(Status) + Send + Sync>;

pub struct ManifestStore {
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    generation: AtomicU64,
}

/// An RAII handle: dropping it removes the listener. Holding it is the
/// only way to keep the subscription alive.
pub struct Subscription<'a> {
    id: u64,
    store: &'a ManifestStore,
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.store.listeners.lock().unwrap().retain(|(id, _)| *id != self.id);
    }
}

impl ManifestStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                manifest: Manifest::empty(),
                base_snapshot: Manifest::empty(),
                status: Status::Idle,
                etag: None,
                server_version: 0,
                dirty_since_save_started: false,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription<'_>
    where
        F: Fn(Status) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, Box::new(listener)));
        Subscription { id, store: self }
    }

    fn notify(&self, status: Status) {
        for (_, listener) in self.listeners.lock().unwrap().iter() {
            listener(status);
        }
    }

    pub fn status(&self) -> Status {
        self.inner.lock().unwrap().status
    }

    pub fn manifest(&self) -> Manifest {
        self.inner.lock().unwrap().manifest.clone()
    }

    /// The current save-cancellation generation. A save captures this at
    /// `set_saving()` time; if it no longer matches when the save
    /// completes, the response belongs to an abandoned save.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Seat the store with a manifest pulled from the server (or freshly
    /// created locally). `base_snapshot` defaults to a copy of `manifest`.
    pub fn load(&self, manifest: Manifest, etag: Option<String>, server_version: u64, base_snapshot: Option<Manifest>) {
        let mut inner = self.inner.lock().unwrap();
        inner.base_snapshot = base_snapshot.unwrap_or_else(|| manifest.clone());
        inner.manifest = manifest;
        inner.etag = etag;
        inner.server_version = server_version;
        inner.dirty_since_save_started = false;
        inner.status = Status::Loaded;
        drop(inner);
        self.notify(Status::Loaded);
    }

    /// Replace the manifest with `updater(current)`. Transitions
    /// `loaded|offline -> dirty`. While `saving`, the mutation still
    /// applies but the visible status doesn't change until the in-flight
    /// save completes (see `dirty_since_save_started`).
    pub fn apply<F>(&self, updater: F) -> Result<(), CoreError>
    where
        F: FnOnce(Manifest) -> Manifest,
    {
        let mut inner = self.inner.lock().unwrap();
        if inner.status == Status::Idle {
            return Err(CoreError::InvalidState("cannot apply before load".into()));
        }
        let updated = updater(inner.manifest.clone());
        // An identity updater leaves status unchanged rather than marking
        // dirty (spec's boundary case): compare before transitioning.
        if updated == inner.manifest {
            return Ok(());
        }
        inner.manifest = updated;
        let next = match inner.status {
            Status::Saving => {
                inner.dirty_since_save_started = true;
                None
            }
            Status::Loaded | Status::Offline | Status::Dirty => Some(Status::Dirty),
            Status::Idle => unreachable!("checked above"),
        };
        if let Some(status) = next {
            inner.status = status;
        }
        let notify_status = inner.status;
        drop(inner);
        self.notify(notify_status);
        Ok(())
    }

    /// Snapshot the current manifest for a save attempt.
    pub fn get_save_data(&self) -> Option<SaveData> {
        let inner = self.inner.lock().unwrap();
        if inner.status == Status::Idle {
            return None;
        }
        Some(SaveData {
            manifest: inner.manifest.clone(),
            etag: inner.etag.clone(),
            server_version: inner.server_version,
        })
    }

    /// Move `dirty -> saving`. Returns the generation captured for this
    /// save attempt, which the caller must compare on completion.
    pub fn set_saving(&self) -> Result<u64, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.status != Status::Dirty {
            return Err(CoreError::InvalidState("set_saving requires dirty".into()));
        }
        inner.status = Status::Saving;
        let generation = self.generation();
        drop(inner);
        self.notify(Status::Saving);
        Ok(generation)
    }

    /// Record a successful save. Re-enters `dirty` instead of `loaded` if
    /// an `apply` landed while the save was in flight.
    pub fn ack_saved(&self, etag: String, server_version: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.etag = Some(etag);
        inner.server_version = server_version;
        inner.base_snapshot = inner.manifest.clone();
        let again_dirty = inner.dirty_since_save_started;
        inner.dirty_since_save_started = false;
        inner.status = if again_dirty { Status::Dirty } else { Status::Loaded };
        let status = inner.status;
        drop(inner);
        self.notify(status);
    }

    /// Record a failed save (network error, 5xx, or unresolved conflict).
    /// Re-enters `dirty` instead of `offline` under the same condition as
    /// `ack_saved`.
    pub fn set_offline(&self) {
        let mut inner = self.inner.lock().unwrap();
        let again_dirty = inner.dirty_since_save_started;
        inner.dirty_since_save_started = false;
        inner.status = if again_dirty { Status::Dirty } else { Status::Offline };
        let status = inner.status;
        drop(inner);
        self.notify(status);
    }

    /// Seat a merged manifest after a 409 merge-and-retry: adopts the
    /// fetched remote's etag/version as the new base for the retry PUT,
    /// and keeps the store in `dirty` so that retry fires next.
    pub fn load_merged(&self, manifest: Manifest, remote_etag: String, remote_version: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.manifest = manifest;
        inner.etag = Some(remote_etag);
        inner.server_version = remote_version;
        inner.status = Status::Dirty;
        drop(inner);
        self.notify(Status::Dirty);
    }

    /// Revert `saving -> dirty` without touching etag/version, for a
    /// failure that must not be retried automatically (413) but also must
    /// not be treated as a connectivity problem (offline).
    pub fn revert_to_dirty(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.dirty_since_save_started = false;
        inner.status = Status::Dirty;
        drop(inner);
        self.notify(Status::Dirty);
    }

    pub fn base_snapshot(&self) -> Manifest {
        self.inner.lock().unwrap().base_snapshot.clone()
    }

    /// Drop back to `idle`, bumping the generation so any save already in
    /// flight is ignored when it completes.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner {
            manifest: Manifest::empty(),
            base_snapshot: Manifest::empty(),
            status: Status::Idle,
            etag: None,
            server_version: 0,
            dirty_since_save_started: false,
        };
        self.generation.fetch_add(1, Ordering::SeqCst);
        drop(inner);
        self.notify(Status::Idle);
    }
}

impl Default for ManifestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::model::Bookmark;

    #[test]
    fn load_then_apply_marks_dirty() {
        let store = ManifestStore::new();
        store.load(Manifest::empty(), None, 0, None);
        assert_eq!(store.status(), Status::Loaded);

        store
            .apply(|mut m| {
                m.add_bookmark(Bookmark::new("https://example.com", "Ex", None, 1).unwrap());
                m
            })
            .unwrap();
        assert_eq!(store.status(), Status::Dirty);
    }

    fn add_one(m: Manifest) -> Manifest {
        let mut m = m;
        m.add_bookmark(Bookmark::new("https://example.com", "Ex", None, 1).unwrap());
        m
    }

    #[test]
    fn identity_updater_leaves_status_unchanged() {
        let store = ManifestStore::new();
        store.load(Manifest::empty(), None, 0, None);
        store.apply(|m| m).unwrap();
        assert_eq!(store.status(), Status::Loaded, "a no-op apply must not mark dirty");
    }

    #[test]
    fn save_cycle_returns_to_loaded() {
        let store = ManifestStore::new();
        store.load(Manifest::empty(), None, 0, None);
        store.apply(add_one).unwrap();
        let generation = store.set_saving().unwrap();
        assert_eq!(store.status(), Status::Saving);
        assert_eq!(generation, store.generation());

        store.ack_saved("E1".to_string(), 1);
        assert_eq!(store.status(), Status::Loaded);
    }

    #[test]
    fn apply_during_saving_reenters_dirty_after_ack() {
        let store = ManifestStore::new();
        store.load(Manifest::empty(), None, 0, None);
        store.apply(add_one).unwrap();
        store.set_saving().unwrap();
        assert_eq!(store.status(), Status::Saving);

        store.apply(add_one).unwrap();
        assert_eq!(store.status(), Status::Saving, "status stays saving until the in-flight save completes");

        store.ack_saved("E1".to_string(), 1);
        assert_eq!(store.status(), Status::Dirty);
    }

    #[test]
    fn network_failure_goes_offline_and_apply_recovers() {
        let store = ManifestStore::new();
        store.load(Manifest::empty(), None, 0, None);
        store.apply(add_one).unwrap();
        store.set_saving().unwrap();
        store.set_offline();
        assert_eq!(store.status(), Status::Offline);

        store.apply(add_one).unwrap();
        assert_eq!(store.status(), Status::Dirty);
    }

    #[test]
    fn reset_bumps_generation_so_late_ack_is_detectable() {
        let store = ManifestStore::new();
        store.load(Manifest::empty(), None, 0, None);
        store.apply(add_one).unwrap();
        let captured = store.set_saving().unwrap();

        store.reset();
        assert_ne!(captured, store.generation());
        assert_eq!(store.status(), Status::Idle);
    }

    #[test]
    fn subscriber_observes_transitions_and_unsubscribes_on_drop() {
        use std::sync::atomic::{AtomicUsize, Ordering as O};
        use std::sync::Arc;

        let store = ManifestStore::new();
        let count = Arc::new(AtomicUsize::new(0));
        let moved = count.clone();
        let subscription = store.subscribe(move |_| {
            moved.fetch_add(1, O::SeqCst);
        });

        store.load(Manifest::empty(), None, 0, None);
        assert_eq!(count.load(O::SeqCst), 1);

        drop(subscription);
        store.apply(add_one).unwrap();
        assert_eq!(count.load(O::SeqCst), 1, "no further notifications after unsubscribe");
    }
}
