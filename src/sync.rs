//! Debounced autosave and the optimistic-concurrency save protocol, per
//! spec §4.6 steps 1-9.
//!
//! This is the one place that ties the manifest store, the codec, the
//! keystore, the session, and `VaultApi` together. It owns no decrypted
//! plaintext beyond the lifetime of a single save/load call.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::debounced::Debouncer;
use crate::error::CoreError;
use crate::http::{HttpError, PutManifestRequest, PutManifestResponse, VaultApi};
use crate::keystore::Keystore;
use crate::manifest::{self, Manifest, ManifestStore};
use crate::session::SessionStore;

/// Debounce delay between a `dirty` transition and the autosave attempt.
pub const AUTOSAVE_DEBOUNCE: Duration = Duration::from_millis(800);

pub struct SyncEngine<A: VaultApi + 'static> {
    api: Arc<A>,
    store: Arc<ManifestStore>,
    keystore: Arc<Keystore>,
    session: Arc<SessionStore>,
    debouncer: Debouncer,
}

impl<A: VaultApi + 'static> SyncEngine<A> {
    pub fn new(api: Arc<A>, store: Arc<ManifestStore>, keystore: Arc<Keystore>, session: Arc<SessionStore>) -> Self {
        Self {
            api,
            store,
            keystore,
            session,
            debouncer: Debouncer::new(),
        }
    }

    /// Call after an `apply` that transitioned the store into `dirty`, to
    /// schedule the debounced save. Safe to call unconditionally; it is a
    /// no-op (via `save_now`'s own status check) if nothing is dirty by
    /// the time the debounce fires.
    pub fn schedule_autosave(self: &Arc<Self>, now_ms: u64) {
        let this = self.clone();
        self.debouncer.fire_after(AUTOSAVE_DEBOUNCE, async move {
            this.save_now(now_ms).await;
        });
    }

    /// Best-effort flush on host teardown: if `status == dirty`, fire the
    /// save once without the caller awaiting the reply.
    pub fn flush_on_teardown(self: &Arc<Self>, now_ms: u64) {
        if self.store.status() == manifest::Status::Dirty {
            let this = self.clone();
            tokio::spawn(async move {
                this.save_now(now_ms).await;
            });
        }
    }

    /// Run one save attempt. Swallows errors into store-state transitions
    /// (per spec §4.6); callers that need the error surfaced should use
    /// [`SyncEngine::save_now_reporting`].
    pub async fn save_now(self: &Arc<Self>, now_ms: u64) {
        let _ = self.save_now_reporting(now_ms).await;
    }

    /// Run one save attempt and return its outcome as a `CoreError` on
    /// failure, for callers (e.g. an explicit "retry" button) that want to
    /// react to the specific failure.
    pub async fn save_now_reporting(self: &Arc<Self>, now_ms: u64) -> Result<(), CoreError> {
        let Some(save_data) = self.store.get_save_data() else {
            return Ok(());
        };
        if self.store.status() != manifest::Status::Dirty {
            return Ok(());
        }

        let Some(session) = self.session.get() else {
            return Err(CoreError::Unauthenticated);
        };
        let Some(aad) = self.keystore.get_aad_context() else {
            return Err(CoreError::Locked);
        };
        let mak = self.keystore.get_mak(session.expires_at_ms, now_ms)?;

        let envelope = manifest::encode(&save_data.manifest, &mak, &aad.user_id, &aad.vault_id)
            .map_err(|_| CoreError::UnableToUnlock)?;

        let generation = match self.store.set_saving() {
            Ok(g) => g,
            Err(_) => return Ok(()), // another save already in flight or not dirty
        };

        let result = self
            .put_once(&session.token, save_data.etag.as_deref(), save_data.server_version, &envelope)
            .await;

        if self.store.generation() != generation {
            // The store was reset/zeroized while this save was in flight.
            return Ok(());
        }

        match result {
            Ok(response) => {
                self.store.ack_saved(response.etag, response.version);
                Ok(())
            }
            Err(HttpError::Conflict) => self.merge_and_retry(&session.token, &aad, &mak, generation, now_ms).await,
            Err(HttpError::Unauthenticated) => {
                self.session.clear();
                self.keystore.zeroize();
                Err(CoreError::Unauthenticated)
            }
            Err(HttpError::PayloadTooLarge) => {
                self.store.revert_to_dirty();
                Err(CoreError::PayloadTooLarge)
            }
            Err(other) => {
                self.store.set_offline();
                Err(CoreError::from(other))
            }
        }
    }

    async fn put_once(
        &self,
        token: &str,
        etag: Option<&str>,
        server_version: u64,
        envelope: &manifest::ManifestEnvelope,
    ) -> Result<PutManifestResponse, HttpError> {
        let if_match = if server_version > 0 { etag } else { None };
        self.api
            .put_manifest(
                token,
                if_match,
                PutManifestRequest {
                    version: server_version + 1,
                    nonce: envelope.nonce.clone(),
                    ciphertext: envelope.ciphertext.clone(),
                },
            )
            .await
    }

    /// Execute the merge-and-retry algorithm once per conflict event
    /// (spec §4.6 step 6 / §4.7). A second 409 gives up with
    /// `ConflictUnresolved`.
    async fn merge_and_retry(
        &self,
        token: &str,
        aad: &crate::keystore::AadContext,
        mak: &crate::crypto::SecretBytes,
        generation: u64,
        now_ms: u64,
    ) -> Result<(), CoreError> {
        let remote_envelope = match self.api.get_manifest(token).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                self.store.set_offline();
                return Err(CoreError::ConflictUnresolved);
            }
            Err(err) => {
                self.store.set_offline();
                return Err(CoreError::from(err));
            }
        };

        let remote = manifest::decode(
            &manifest::ManifestEnvelope {
                version: remote_envelope.version,
                nonce: remote_envelope.nonce.clone(),
                ciphertext: remote_envelope.ciphertext.clone(),
            },
            mak,
            &aad.user_id,
            &aad.vault_id,
        )
        .map_err(|_| CoreError::UnableToUnlock)?;

        let local = self.store.manifest();
        let base = self.store.base_snapshot();
        let outcome = manifest::merge(&base, &local, &remote);
        if !outcome.conflicts.is_empty() {
            warn!(conflicts = ?outcome.conflicts.iter().map(|c| c.as_label()).collect::<Vec<_>>(), "manifest merge resolved conflicts, remote preferred");
        }

        if self.store.generation() != generation {
            return Ok(());
        }
        self.store.load_merged(outcome.merged, remote_envelope.etag.clone(), remote_envelope.version);

        let retry_generation = self.store.set_saving().map_err(|_| CoreError::ConflictUnresolved)?;
        let save_data = self.store.get_save_data().ok_or(CoreError::ConflictUnresolved)?;
        let envelope = manifest::encode(&save_data.manifest, mak, &aad.user_id, &aad.vault_id).map_err(|_| CoreError::UnableToUnlock)?;

        let retry_result = self
            .put_once(token, save_data.etag.as_deref(), save_data.server_version, &envelope)
            .await;

        if self.store.generation() != retry_generation {
            return Ok(());
        }

        match retry_result {
            Ok(response) => {
                self.store.ack_saved(response.etag, response.version);
                Ok(())
            }
            Err(HttpError::Conflict) => {
                self.store.set_offline();
                Err(CoreError::ConflictUnresolved)
            }
            Err(HttpError::Unauthenticated) => {
                self.session.clear();
                self.keystore.zeroize();
                Err(CoreError::Unauthenticated)
            }
            Err(HttpError::PayloadTooLarge) => {
                self.store.revert_to_dirty();
                Err(CoreError::PayloadTooLarge)
            }
            Err(other) => {
                self.store.set_offline();
                Err(CoreError::from(other))
            }
        }
    }
}

/// Load the current server manifest into a freshly-unlocked store, per the
/// `load` side of spec §4.6 (used on unlock / session resume, outside the
/// save path).
pub async fn load_from_server<A: VaultApi>(
    api: &A,
    store: &ManifestStore,
    token: &str,
    mak: &crate::crypto::SecretBytes,
    aad: &crate::keystore::AadContext,
) -> Result<(), CoreError> {
    match api.get_manifest(token).await? {
        Some(envelope) => {
            let manifest: Manifest = manifest::decode(
                &manifest::ManifestEnvelope {
                    version: envelope.version,
                    nonce: envelope.nonce,
                    ciphertext: envelope.ciphertext,
                },
                mak,
                &aad.user_id,
                &aad.vault_id,
            )
            .map_err(|_| CoreError::UnableToUnlock)?;
            store.load(manifest, Some(envelope.etag), envelope.version, None);
        }
        None => store.load(Manifest::empty(), None, 0, None),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::fake::{FakeVaultApi, ForcedOutcome};
    use crate::manifest::Bookmark;

    async fn unlocked_engine() -> (Arc<SyncEngine<FakeVaultApi>>, Arc<ManifestStore>, Arc<Keystore>, Arc<SessionStore>) {
        let api = Arc::new(FakeVaultApi::new("user-1", "vault-1"));
        let keystore = Keystore::new(Duration::from_secs(1200));
        let session = SessionStore::new();

        crate::auth::unlock(api.as_ref(), &keystore, &session, "alice", "pw", 0).await.unwrap();

        let store = Arc::new(ManifestStore::new());
        let token = session.get().unwrap().token;
        let aad = keystore.get_aad_context().unwrap();
        let mak = keystore.get_mak(session.get().unwrap().expires_at_ms, 0).unwrap();
        load_from_server(api.as_ref(), &store, &token, &mak, &aad).await.unwrap();

        let engine = Arc::new(SyncEngine::new(api, store.clone(), keystore.clone(), session.clone()));
        (engine, store, keystore, session)
    }

    #[tokio::test]
    async fn create_and_save_transitions_loaded_dirty_saving_loaded() {
        let (engine, store, _keystore, _session) = unlocked_engine().await;
        store
            .apply(|mut m| {
                m.add_bookmark(Bookmark::new("https://example.com", "Ex", None, 1).unwrap());
                m
            })
            .unwrap();
        assert_eq!(store.status(), manifest::Status::Dirty);

        engine.save_now_reporting(1).await.unwrap();
        assert_eq!(store.status(), manifest::Status::Loaded);
    }

    #[tokio::test]
    async fn conflict_resolves_via_merge_and_retry() {
        let (engine, store, _keystore, _session) = unlocked_engine().await;
        store
            .apply(|mut m| {
                m.add_bookmark(Bookmark::new("https://example.com", "First", None, 1).unwrap());
                m
            })
            .unwrap();
        engine.save_now_reporting(1).await.unwrap();
        assert_eq!(store.status(), manifest::Status::Loaded);

        // A forced 409 on the next save attempt exercises merge-and-retry
        // against a remote that still matches our base snapshot.
        store
            .apply(|mut m| {
                m.add_bookmark(Bookmark::new("https://example.com", "Second", None, 2).unwrap());
                m
            })
            .unwrap();

        engine.api.queue_put_outcome(ForcedOutcome::Conflict);
        let outcome = engine.save_now_reporting(2).await;
        assert!(outcome.is_ok());
        assert_eq!(store.status(), manifest::Status::Loaded);
        assert_eq!(store.manifest().items.len(), 2, "merge against the unchanged remote must keep both bookmarks");
    }

    #[tokio::test]
    async fn payload_too_large_is_not_retried_and_stays_dirty() {
        let (engine, store, _keystore, _session) = unlocked_engine().await;
        store
            .apply(|mut m| {
                m.add_bookmark(Bookmark::new("https://example.com", "Ex", None, 1).unwrap());
                m
            })
            .unwrap();

        engine.api.queue_put_outcome(ForcedOutcome::PayloadTooLarge);
        let err = engine.save_now_reporting(1).await.unwrap_err();
        assert!(matches!(err, CoreError::PayloadTooLarge));
        assert_eq!(store.status(), manifest::Status::Dirty);
    }

    #[tokio::test]
    async fn network_error_goes_offline() {
        let (engine, store, _keystore, _session) = unlocked_engine().await;
        store
            .apply(|mut m| {
                m.add_bookmark(Bookmark::new("https://example.com", "Ex", None, 1).unwrap());
                m
            })
            .unwrap();

        engine.api.queue_put_outcome(ForcedOutcome::NetworkError);
        let err = engine.save_now_reporting(1).await.unwrap_err();
        assert!(matches!(err, CoreError::Network(_)));
        assert_eq!(store.status(), manifest::Status::Offline);
    }

    #[tokio::test]
    async fn unauthenticated_clears_session_and_locks_keystore() {
        let (engine, store, keystore, session) = unlocked_engine().await;
        store
            .apply(|mut m| {
                m.add_bookmark(Bookmark::new("https://example.com", "Ex", None, 1).unwrap());
                m
            })
            .unwrap();

        engine.api.queue_put_outcome(ForcedOutcome::Unauthenticated);
        let err = engine.save_now_reporting(1).await.unwrap_err();
        assert!(matches!(err, CoreError::Unauthenticated));
        assert!(session.get().is_none());
        assert!(!keystore.is_unlocked());
    }
}
