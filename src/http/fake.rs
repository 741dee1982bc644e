//! An in-memory [`VaultApi`] double used by this crate's own test suite to
//! script server behavior (200/409/401/413/5xx/timeout) deterministically,
//! without a network. Not a production transport; kept public so
//! integration tests under `tests/` can reuse it.

use std::sync::Mutex;

use async_trait::async_trait;

use super::api::{
    KdfPublicParams, LoginResponse, ManifestEnvelopeResponse, PutManifestRequest,
    PutManifestResponse, RegisterResponse, SessionResponse, VaultApi, VaultSummary,
};
use super::HttpError;

#[derive(Debug, Clone)]
pub struct StoredManifest {
    pub version: u64,
    pub etag: String,
    pub nonce: String,
    pub ciphertext: String,
    pub updated_at: u64,
}

/// Scripted, mutable server state plus a queue of forced outcomes for the
/// next `put_manifest` call (used to simulate a 409 on the first attempt
/// and acceptance on the retry, per spec §8 scenario 4).
#[derive(Default)]
struct State {
    user_id: String,
    vault_id: String,
    token: String,
    expires_at: u64,
    kdf: Option<KdfPublicParams>,
    wrapped_mk: Option<String>,
    manifest: Option<StoredManifest>,
    etag_counter: u64,
    forced_put_outcomes: Vec<ForcedOutcome>,
    forced_upload_wmk_outcomes: Vec<ForcedOutcome>,
    authenticated: bool,
}

#[derive(Clone, Copy, Debug)]
pub enum ForcedOutcome {
    Conflict,
    Unauthenticated,
    PayloadTooLarge,
    ServerError,
    NetworkError,
}

pub struct FakeVaultApi {
    state: Mutex<State>,
}

impl FakeVaultApi {
    /// A fresh fake with no registered user and no manifest.
    pub fn new(user_id: &str, vault_id: &str) -> Self {
        Self {
            state: Mutex::new(State {
                user_id: user_id.to_string(),
                vault_id: vault_id.to_string(),
                token: "test-token".to_string(),
                expires_at: 9_999_999_999,
                authenticated: true,
                ..Default::default()
            }),
        }
    }

    pub fn set_kdf(&self, kdf: KdfPublicParams) {
        self.state.lock().unwrap().kdf = Some(kdf);
    }

    pub fn set_wrapped_mk(&self, wrapped_mk: Option<String>) {
        self.state.lock().unwrap().wrapped_mk = wrapped_mk;
    }

    pub fn token(&self) -> String {
        self.state.lock().unwrap().token.clone()
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.state.lock().unwrap().authenticated = authenticated;
    }

    /// Queue outcomes for the next N `put_manifest` calls, in order. An
    /// empty queue means "accept normally".
    pub fn queue_put_outcome(&self, outcome: ForcedOutcome) {
        self.state.lock().unwrap().forced_put_outcomes.push(outcome);
    }

    /// Queue an outcome for the next `upload_wmk` call, used to exercise
    /// the first-unlock `WmkUploadFailed` path.
    pub fn queue_upload_wmk_outcome(&self, outcome: ForcedOutcome) {
        self.state.lock().unwrap().forced_upload_wmk_outcomes.push(outcome);
    }

    pub fn current_manifest(&self) -> Option<StoredManifest> {
        self.state.lock().unwrap().manifest.clone()
    }

    fn require_auth(state: &State, token: &str) -> Result<(), HttpError> {
        if !state.authenticated || token != state.token {
            return Err(HttpError::Unauthenticated);
        }
        Ok(())
    }
}

#[async_trait]
impl VaultApi for FakeVaultApi {
    async fn register(&self, login: &str, _password: &str) -> Result<RegisterResponse, HttpError> {
        let state = self.state.lock().unwrap();
        Ok(RegisterResponse {
            user_id: format!("{}:{login}", state.user_id),
            kdf: state
                .kdf
                .clone()
                .unwrap_or_else(default_kdf),
        })
    }

    async fn login(&self, _login: &str, _password: &str) -> Result<LoginResponse, HttpError> {
        let state = self.state.lock().unwrap();
        Ok(LoginResponse {
            user_id: state.user_id.clone(),
            token: state.token.clone(),
            expires_at: state.expires_at,
            kdf: state.kdf.clone().unwrap_or_else(default_kdf),
            wrapped_mk: state.wrapped_mk.clone(),
        })
    }

    async fn logout(&self, _token: &str) -> Result<(), HttpError> {
        self.state.lock().unwrap().authenticated = false;
        Ok(())
    }

    async fn session(&self, token: &str) -> Result<SessionResponse, HttpError> {
        let state = self.state.lock().unwrap();
        Self::require_auth(&state, token)?;
        Ok(SessionResponse {
            user_id: state.user_id.clone(),
            valid: true,
            expires_at: state.expires_at,
        })
    }

    async fn upload_wmk(&self, token: &str, wrapped_mk: &str) -> Result<(), HttpError> {
        let mut state = self.state.lock().unwrap();
        Self::require_auth(&state, token)?;
        if !state.forced_upload_wmk_outcomes.is_empty() {
            let outcome = state.forced_upload_wmk_outcomes.remove(0);
            return Err(match outcome {
                ForcedOutcome::Conflict => HttpError::Conflict,
                ForcedOutcome::Unauthenticated => HttpError::Unauthenticated,
                ForcedOutcome::PayloadTooLarge => HttpError::PayloadTooLarge,
                ForcedOutcome::ServerError => HttpError::Status(500),
                ForcedOutcome::NetworkError => HttpError::Network("simulated network failure".to_string()),
            });
        }
        state.wrapped_mk = Some(wrapped_mk.to_string());
        Ok(())
    }

    async fn get_vault(&self, token: &str) -> Result<VaultSummary, HttpError> {
        let state = self.state.lock().unwrap();
        Self::require_auth(&state, token)?;
        Ok(VaultSummary {
            vault_id: state.vault_id.clone(),
            version: state.manifest.as_ref().map(|m| m.version).unwrap_or(0),
            has_manifest: state.manifest.is_some(),
            updated_at: state.manifest.as_ref().map(|m| m.updated_at).unwrap_or(0),
        })
    }

    async fn get_manifest(&self, token: &str) -> Result<Option<ManifestEnvelopeResponse>, HttpError> {
        let state = self.state.lock().unwrap();
        Self::require_auth(&state, token)?;
        Ok(state.manifest.as_ref().map(|m| ManifestEnvelopeResponse {
            vault_id: state.vault_id.clone(),
            version: m.version,
            etag: m.etag.clone(),
            nonce: m.nonce.clone(),
            ciphertext: m.ciphertext.clone(),
            updated_at: m.updated_at,
        }))
    }

    async fn put_manifest(
        &self,
        token: &str,
        if_match: Option<&str>,
        body: PutManifestRequest,
    ) -> Result<PutManifestResponse, HttpError> {
        let mut state = self.state.lock().unwrap();
        Self::require_auth(&state, token)?;

        if !state.forced_put_outcomes.is_empty() {
            let outcome = state.forced_put_outcomes.remove(0);
            return Err(match outcome {
                ForcedOutcome::Conflict => HttpError::Conflict,
                ForcedOutcome::Unauthenticated => HttpError::Unauthenticated,
                ForcedOutcome::PayloadTooLarge => HttpError::PayloadTooLarge,
                ForcedOutcome::ServerError => HttpError::Status(500),
                ForcedOutcome::NetworkError => HttpError::Network("simulated network failure".to_string()),
            });
        }

        let current_version = state.manifest.as_ref().map(|m| m.version).unwrap_or(0);
        if current_version > 0 {
            match if_match {
                Some(etag) if state.manifest.as_ref().map(|m| m.etag.as_str()) == Some(etag) => {}
                _ => return Err(HttpError::Conflict),
            }
        }
        if body.version != current_version + 1 {
            return Err(HttpError::Conflict);
        }

        state.etag_counter += 1;
        let etag = format!("E{}", state.etag_counter);
        let updated_at = body.version; // deterministic stand-in for wall-clock time

        state.manifest = Some(StoredManifest {
            version: body.version,
            etag: etag.clone(),
            nonce: body.nonce,
            ciphertext: body.ciphertext,
            updated_at,
        });

        Ok(PutManifestResponse {
            vault_id: state.vault_id.clone(),
            version: body.version,
            etag,
            updated_at,
        })
    }
}

fn default_kdf() -> KdfPublicParams {
    use base64::Engine;
    KdfPublicParams {
        algo: "argon2id".to_string(),
        salt: base64::engine::general_purpose::STANDARD.encode([1u8; 16]),
        m: 19 * 1024,
        t: 2,
        p: 1,
        hkdf_salt: base64::engine::general_purpose::STANDARD.encode([2u8; 16]),
    }
}
