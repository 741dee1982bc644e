//! The unlock pipeline, per spec §4.4.
//!
//! Orchestrates login, UEK derivation, master-key unwrap-or-create, and
//! seating the keystore. Every crypto temporary here is a `SecretBytes` or
//! gets an explicit `zeroize()` call, so it is wiped on every exit path —
//! including the early returns on failure.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::ExposeSecret;
use std::sync::Arc;
use zeroize::Zeroize;

use crate::crypto::{self, Argon2Tuning, SecretBytes, XCHACHA_NONCE_LEN};
use crate::error::CoreError;
use crate::http::{LoginResponse, VaultApi};
use crate::keystore::{AadContext, Keystore};
use crate::session::{SessionStore, VaultSession};

enum UnlockOutcome {
    Unlocked { mk: SecretBytes, kek: SecretBytes, mak: SecretBytes },
    WmkUploadFailed,
}

/// Run the full unlock pipeline: login, derive/unwrap the master key, seat
/// the keystore. On success the session and keystore are both populated.
///
/// Per spec §4.4, a `WmkUploadFailed` leaves the session valid (so the
/// caller can retry without re-authenticating); every other failure clears
/// the session that login established.
pub async fn unlock(
    vault_api: &dyn VaultApi,
    keystore: &Arc<Keystore>,
    session: &Arc<SessionStore>,
    login: &str,
    password: &str,
    now_ms: u64,
) -> Result<(), CoreError> {
    let login_resp = vault_api.login(login, password).await?;
    let vault_summary = vault_api.get_vault(&login_resp.token).await?;
    let vault_id = vault_summary.vault_id;
    let user_id = login_resp.user_id.clone();

    session.set(VaultSession {
        token: login_resp.token.clone(),
        user_id: user_id.clone(),
        expires_at_ms: login_resp.expires_at,
    });

    match unwrap_or_create_mk(vault_api, &login_resp, &user_id, &vault_id, password).await {
        Ok(UnlockOutcome::Unlocked { mk, kek, mak }) => {
            let aad = AadContext {
                user_id,
                vault_id,
                wmk_label: "wmk_v1".to_string(),
                manifest_label: "manifest_v1".to_string(),
            };
            keystore.set(mk, kek, mak, aad, login_resp.expires_at, now_ms);
            Ok(())
        }
        Ok(UnlockOutcome::WmkUploadFailed) => Err(CoreError::WmkUploadFailed),
        Err(err) => {
            session.clear();
            Err(err)
        }
    }
}

async fn unwrap_or_create_mk(
    vault_api: &dyn VaultApi,
    login_resp: &LoginResponse,
    user_id: &str,
    vault_id: &str,
    password: &str,
) -> Result<UnlockOutcome, CoreError> {
    let salt = BASE64
        .decode(login_resp.kdf.salt.as_bytes())
        .map_err(|_| CoreError::UnableToUnlock)?;
    let hkdf_salt = BASE64
        .decode(login_resp.kdf.hkdf_salt.as_bytes())
        .map_err(|_| CoreError::UnableToUnlock)?;
    let tuning = Argon2Tuning {
        memory_kib: login_resp.kdf.m,
        iterations: login_resp.kdf.t,
        parallelism: login_resp.kdf.p,
    };

    let uek = crypto::derive_uek(password.as_bytes(), &salt, tuning)?;
    let aad = crypto::aad_wmk(user_id, vault_id);

    let mk = match &login_resp.wrapped_mk {
        Some(wrapped_b64) => unwrap_mk(wrapped_b64, &uek, &aad)?,
        None => match create_and_upload_mk(vault_api, &login_resp.token, &uek, &aad).await {
            Ok(mk) => mk,
            Err(()) => return Ok(UnlockOutcome::WmkUploadFailed),
        },
    };

    let (kek, mak) = crypto::derive_subkeys(&mk, &hkdf_salt)?;
    Ok(UnlockOutcome::Unlocked { mk, kek, mak })
}

/// Case A: a WMK already exists server-side; unwrap it under the UEK.
fn unwrap_mk(wrapped_b64: &str, uek: &SecretBytes, aad: &[u8]) -> Result<SecretBytes, CoreError> {
    let mut wrapped = BASE64.decode(wrapped_b64.as_bytes()).map_err(|_| CoreError::UnableToUnlock)?;
    if wrapped.len() < XCHACHA_NONCE_LEN {
        wrapped.zeroize();
        return Err(CoreError::UnableToUnlock);
    }
    let nonce = crypto::nonce_from_slice(&wrapped[..XCHACHA_NONCE_LEN]).map_err(CoreError::from)?;
    let mk_bytes = crypto::decrypt(uek, &nonce, aad, &wrapped[XCHACHA_NONCE_LEN..]).map_err(CoreError::from)?;
    wrapped.zeroize();
    Ok(SecretBytes::from(mk_bytes))
}

/// Case B: first unlock. Sample a fresh MK, wrap it under the UEK, and
/// upload the WMK before treating the unlock as successful.
async fn create_and_upload_mk(vault_api: &dyn VaultApi, token: &str, uek: &SecretBytes, aad: &[u8]) -> Result<SecretBytes, ()> {
    let mk = crypto::generate_mk();
    let (nonce, mut ciphertext) = crypto::encrypt(uek, aad, mk.expose_secret()).map_err(|_| ())?;

    let mut wmk_bytes = nonce.to_vec();
    wmk_bytes.append(&mut ciphertext);
    let wmk_b64 = BASE64.encode(&wmk_bytes);
    wmk_bytes.zeroize();

    vault_api.upload_wmk(token, &wmk_b64).await.map_err(|_| ())?;
    Ok(mk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::fake::FakeVaultApi;
    use std::time::Duration;

    fn setup() -> (FakeVaultApi, Arc<Keystore>, Arc<SessionStore>) {
        let api = FakeVaultApi::new("user-1", "vault-1");
        let keystore = Keystore::new(Duration::from_secs(1200));
        let session = SessionStore::new();
        (api, keystore, session)
    }

    #[tokio::test]
    async fn first_unlock_creates_and_uploads_wmk() {
        let (api, keystore, session) = setup();
        unlock(&api, &keystore, &session, "alice", "correct horse battery staple", 0)
            .await
            .unwrap();

        assert!(keystore.is_unlocked());
        assert!(session.get().is_some());
        assert!(
            api.login("alice", "correct horse battery staple").await.unwrap().wrapped_mk.is_some(),
            "first unlock must have uploaded a wrapped master key"
        );
    }

    #[tokio::test]
    async fn re_unlock_with_wrong_password_fails_generically_and_clears_session() {
        let (api, keystore, session) = setup();
        unlock(&api, &keystore, &session, "alice", "right password", 0).await.unwrap();
        keystore.zeroize();
        session.clear();

        let err = unlock(&api, &keystore, &session, "alice", "wrong password", 0).await.unwrap_err();
        assert!(matches!(err, CoreError::UnableToUnlock));
        assert!(!keystore.is_unlocked());
        assert!(session.get().is_none());
    }

    #[tokio::test]
    async fn wmk_upload_failure_keeps_session_for_retry() {
        use crate::http::fake::ForcedOutcome;
        let (api, keystore, session) = setup();
        api.queue_upload_wmk_outcome(ForcedOutcome::ServerError);

        let err = unlock(&api, &keystore, &session, "alice", "pw", 0).await.unwrap_err();
        assert!(matches!(err, CoreError::WmkUploadFailed));
        assert!(!keystore.is_unlocked());
        assert!(session.get().is_some(), "WmkUploadFailed must keep the session so the caller can retry");
    }

    #[tokio::test]
    async fn unauthenticated_during_get_vault_never_establishes_a_session() {
        let (api, keystore, session) = setup();
        api.set_authenticated(false);

        let err = unlock(&api, &keystore, &session, "alice", "pw", 0).await.unwrap_err();
        assert!(matches!(err, CoreError::Unauthenticated));
        assert!(session.get().is_none());
        assert!(!keystore.is_unlocked());
    }
}
