//! Cryptographic primitives used throughout the vault core.
//!
//! This module intentionally provides small, composable primitives; higher
//! layers (key lifecycle, manifest codec) wire them together according to
//! the fixed algorithm suite:
//!
//! - KDF: Argon2id derives the user-encryption key (UEK) from the master
//!   password and a server-issued salt.
//! - Key separation: HKDF-SHA-256 derives independent sub-keys (KEK, MAK)
//!   from the master key (MK).
//! - AEAD: XChaCha20-Poly1305 provides authenticated encryption; nonces
//!   must never repeat under the same key.
//! - AAD binds ciphertexts to the parameters/context they were produced
//!   under; any AAD change must fail decryption.
//!
//! Security foot-guns to avoid:
//!
//! - Never reuse a `(key, nonce)` pair with XChaCha20-Poly1305.
//! - Never log or print keys, plaintext payloads, or decrypted secrets.
//! - Treat all returned plaintext bytes as sensitive and wipe them once
//!   consumed.

use argon2::{Algorithm, Argon2, Params as Argon2Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretSlice};
use sha2::Sha256;
use thiserror::Error;

/// Output size (bytes) of Argon2id when deriving the UEK.
pub const UEK_LEN: usize = 32;
/// Size (bytes) of a symmetric key (MK, UEK, KEK, MAK).
pub const KEY_LEN: usize = 32;
/// Size (bytes) of XChaCha20-Poly1305 nonces.
pub const XCHACHA_NONCE_LEN: usize = 24;
/// Size (bytes) of the Argon2id salt supplied by the server.
pub const ARGON2_SALT_LEN: usize = 16;
/// Size (bytes) of the HKDF salt supplied by the server.
pub const HKDF_SALT_LEN: usize = 16;

/// HKDF `info` label for deriving the key-encryption-key (KEK).
pub const HKDF_INFO_KEK: &[u8] = b"VAULT/KEK v1";
/// HKDF `info` label for deriving the manifest authentication/encryption key (MAK).
pub const HKDF_INFO_MAK: &[u8] = b"VAULT/MAK v1";

/// Secret bytes held in memory with zeroize-on-drop semantics.
///
/// A boxed slice is preferred over `Vec<u8>` so the backing allocation is
/// wiped on drop without relying on capacity/growth bookkeeping.
pub type SecretBytes = SecretSlice<u8>;

fn secret_from_vec(bytes: Vec<u8>) -> SecretBytes {
    SecretBytes::from(bytes)
}

/// Copy a secret's bytes into a fresh `SecretBytes`. `SecretSlice<u8>` has
/// no blanket `Clone` impl (by design, to discourage casual copies); call
/// sites that genuinely need an owned duplicate (e.g. handing a key out of
/// the keystore) go through this explicit helper instead.
pub fn clone_secret(secret: &SecretBytes) -> SecretBytes {
    secret_from_vec(secret.expose_secret().to_vec())
}

/// Argon2id tuning parameters, as provided by the server at login/register
/// time (see §4.1 of the AAD/KDF table: `t=3`, `m=512 MiB`, `p=1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Tuning {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2Tuning {
    /// The spec-mandated production parameters: `t=3`, `m=512 MiB`, `p=1`.
    pub fn recommended() -> Self {
        Self {
            memory_kib: 512 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }

    /// Cheap parameters for tests; never used against a real vault.
    pub fn for_tests() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }

    fn to_argon2_params(self) -> Result<Argon2Params, CryptoError> {
        Ok(Argon2Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(UEK_LEN),
        )?)
    }
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid nonce length")]
    InvalidNonceLength,

    #[error("argon2 error")]
    Argon2(#[from] argon2::Error),

    #[error("hkdf error")]
    Hkdf,

    /// AEAD authentication failure: bad key, bad nonce, tampered
    /// ciphertext, or mismatched AAD. Callers must not distinguish these
    /// cases in user-facing messages (see spec §4.1, §7).
    #[error("aead authentication failed")]
    Aead,
}

/// Generate `N` cryptographically-secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Sample a fresh 32-byte master key (used on first unlock, see spec §4.4
/// Case B).
pub fn generate_mk() -> SecretBytes {
    secret_from_vec(random_bytes::<KEY_LEN>().to_vec())
}

/// Derive the user-encryption key (UEK) from the master password via
/// Argon2id. The UEK is used only to wrap/unwrap the master key and must
/// be wiped by the caller immediately after use.
pub fn derive_uek(
    master_password_bytes: &[u8],
    salt: &[u8],
    tuning: Argon2Tuning,
) -> Result<SecretBytes, CryptoError> {
    let params = tuning.to_argon2_params()?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = vec![0u8; UEK_LEN];
    argon2.hash_password_into(master_password_bytes, salt, &mut out)?;
    Ok(secret_from_vec(out))
}

/// Derive `(KEK, MAK)` from the master key via HKDF-SHA-256, using the
/// server-provided `hkdf_salt` and the fixed info labels from §4.1.
pub fn derive_subkeys(mk: &SecretBytes, hkdf_salt: &[u8]) -> Result<(SecretBytes, SecretBytes), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(hkdf_salt), mk.expose_secret());

    let mut kek = vec![0u8; KEY_LEN];
    hk.expand(HKDF_INFO_KEK, &mut kek).map_err(|_| CryptoError::Hkdf)?;

    let mut mak = vec![0u8; KEY_LEN];
    hk.expand(HKDF_INFO_MAK, &mut mak).map_err(|_| CryptoError::Hkdf)?;

    Ok((secret_from_vec(kek), secret_from_vec(mak)))
}

/// Encrypt `plaintext` under `key` with XChaCha20-Poly1305, sampling a
/// fresh nonce. Returns `(nonce, ciphertext_with_tag)`. Callers must never
/// reuse a `(key, nonce)` pair; a fresh nonce is generated per call.
pub fn encrypt(
    key: &SecretBytes,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<([u8; XCHACHA_NONCE_LEN], Vec<u8>), CryptoError> {
    let nonce = random_bytes::<XCHACHA_NONCE_LEN>();
    let ciphertext = encrypt_with_nonce(key, &nonce, aad, plaintext)?;
    Ok((nonce, ciphertext))
}

/// Encrypt with a caller-supplied nonce. Exists for callers (e.g. the WMK
/// wrap path) that need to construct the AAD from a header containing the
/// nonce before calling AEAD; most callers should prefer [`encrypt`].
pub fn encrypt_with_nonce(
    key: &SecretBytes,
    nonce: &[u8; XCHACHA_NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.expose_secret()).map_err(|_| CryptoError::Aead)?;
    cipher
        .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Aead)
}

/// Decrypt `ciphertext` under `key`/`nonce`/`aad`. Fails with
/// `CryptoError::Aead` when the tag or AAD mismatches; per spec §4.1 this
/// must not be distinguished from other causes in user-facing errors.
pub fn decrypt(
    key: &SecretBytes,
    nonce: &[u8; XCHACHA_NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.expose_secret()).map_err(|_| CryptoError::Aead)?;
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::Aead)
}

/// Parse a 24-byte XChaCha nonce from an arbitrary slice (e.g. a decoded
/// wire-format field).
pub fn nonce_from_slice(bytes: &[u8]) -> Result<[u8; XCHACHA_NONCE_LEN], CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidNonceLength)
}

/// Build the AAD for wrapping/unwrapping the master key: `wmk_v1|<user_id>|<vault_id>`.
pub fn aad_wmk(user_id: &str, vault_id: &str) -> Vec<u8> {
    format!("wmk_v1|{user_id}|{vault_id}").into_bytes()
}

/// Build the AAD for the manifest envelope: `manifest_v1|<user_id>|<vault_id>`.
pub fn aad_manifest(user_id: &str, vault_id: &str) -> Vec<u8> {
    format!("manifest_v1|{user_id}|{vault_id}").into_bytes()
}
