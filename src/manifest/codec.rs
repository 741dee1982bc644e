//! The on-wire AEAD envelope for the manifest, per spec §4.5 / §6.
//!
//! Wire form: `{ version, nonce: base64(24B), ciphertext: base64(AEAD
//! output) }` — a plain JSON+base64 shape, not a binary TLV/magic-header
//! framing, since that's what the server contract requires.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use zeroize::Zeroize;

use crate::crypto::{self, CryptoError, SecretBytes};

use super::model::Manifest;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("invalid base64 in envelope field {0}")]
    InvalidBase64(&'static str),
}

/// The decrypted-envelope-shaped struct used only for (de)serializing the
/// wire fields; never holds plaintext manifest bytes directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEnvelope {
    pub version: u64,
    pub nonce: String,
    pub ciphertext: String,
}

/// Encrypt `manifest` under `mak` with AAD `manifest_v1|<user_id>|<vault_id>`.
///
/// The plaintext JSON buffer and the raw ciphertext/nonce bytes are wiped
/// after the base64 strings are produced, per spec §4.5 (the base64
/// strings themselves are not treated as sensitive).
pub fn encode(manifest: &Manifest, mak: &SecretBytes, user_id: &str, vault_id: &str) -> Result<ManifestEnvelope, CodecError> {
    let mut plaintext = serde_json::to_vec(manifest).expect("Manifest serialization is infallible");
    let aad = crypto::aad_manifest(user_id, vault_id);

    let (mut nonce, mut ciphertext) = crypto::encrypt(mak, &aad, &plaintext)?;
    plaintext.zeroize();

    let envelope = ManifestEnvelope {
        version: manifest.version,
        nonce: BASE64.encode(nonce),
        ciphertext: BASE64.encode(&ciphertext),
    };

    nonce.zeroize();
    ciphertext.zeroize();
    Ok(envelope)
}

/// Decrypt `envelope` under `mak`. If the JSON payload fails to parse
/// after a successful decrypt, falls back to an empty manifest at the
/// envelope's version (spec §4.5: tolerate a zero-byte server placeholder)
/// and logs a structured warning rather than failing the caller.
pub fn decode(
    envelope: &ManifestEnvelope,
    mak: &SecretBytes,
    user_id: &str,
    vault_id: &str,
) -> Result<Manifest, CodecError> {
    let nonce_bytes = BASE64
        .decode(envelope.nonce.as_bytes())
        .map_err(|_| CodecError::InvalidBase64("nonce"))?;
    let nonce = crypto::nonce_from_slice(&nonce_bytes)?;
    let ciphertext = BASE64
        .decode(envelope.ciphertext.as_bytes())
        .map_err(|_| CodecError::InvalidBase64("ciphertext"))?;

    let aad = crypto::aad_manifest(user_id, vault_id);
    let mut plaintext = crypto::decrypt(mak, &nonce, &aad, &ciphertext)?;

    let manifest = match serde_json::from_slice::<Manifest>(&plaintext) {
        Ok(manifest) => manifest,
        Err(err) => {
            warn!(version = envelope.version, error = %err, "manifest payload was not valid JSON; falling back to empty manifest");
            Manifest {
                version: envelope.version,
                ..Manifest::empty()
            }
        }
    };

    plaintext.zeroize();
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_mk as generate_key;
    use crate::manifest::model::Bookmark;

    #[test]
    fn roundtrip_preserves_manifest() {
        let mak = generate_key();
        let mut manifest = Manifest::empty();
        manifest.version = 3;
        manifest.add_bookmark(Bookmark::new("https://example.com", "Ex", None, 1).unwrap());

        let envelope = encode(&manifest, &mak, "user-1", "vault-1").unwrap();
        let decoded = decode(&envelope, &mak, "user-1", "vault-1").unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn empty_manifest_roundtrips() {
        let mak = generate_key();
        let manifest = Manifest::empty();
        let envelope = encode(&manifest, &mak, "user-1", "vault-1").unwrap();
        let decoded = decode(&envelope, &mak, "user-1", "vault-1").unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn decode_fails_with_wrong_key() {
        let mak = generate_key();
        let other = generate_key();
        let manifest = Manifest::empty();
        let envelope = encode(&manifest, &mak, "user-1", "vault-1").unwrap();
        let err = decode(&envelope, &other, "user-1", "vault-1").unwrap_err();
        assert!(matches!(err, CodecError::Crypto(CryptoError::Aead)));
    }

    #[test]
    fn decode_fails_with_mismatched_aad() {
        let mak = generate_key();
        let manifest = Manifest::empty();
        let envelope = encode(&manifest, &mak, "user-1", "vault-1").unwrap();
        let err = decode(&envelope, &mak, "user-1", "vault-2").unwrap_err();
        assert!(matches!(err, CodecError::Crypto(CryptoError::Aead)));
    }
}
