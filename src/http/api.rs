//! The `VaultApi` trait: one method per row of the spec §6 HTTP table.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::HttpError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfPublicParams {
    pub algo: String,
    /// Base64-encoded Argon2id salt.
    pub salt: String,
    pub m: u32,
    pub t: u32,
    pub p: u32,
    /// Base64-encoded HKDF salt.
    pub hkdf_salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterResponse {
    pub user_id: String,
    pub kdf: KdfPublicParams,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginResponse {
    pub user_id: String,
    pub token: String,
    pub expires_at: u64,
    pub kdf: KdfPublicParams,
    /// `None` on first unlock.
    pub wrapped_mk: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionResponse {
    pub user_id: String,
    pub valid: bool,
    pub expires_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultSummary {
    pub vault_id: String,
    pub version: u64,
    pub has_manifest: bool,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEnvelopeResponse {
    pub vault_id: String,
    pub version: u64,
    pub etag: String,
    /// Base64-encoded 24-byte nonce.
    pub nonce: String,
    /// Base64-encoded AEAD output (ciphertext || 16-byte tag).
    pub ciphertext: String,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PutManifestRequest {
    pub version: u64,
    pub nonce: String,
    pub ciphertext: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PutManifestResponse {
    pub vault_id: String,
    pub version: u64,
    pub etag: String,
    pub updated_at: u64,
}

/// The server contract from spec §6. Every authenticated call carries
/// `Authorization: Bearer <token>`; implementations own constructing that
/// header from the token argument so this trait stays transport-agnostic.
#[async_trait]
pub trait VaultApi: Send + Sync {
    async fn register(&self, login: &str, password: &str) -> Result<RegisterResponse, HttpError>;

    async fn login(&self, login: &str, password: &str) -> Result<LoginResponse, HttpError>;

    async fn logout(&self, token: &str) -> Result<(), HttpError>;

    async fn session(&self, token: &str) -> Result<SessionResponse, HttpError>;

    async fn upload_wmk(&self, token: &str, wrapped_mk: &str) -> Result<(), HttpError>;

    async fn get_vault(&self, token: &str) -> Result<VaultSummary, HttpError>;

    /// `Ok(None)` corresponds to a 404 ("absent"), per spec §6.
    async fn get_manifest(&self, token: &str) -> Result<Option<ManifestEnvelopeResponse>, HttpError>;

    async fn put_manifest(
        &self,
        token: &str,
        if_match: Option<&str>,
        body: PutManifestRequest,
    ) -> Result<PutManifestResponse, HttpError>;
}
