//! The HTTP contract consumed from the external server, per spec §6.
//!
//! This crate treats the server as an untrusted, opaque-ciphertext store:
//! `VaultApi` is the Rust expression of the table in §6, so the sync
//! engine and auth pipeline never touch `reqwest` (or any transport)
//! directly. [`client::HttpVaultApi`] is the reference transport; hosts
//! embedding this crate in an environment without a Rust HTTP stack (a
//! browser extension using `fetch`) implement `VaultApi` themselves.

mod api;
#[cfg(feature = "http-client")]
mod client;
pub mod fake;

pub use api::{
    KdfPublicParams, LoginResponse, ManifestEnvelopeResponse, PutManifestRequest,
    PutManifestResponse, RegisterResponse, SessionResponse, VaultApi, VaultSummary,
};
#[cfg(feature = "http-client")]
pub use client::HttpVaultApi;

use thiserror::Error;

/// Transport-level errors, translated to [`crate::error::CoreError`] at the
/// sync-engine/auth boundary (see spec §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("unauthenticated (401)")]
    Unauthenticated,

    #[error("conflict (409)")]
    Conflict,

    #[error("payload too large (413)")]
    PayloadTooLarge,

    #[error("not found (404)")]
    NotFound,

    #[error("http error ({0})")]
    Status(u16),
}

impl HttpError {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => HttpError::Unauthenticated,
            404 => HttpError::NotFound,
            409 => HttpError::Conflict,
            413 => HttpError::PayloadTooLarge,
            other => HttpError::Status(other),
        }
    }
}
