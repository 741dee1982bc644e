//! Client-side core of an end-to-end encrypted bookmark vault.
//!
//! This crate holds no UI and no persistent storage of its own: a host
//! (browser extension, desktop app, mobile shell) drives it by calling
//! [`auth::unlock`], mutating the [`manifest::ManifestStore`] through
//! [`manifest::ManifestStore::apply`], and running a [`sync::SyncEngine`]
//! against its own `http::VaultApi` transport. The server is treated as an
//! untrusted store of opaque ciphertext; every decision about what the
//! ciphertext means is made here, under keys that never leave
//! [`keystore::Keystore`].

pub mod auth;
pub mod crypto;
pub mod debounced;
pub mod error;
pub mod http;
pub mod keystore;
pub mod manifest;
pub mod session;
pub mod settings;
pub mod sync;

pub use error::CoreError;
