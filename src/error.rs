//! The unified error taxonomy, per spec §7.
//!
//! Lower layers (crypto, codec, HTTP transport) raise their own narrow
//! error enums; the sync engine and auth pipeline translate those into
//! `CoreError` at the point where a §7 side effect (clearing the session,
//! zeroizing the keystore) must happen. Nothing here ever formats secret
//! material into a `Display` impl.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::http::HttpError;

#[derive(Debug, Error)]
pub enum CoreError {
    /// `api_base_url` is unset; every HTTP call fails before the network.
    #[error("api base url is not configured")]
    ConfigMissing,

    /// Connection failure, timeout, or other non-HTTP transport error.
    #[error("network error: {0}")]
    Network(String),

    /// A non-2xx response not otherwise categorized below.
    #[error("server returned HTTP {status}")]
    Http { status: u16 },

    /// 401 response or explicit logout. Side effect (caller-driven): clear
    /// the session and zeroize the keystore.
    #[error("not authenticated")]
    Unauthenticated,

    /// AEAD authentication failure while unlocking. Deliberately generic:
    /// callers must not reveal whether the password, ciphertext, or AAD
    /// was at fault.
    #[error("unable to unlock")]
    UnableToUnlock,

    /// A second consecutive 409 after a merge-and-retry attempt.
    #[error("conflict could not be resolved automatically")]
    ConflictUnresolved,

    /// 413: the manifest exceeds the server's size cap. Not retried; local
    /// state remains `dirty`.
    #[error("manifest payload too large")]
    PayloadTooLarge,

    /// First-unlock WMK upload failed. The session remains valid so the
    /// user can retry without re-authenticating (see spec §4.4 step 4).
    #[error("failed to upload wrapped master key")]
    WmkUploadFailed,

    /// Input-side violation (URL shape, empty title, tag-name collision,
    /// bound violation).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Keystore access attempted while locked.
    #[error("keystore is locked")]
    Locked,

    /// Programming error: an operation was attempted in a state that
    /// cannot legally reach it (e.g. `ack_saved` while `idle`).
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<CryptoError> for CoreError {
    fn from(_: CryptoError) -> Self {
        // Per §4.1 / §7: crypto/AEAD failures never leak which component
        // failed. Any CryptoError reaching this boundary is surfaced as
        // the generic unlock failure.
        CoreError::UnableToUnlock
    }
}

impl From<HttpError> for CoreError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Network(msg) => CoreError::Network(msg),
            HttpError::Timeout => CoreError::Network("request timed out".to_string()),
            HttpError::Unauthenticated => CoreError::Unauthenticated,
            HttpError::Conflict => CoreError::Http { status: 409 },
            HttpError::PayloadTooLarge => CoreError::PayloadTooLarge,
            HttpError::NotFound => CoreError::Http { status: 404 },
            HttpError::Status(status) => CoreError::Http { status },
        }
    }
}
