//! Bookmarks, tags, their encrypted wire envelope, deterministic merge,
//! and the client-side state machine that tracks them, per spec §3/§4.5-4.7.

mod codec;
mod merge;
mod model;
mod store;

pub use codec::{decode, encode, CodecError, ManifestEnvelope};
pub use merge::{merge, Conflict, MergeOutcome};
pub use model::{Bookmark, Manifest, Tag, MAX_NOTES_LEN, MAX_TITLE_LEN};
pub use store::{ManifestStore, SaveData, Status, Subscription};
