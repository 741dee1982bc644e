//! The manifest document: bookmarks and tags, per spec §3.
//!
//! Plain serde structs throughout: `Vec` fields default to empty and are
//! omitted from JSON when empty.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::CoreError;

/// Upper bound on `Bookmark::notes`, per spec §3.
pub const MAX_NOTES_LEN: usize = 4096;
/// Upper bound on `Bookmark::title` / `Tag::name`, a sane input gate not
/// otherwise specified.
pub const MAX_TITLE_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Bookmark {
    /// Construct a new bookmark, validating inputs per spec §3 and
    /// generating a fresh client-side id.
    pub fn new(url: &str, title: &str, notes: Option<String>, now_ms: u64) -> Result<Self, CoreError> {
        let url = validate_url(url)?;
        let title = validate_title(title)?;
        let notes = validate_notes(notes)?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            url,
            title,
            notes,
            tags: BTreeSet::new(),
            created_at: now_ms,
            updated_at: now_ms,
        })
    }

    /// Clamp `updated_at` to be strictly monotonic with respect to the
    /// bookmark's previous `updated_at`, per the clock-skew recommendation
    /// in spec §9 Open Questions.
    pub fn touch(&mut self, now_ms: u64) {
        self.updated_at = now_ms.max(self.updated_at + 1);
    }
}

fn validate_url(raw: &str) -> Result<String, CoreError> {
    let parsed = Url::parse(raw).map_err(|_| CoreError::Validation("url must be a valid URL".into()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(CoreError::Validation("url must use http or https".into()));
    }
    Ok(raw.to_string())
}

fn validate_title(raw: &str) -> Result<String, CoreError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("title must not be empty".into()));
    }
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(CoreError::Validation("title is too long".into()));
    }
    Ok(trimmed.to_string())
}

fn validate_notes(raw: Option<String>) -> Result<Option<String>, CoreError> {
    match raw {
        None => Ok(None),
        Some(notes) if notes.chars().count() > MAX_NOTES_LEN => {
            Err(CoreError::Validation("notes exceed the maximum length".into()))
        }
        Some(notes) => Ok(Some(notes)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

impl Tag {
    pub fn new(name: &str, color: Option<String>) -> Result<Self, CoreError> {
        let name = validate_tag_name(name)?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name,
            color,
            hidden: false,
        })
    }
}

fn validate_tag_name(raw: &str) -> Result<String, CoreError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("tag name must not be empty".into()));
    }
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(CoreError::Validation("tag name is too long".into()));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Manifest {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub items: Vec<Bookmark>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_head: Option<String>,
}

impl Manifest {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reject a tag creation/rename that collides case-insensitively with
    /// an existing tag, per spec §3 and §8 scenario 6.
    pub fn check_tag_name_available(&self, name: &str, excluding_id: Option<&str>) -> Result<(), CoreError> {
        let lowered = name.trim().to_lowercase();
        let collision = self
            .tags
            .iter()
            .any(|t| t.name.to_lowercase() == lowered && Some(t.id.as_str()) != excluding_id);
        if collision {
            return Err(CoreError::Validation(
                "A tag with this name already exists".into(),
            ));
        }
        Ok(())
    }

    pub fn add_tag(&mut self, tag: Tag) -> Result<(), CoreError> {
        self.check_tag_name_available(&tag.name, None)?;
        self.tags.push(tag);
        Ok(())
    }

    pub fn add_bookmark(&mut self, bookmark: Bookmark) {
        self.items.push(bookmark);
    }

    /// Drop bookmark tag references whose tag no longer exists in the
    /// manifest, per spec §3's garbage-collection invariant.
    pub fn gc_dangling_tag_refs(&mut self) {
        let live: BTreeSet<&str> = self.tags.iter().map(|t| t.id.as_str()).collect();
        for item in &mut self.items {
            item.tags.retain(|id| live.contains(id.as_str()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bookmark_rejects_non_http_scheme() {
        let err = Bookmark::new("ftp://example.com", "Ex", None, 1).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn bookmark_rejects_empty_title() {
        let err = Bookmark::new("https://example.com", "   ", None, 1).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn bookmark_touch_is_monotonic_even_with_skewed_clock() {
        let mut b = Bookmark::new("https://example.com", "Ex", None, 1000).unwrap();
        b.touch(500); // clock went backwards
        assert!(b.updated_at > 1000);
    }

    #[test]
    fn tag_name_uniqueness_is_case_insensitive() {
        let mut manifest = Manifest::empty();
        manifest.add_tag(Tag::new("Work", None).unwrap()).unwrap();
        let err = manifest.add_tag(Tag::new("work", None).unwrap()).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn gc_drops_dangling_tag_refs() {
        let mut manifest = Manifest::empty();
        let tag = Tag::new("work", None).unwrap();
        let tag_id = tag.id.clone();
        manifest.add_tag(tag).unwrap();

        let mut bookmark = Bookmark::new("https://example.com", "Ex", None, 1).unwrap();
        bookmark.tags.insert(tag_id.clone());
        bookmark.tags.insert("nonexistent".to_string());
        manifest.add_bookmark(bookmark);

        manifest.tags.retain(|t| t.id != tag_id);
        manifest.gc_dangling_tag_refs();

        assert!(manifest.items[0].tags.is_empty());
    }
}
