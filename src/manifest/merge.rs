//! Deterministic three-way merge over a manifest, per spec §4.7.
//!
//! A pure function: no I/O, no wall-clock reads, no randomness. Iteration
//! over id unions is via `BTreeMap`/sorted `Vec`, so conflict lists are
//! stable across runs (required by spec §8's determinism property).

use std::collections::BTreeMap;

use super::model::{Bookmark, Manifest, Tag};

/// One merge decision that involved more than one non-identical input,
/// surfaced for observability per spec §9's Open Question recommendation:
/// keep them even when the merge already chose a winner deterministically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    ChainHead,
    Version,
    Item(String),
    Tag(String),
}

impl Conflict {
    pub fn as_label(&self) -> String {
        match self {
            Conflict::ChainHead => "chain_head".to_string(),
            Conflict::Version => "version".to_string(),
            Conflict::Item(id) => format!("item:{id}"),
            Conflict::Tag(id) => format!("tag:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub merged: Manifest,
    pub conflicts: Vec<Conflict>,
}

/// Merge `local` and `remote` given their common ancestor `base`. Remote
/// is preferred on tie-break: the server's view is the authoritative
/// continuation, and conflicts bubble up as informational only.
pub fn merge(base: &Manifest, local: &Manifest, remote: &Manifest) -> MergeOutcome {
    let mut conflicts = Vec::new();

    let chain_head = merge_scalar(
        &base.chain_head,
        &local.chain_head,
        &remote.chain_head,
        Conflict::ChainHead,
        &mut conflicts,
    );

    if base.version != local.version && base.version != remote.version && local.version != remote.version {
        conflicts.push(Conflict::Version);
    }

    let (items, mut item_conflicts) = merge_items(&base.items, &local.items, &remote.items);
    conflicts.append(&mut item_conflicts);

    let (tags, mut tag_conflicts) = merge_tags(&base.tags, &local.tags, &remote.tags);
    conflicts.append(&mut tag_conflicts);

    let merged = Manifest {
        version: remote.version,
        items,
        tags,
        chain_head,
    };

    MergeOutcome { merged, conflicts }
}

fn merge_scalar<T: Clone + PartialEq>(
    base: &T,
    local: &T,
    remote: &T,
    conflict: Conflict,
    conflicts: &mut Vec<Conflict>,
) -> T {
    if base != local && base != remote && local != remote {
        conflicts.push(conflict);
    }
    remote.clone()
}

fn merge_items(base: &[Bookmark], local: &[Bookmark], remote: &[Bookmark]) -> (Vec<Bookmark>, Vec<Conflict>) {
    let base_map = index_by_id(base, |b| &b.id);
    let local_map = index_by_id(local, |b| &b.id);
    let remote_map = index_by_id(remote, |b| &b.id);

    let mut ids: Vec<&String> = base_map
        .keys()
        .chain(local_map.keys())
        .chain(remote_map.keys())
        .collect();
    ids.sort();
    ids.dedup();

    let mut merged = Vec::new();
    let mut conflicts = Vec::new();

    for id in ids {
        let in_base = base_map.get(id);
        let in_local = local_map.get(id);
        let in_remote = remote_map.get(id);

        match (in_base, in_local, in_remote) {
            (None, Some(l), None) => merged.push((*l).clone()),
            (None, None, Some(r)) => merged.push((*r).clone()),
            (None, Some(_), Some(r)) => {
                conflicts.push(Conflict::Item(id.clone()));
                merged.push((*r).clone());
            }
            (Some(_), Some(l), None) => merged.push((*l).clone()),
            (Some(_), None, Some(r)) => merged.push((*r).clone()),
            (Some(_), Some(l), Some(r)) => {
                if l == r {
                    merged.push((*l).clone());
                } else {
                    // Both sides edited since base: record the conflict for
                    // observability even though last-writer-wins resolves it
                    // deterministically without user intervention.
                    conflicts.push(Conflict::Item(id.clone()));
                    if l.updated_at > r.updated_at {
                        merged.push((*l).clone());
                    } else {
                        merged.push((*r).clone());
                    }
                }
            }
            (Some(_), None, None) => {
                // deleted on both sides: omitted
            }
            (None, None, None) => unreachable!("id came from one of the three maps"),
        }
    }

    merged.sort_by(|a, b| a.id.cmp(&b.id));
    (merged, conflicts)
}

fn merge_tags(base: &[Tag], local: &[Tag], remote: &[Tag]) -> (Vec<Tag>, Vec<Conflict>) {
    let base_map = index_by_id(base, |t| &t.id);
    let local_map = index_by_id(local, |t| &t.id);
    let remote_map = index_by_id(remote, |t| &t.id);

    let mut ids: Vec<&String> = base_map
        .keys()
        .chain(local_map.keys())
        .chain(remote_map.keys())
        .collect();
    ids.sort();
    ids.dedup();

    let mut merged = Vec::new();
    let mut conflicts = Vec::new();

    for id in ids {
        let in_base = base_map.get(id);
        let in_local = local_map.get(id);
        let in_remote = remote_map.get(id);

        match (in_base, in_local, in_remote) {
            (None, Some(l), None) => merged.push((*l).clone()),
            (None, None, Some(r)) => merged.push((*r).clone()),
            (None, Some(_), Some(r)) => {
                conflicts.push(Conflict::Tag(id.clone()));
                merged.push((*r).clone());
            }
            (Some(_), Some(l), None) => merged.push((*l).clone()),
            (Some(_), None, Some(r)) => merged.push((*r).clone()),
            (Some(b), Some(l), Some(r)) => {
                if l == r {
                    merged.push((*l).clone());
                } else {
                    let local_renamed = l.name.to_lowercase() != b.name.to_lowercase();
                    let remote_renamed = r.name.to_lowercase() != b.name.to_lowercase();
                    if local_renamed && remote_renamed {
                        conflicts.push(Conflict::Tag(id.clone()));
                    }
                    merged.push((*r).clone());
                }
            }
            (Some(_), None, None) => {}
            (None, None, None) => unreachable!("id came from one of the three maps"),
        }
    }

    merged.sort_by(|a, b| a.id.cmp(&b.id));
    (merged, conflicts)
}

fn index_by_id<'a, T, F: Fn(&T) -> &String>(items: &'a [T], key: F) -> BTreeMap<String, &'a T> {
    items.iter().map(|item| (key(item).clone(), item)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bookmark(id: &str, title: &str, updated_at: u64) -> Bookmark {
        Bookmark {
            id: id.to_string(),
            url: "https://example.com".to_string(),
            title: title.to_string(),
            notes: None,
            tags: Default::default(),
            created_at: 0,
            updated_at,
        }
    }

    #[test]
    fn local_equals_base_yields_remote() {
        let base = Manifest::empty();
        let local = base.clone();
        let mut remote = base.clone();
        remote.version = 5;
        remote.add_bookmark(bookmark("b1", "R", 10));

        let outcome = merge(&base, &local, &remote);
        assert_eq!(outcome.merged, remote);
    }

    #[test]
    fn remote_equals_base_yields_local() {
        let base = Manifest::empty();
        let remote = base.clone();
        let mut local = base.clone();
        local.version = 5;
        local.add_bookmark(bookmark("b1", "L", 10));

        let outcome = merge(&base, &local, &remote);
        assert_eq!(outcome.merged, local);
    }

    #[test]
    fn local_equals_remote_has_no_conflicts() {
        let base = Manifest::empty();
        let mut local = base.clone();
        local.add_bookmark(bookmark("b1", "Same", 10));
        let remote = local.clone();

        let outcome = merge(&base, &local, &remote);
        assert_eq!(outcome.merged, local);
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn conflicting_edit_prefers_last_writer_by_updated_at() {
        let mut base = Manifest::empty();
        base.version = 1;
        base.add_bookmark(bookmark("b1", "X", 100));

        let mut local = base.clone();
        local.version = 2;
        local.items[0] = bookmark("b1", "A", 200);

        let mut remote = base.clone();
        remote.version = 2;
        remote.items[0] = bookmark("b1", "B", 150);

        let outcome = merge(&base, &local, &remote);
        assert_eq!(outcome.merged.items[0].title, "A");
        assert_eq!(outcome.conflicts, vec![Conflict::Item("b1".to_string())]);
    }

    #[test]
    fn delete_vs_edit_survives_as_edit_with_no_conflict() {
        let mut base = Manifest::empty();
        base.add_bookmark(bookmark("b1", "Old", 100));

        let mut local = base.clone();
        local.items.clear();

        let mut remote = base.clone();
        remote.items[0] = bookmark("b1", "C", 300);

        let outcome = merge(&base, &local, &remote);
        assert_eq!(outcome.merged.items.len(), 1);
        assert_eq!(outcome.merged.items[0].title, "C");
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn deleted_on_both_sides_is_omitted() {
        let mut base = Manifest::empty();
        base.add_bookmark(bookmark("b1", "Old", 100));

        let local = Manifest::empty();
        let remote = Manifest::empty();

        let outcome = merge(&base, &local, &remote);
        assert!(outcome.merged.items.is_empty());
    }

    #[test]
    fn merge_is_deterministic() {
        let mut base = Manifest::empty();
        base.add_bookmark(bookmark("b1", "X", 100));
        let mut local = base.clone();
        local.items[0] = bookmark("b1", "A", 200);
        let mut remote = base.clone();
        remote.items[0] = bookmark("b1", "B", 150);

        let first = merge(&base, &local, &remote);
        let second = merge(&base, &local, &remote);
        assert_eq!(first, second);
    }

    #[test]
    fn tag_rename_collision_on_both_sides_prefers_remote_with_conflict() {
        let base_tag = Tag {
            id: "t1".to_string(),
            name: "work".to_string(),
            color: None,
            hidden: false,
        };
        let mut base = Manifest::empty();
        base.tags.push(base_tag);

        let mut local = base.clone();
        local.tags[0].name = "job".to_string();

        let mut remote = base.clone();
        remote.tags[0].name = "career".to_string();

        let outcome = merge(&base, &local, &remote);
        assert_eq!(outcome.merged.tags[0].name, "career");
        assert_eq!(outcome.conflicts, vec![Conflict::Tag("t1".to_string())]);
    }
}
