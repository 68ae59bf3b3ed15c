//! Tag-indexed entry store.
//!
//! Holds `key -> entry` and `tag -> keys` under a single lock so readers
//! never observe a tag index that disagrees with the entries it points at.
//!
//! Every tag invalidation advances the store generation. Writers that
//! computed their value before an invalidation use
//! [`TagStore::put_entry_if_current`] so the result is discarded instead of
//! resurrecting pre-mutation content.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use super::entry::CacheEntry;
use super::lock::{read_guard, write_guard};
use super::tags::Tag;

const SOURCE: &str = "cache::store";

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    index: HashMap<Tag, HashSet<String>>,
    generation: u64,
}

impl<V> Inner<V> {
    fn unlink(&mut self, key: &str, tags: &BTreeSet<Tag>) {
        for tag in tags {
            if let Some(keys) = self.index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.index.remove(tag);
                }
            }
        }
    }

    fn insert(&mut self, entry: CacheEntry<V>) {
        let key = entry.key.clone();
        self.remove_key(&key);
        for tag in &entry.tags {
            self.index
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        self.entries.insert(key, entry);
    }

    fn remove_key(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.unlink(key, &entry.tags);
        Some(entry)
    }
}

/// In-process store mapping keys to entries and tags to keys.
///
/// `get` makes no freshness decision; callers compare `expires_at` themselves.
pub struct TagStore<V> {
    inner: RwLock<Inner<V>>,
}

impl<V: Clone> TagStore<V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                index: HashMap::new(),
                generation: 0,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        read_guard(&self.inner, SOURCE, "get")
            .entries
            .get(key)
            .cloned()
    }

    /// Store `value` under `key`, replacing any previous entry and its tags.
    pub fn put(
        &self,
        key: impl Into<String>,
        value: V,
        tags: impl IntoIterator<Item = Tag>,
        ttl: Duration,
    ) -> CacheEntry<V> {
        let entry = CacheEntry::new(key, value, tags, ttl);
        self.put_entry(entry.clone());
        entry
    }

    pub fn put_entry(&self, entry: CacheEntry<V>) {
        write_guard(&self.inner, SOURCE, "put_entry").insert(entry);
    }

    /// Store `entry` only if no tag invalidation ran since `generation` was
    /// read. Returns whether the entry was stored.
    pub fn put_entry_if_current(&self, entry: CacheEntry<V>, generation: u64) -> bool {
        let mut inner = write_guard(&self.inner, SOURCE, "put_entry_if_current");
        if inner.generation != generation {
            return false;
        }
        inner.insert(entry);
        true
    }

    /// Advanced by every tag invalidation and by [`clear`](Self::clear).
    pub fn generation(&self) -> u64 {
        read_guard(&self.inner, SOURCE, "generation").generation
    }

    /// Remove every entry carrying `tag`. Returns how many were removed.
    pub fn invalidate_tag(&self, tag: &Tag) -> usize {
        let mut inner = write_guard(&self.inner, SOURCE, "invalidate_tag");
        inner.generation += 1;
        let Some(keys) = inner.index.remove(tag) else {
            return 0;
        };

        keys.iter()
            .filter(|key| inner.remove_key(key).is_some())
            .count()
    }

    /// Remove entries for all `tags` under one write lock.
    pub fn invalidate_tags<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>) -> usize {
        let mut inner = write_guard(&self.inner, SOURCE, "invalidate_tags");
        inner.generation += 1;
        let mut removed = 0;
        for tag in tags {
            if let Some(keys) = inner.index.remove(tag) {
                removed += keys
                    .iter()
                    .filter(|key| inner.remove_key(key).is_some())
                    .count();
            }
        }
        removed
    }

    pub fn invalidate_key(&self, key: &str) -> bool {
        write_guard(&self.inner, SOURCE, "invalidate_key")
            .remove_key(key)
            .is_some()
    }

    /// Drop everything. Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let mut inner = write_guard(&self.inner, SOURCE, "clear");
        inner.generation += 1;
        let removed = inner.entries.len();
        inner.entries.clear();
        inner.index.clear();
        removed
    }

    pub fn keys_for_tag(&self, tag: &Tag) -> HashSet<String> {
        read_guard(&self.inner, SOURCE, "keys_for_tag")
            .index
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    /// Every tag currently attached to at least one entry.
    pub fn tags(&self) -> BTreeSet<Tag> {
        read_guard(&self.inner, SOURCE, "tags")
            .index
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        read_guard(&self.inner, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tag_count(&self) -> usize {
        read_guard(&self.inner, SOURCE, "tag_count").index.len()
    }
}

impl<V: Clone> Default for TagStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn tags(names: &[&str]) -> Vec<Tag> {
        names.iter().map(|name| Tag::from(*name)).collect()
    }

    #[test]
    fn put_then_get_returns_value_and_tags() {
        let store = TagStore::new();
        store.put("galleries:list", 7u32, tags(&["galleries"]), TTL);

        let entry = store.get("galleries:list").expect("entry present");
        assert_eq!(entry.value, 7);
        assert!(entry.tags.contains(&Tag::from("galleries")));
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn invalidate_tag_reaches_entries_through_any_tag() {
        let store = TagStore::new();
        store.put("a", 1u32, tags(&["x"]), TTL);
        store.put("b", 2u32, tags(&["x", "y"]), TTL);
        store.put("c", 3u32, tags(&["z"]), TTL);

        assert_eq!(store.invalidate_tag(&Tag::from("y")), 1);
        assert!(store.get("b").is_none());
        assert!(store.get("a").is_some());
        assert_eq!(store.keys_for_tag(&Tag::from("x")), HashSet::from(["a".to_string()]));

        assert_eq!(store.invalidate_tag(&Tag::from("x")), 1);
        assert!(store.get("a").is_none());
        assert!(store.get("c").is_some());
    }

    #[test]
    fn invalidate_tag_is_idempotent() {
        let store = TagStore::new();
        store.put("a", 1u32, tags(&["x"]), TTL);
        store.put("b", 2u32, tags(&["x"]), TTL);

        assert_eq!(store.invalidate_tag(&Tag::from("x")), 2);
        assert_eq!(store.invalidate_tag(&Tag::from("x")), 0);
        assert!(store.is_empty());
        assert_eq!(store.tag_count(), 0);
    }

    #[test]
    fn overwrite_replaces_tag_associations() {
        let store = TagStore::new();
        store.put("k", 1u32, tags(&["old"]), TTL);
        store.put("k", 2u32, tags(&["new"]), TTL);

        assert_eq!(store.invalidate_tag(&Tag::from("old")), 0);
        assert_eq!(store.get("k").map(|entry| entry.value), Some(2));
        assert_eq!(store.tags(), BTreeSet::from([Tag::from("new")]));
    }

    #[test]
    fn invalidate_key_unlinks_tags() {
        let store = TagStore::new();
        store.put("k", 1u32, tags(&["x", "y"]), TTL);

        assert!(store.invalidate_key("k"));
        assert!(!store.invalidate_key("k"));
        assert_eq!(store.tag_count(), 0);
    }

    #[test]
    fn invalidate_tags_counts_each_entry_once() {
        let store = TagStore::new();
        store.put("a", 1u32, tags(&["x", "y"]), TTL);
        store.put("b", 2u32, tags(&["y"]), TTL);

        let removed = store.invalidate_tags(&[Tag::from("x"), Tag::from("y")]);
        assert_eq!(removed, 2);
        assert!(store.is_empty());
    }

    #[test]
    fn clear_reports_removed_entries() {
        let store = TagStore::new();
        store.put("a", 1u32, tags(&["x"]), TTL);
        store.put("b", 2u32, tags(&["y"]), TTL);

        assert_eq!(store.clear(), 2);
        assert!(store.tags().is_empty());
    }

    #[test]
    fn writes_started_before_an_invalidation_are_discarded() {
        let store = TagStore::new();
        let generation = store.generation();

        // Tag matches nothing yet: the value being computed is still in flight.
        assert_eq!(store.invalidate_tag(&Tag::from("galleries")), 0);

        let stale = CacheEntry::new("galleries:list", 1u32, tags(&["galleries"]), TTL);
        assert!(!store.put_entry_if_current(stale, generation));
        assert!(store.get("galleries:list").is_none());

        let fresh = CacheEntry::new("galleries:list", 2u32, tags(&["galleries"]), TTL);
        assert!(store.put_entry_if_current(fresh, store.generation()));
        assert_eq!(store.get("galleries:list").map(|entry| entry.value), Some(2));
    }

    #[test]
    fn clear_advances_generation() {
        let store: TagStore<u32> = TagStore::new();
        let before = store.generation();
        store.clear();
        assert_ne!(store.generation(), before);
        assert!(!store.invalidate_key("missing"));
        assert_eq!(store.generation(), before + 1);
    }

    #[test]
    fn concurrent_writers_and_invalidators_keep_index_consistent() {
        let store = Arc::new(TagStore::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("w{worker}:{i}");
                        store.put(key, i, tags(&["shared"]), TTL);
                        if i % 10 == 0 {
                            store.invalidate_tag(&Tag::from("shared"));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread");
        }

        let indexed = store.keys_for_tag(&Tag::from("shared"));
        assert_eq!(indexed.len(), store.len());
        for key in indexed {
            assert!(store.get(&key).is_some());
        }
    }
}
