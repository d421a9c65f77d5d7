//! Tag index: which cached keys carry which tags.
//!
//! The index is rebuilt for a key whenever that key's entry is cached. The
//! invalidation policy is the pure function [`keys_to_invalidate`], so it can
//! be tested without any fetching.

use crate::traits::QueryKey;
use catalog_core::CacheTag;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
pub struct TagIndex {
    by_tag: HashMap<CacheTag, BTreeSet<QueryKey>>,
    by_key: HashMap<QueryKey, BTreeSet<CacheTag>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tag set of `key`.
    pub fn replace(&mut self, key: &QueryKey, tags: BTreeSet<CacheTag>) {
        self.remove(key);
        for tag in &tags {
            self.by_tag.entry(tag.clone()).or_default().insert(key.clone());
        }
        if !tags.is_empty() {
            self.by_key.insert(key.clone(), tags);
        }
    }

    /// Add tags to `key` without dropping the ones it already has.
    pub fn extend(&mut self, key: &QueryKey, tags: impl IntoIterator<Item = CacheTag>) {
        let mut merged = self.by_key.get(key).cloned().unwrap_or_default();
        merged.extend(tags);
        self.replace(key, merged);
    }

    pub fn remove(&mut self, key: &QueryKey) {
        let Some(tags) = self.by_key.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(keys) = self.by_tag.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(&tag);
                }
            }
        }
    }

    pub fn tags_of(&self, key: &QueryKey) -> Option<&BTreeSet<CacheTag>> {
        self.by_key.get(key)
    }

    pub fn keys_with(&self, tag: &CacheTag) -> impl Iterator<Item = &QueryKey> {
        self.by_tag.get(tag).into_iter().flatten()
    }

    pub fn clear(&mut self) {
        self.by_tag.clear();
        self.by_key.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Every key whose tag set intersects `tags`.
pub fn keys_to_invalidate(index: &TagIndex, tags: &[CacheTag]) -> BTreeSet<QueryKey> {
    tags.iter()
        .flat_map(|tag| index.keys_with(tag))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::RecordId;
    use proptest::prelude::*;

    fn list_key() -> QueryKey {
        QueryKey::operation("records.list")
    }

    fn stats_key() -> QueryKey {
        QueryKey::operation("analytics.overview")
    }

    fn index() -> TagIndex {
        let mut index = TagIndex::new();
        index.replace(
            &list_key(),
            [
                CacheTag::collection(),
                CacheTag::record(&RecordId::new("1")),
                CacheTag::record(&RecordId::new("2")),
            ]
            .into_iter()
            .collect(),
        );
        index.replace(&stats_key(), [CacheTag::analytics()].into_iter().collect());
        index
    }

    #[test]
    fn test_record_tag_hits_list() {
        let keys = keys_to_invalidate(&index(), &[CacheTag::record(&RecordId::new("2"))]);
        assert_eq!(keys, [list_key()].into_iter().collect());
    }

    #[test]
    fn test_unknown_tag_hits_nothing() {
        let keys = keys_to_invalidate(&index(), &[CacheTag::record(&RecordId::new("99"))]);
        assert!(keys.is_empty());
    }

    #[test]
    fn test_write_tags_hit_list_and_analytics() {
        let keys = keys_to_invalidate(&index(), &CacheTag::for_create());
        assert_eq!(keys, [list_key(), stats_key()].into_iter().collect());
    }

    #[test]
    fn test_replace_drops_old_tags() {
        let mut index = index();
        index.replace(&list_key(), [CacheTag::collection()].into_iter().collect());
        let keys = keys_to_invalidate(&index, &[CacheTag::record(&RecordId::new("1"))]);
        assert!(keys.is_empty());
        assert_eq!(index.tags_of(&list_key()).map(|t| t.len()), Some(1));
    }

    #[test]
    fn test_extend_keeps_existing_tags() {
        let mut index = TagIndex::new();
        index.extend(&list_key(), [CacheTag::collection()]);
        index.extend(&list_key(), [CacheTag::record(&RecordId::new("5"))]);
        assert_eq!(index.tags_of(&list_key()).map(|t| t.len()), Some(2));
    }

    #[test]
    fn test_remove_cleans_reverse_map() {
        let mut index = index();
        index.remove(&list_key());
        assert!(keys_to_invalidate(&index, &[CacheTag::collection()]).is_empty());
        index.remove(&stats_key());
        assert!(index.is_empty());
    }

    proptest! {
        #[test]
        fn invalidation_is_exact_intersection(
            tagged in proptest::collection::btree_set(0u8..16, 0..8),
            asked in proptest::collection::vec(0u8..16, 0..8),
        ) {
            let mut index = TagIndex::new();
            let tags: BTreeSet<CacheTag> = tagged
                .iter()
                .map(|n| CacheTag::record(&RecordId::new(n.to_string())))
                .collect();
            index.replace(&list_key(), tags);
            let request: Vec<CacheTag> = asked
                .iter()
                .map(|n| CacheTag::record(&RecordId::new(n.to_string())))
                .collect();
            let hit = !keys_to_invalidate(&index, &request).is_empty();
            let expected = asked.iter().any(|n| tagged.contains(n));
            prop_assert_eq!(hit, expected);
        }
    }
}
