//! Per-set cache of resolved locations.
//!
//! Only multi-category sets are cached, and only while a live view holds the
//! set. The owning view keeps its entry current as it applies events.

use std::collections::BTreeSet;
use std::path::PathBuf;

use fnv::FnvHashMap;

use crate::category::CategorySet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedResolution {
    pub locations: BTreeSet<PathBuf>,
    pub watched: BTreeSet<PathBuf>,
}

#[derive(Debug, Default)]
pub struct LocationCache {
    entries: FnvHashMap<CategorySet, CachedResolution>,
}

impl LocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cacheable(set: &CategorySet) -> bool {
        set.len() > 1
    }

    pub fn get(&self, set: &CategorySet) -> Option<&CachedResolution> {
        self.entries.get(set)
    }

    /// Stores the resolution of a live view. Single-category sets are ignored.
    pub fn store(&mut self, set: &CategorySet, resolution: CachedResolution) {
        if Self::is_cacheable(set) {
            self.entries.insert(set.clone(), resolution);
        }
    }

    pub fn evict(&mut self, set: &CategorySet) {
        if self.entries.remove(set).is_some() {
            log::debug!("location cache evicted filter={set}");
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> CategorySet {
        CategorySet::parse(names.iter().copied()).unwrap()
    }

    #[test]
    fn only_multi_category_sets_are_cached() {
        let mut cache = LocationCache::new();
        let resolution = CachedResolution {
            locations: [PathBuf::from("/r/A")].into(),
            watched: [PathBuf::from("/r"), PathBuf::from("/r/A")].into(),
        };
        cache.store(&set(&["A"]), resolution.clone());
        assert!(cache.is_empty());

        cache.store(&set(&["A", "B"]), resolution.clone());
        assert_eq!(cache.get(&set(&["B", "A"])), Some(&resolution));
        cache.evict(&set(&["A", "B"]));
        assert!(cache.is_empty());
    }
}
