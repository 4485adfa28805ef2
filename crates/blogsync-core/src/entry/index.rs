use blogsync_fs::NormalizedPath;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::Entry;

/// All entries of one blog plus the dependents multimap.
///
/// Both maps are keyed case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlogEntries {
    entries: BTreeMap<String, Entry>,
    /// dependency key -> paths of entries that consumed it
    dependents: BTreeMap<String, BTreeSet<NormalizedPath>>,
}

impl BlogEntries {
    pub fn get(&self, path: &NormalizedPath) -> Option<&Entry> {
        self.entries.get(&path.lookup_key())
    }

    pub fn set(&mut self, entry: Entry) {
        let key = entry.key();
        if let Some(previous) = self.entries.remove(&key) {
            self.unlink(&previous);
        }
        for dependency in &entry.dependencies {
            self.dependents
                .entry(dependency.lookup_key())
                .or_default()
                .insert(entry.path.clone());
        }
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, path: &NormalizedPath) -> Option<Entry> {
        let removed = self.entries.remove(&path.lookup_key())?;
        self.unlink(&removed);
        Some(removed)
    }

    pub fn dependents(&self, path: &NormalizedPath) -> Vec<NormalizedPath> {
        self.dependents
            .get(&path.lookup_key())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn paths(&self) -> Vec<NormalizedPath> {
        let mut paths: Vec<_> = self.entries.values().map(|e| e.path.clone()).collect();
        paths.sort();
        paths
    }

    fn unlink(&mut self, entry: &Entry) {
        let key = entry.key();
        for dependency in &entry.dependencies {
            let dep_key = dependency.lookup_key();
            if let Some(set) = self.dependents.get_mut(&dep_key) {
                set.retain(|p| p.lookup_key() != key);
                if set.is_empty() {
                    self.dependents.remove(&dep_key);
                }
            }
        }
    }
}
