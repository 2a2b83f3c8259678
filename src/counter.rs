// Label-keyed counter module
// This file implements the per-label-combination count store used by the
// release-asset and access-log fetchers to deduplicate and accumulate samples
//
// Numan Thabit 2025 Nov

use std::collections::HashMap;

/// Label name to label value mapping for one sample.
pub type LabelSet = HashMap<String, String>;

/// Value used for a declared label that is absent from a label set.
pub const UNKNOWN_LABEL_VALUE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterEntry {
    pub count: u64,
    /// Labels as first seen for this key; absent names stay absent here.
    pub labels: LabelSet,
    pub key: String,
}

/// Accumulates or sets a count per unique combination of declared label values.
///
/// Entries are append-only and keep insertion order, so emitted series stay
/// stable across scrapes.
#[derive(Debug, Clone, Default)]
pub struct LabelKeyedCounter {
    label_names: Vec<String>,
    entries: Vec<CounterEntry>,
    indexes: HashMap<String, usize>,
}

impl LabelKeyedCounter {
    pub fn new(label_names: Vec<String>) -> Self {
        Self {
            label_names,
            entries: Vec::new(),
            indexes: HashMap::new(),
        }
    }

    pub fn increment(&mut self, labels: LabelSet) {
        let index = self.ensure_index(labels);
        self.entries[index].count += 1;
    }

    /// Overwrite the count for `labels`; used for point-in-time upstream values.
    pub fn set(&mut self, labels: LabelSet, value: u64) {
        let index = self.ensure_index(labels);
        self.entries[index].count = value;
    }

    pub fn results(&self) -> &[CounterEntry] {
        &self.entries
    }

    /// Canonical identity of `labels` restricted to the declared label names.
    pub fn get_key(&self, labels: &LabelSet) -> String {
        self.label_names
            .iter()
            .map(|name| {
                let value = labels
                    .get(name)
                    .map(String::as_str)
                    .unwrap_or(UNKNOWN_LABEL_VALUE);
                format!("{{{name}:{value}}}")
            })
            .collect()
    }

    fn ensure_index(&mut self, labels: LabelSet) -> usize {
        let key = self.get_key(&labels);
        if let Some(&index) = self.indexes.get(&key) {
            return index;
        }
        let index = self.entries.len();
        self.indexes.insert(key.clone(), index);
        self.entries.push(CounterEntry {
            count: 0,
            labels,
            key,
        });
        index
    }
}
