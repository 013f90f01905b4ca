use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};

/// A label occurrence scoped by namespace; `label` is rendered as `key=value`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelKey {
    pub namespace: String,
    pub label: String,
}

impl LabelKey {
    #[must_use]
    pub fn new(namespace: &str, key: &str, value: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            label: format!("{key}={value}"),
        }
    }
}

/// Occurrence count of each label across the records of one store
///
/// Counts never reach zero in the map: a label whose last carrier goes away is removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LabelIndex {
    counts: HashMap<LabelKey, usize>,
}

impl LabelIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, namespace: &str, labels: &BTreeMap<String, String>) {
        for (key, value) in labels {
            *self.counts.entry(LabelKey::new(namespace, key, value)).or_insert(0) += 1;
        }
    }

    pub fn remove(&mut self, namespace: &str, labels: &BTreeMap<String, String>) {
        for (key, value) in labels {
            let label_key = LabelKey::new(namespace, key, value);
            if let Some(count) = self.counts.get_mut(&label_key) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.counts.remove(&label_key);
                }
            }
        }
    }

    /// Move one record's contribution from its old labels to its new ones
    pub fn replace(
        &mut self,
        old_namespace: &str,
        old_labels: &BTreeMap<String, String>,
        new_namespace: &str,
        new_labels: &BTreeMap<String, String>,
    ) {
        if old_namespace == new_namespace && old_labels == new_labels {
            return;
        }
        self.remove(old_namespace, old_labels);
        self.add(new_namespace, new_labels);
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    #[must_use]
    pub fn count(&self, namespace: &str, label: &str) -> usize {
        self.counts
            .get(&LabelKey {
                namespace: namespace.to_string(),
                label: label.to_string(),
            })
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Entries by occurrences descending, then namespace, then label
    #[must_use]
    pub fn sorted(&self) -> Vec<(&LabelKey, usize)> {
        self.counts
            .iter()
            .map(|(key, count)| (key, *count))
            .sorted_by(|(a, a_count), (b, b_count)| {
                b_count
                    .cmp(a_count)
                    .then_with(|| a.namespace.cmp(&b.namespace))
                    .then_with(|| a.label.cmp(&b.label))
            })
            .collect()
    }

    /// Render the label file: `<cluster> [<namespace>] <label> <count>` per line
    #[must_use]
    pub fn render(&self, cluster: &str) -> String {
        self.sorted()
            .into_iter()
            .map(|(key, count)| {
                if key.namespace.is_empty() {
                    format!("{cluster} {} {count}", key.label)
                } else {
                    format!("{cluster} {} {} {count}", key.namespace, key.label)
                }
            })
            .join("\n")
    }
}
