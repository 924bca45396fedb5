use std::collections::BTreeMap;

use indexmap::IndexMap;
use metrics::Label;
use tracing::debug;

use crate::extract::has_text;

/// A set of tags attached to a single increment.
///
/// Tags are kept ordered by key, so two sets holding the same pairs always turn into the same metric key regardless of
/// the order the tags were added in. Adding a tag whose key is already present replaces its value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct TagSet(BTreeMap<String, String>);

impl TagSet {
    /// Builds a tag set from fixed key/value pairs, dropping any pair with a blank key or value.
    pub fn fixed<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        TagSet(
            pairs
                .into_iter()
                .filter(|(key, value)| has_text(key) && has_text(value))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }

    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.insert(key.into(), value.into());
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn to_labels(&self) -> Vec<Label> {
        self.0.iter().map(|(key, value)| Label::new(key.clone(), value.clone())).collect()
    }
}

/// Tag values produced by a single message, grouped by tag name.
///
/// Groups only exist for names that produced at least one value.
#[derive(Debug, Default)]
pub(crate) struct TagGroups {
    groups: IndexMap<String, Vec<String>>,
}

impl TagGroups {
    /// Appends values to the group for the given name.
    pub fn extend<K>(&mut self, name: K, values: Vec<String>)
    where
        K: Into<String>,
    {
        if values.is_empty() {
            return;
        }
        self.groups.entry(name.into()).or_default().extend(values);
    }

    /// Merges another set of groups into this one.
    ///
    /// A group in `other` replaces any group of the same name already present.
    pub fn merge(&mut self, other: TagGroups) {
        for (name, values) in other.groups {
            self.groups.insert(name, values);
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The length of the longest group.
    pub fn width(&self) -> usize {
        self.groups.values().map(Vec::len).max().unwrap_or(0)
    }

    /// Expands the groups into one tag set per index, on top of the given fixed tags.
    ///
    /// The tag set at index `i` holds the `i`-th value of every group. A group with no value at that index contributes
    /// an empty value, and any tag set containing a blank key or value is dropped entirely, so only indexes where every
    /// group had a real value survive.
    pub fn fan_out(&self, fixed: &TagSet) -> Vec<TagSet> {
        (0..self.width())
            .filter_map(|index| {
                let mut tags = fixed.clone();
                for (name, values) in &self.groups {
                    let value = values.get(index).map_or("", String::as_str);
                    if !has_text(name) || !has_text(value) {
                        debug!(tag = name.as_str(), index, "Dropping increment with blank tag.");
                        return None;
                    }
                    tags.insert(name.as_str(), value);
                }
                Some(tags)
            })
            .collect()
    }
}
