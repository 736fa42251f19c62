//! String key/value metadata attached to remote objects

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Ordered string dictionary describing a remote object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply an incremental update: new values overwrite, empty values
    /// delete the key. Returns `true` if anything changed.
    pub fn update(&mut self, changes: &Properties) -> bool {
        let mut changed = false;
        for (key, value) in changes.iter() {
            if value.is_empty() {
                changed |= self.0.remove(key).is_some();
            } else if self.get(key) != Some(value) {
                self.0.insert(key.to_string(), value.to_string());
                changed = true;
            }
        }
        changed
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_overwrites_and_removes() {
        let mut props = Properties::new()
            .with("node.name", "alsa_output")
            .with("media.class", "Audio/Sink");
        let changes = Properties::new()
            .with("node.name", "renamed")
            .with("media.class", "");

        assert!(props.update(&changes));
        assert_eq!(props.get("node.name"), Some("renamed"));
        assert_eq!(props.get("media.class"), None);
        assert!(!props.update(&Properties::new().with("node.name", "renamed")));
    }
}
