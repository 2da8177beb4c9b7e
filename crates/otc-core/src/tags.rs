//! resource tag model and diffing.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// tag map keyed by (case-sensitive) tag key.
pub type TagMap = BTreeMap<String, String>;

/// wire representation of a single tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// how out-of-band tags are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TagMode {
    /// only keys that were ever declared are removed.
    #[default]
    Managed,
    /// every remote tag not declared is removed.
    Strict,
}

/// writes needed to converge remote tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    pub to_delete: Vec<Tag>,
    pub to_add: Vec<Tag>,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_add.is_empty()
    }
}

/// compute `declared \ current` additions and `current \ declared` removals.
///
/// `prior` is the tag map last written by us; in [`TagMode::Managed`] a
/// remote key that is neither declared nor prior is left alone.
pub fn diff_tags(current: &TagMap, declared: &TagMap, prior: &TagMap, mode: TagMode) -> TagDiff {
    let mut diff = TagDiff::default();
    for (key, value) in current {
        if declared.get(key) == Some(value) {
            continue;
        }
        let managed = declared.contains_key(key) || prior.contains_key(key);
        if mode == TagMode::Strict || managed {
            diff.to_delete.push(Tag::new(key, value));
        }
    }
    for (key, value) in declared {
        if current.get(key) != Some(value) {
            diff.to_add.push(Tag::new(key, value));
        }
    }
    diff
}

/// read a tag map out of an attribute value; non-string values are skipped.
pub fn tags_from_value(value: Option<&Value>) -> TagMap {
    value.and_then(Value::as_string_map).unwrap_or_default()
}

/// convert wire tags into a map.
pub fn tags_to_map(tags: impl IntoIterator<Item = Tag>) -> TagMap {
    tags.into_iter().map(|tag| (tag.key, tag.value)).collect()
}

/// convert a map into wire tags.
pub fn map_to_tags(map: &TagMap) -> Vec<Tag> {
    map.iter().map(|(key, value)| Tag::new(key, value)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> TagMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn equal_maps_need_no_writes() {
        let tags = map(&[("muh", "value-create")]);
        assert!(diff_tags(&tags, &tags, &tags, TagMode::Strict).is_empty());
    }

    #[test]
    fn changed_and_removed_keys() {
        let current = map(&[("muh", "value-create"), ("kuh", "value-create")]);
        let declared = map(&[("muh", "value-update")]);
        let diff = diff_tags(&current, &declared, &current, TagMode::Managed);
        assert_eq!(
            diff.to_delete,
            vec![Tag::new("kuh", "value-create"), Tag::new("muh", "value-create")]
        );
        assert_eq!(diff.to_add, vec![Tag::new("muh", "value-update")]);
    }

    #[test]
    fn managed_mode_keeps_out_of_band_tags() {
        let current = map(&[("muh", "a"), ("foreign", "x")]);
        let declared = map(&[("muh", "a")]);
        let managed = diff_tags(&current, &declared, &declared, TagMode::Managed);
        assert!(managed.is_empty());

        let strict = diff_tags(&current, &declared, &declared, TagMode::Strict);
        assert_eq!(strict.to_delete, vec![Tag::new("foreign", "x")]);
    }

    #[test]
    fn keys_are_case_sensitive() {
        let current = map(&[("Env", "prod")]);
        let declared = map(&[("env", "prod")]);
        let diff = diff_tags(&current, &declared, &TagMap::new(), TagMode::Strict);
        assert_eq!(diff.to_delete, vec![Tag::new("Env", "prod")]);
        assert_eq!(diff.to_add, vec![Tag::new("env", "prod")]);
    }

    #[test]
    fn wire_tags_default_missing_value() {
        let tags: Vec<Tag> = serde_json::from_str(r#"[{"key":"a"}]"#).unwrap();
        assert_eq!(tags_to_map(tags), map(&[("a", "")]));
    }
}
