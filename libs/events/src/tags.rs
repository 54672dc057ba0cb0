//! Snapshot tags and the first-writer-wins merge.
//!
//! Tags cannot be copied along with a snapshot shared across accounts, so
//! they travel in the saga message and are re-applied on the DR copy.

use serde::{Deserialize, Serialize};

/// Tag naming the retention policy that governs a source's DR copies.
pub const LIFECYCLE_TAG: &str = "Draco_Lifecycle";

/// Lifecycle tag value that opts a source out of replication.
pub const IGNORE_LIFECYCLE: &str = "ignore";

/// Prefix of provider-reserved tag keys, which cannot be set by callers.
pub const RESERVED_TAG_PREFIX: &str = "aws:";

/// A single key/value tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
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

/// Ordered list of tags with unique keys.
///
/// Duplicate keys are dropped on construction, keeping the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Tag>", into = "Vec<Tag>")]
pub struct TagList(Vec<Tag>);

impl TagList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Merges two ordered lists. Tags from `first` win; tags from `second`
    /// are appended, in order, only when their key is not already present.
    pub fn merge(first: &TagList, second: &TagList) -> TagList {
        let mut merged = first.clone();
        for tag in &second.0 {
            merged.push_if_absent(tag.clone());
        }
        merged
    }

    /// Appends a tag unless its key is already present. Returns whether it was added.
    pub fn push_if_absent(&mut self, tag: Tag) -> bool {
        if self.get(&tag.key).is_some() {
            return false;
        }
        self.0.push(tag);
        true
    }

    /// Looks up the value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    /// The retention policy named by the lifecycle tag, if any.
    pub fn lifecycle(&self) -> Option<&str> {
        self.get(LIFECYCLE_TAG)
    }

    /// The list without provider-reserved tags, order preserved.
    pub fn without_reserved(&self) -> TagList {
        Self(
            self.0
                .iter()
                .filter(|t| !t.key.starts_with(RESERVED_TAG_PREFIX))
                .cloned()
                .collect(),
        )
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Tag>> for TagList {
    fn from(tags: Vec<Tag>) -> Self {
        let mut list = TagList::new();
        for tag in tags {
            list.push_if_absent(tag);
        }
        list
    }
}

impl From<TagList> for Vec<Tag> {
    fn from(list: TagList) -> Self {
        list.0
    }
}

impl FromIterator<Tag> for TagList {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}

impl<'a> IntoIterator for &'a TagList {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
