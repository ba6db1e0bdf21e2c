//! Canonical sequence tag list.

use indexmap::IndexSet;
use std::fs;
use std::path::Path;

use crate::errors::DatasetError;
use crate::types::{CanonicalIndex, SequenceTag};

/// Master tag list: a fixed bijection between canonical index and tag.
#[derive(Clone, Debug, Default)]
pub struct CanonicalTags {
    tags: IndexSet<SequenceTag>,
}

impl CanonicalTags {
    /// Build from tags in canonical order. Duplicate tags are rejected.
    pub fn new<I, T>(tags: I) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = T>,
        T: Into<SequenceTag>,
    {
        let mut set = IndexSet::new();
        for tag in tags {
            let tag = tag.into();
            if !set.insert(tag.clone()) {
                return Err(DatasetError::Configuration(format!(
                    "sequence tag '{tag}' appears more than once in the canonical list"
                )));
            }
        }
        Ok(Self { tags: set })
    }

    /// Parse newline-separated tags. Trailing blank lines are dropped; every
    /// other line is a tag exactly as written.
    pub fn parse(raw: &str) -> Result<Self, DatasetError> {
        let mut lines: Vec<&str> = raw.lines().collect();
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        Self::new(lines)
    }

    /// Read and parse a tag file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::parse(&raw)
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True when the list is empty.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Canonical index of `tag`.
    pub fn index_of(&self, tag: &str) -> Option<CanonicalIndex> {
        self.tags.get_index_of(tag)
    }

    /// Tag at canonical index `idx`.
    pub fn tag_of(&self, idx: CanonicalIndex) -> Option<&SequenceTag> {
        self.tags.get_index(idx)
    }

    /// True when `tag` is in the list.
    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Look up every tag, failing on the first unknown one.
    pub fn indices_of<'a>(
        &self,
        tags: impl IntoIterator<Item = &'a SequenceTag>,
    ) -> Result<Vec<CanonicalIndex>, DatasetError> {
        tags.into_iter()
            .map(|tag| {
                self.index_of(tag)
                    .ok_or_else(|| DatasetError::UnknownTag(tag.clone()))
            })
            .collect()
    }

    /// Tags in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &SequenceTag> {
        self.tags.iter()
    }
}
