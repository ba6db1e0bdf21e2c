//! Per-field sequence length accounting.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::path::Path;

use crate::constants::fields::PRIMARY_FIELD;
use crate::errors::DatasetError;
use crate::types::{FieldName, SequenceTag};

/// Lengths of one sequence (or a sum of sequences) keyed by field name.
///
/// Different fields of one sequence can have different natural lengths
/// (frames vs. labels). Missing fields read as zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LengthVector {
    lengths: BTreeMap<FieldName, usize>,
}

impl LengthVector {
    /// Create an empty length vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a vector holding a single field.
    pub fn single(field: impl Into<FieldName>, len: usize) -> Self {
        let mut vector = Self::new();
        vector.set(field, len);
        vector
    }

    /// Length of `field`, or 0 when absent.
    pub fn get(&self, field: &str) -> usize {
        self.lengths.get(field).copied().unwrap_or(0)
    }

    /// Length of the primary field.
    pub fn primary(&self) -> usize {
        self.get(PRIMARY_FIELD)
    }

    /// Set the length of `field`.
    pub fn set(&mut self, field: impl Into<FieldName>, len: usize) {
        self.lengths.insert(field.into(), len);
    }

    /// True when no lengths are set.
    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Fields and lengths, sorted by field.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.lengths.iter().map(|(field, len)| (field.as_str(), *len))
    }

    /// Largest length over all fields.
    pub fn max_value(&self) -> usize {
        self.lengths.values().copied().max().unwrap_or(0)
    }

    /// Elementwise maximum of two vectors.
    pub fn max_with(&self, other: &LengthVector) -> LengthVector {
        let mut out = self.clone();
        for (field, len) in other.iter() {
            if len > out.get(field) {
                out.set(field, len);
            }
        }
        out
    }

    /// True when every field of `self` is at most the same field of `limit`.
    pub fn fits_within(&self, limit: &LengthVector) -> bool {
        self.iter().all(|(field, len)| len <= limit.get(field))
    }
}

impl<K: Into<FieldName>> FromIterator<(K, usize)> for LengthVector {
    fn from_iter<I: IntoIterator<Item = (K, usize)>>(iter: I) -> Self {
        Self {
            lengths: iter
                .into_iter()
                .map(|(field, len)| (field.into(), len))
                .collect(),
        }
    }
}

impl AddAssign<&LengthVector> for LengthVector {
    fn add_assign(&mut self, rhs: &LengthVector) {
        for (field, len) in rhs.iter() {
            *self.lengths.entry(field.to_string()).or_insert(0) += len;
        }
    }
}

impl Add for LengthVector {
    type Output = LengthVector;

    fn add(mut self, rhs: LengthVector) -> LengthVector {
        self += &rhs;
        self
    }
}

impl<'a> Sum<&'a LengthVector> for LengthVector {
    fn sum<I: Iterator<Item = &'a LengthVector>>(iter: I) -> Self {
        let mut total = LengthVector::new();
        for vector in iter {
            total += vector;
        }
        total
    }
}

/// Precomputed lengths keyed by sequence tag.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LengthTable {
    entries: HashMap<SequenceTag, LengthVector>,
}

impl LengthTable {
    /// Table over `entries`.
    pub fn new(entries: HashMap<SequenceTag, LengthVector>) -> Self {
        Self { entries }
    }

    /// Parse a JSON object of `tag -> {field -> len}`.
    pub fn from_json_str(raw: &str) -> Result<Self, DatasetError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Read a length file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Lengths of `tag`.
    pub fn get(&self, tag: &str) -> Option<&LengthVector> {
        self.entries.get(tag)
    }

    /// Number of tags in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail when any of `tags` has no entry.
    pub fn ensure_covers<'a>(
        &self,
        tags: impl IntoIterator<Item = &'a SequenceTag>,
    ) -> Result<(), DatasetError> {
        for tag in tags {
            if !self.entries.contains_key(tag) {
                return Err(DatasetError::Configuration(format!(
                    "length table has no entry for sequence '{tag}'"
                )));
            }
        }
        Ok(())
    }

    /// Sum of the lengths of `tags`; unknown tags contribute nothing.
    pub fn total<'a>(&self, tags: impl IntoIterator<Item = &'a SequenceTag>) -> LengthVector {
        tags.into_iter()
            .filter_map(|tag| self.entries.get(tag))
            .sum()
    }
}
