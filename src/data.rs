use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::fields::PRIMARY_FIELD;
use crate::lengths::LengthVector;

pub use crate::types::{FieldName, OrderedIndex, SequenceTag};

/// Payload of one field of one sequence, as produced by a source.
///
/// The crate never computes on these values; it only moves them and counts frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    /// Frame-major dense matrix holding `frames * dim` values.
    Dense {
        /// Width of one frame.
        dim: usize,
        /// Values, `dim` per frame.
        values: Vec<f32>,
    },
    /// One class id per frame.
    ClassIds(Vec<u32>),
}

impl FieldValue {
    /// Number of frames (rows) in this value.
    pub fn frames(&self) -> usize {
        match self {
            FieldValue::Dense { dim, values } => {
                if *dim == 0 {
                    0
                } else {
                    values.len() / dim
                }
            }
            FieldValue::ClassIds(ids) => ids.len(),
        }
    }

    /// Width of a single frame: `dim` for dense values, 1 for class ids.
    pub fn frame_width(&self) -> usize {
        match self {
            FieldValue::Dense { dim, .. } => *dim,
            FieldValue::ClassIds(_) => 1,
        }
    }
}

/// A complete sequence as held by in-memory and streaming sources.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    /// Sequence tag.
    pub tag: SequenceTag,
    /// Field payloads keyed by source-local field name.
    pub fields: BTreeMap<FieldName, FieldValue>,
}

impl SequenceRecord {
    /// Record with no fields.
    pub fn new(tag: impl Into<SequenceTag>) -> Self {
        Self {
            tag: tag.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field payload.
    pub fn with_field(mut self, name: impl Into<FieldName>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Frame counts of every field.
    pub fn lengths(&self) -> LengthVector {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), value.frames()))
            .collect()
    }
}

/// One logical sequence stitched together from its primary and target fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssembledRecord {
    /// Position in the epoch's ordering.
    pub index: OrderedIndex,
    /// Canonical tag at `index`.
    pub tag: SequenceTag,
    /// Primary (model input) field.
    pub features: FieldValue,
    /// Target fields keyed by logical name.
    pub targets: BTreeMap<FieldName, FieldValue>,
}

impl AssembledRecord {
    /// Frame counts of the primary field and every target.
    pub fn lengths(&self) -> LengthVector {
        let mut lengths = LengthVector::single(PRIMARY_FIELD, self.features.frames());
        for (name, value) in &self.targets {
            lengths.set(name.clone(), value.frames());
        }
        lengths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_values_count_frames() {
        let dense = FieldValue::Dense {
            dim: 3,
            values: vec![0.0; 12],
        };
        assert_eq!(dense.frames(), 4);
        assert_eq!(dense.frame_width(), 3);
        let ids = FieldValue::ClassIds(vec![1, 2]);
        assert_eq!(ids.frames(), 2);
        assert_eq!(ids.frame_width(), 1);
        let empty = FieldValue::Dense {
            dim: 0,
            values: Vec::new(),
        };
        assert_eq!(empty.frames(), 0);
    }

    #[test]
    fn sequence_record_reports_lengths() {
        let record = SequenceRecord::new("seq")
            .with_field(
                "features",
                FieldValue::Dense {
                    dim: 2,
                    values: vec![0.0; 10],
                },
            )
            .with_field("classes", FieldValue::ClassIds(vec![7, 7, 8]));
        let lengths = record.lengths();
        assert_eq!(lengths.get("features"), 5);
        assert_eq!(lengths.get("classes"), 3);
    }
}
