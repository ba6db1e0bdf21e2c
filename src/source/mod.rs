//! Sequence source interface and the in-memory source.
//!
//! Ownership model:
//! - `SequenceSource` is the dataset-facing interface every collaborator
//!   implements, including the datasets themselves, so they nest.
//! - Sources own their storage, cursor, and any caching. Datasets only ask
//!   them to order themselves for an epoch, load windows, and answer
//!   per-index queries.
//! - `SourceRegistry` builds sources from declarative `SourceSpec`s.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::constants::fields::PRIMARY_FIELD;
use crate::data::{FieldValue, SequenceRecord};
use crate::errors::DatasetError;
use crate::lengths::LengthVector;
use crate::types::{Epoch, FieldName, SequenceTag, SourceId};

/// Source registry and declarative source specs.
pub mod registry;
/// Source implementation modules.
pub mod sources;

pub use registry::{SourceConstructor, SourceRegistry, SourceSpec};
pub use sources::stream::{RecordStreamFactory, StreamSource};

/// Number of sequences a source holds, as far as it knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeqCount {
    /// The source has been fully probed.
    Exact(usize),
    /// At least this many sequences exist; more may follow.
    AtLeast(usize),
}

impl SeqCount {
    /// Count known so far, exact or not.
    pub fn known(&self) -> usize {
        match self {
            SeqCount::Exact(n) | SeqCount::AtLeast(n) => *n,
        }
    }

    /// Count, only when it is exact.
    pub fn exact(&self) -> Option<usize> {
        match self {
            SeqCount::Exact(n) => Some(*n),
            SeqCount::AtLeast(_) => None,
        }
    }

    /// True once the source is fully probed.
    pub fn is_exact(&self) -> bool {
        matches!(self, SeqCount::Exact(_))
    }
}

/// Dataset-facing sequence source interface.
///
/// Call order per epoch: `init_order`, then `load_window`, then per-index
/// queries for indices inside the loaded window. `load_window` loads as much of
/// the requested window as the source holds and does not fail on truncation;
/// callers detect a short source through `has_at_least`.
pub trait SequenceSource: Send {
    /// Stable source identifier used in errors and logs.
    fn id(&self) -> &str;

    /// Order the source for `epoch`, optionally following an explicit tag list.
    fn init_order(
        &mut self,
        epoch: Epoch,
        seq_list: Option<&[SequenceTag]>,
    ) -> Result<(), DatasetError>;

    /// Make local indices in `[start, end)` available.
    fn load_window(&mut self, start: usize, end: usize) -> Result<(), DatasetError>;

    /// Tag of the sequence at local index `idx`.
    fn tag_at(&self, idx: usize) -> Result<SequenceTag, DatasetError>;

    /// Value of source-local `field` at local index `idx`.
    fn field_at(&self, idx: usize, field: &str) -> Result<FieldValue, DatasetError>;

    /// Number of sequences, possibly only a lower bound until fully probed.
    fn size(&self) -> SeqCount;

    /// True when the source holds at least `count` sequences.
    fn has_at_least(&self, count: usize) -> bool;

    /// Target field names, sorted.
    fn target_field_names(&self) -> Vec<FieldName>;

    /// Per-field lengths of the sequence at local index `idx`.
    fn seq_length(&self, idx: usize) -> Result<LengthVector, DatasetError> {
        let primary = self.field_at(idx, PRIMARY_FIELD)?;
        let mut lengths = LengthVector::single(PRIMARY_FIELD, primary.frames());
        for target in self.target_field_names() {
            let frames = self.field_at(idx, &target)?.frames();
            lengths.set(target, frames);
        }
        Ok(lengths)
    }
}

/// Declarative parameters of an `InMemorySource`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InMemorySourceParams {
    /// Records in canonical order.
    pub records: Vec<SequenceRecord>,
    /// Report only a lower bound on the size until a load runs past the end.
    #[serde(default)]
    pub hide_size: bool,
    /// Target field names; defaults to every non-primary field of the first record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<FieldName>>,
}

/// In-memory sequence source for tests and small corpora.
pub struct InMemorySource {
    id: SourceId,
    records: Arc<Vec<SequenceRecord>>,
    by_tag: HashMap<SequenceTag, usize>,
    order: Vec<usize>,
    targets: Vec<FieldName>,
    hide_size: bool,
    probed_end: usize,
    ran_past_end: bool,
}

impl InMemorySource {
    /// Create an in-memory source from prebuilt records, in their given order.
    pub fn new(id: impl Into<SourceId>, records: Vec<SequenceRecord>) -> Self {
        let by_tag = records
            .iter()
            .enumerate()
            .map(|(idx, record)| (record.tag.clone(), idx))
            .collect();
        let targets = records
            .first()
            .map(|record| {
                record
                    .fields
                    .keys()
                    .filter(|name| name.as_str() != PRIMARY_FIELD)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let order = (0..records.len()).collect();
        Self {
            id: id.into(),
            records: Arc::new(records),
            by_tag,
            order,
            targets,
            hide_size: false,
            probed_end: 0,
            ran_past_end: false,
        }
    }

    /// Build from declarative params.
    pub fn from_params(id: impl Into<SourceId>, params: InMemorySourceParams) -> Self {
        let mut source = Self::new(id, params.records).with_hidden_size(params.hide_size);
        if let Some(targets) = params.targets {
            source = source.with_targets(targets);
        }
        source
    }

    /// Pretend the size is unknown until a load runs past the end.
    pub fn with_hidden_size(mut self, hide_size: bool) -> Self {
        self.hide_size = hide_size;
        self
    }

    /// Override the reported target field names.
    pub fn with_targets(mut self, targets: impl IntoIterator<Item = impl Into<FieldName>>) -> Self {
        let mut targets: Vec<FieldName> = targets.into_iter().map(Into::into).collect();
        targets.sort();
        targets.dedup();
        self.targets = targets;
        self
    }

    fn record(&self, idx: usize) -> Result<&SequenceRecord, DatasetError> {
        self.order
            .get(idx)
            .and_then(|&pos| self.records.get(pos))
            .ok_or_else(|| DatasetError::SourceInconsistent {
                source_id: self.id.clone(),
                details: format!("index {idx} is out of range ({} sequences)", self.order.len()),
            })
    }
}

impl SequenceSource for InMemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn init_order(
        &mut self,
        epoch: Epoch,
        seq_list: Option<&[SequenceTag]>,
    ) -> Result<(), DatasetError> {
        self.order = match seq_list {
            Some(list) => list
                .iter()
                .map(|tag| {
                    self.by_tag
                        .get(tag)
                        .copied()
                        .ok_or_else(|| DatasetError::UnknownTag(tag.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => (0..self.records.len()).collect(),
        };
        self.probed_end = 0;
        self.ran_past_end = false;
        debug!(source = %self.id, epoch, seqs = self.order.len(), "in-memory source ordered");
        Ok(())
    }

    fn load_window(&mut self, _start: usize, end: usize) -> Result<(), DatasetError> {
        let total = self.order.len();
        self.probed_end = self.probed_end.max(end.min(total));
        if end > total {
            self.ran_past_end = true;
        }
        Ok(())
    }

    fn tag_at(&self, idx: usize) -> Result<SequenceTag, DatasetError> {
        Ok(self.record(idx)?.tag.clone())
    }

    fn field_at(&self, idx: usize, field: &str) -> Result<FieldValue, DatasetError> {
        let record = self.record(idx)?;
        record
            .fields
            .get(field)
            .cloned()
            .ok_or_else(|| DatasetError::SourceInconsistent {
                source_id: self.id.clone(),
                details: format!("sequence '{}' has no field '{field}'", record.tag),
            })
    }

    fn size(&self) -> SeqCount {
        if self.hide_size && !self.ran_past_end {
            SeqCount::AtLeast(self.probed_end)
        } else {
            SeqCount::Exact(self.order.len())
        }
    }

    fn has_at_least(&self, count: usize) -> bool {
        count <= self.order.len()
    }

    fn target_field_names(&self) -> Vec<FieldName> {
        self.targets.clone()
    }

    fn seq_length(&self, idx: usize) -> Result<LengthVector, DatasetError> {
        Ok(self.record(idx)?.lengths())
    }
}
