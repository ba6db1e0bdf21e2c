//! Concatenation of several sources into one contiguous index space.

use std::ops::Range;
use tracing::{debug, info};

use crate::assembler::SequenceAssembler;
use crate::config::ConcatDatasetConfig;
use crate::data::{AssembledRecord, FieldValue};
use crate::epoch::{SeqOrdering, ensure_in_window};
use crate::errors::DatasetError;
use crate::lengths::LengthVector;
use crate::offsets::OffsetResolver;
use crate::source::{SeqCount, SequenceSource, SourceRegistry};
use crate::tags::CanonicalTags;
use crate::types::{Epoch, FieldName, OrderedIndex, SequenceTag, SourceId};

const DEFAULT_ID: &str = "concat";

struct ConcatSession {
    epoch: Epoch,
    offsets: OffsetResolver,
    /// Full explicit tag list of the epoch, if one was given.
    expected: Option<Vec<SequenceTag>>,
    loaded: Option<Range<OrderedIndex>>,
}

/// Sources laid end to end. Boundaries are discovered while loading.
///
/// Without an explicit tag list each child keeps its own per-epoch order.
/// With one, the list is split into consecutive groups sized by the children.
pub struct ConcatDataset {
    id: SourceId,
    sources: Vec<Box<dyn SequenceSource>>,
    ordering: SeqOrdering,
    canonical: Option<CanonicalTags>,
    session: Option<ConcatSession>,
}

impl ConcatDataset {
    /// Concatenate `sources` in order. At least one source is required.
    pub fn new(sources: Vec<Box<dyn SequenceSource>>) -> Result<Self, DatasetError> {
        if sources.is_empty() {
            return Err(DatasetError::Configuration(
                "a concatenated dataset needs at least one source".into(),
            ));
        }
        Ok(Self {
            id: DEFAULT_ID.to_string(),
            sources,
            ordering: SeqOrdering::Default,
            canonical: None,
            session: None,
        })
    }

    /// Build children through `registry`; they are named `part_0`, `part_1`, ...
    pub fn from_config(
        config: &ConcatDatasetConfig,
        registry: &SourceRegistry,
    ) -> Result<Self, DatasetError> {
        let sources = config
            .datasets
            .iter()
            .enumerate()
            .map(|(idx, spec)| registry.build(&format!("part_{idx}"), spec))
            .collect::<Result<Vec<_>, _>>()?;
        let mut dataset = Self::new(sources)?.with_ordering(config.seq_ordering);
        if let Some(tags) = config.canonical_tags()? {
            dataset = dataset.with_canonical_tags(tags);
        }
        info!(sources = dataset.sources.len(), "concat dataset configured");
        Ok(dataset)
    }

    /// Ordering used when `init_epoch` gets no explicit tag list.
    pub fn with_ordering(mut self, ordering: SeqOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Tags explicit lists are checked against before any child is touched.
    pub fn with_canonical_tags(mut self, tags: CanonicalTags) -> Self {
        self.canonical = Some(tags);
        self
    }

    /// Identifier used in logs and errors; defaults to `concat`.
    pub fn with_id(mut self, id: impl Into<SourceId>) -> Self {
        self.id = id.into();
        self
    }

    /// Order every child for `epoch` and reset the offsets.
    ///
    /// Returns `false`, keeping order and offsets, when `epoch` is already
    /// current.
    pub fn init_epoch(
        &mut self,
        epoch: Epoch,
        seq_list: Option<&[SequenceTag]>,
    ) -> Result<bool, DatasetError> {
        if self.session.as_ref().is_some_and(|s| s.epoch == epoch) {
            debug!(dataset = %self.id, epoch, "epoch already initialized");
            return Ok(false);
        }
        let parts = match seq_list {
            Some(list) => {
                if let Some(canonical) = &self.canonical {
                    canonical.indices_of(list)?;
                }
                self.partition(list)?
                    .into_iter()
                    .map(Some)
                    .collect::<Vec<_>>()
            }
            None if self.ordering.is_sorted() => {
                return Err(DatasetError::UnsupportedOrdering(format!(
                    "{:?} ordering would need a merge across concatenated sources",
                    self.ordering
                )));
            }
            None => vec![None; self.sources.len()],
        };

        self.session = None;
        for (source, part) in self.sources.iter_mut().zip(parts) {
            source.init_order(epoch, part)?;
        }
        info!(
            dataset = %self.id,
            epoch,
            explicit = seq_list.is_some(),
            sources = self.sources.len(),
            "initialized concat epoch"
        );
        self.session = Some(ConcatSession {
            epoch,
            offsets: OffsetResolver::new(),
            expected: seq_list.map(<[SequenceTag]>::to_vec),
            loaded: None,
        });
        Ok(true)
    }

    /// Split `list` into consecutive groups sized by the children.
    fn partition<'a>(
        &self,
        list: &'a [SequenceTag],
    ) -> Result<Vec<&'a [SequenceTag]>, DatasetError> {
        let mut rest = list;
        let mut parts = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let size = source.size().exact().ok_or_else(|| {
                DatasetError::UnsupportedOrdering(format!(
                    "source '{}' has no known size, so an explicit tag list cannot be split",
                    source.id()
                ))
            })?;
            if size > rest.len() {
                return Err(DatasetError::Configuration(format!(
                    "explicit tag list has {} tags but source '{}' needs {size} more",
                    list.len(),
                    source.id()
                )));
            }
            let (head, tail) = rest.split_at(size);
            parts.push(head);
            rest = tail;
        }
        if !rest.is_empty() {
            return Err(DatasetError::Configuration(format!(
                "explicit tag list has {} tags left over after all sources",
                rest.len()
            )));
        }
        Ok(parts)
    }

    /// Load global window `[start, end)`, discovering boundaries as needed.
    ///
    /// Returns `Underflow` when the window extends past all sources.
    pub fn load_window(
        &mut self,
        start: OrderedIndex,
        end: OrderedIndex,
    ) -> Result<(), DatasetError> {
        let session = self
            .session
            .as_mut()
            .ok_or(DatasetError::EpochNotInitialized)?;
        if start > end {
            return Err(DatasetError::Configuration(format!(
                "window start {start} is past its end {end}"
            )));
        }
        session.loaded = None;
        session.offsets.load_window(&mut self.sources, start, end)?;
        if let Some(expected) = &session.expected {
            for index in start..end {
                let (source_idx, local) = session.offsets.resolve(index);
                let source = &self.sources[source_idx];
                let found = source.tag_at(local)?;
                let want = expected.get(index).ok_or(DatasetError::Underflow {
                    start,
                    end,
                    available: expected.len(),
                })?;
                if &found != want {
                    return Err(DatasetError::Alignment {
                        source_id: source.id().to_string(),
                        index,
                        expected: want.clone(),
                        found,
                    });
                }
            }
        }
        session.loaded = Some(start..end);
        debug!(dataset = %self.id, start, end, "loaded window");
        Ok(())
    }

    fn session(&self) -> Result<&ConcatSession, DatasetError> {
        self.session
            .as_ref()
            .ok_or(DatasetError::EpochNotInitialized)
    }

    /// Owning source and local index of a loaded global index.
    fn locate(&self, index: OrderedIndex) -> Result<(&dyn SequenceSource, usize), DatasetError> {
        let session = self.session()?;
        ensure_in_window(session.loaded.as_ref(), index)?;
        let (source_idx, local) = session.offsets.resolve(index);
        Ok((self.sources[source_idx].as_ref(), local))
    }

    /// Assemble the sequence at global `index` from its owning source.
    pub fn assemble(&self, index: OrderedIndex) -> Result<AssembledRecord, DatasetError> {
        let (source, local) = self.locate(index)?;
        let tag = self.get_tag(index)?;
        let targets = source.target_field_names();
        SequenceAssembler::new(&targets).assemble(index, tag, |field| source.field_at(local, field))
    }

    /// Tag at a loaded global index.
    pub fn get_tag(&self, index: OrderedIndex) -> Result<SequenceTag, DatasetError> {
        let (source, local) = self.locate(index)?;
        match self.session()?.expected.as_ref().and_then(|list| list.get(index)) {
            Some(tag) => Ok(tag.clone()),
            None => source.tag_at(local),
        }
    }

    /// Total count; only a lower bound until every child knows its size.
    pub fn num_seqs(&self) -> SeqCount {
        let mut total = 0;
        let mut exact = true;
        for source in &self.sources {
            let size = source.size();
            total += size.known();
            exact &= size.is_exact();
        }
        if exact {
            SeqCount::Exact(total)
        } else {
            SeqCount::AtLeast(total)
        }
    }

    /// `(source index, local index)` for a global index, using the boundaries
    /// known so far.
    pub fn resolve(&self, index: OrderedIndex) -> Option<(usize, usize)> {
        self.session
            .as_ref()
            .map(|session| session.offsets.resolve(index))
    }

    /// Boundaries discovered so far in the current epoch.
    pub fn offset_resolver(&self) -> Option<&OffsetResolver> {
        self.session.as_ref().map(|session| &session.offsets)
    }

    /// Targets of the first source.
    pub fn target_list(&self) -> Vec<FieldName> {
        self.sources
            .first()
            .map(|source| source.target_field_names())
            .unwrap_or_default()
    }

    /// Per-field lengths of the sequence at global `index`, from its owning child.
    pub fn seq_length(&self, index: OrderedIndex) -> Result<LengthVector, DatasetError> {
        let (source, local) = self.locate(index)?;
        source.seq_length(local)
    }

    /// Current epoch, if one was initialized.
    pub fn epoch(&self) -> Option<Epoch> {
        self.session.as_ref().map(|session| session.epoch)
    }
}

impl SequenceSource for ConcatDataset {
    fn id(&self) -> &str {
        &self.id
    }

    fn init_order(
        &mut self,
        epoch: Epoch,
        seq_list: Option<&[SequenceTag]>,
    ) -> Result<(), DatasetError> {
        self.init_epoch(epoch, seq_list).map(|_| ())
    }

    /// Loads what exists; running past the end is reported through
    /// `has_at_least`.
    fn load_window(&mut self, start: usize, end: usize) -> Result<(), DatasetError> {
        match ConcatDataset::load_window(self, start, end) {
            Err(DatasetError::Underflow { available, .. }) => {
                ConcatDataset::load_window(self, start.min(available), available)
            }
            other => other,
        }
    }

    fn tag_at(&self, idx: usize) -> Result<SequenceTag, DatasetError> {
        self.get_tag(idx)
    }

    fn field_at(&self, idx: usize, field: &str) -> Result<FieldValue, DatasetError> {
        let (source, local) = self.locate(idx)?;
        source.field_at(local, field)
    }

    fn size(&self) -> SeqCount {
        self.num_seqs()
    }

    fn has_at_least(&self, count: usize) -> bool {
        count <= self.num_seqs().known()
    }

    fn target_field_names(&self) -> Vec<FieldName> {
        self.target_list()
    }

    fn seq_length(&self, idx: usize) -> Result<LengthVector, DatasetError> {
        ConcatDataset::seq_length(self, idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SequenceRecord;
    use crate::source::InMemorySource;

    fn part(prefix: &str, n: usize) -> Box<dyn SequenceSource> {
        let records = (0..n)
            .map(|idx| {
                SequenceRecord::new(format!("{prefix}{idx}"))
                    .with_field("data", FieldValue::ClassIds(vec![idx as u32; idx + 1]))
                    .with_field("classes", FieldValue::ClassIds(vec![1]))
            })
            .collect();
        Box::new(InMemorySource::new(prefix, records).with_hidden_size(true))
    }

    #[test]
    fn offsets_grow_while_loading() {
        let mut dataset = ConcatDataset::new(vec![part("a", 3), part("b", 10)]).unwrap();
        dataset.init_epoch(1, None).unwrap();
        assert_eq!(dataset.num_seqs(), SeqCount::AtLeast(0));
        dataset.load_window(0, 5).unwrap();
        assert_eq!(dataset.offset_resolver().unwrap().offsets(), vec![0, -3]);

        let tags: Vec<_> = (0..5)
            .map(|idx| dataset.assemble(idx).unwrap().tag)
            .collect();
        assert_eq!(tags, ["a0", "a1", "a2", "b0", "b1"]);
        assert_eq!(dataset.resolve(4), Some((1, 1)));
        assert_eq!(dataset.seq_length(2).unwrap().primary(), 3);
        assert_eq!(dataset.assemble(3).unwrap().targets.len(), 1);
    }

    #[test]
    fn same_epoch_keeps_offsets() {
        let mut dataset = ConcatDataset::new(vec![part("a", 2), part("b", 2)]).unwrap();
        assert!(dataset.init_epoch(5, None).unwrap());
        dataset.load_window(0, 3).unwrap();
        assert!(!dataset.init_epoch(5, None).unwrap());
        assert_eq!(dataset.offset_resolver().unwrap().boundaries(), &[0, 2]);
        assert!(dataset.init_epoch(6, None).unwrap());
        assert_eq!(dataset.offset_resolver().unwrap().boundaries(), &[0]);
    }

    #[test]
    fn sorted_ordering_without_list_is_unsupported() {
        let mut dataset = ConcatDataset::new(vec![part("a", 2)])
            .unwrap()
            .with_ordering(SeqOrdering::Sorted);
        assert!(matches!(
            dataset.init_epoch(1, None),
            Err(DatasetError::UnsupportedOrdering(_))
        ));
        assert_eq!(dataset.epoch(), None);
    }

    #[test]
    fn explicit_list_needs_known_sizes() {
        let mut dataset = ConcatDataset::new(vec![part("a", 2)]).unwrap();
        let list = vec!["a1".to_string(), "a0".to_string()];
        assert!(matches!(
            dataset.init_epoch(1, Some(&list)),
            Err(DatasetError::UnsupportedOrdering(_))
        ));
    }

    #[test]
    fn underflow_is_recoverable_and_trait_load_clamps() {
        let mut dataset = ConcatDataset::new(vec![part("a", 2), part("b", 1)]).unwrap();
        dataset.init_epoch(1, None).unwrap();
        assert!(dataset.load_window(1, 5).unwrap_err().is_underflow());
        assert_eq!(dataset.num_seqs(), SeqCount::Exact(3));

        SequenceSource::load_window(&mut dataset, 1, 5).unwrap();
        assert!(!dataset.has_at_least(5));
        assert_eq!(dataset.tag_at(2).unwrap(), "b0");
    }
}
