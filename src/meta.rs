//! Multi-source dataset: one canonical ordering fanned out to every source.
//!
//! Every configured source is ordered with the same explicit tag list and is
//! asked for the same window, so local index `i` of each source is ordered
//! index `i` of the dataset. Each windowed load verifies that claim tag by tag.

use indexmap::IndexMap;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::assembler::SequenceAssembler;
use crate::config::MetaDatasetConfig;
use crate::constants::fields::PRIMARY_FIELD;
use crate::data::{AssembledRecord, FieldValue};
use crate::epoch::{EpochSession, OrderPlanner, SeqOrdering};
use crate::errors::DatasetError;
use crate::fields::{Dtype, Encoding, FieldLayout};
use crate::lengths::{LengthTable, LengthVector};
use crate::source::{SeqCount, SequenceSource, SourceRegistry};
use crate::tags::CanonicalTags;
use crate::types::{Epoch, FieldName, OrderedIndex, SequenceTag, SourceId};

const DEFAULT_ID: &str = "meta";

/// Combines fields from several sources that share one tag list.
pub struct MetaDataset {
    id: SourceId,
    tags: CanonicalTags,
    lengths: Option<LengthTable>,
    num_timesteps: Option<LengthVector>,
    layout: FieldLayout,
    sources: IndexMap<SourceId, Box<dyn SequenceSource>>,
    planner: OrderPlanner,
    session: Option<EpochSession>,
}

impl MetaDataset {
    /// Build from already constructed sources.
    ///
    /// Every source referenced by `layout` must be present. Sources the layout
    /// does not reference are dropped.
    pub fn new(
        tags: CanonicalTags,
        layout: FieldLayout,
        mut sources: IndexMap<SourceId, Box<dyn SequenceSource>>,
    ) -> Result<Self, DatasetError> {
        let referenced = layout.source_ids();
        if let Some(missing) = referenced.iter().find(|id| !sources.contains_key(id.as_str())) {
            return Err(DatasetError::Configuration(format!(
                "field mapping references source '{missing}' which is not configured"
            )));
        }
        sources.retain(|id, _| {
            let keep = referenced.contains(id);
            if !keep {
                warn!(source = %id, "source is not referenced by the field mapping; dropping it");
            }
            keep
        });
        info!(
            seqs = tags.len(),
            sources = sources.len(),
            targets = ?layout.target_list(),
            "meta dataset configured"
        );
        Ok(Self {
            id: DEFAULT_ID.to_string(),
            tags,
            lengths: None,
            num_timesteps: None,
            layout,
            sources,
            planner: OrderPlanner::default(),
            session: None,
        })
    }

    /// Build from a declarative config, instantiating only referenced sources.
    pub fn from_config(
        config: &MetaDatasetConfig,
        registry: &SourceRegistry,
    ) -> Result<Self, DatasetError> {
        config.validate()?;
        let tags = config.canonical_tags()?;
        let layout = config.field_layout()?;
        let lengths = config.length_table()?;

        let referenced = layout.source_ids();
        let mut sources = IndexMap::new();
        for (id, spec) in &config.datasets {
            if !referenced.contains(id) {
                debug!(source = %id, "skipping unreferenced source");
                continue;
            }
            sources.insert(id.clone(), registry.build(id, spec)?);
        }

        let mut dataset = Self::new(tags, layout, sources)?.with_ordering(config.seq_ordering);
        if let Some(lengths) = lengths {
            dataset = dataset.with_lengths(lengths)?;
        }
        Ok(dataset)
    }

    /// Attach a length table. It must cover every canonical tag.
    pub fn with_lengths(mut self, lengths: LengthTable) -> Result<Self, DatasetError> {
        lengths.ensure_covers(self.tags.iter())?;
        self.num_timesteps = Some(lengths.total(self.tags.iter()));
        self.lengths = Some(lengths);
        Ok(self)
    }

    /// Ordering used when `init_epoch` gets no explicit tag list.
    pub fn with_ordering(mut self, ordering: SeqOrdering) -> Self {
        self.planner = OrderPlanner::new(ordering);
        self
    }

    /// Identifier used in logs and errors; defaults to `meta`.
    pub fn with_id(mut self, id: impl Into<SourceId>) -> Self {
        self.id = id.into();
        self
    }

    /// Order every source for `epoch`.
    ///
    /// Returns `false` when `epoch` is already the current epoch; the existing
    /// order is kept and `seq_list` is ignored.
    pub fn init_epoch(
        &mut self,
        epoch: Epoch,
        seq_list: Option<&[SequenceTag]>,
    ) -> Result<bool, DatasetError> {
        if self.session.as_ref().is_some_and(|s| s.epoch() == epoch) {
            debug!(dataset = %self.id, epoch, "epoch already initialized");
            return Ok(false);
        }
        let order = self
            .planner
            .plan(epoch, &self.tags, seq_list, self.lengths.as_ref())?;
        self.session = None;
        let session = EpochSession::new(epoch, order, &self.tags);
        for source in self.sources.values_mut() {
            source.init_order(epoch, Some(session.ordered_tags()))?;
        }
        info!(
            dataset = %self.id,
            epoch,
            ordering = ?self.planner.ordering(),
            seqs = session.len(),
            "initialized epoch order"
        );
        self.session = Some(session);
        Ok(true)
    }

    /// Load ordered window `[start, end)` in every source and verify that each
    /// source reports the expected tag at every position.
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
        if end > session.len() {
            return Err(DatasetError::Underflow {
                start,
                end,
                available: session.len(),
            });
        }
        session.clear_loaded();
        for (id, source) in self.sources.iter_mut() {
            source.load_window(start, end)?;
            if !source.has_at_least(end) {
                return Err(DatasetError::SourceInconsistent {
                    source_id: id.clone(),
                    details: format!("holds fewer than {end} of the ordered sequences"),
                });
            }
            for (index, expected) in session.ordered_tags()[start..end]
                .iter()
                .enumerate()
                .map(|(offset, tag)| (start + offset, tag))
            {
                let found = source.tag_at(index)?;
                if &found != expected {
                    return Err(DatasetError::Alignment {
                        source_id: id.clone(),
                        index,
                        expected: expected.clone(),
                        found,
                    });
                }
            }
        }
        session.mark_loaded(start..end);
        debug!(dataset = %self.id, start, end, "loaded window");
        Ok(())
    }

    /// Assemble the sequence at `index`, which must lie in the loaded window.
    pub fn assemble(&self, index: OrderedIndex) -> Result<AssembledRecord, DatasetError> {
        let session = self.session()?;
        session.ensure_loaded(index)?;
        let tag = self.get_tag(index)?.clone();
        SequenceAssembler::new(self.layout.target_list())
            .assemble(index, tag, |field| self.fetch(index, field))
    }

    fn fetch(&self, index: OrderedIndex, field: &str) -> Result<FieldValue, DatasetError> {
        let binding = self.layout.resolve(field)?;
        let source = self.sources.get(&binding.source_id).ok_or_else(|| {
            DatasetError::Configuration(format!("source '{}' is not configured", binding.source_id))
        })?;
        source.field_at(index, &binding.source_field)
    }

    /// Primary field first, then targets.
    fn logical_fields(&self) -> impl Iterator<Item = &str> {
        std::iter::once(PRIMARY_FIELD).chain(self.layout.target_list().iter().map(String::as_str))
    }

    fn session(&self) -> Result<&EpochSession, DatasetError> {
        self.session
            .as_ref()
            .ok_or(DatasetError::EpochNotInitialized)
    }

    /// Canonical tag at ordered `index`.
    pub fn get_tag(&self, index: OrderedIndex) -> Result<&SequenceTag, DatasetError> {
        let session = self.session()?;
        session.tag_at(index).ok_or_else(|| DatasetError::Underflow {
            start: index,
            end: index.saturating_add(1),
            available: session.len(),
        })
    }

    /// Number of sequences in the current epoch.
    pub fn num_seqs(&self) -> Result<usize, DatasetError> {
        Ok(self.session()?.len())
    }

    /// Per-field lengths of the sequence at `index`.
    ///
    /// Answered from the length table when one is attached; otherwise every
    /// mapped field is read from its source, which needs `index` to be loaded.
    pub fn seq_length(&self, index: OrderedIndex) -> Result<LengthVector, DatasetError> {
        if let Some(lengths) = &self.lengths {
            let tag = self.get_tag(index)?;
            return lengths.get(tag).cloned().ok_or_else(|| {
                DatasetError::Configuration(format!(
                    "length table has no entry for sequence '{tag}'"
                ))
            });
        }
        self.session()?.ensure_loaded(index)?;
        let mut lengths = LengthVector::new();
        for field in self.logical_fields() {
            lengths.set(field, self.fetch(index, field)?.frames());
        }
        Ok(lengths)
    }

    /// Summed lengths over the canonical list, when a length table is attached.
    pub fn num_timesteps(&self) -> Option<&LengthVector> {
        self.num_timesteps.as_ref()
    }

    /// Logical target fields, sorted, without the primary field.
    pub fn target_list(&self) -> &[FieldName] {
        self.layout.target_list()
    }

    /// Per-frame width of `field`: 1 when compact categorical.
    pub fn data_dim(&self, field: &str) -> Result<usize, DatasetError> {
        self.layout.dimension(field)
    }

    /// Resolved dtype of `field`.
    pub fn data_dtype(&self, field: &str) -> Result<Dtype, DatasetError> {
        self.layout.dtype(field)
    }

    /// Declared dimension of the primary field. For a compact categorical
    /// primary field this is the class count, not the width of one frame.
    pub fn num_inputs(&self) -> Result<usize, DatasetError> {
        self.layout.declared_dimension(PRIMARY_FIELD)
    }

    /// `field -> (declared dimension, rank)` for the primary field and every
    /// target. Rank is 1 for compact categorical fields and 2 for dense ones,
    /// so a rank-1 entry carries the class count a caller expands ids into.
    pub fn num_outputs(&self) -> Result<BTreeMap<FieldName, (usize, usize)>, DatasetError> {
        self.logical_fields()
            .map(|field| {
                let encoding = self.layout.encoding_of(field)?;
                let rank = match encoding.encoding {
                    Encoding::CompactCategorical => 1,
                    Encoding::Dense => 2,
                };
                Ok((field.to_string(), (encoding.declared_dimension, rank)))
            })
            .collect()
    }

    /// Resolved field layout.
    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    /// Current epoch, if one was initialized.
    pub fn epoch(&self) -> Option<Epoch> {
        self.session.as_ref().map(EpochSession::epoch)
    }

    /// Master tag list.
    pub fn canonical_tags(&self) -> &CanonicalTags {
        &self.tags
    }
}

/// A meta dataset can itself be a source, addressed by logical field names.
impl SequenceSource for MetaDataset {
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

    fn load_window(&mut self, start: usize, end: usize) -> Result<(), DatasetError> {
        let end = end.min(self.num_seqs()?);
        MetaDataset::load_window(self, start.min(end), end)
    }

    fn tag_at(&self, idx: usize) -> Result<SequenceTag, DatasetError> {
        self.get_tag(idx).cloned()
    }

    fn field_at(&self, idx: usize, field: &str) -> Result<FieldValue, DatasetError> {
        self.session()?.ensure_loaded(idx)?;
        self.fetch(idx, field)
    }

    fn size(&self) -> SeqCount {
        SeqCount::Exact(self.session.as_ref().map_or(self.tags.len(), EpochSession::len))
    }

    fn has_at_least(&self, count: usize) -> bool {
        count <= self.size().known()
    }

    fn target_field_names(&self) -> Vec<FieldName> {
        self.layout.target_list().to_vec()
    }

    fn seq_length(&self, idx: usize) -> Result<LengthVector, DatasetError> {
        MetaDataset::seq_length(self, idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{EncodingOverrides, FieldBinding};
    use crate::data::SequenceRecord;
    use crate::source::InMemorySource;
    use std::collections::HashMap;

    fn audio(tags: &[&str]) -> Box<dyn SequenceSource> {
        let records = tags
            .iter()
            .enumerate()
            .map(|(idx, tag)| {
                SequenceRecord::new(*tag).with_field(
                    "features",
                    FieldValue::Dense {
                        dim: 2,
                        values: vec![0.0; 2 * (idx + 1)],
                    },
                )
            })
            .collect();
        Box::new(InMemorySource::new("audio", records))
    }

    fn align(tags: &[&str]) -> Box<dyn SequenceSource> {
        let records = tags
            .iter()
            .map(|tag| {
                SequenceRecord::new(*tag)
                    .with_field("classes", FieldValue::ClassIds(vec![7, 7, 7]))
            })
            .collect();
        Box::new(InMemorySource::new("align", records))
    }

    fn layout() -> FieldLayout {
        let bindings = BTreeMap::from([
            ("data".to_string(), FieldBinding::new("audio", "features")),
            ("classes".to_string(), FieldBinding::new("align", "classes")),
        ]);
        let dims = BTreeMap::from([("data".to_string(), 2), ("classes".to_string(), 50)]);
        FieldLayout::new(bindings, &dims, &EncodingOverrides::default()).unwrap()
    }

    fn dataset(audio_tags: &[&str], align_tags: &[&str]) -> MetaDataset {
        let tags = CanonicalTags::new(["a", "b", "c"]).unwrap();
        let sources = IndexMap::from([
            ("audio".to_string(), audio(audio_tags)),
            ("align".to_string(), align(align_tags)),
        ]);
        MetaDataset::new(tags, layout(), sources).unwrap()
    }

    #[test]
    fn assembles_fields_from_every_source() {
        let mut dataset = dataset(&["a", "b", "c"], &["c", "b", "a"]);
        assert!(dataset.init_epoch(1, None).unwrap());
        dataset.load_window(0, 3).unwrap();
        let record = dataset.assemble(1).unwrap();
        assert_eq!(record.tag, "b");
        assert_eq!(record.features.frames(), 2);
        assert_eq!(record.targets["classes"], FieldValue::ClassIds(vec![7, 7, 7]));
        assert_eq!(dataset.num_seqs().unwrap(), 3);
        assert_eq!(dataset.seq_length(2).unwrap().primary(), 3);
        assert_eq!(dataset.seq_length(2).unwrap().get("classes"), 3);
    }

    #[test]
    fn call_order_is_enforced() {
        let mut dataset = dataset(&["a", "b", "c"], &["a", "b", "c"]);
        assert!(matches!(
            dataset.load_window(0, 1),
            Err(DatasetError::EpochNotInitialized)
        ));
        dataset.init_epoch(1, None).unwrap();
        assert!(matches!(dataset.assemble(0), Err(DatasetError::NotLoaded { .. })));
        dataset.load_window(0, 2).unwrap();
        assert!(matches!(
            dataset.assemble(2),
            Err(DatasetError::NotLoaded { index: 2, start: 0, end: 2 })
        ));
        assert!(dataset.load_window(1, 4).unwrap_err().is_underflow());
    }

    #[test]
    fn source_without_a_canonical_tag_fails_ordering() {
        let mut dataset = dataset(&["a", "b", "c"], &["a", "b"]);
        let err = dataset.init_epoch(1, None).unwrap_err();
        assert!(matches!(err, DatasetError::UnknownTag(tag) if tag == "c"));
        assert_eq!(dataset.epoch(), None);
    }

    fn dataset_with_sorted_lengths() -> MetaDataset {
        let lengths = LengthTable::new(HashMap::from([
            ("a".to_string(), LengthVector::single("data", 5)),
            ("b".to_string(), LengthVector::single("data", 3)),
            ("c".to_string(), LengthVector::single("data", 4)),
        ]));
        dataset(&["a", "b", "c"], &["a", "b", "c"])
            .with_ordering(SeqOrdering::Sorted)
            .with_lengths(lengths)
            .unwrap()
    }

    #[test]
    fn length_table_answers_lengths_and_timesteps() {
        let mut dataset = dataset_with_sorted_lengths();
        assert_eq!(dataset.num_timesteps().unwrap().primary(), 12);
        dataset.init_epoch(1, None).unwrap();
        assert_eq!(dataset.get_tag(0).unwrap(), "b");
        assert_eq!(dataset.seq_length(2).unwrap().primary(), 5);
    }

    #[test]
    fn unreferenced_sources_are_dropped_and_missing_ones_rejected() {
        let tags = CanonicalTags::new(["a"]).unwrap();
        let sources = IndexMap::from([
            ("audio".to_string(), audio(&["a"])),
            ("align".to_string(), align(&["a"])),
            ("extra".to_string(), align(&["a"])),
        ]);
        let dataset = MetaDataset::new(tags.clone(), layout(), sources).unwrap();
        assert_eq!(dataset.sources.len(), 2);

        let sources = IndexMap::from([("audio".to_string(), audio(&["a"]))]);
        assert!(matches!(
            MetaDataset::new(tags, layout(), sources),
            Err(DatasetError::Configuration(_))
        ));
    }

    #[test]
    fn reports_dimensions_and_outputs() {
        let dataset = dataset(&["a", "b", "c"], &["a", "b", "c"]);
        assert_eq!(dataset.num_inputs().unwrap(), 2);
        assert_eq!(dataset.data_dim("classes").unwrap(), 1);
        assert_eq!(dataset.data_dtype("classes").unwrap(), Dtype::Int32);
        let outputs = dataset.num_outputs().unwrap();
        assert_eq!(outputs["data"], (2, 2));
        assert_eq!(outputs["classes"], (50, 1));
        assert_eq!(dataset.target_list(), ["classes"]);
    }

    #[test]
    fn compact_primary_reports_its_class_count() {
        let bindings = BTreeMap::from([
            ("data".to_string(), FieldBinding::new("audio", "features")),
            ("classes".to_string(), FieldBinding::new("align", "classes")),
        ]);
        let dims = BTreeMap::from([("data".to_string(), 40), ("classes".to_string(), 50)]);
        let overrides = EncodingOverrides::default().with_compact("data", true);
        let layout = FieldLayout::new(bindings, &dims, &overrides).unwrap();
        let sources = IndexMap::from([
            ("audio".to_string(), audio(&["a"])),
            ("align".to_string(), align(&["a"])),
        ]);
        let dataset =
            MetaDataset::new(CanonicalTags::new(["a"]).unwrap(), layout, sources).unwrap();
        assert_eq!(dataset.num_inputs().unwrap(), 40);
        assert_eq!(dataset.data_dim("data").unwrap(), 1);
        assert_eq!(dataset.num_outputs().unwrap()["data"], (40, 1));
    }

    #[test]
    fn tag_lookup_past_the_end_is_underflow() {
        let mut dataset = dataset(&["a", "b", "c"], &["a", "b", "c"]);
        dataset.init_epoch(1, None).unwrap();
        for index in [3, usize::MAX] {
            assert!(matches!(
                dataset.get_tag(index),
                Err(DatasetError::Underflow { start, available: 3, .. }) if start == index
            ));
        }
    }
}
