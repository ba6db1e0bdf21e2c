use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;

use crate::constants::epoch::EPOCH_SEED_OFFSET;
use crate::errors::DatasetError;
use crate::lengths::LengthTable;
use crate::tags::CanonicalTags;
use crate::types::{CanonicalIndex, Epoch, OrderedIndex, SequenceTag};

/// Ordering policy applied when no explicit tag list is given.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeqOrdering {
    /// Canonical order.
    #[default]
    Default,
    /// Canonical order reversed.
    Reverse,
    /// Shuffle seeded by the epoch number.
    Random,
    /// Ascending by primary-field length.
    Sorted,
    /// Descending by primary-field length.
    SortedReverse,
}

impl SeqOrdering {
    /// True for the length-sorted policies.
    pub fn is_sorted(&self) -> bool {
        matches!(self, SeqOrdering::Sorted | SeqOrdering::SortedReverse)
    }
}

#[derive(Debug, Clone)]
/// Small deterministic RNG so epoch shuffles reproduce across runs and platforms.
struct EpochRng {
    state: u64,
}

impl EpochRng {
    fn for_epoch(epoch: Epoch) -> Self {
        Self {
            state: epoch ^ EPOCH_SEED_OFFSET,
        }
    }

    fn next_u64_internal(&mut self) -> u64 {
        let mut z = self.state.wrapping_add(0x9E3779B97F4A7C15);
        self.state = z;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }
}

impl rand::RngCore for EpochRng {
    fn next_u32(&mut self) -> u32 {
        self.next_u64_internal() as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.next_u64_internal()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut offset = 0;
        while offset < dest.len() {
            let bytes = self.next_u64_internal().to_le_bytes();
            let copy_len = (dest.len() - offset).min(bytes.len());
            dest[offset..offset + copy_len].copy_from_slice(&bytes[..copy_len]);
            offset += copy_len;
        }
    }
}

/// Computes the per-epoch permutation of canonical indices.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrderPlanner {
    ordering: SeqOrdering,
}

impl OrderPlanner {
    /// Planner for `ordering`.
    pub fn new(ordering: SeqOrdering) -> Self {
        Self { ordering }
    }

    /// Policy used when no explicit list is given.
    pub fn ordering(&self) -> SeqOrdering {
        self.ordering
    }

    /// Plan the order for `epoch`.
    ///
    /// An explicit tag list wins over the configured policy; every tag in it must
    /// be canonical. Sorted policies need a length table.
    pub fn plan(
        &self,
        epoch: Epoch,
        tags: &CanonicalTags,
        explicit: Option<&[SequenceTag]>,
        lengths: Option<&LengthTable>,
    ) -> Result<Vec<CanonicalIndex>, DatasetError> {
        if let Some(list) = explicit {
            return tags.indices_of(list);
        }
        let mut order: Vec<CanonicalIndex> = (0..tags.len()).collect();
        match self.ordering {
            SeqOrdering::Default => {}
            SeqOrdering::Reverse => order.reverse(),
            SeqOrdering::Random => order.shuffle(&mut EpochRng::for_epoch(epoch)),
            SeqOrdering::Sorted | SeqOrdering::SortedReverse => {
                let lengths = lengths.ok_or_else(|| {
                    DatasetError::UnsupportedOrdering(
                        "length-sorted ordering requires a sequence length table".into(),
                    )
                })?;
                let keys = tags
                    .iter()
                    .map(|tag| {
                        lengths.get(tag).map(|entry| entry.primary()).ok_or_else(|| {
                            DatasetError::Configuration(format!(
                                "length table has no entry for sequence '{tag}'"
                            ))
                        })
                    })
                    .collect::<Result<Vec<usize>, _>>()?;
                if self.ordering == SeqOrdering::Sorted {
                    order.sort_by_key(|&idx| keys[idx]);
                } else {
                    order.sort_by_key(|&idx| std::cmp::Reverse(keys[idx]));
                }
            }
        }
        debug!(epoch, ordering = ?self.ordering, seqs = order.len(), "planned epoch order");
        Ok(order)
    }
}

/// Ordering state of one epoch, replaced wholesale when the epoch changes.
#[derive(Clone, Debug)]
pub struct EpochSession {
    epoch: Epoch,
    order: Vec<CanonicalIndex>,
    ordered_tags: Vec<SequenceTag>,
    loaded: Option<Range<OrderedIndex>>,
}

impl EpochSession {
    /// Session for `epoch` with nothing loaded.
    pub fn new(epoch: Epoch, order: Vec<CanonicalIndex>, tags: &CanonicalTags) -> Self {
        let ordered_tags = order
            .iter()
            .filter_map(|&idx| tags.tag_of(idx).cloned())
            .collect();
        Self {
            epoch,
            order,
            ordered_tags,
            loaded: None,
        }
    }

    /// Epoch this session was planned for.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Canonical index at each ordered position.
    pub fn order(&self) -> &[CanonicalIndex] {
        &self.order
    }

    /// Tags in epoch order.
    pub fn ordered_tags(&self) -> &[SequenceTag] {
        &self.ordered_tags
    }

    /// Number of sequences in the epoch.
    pub fn len(&self) -> usize {
        self.ordered_tags.len()
    }

    /// True when the epoch has no sequences.
    pub fn is_empty(&self) -> bool {
        self.ordered_tags.is_empty()
    }

    /// Tag at ordered position `idx`.
    pub fn tag_at(&self, idx: OrderedIndex) -> Option<&SequenceTag> {
        self.ordered_tags.get(idx)
    }

    /// Record `window` as the loaded range.
    pub fn mark_loaded(&mut self, window: Range<OrderedIndex>) {
        self.loaded = Some(window);
    }

    /// Forget the loaded range.
    pub fn clear_loaded(&mut self) {
        self.loaded = None;
    }

    /// Currently loaded range, if any.
    pub fn loaded(&self) -> Option<&Range<OrderedIndex>> {
        self.loaded.as_ref()
    }

    /// Fail unless `idx` lies in the most recently loaded window.
    pub fn ensure_loaded(&self, idx: OrderedIndex) -> Result<(), DatasetError> {
        ensure_in_window(self.loaded.as_ref(), idx)
    }
}

pub(crate) fn ensure_in_window(
    loaded: Option<&Range<OrderedIndex>>,
    idx: OrderedIndex,
) -> Result<(), DatasetError> {
    match loaded {
        Some(window) if window.contains(&idx) => Ok(()),
        Some(window) => Err(DatasetError::NotLoaded {
            index: idx,
            start: window.start,
            end: window.end,
        }),
        None => Err(DatasetError::NotLoaded {
            index: idx,
            start: 0,
            end: 0,
        }),
    }
}
