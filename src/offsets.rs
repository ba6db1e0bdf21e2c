//! Lazy offset discovery for concatenated sources.
//!
//! Sources are held in a fixed array by the owner; this type keeps the
//! parallel, tail-growing list of boundaries between them. Boundary `i` is
//! the global index of the first sequence of source `i`, i.e. the negated
//! offset that maps a global index into source `i`'s local index space.
//! Boundaries are discovered when a windowed load runs off the end of a source
//! and are never rewritten for the rest of the epoch.

use tracing::debug;

use crate::errors::DatasetError;
use crate::source::{SeqCount, SequenceSource};
use crate::types::OrderedIndex;

/// Known boundaries between concatenated sources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OffsetResolver {
    starts: Vec<usize>,
}

impl Default for OffsetResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl OffsetResolver {
    /// Resolver that only knows that source 0 starts at global index 0.
    pub fn new() -> Self {
        Self { starts: vec![0] }
    }

    /// Global start index of every source whose start is known.
    pub fn boundaries(&self) -> &[usize] {
        &self.starts
    }

    /// Cumulative offsets: `0, -start_1, -start_2, ...`.
    pub fn offsets(&self) -> Vec<i64> {
        self.starts.iter().map(|&start| -(start as i64)).collect()
    }

    /// Number of sources whose start is known.
    pub fn known_sources(&self) -> usize {
        self.starts.len()
    }

    /// Map a global index to `(source index, local index)`.
    ///
    /// Picks the last known source starting at or before `global`, so empty
    /// sources are skipped. Indices past the last known boundary resolve into
    /// the last known source.
    pub fn resolve(&self, global: OrderedIndex) -> (usize, usize) {
        let source_idx = self
            .starts
            .iter()
            .rposition(|&start| start <= global)
            .unwrap_or(0);
        (source_idx, global - self.starts[source_idx])
    }

    /// Load global window `[start, end)` across `sources`, discovering
    /// boundaries along the way.
    ///
    /// Returns `Underflow` when the window runs past the last source.
    pub fn load_window(
        &mut self,
        sources: &mut [Box<dyn SequenceSource>],
        start: OrderedIndex,
        end: OrderedIndex,
    ) -> Result<(), DatasetError> {
        if start >= end {
            return Ok(());
        }
        let source_count = sources.len();
        let mut sub_start = start;
        loop {
            let (source_idx, local_start) = self.resolve(sub_start);
            let base = self.starts[source_idx];
            let Some(source) = sources.get_mut(source_idx) else {
                return Err(DatasetError::Configuration(format!(
                    "offset table references source {source_idx} but only {source_count} are configured"
                )));
            };
            let local_end = end - base;
            let request_end = match source.size() {
                SeqCount::Exact(size) => local_end.min(size),
                SeqCount::AtLeast(_) => local_end,
            };
            source.load_window(local_start.min(request_end), request_end)?;
            if source.has_at_least(local_end) {
                return Ok(());
            }

            let size = source
                .size()
                .exact()
                .ok_or_else(|| DatasetError::SourceInconsistent {
                    source_id: source.id().to_string(),
                    details: format!(
                        "cannot reach local index {local_end} but reports no exact size"
                    ),
                })?;
            let next_start = base + size;
            if source_idx + 1 >= source_count {
                return Err(DatasetError::Underflow {
                    start,
                    end,
                    available: next_start,
                });
            }
            if source_idx + 1 == self.starts.len() {
                self.starts.push(next_start);
                debug!(
                    source = source.id(),
                    boundary = next_start,
                    offset = -(next_start as i64),
                    "discovered concat boundary"
                );
            } else if self.starts[source_idx + 1] != next_start {
                return Err(DatasetError::SourceInconsistent {
                    source_id: source.id().to_string(),
                    details: format!(
                        "size {size} contradicts the known boundary at {}",
                        self.starts[source_idx + 1]
                    ),
                });
            }
            sub_start = sub_start.max(next_start);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FieldValue, SequenceRecord};
    use crate::source::{InMemorySource, StreamSource};

    fn records(prefix: &str, n: usize) -> Vec<SequenceRecord> {
        (0..n)
            .map(|idx| {
                SequenceRecord::new(format!("{prefix}{idx}"))
                    .with_field("data", FieldValue::ClassIds(vec![0]))
            })
            .collect()
    }

    fn sources(sizes: &[usize]) -> Vec<Box<dyn SequenceSource>> {
        sizes
            .iter()
            .enumerate()
            .map(|(idx, &size)| {
                let mut source: Box<dyn SequenceSource> = Box::new(
                    InMemorySource::new(format!("s{idx}"), records(&format!("s{idx}_"), size))
                        .with_hidden_size(true),
                );
                source.init_order(0, None).unwrap();
                source
            })
            .collect()
    }

    #[test]
    fn resolve_starts_with_a_single_boundary() {
        let resolver = OffsetResolver::new();
        assert_eq!(resolver.offsets(), vec![0]);
        assert_eq!(resolver.resolve(0), (0, 0));
        assert_eq!(resolver.resolve(42), (0, 42));
    }

    #[test]
    fn load_window_discovers_boundaries_in_order() {
        let mut sources = sources(&[3, 10]);
        let mut resolver = OffsetResolver::new();
        resolver.load_window(&mut sources, 0, 5).unwrap();
        assert_eq!(resolver.offsets(), vec![0, -3]);
        for global in 0..3 {
            assert_eq!(resolver.resolve(global), (0, global));
        }
        assert_eq!(resolver.resolve(3), (1, 0));
        assert_eq!(resolver.resolve(4), (1, 1));

        // A later window inside known territory does not add entries.
        resolver.load_window(&mut sources, 4, 9).unwrap();
        assert_eq!(resolver.boundaries(), &[0, 3]);
    }

    #[test]
    fn empty_sources_are_skipped() {
        let mut sources = sources(&[2, 0, 2]);
        let mut resolver = OffsetResolver::new();
        resolver.load_window(&mut sources, 0, 4).unwrap();
        assert_eq!(resolver.boundaries(), &[0, 2, 2]);
        assert_eq!(resolver.resolve(2), (2, 0));
        assert_eq!(resolver.resolve(3), (2, 1));
    }

    #[test]
    fn running_past_all_sources_underflows() {
        let mut sources = sources(&[2, 1]);
        let mut resolver = OffsetResolver::new();
        let err = resolver.load_window(&mut sources, 1, 6).unwrap_err();
        assert!(err.is_underflow());
        match err {
            DatasetError::Underflow { available, .. } => assert_eq!(available, 3),
            other => panic!("expected underflow, got {other:?}"),
        }
        // Boundaries found on the way are kept.
        assert_eq!(resolver.boundaries(), &[0, 2]);
    }

    #[test]
    fn window_starting_beyond_first_source_crosses_lazily() {
        let mut sources = sources(&[3, 4]);
        let mut resolver = OffsetResolver::new();
        resolver.load_window(&mut sources, 4, 6).unwrap();
        assert_eq!(resolver.boundaries(), &[0, 3]);
        assert_eq!(resolver.resolve(5), (1, 2));
    }

    #[test]
    fn stream_sources_of_unknown_length_are_supported() {
        let mut first = StreamSource::from_records("a", records("a", 2));
        let mut second = StreamSource::from_records("b", records("b", 3));
        first.init_order(0, None).unwrap();
        second.init_order(0, None).unwrap();
        let mut sources: Vec<Box<dyn SequenceSource>> = vec![Box::new(first), Box::new(second)];
        let mut resolver = OffsetResolver::new();
        resolver.load_window(&mut sources, 0, 5).unwrap();
        assert_eq!(resolver.offsets(), vec![0, -2]);
        let (idx, local) = resolver.resolve(4);
        assert_eq!(sources[idx].tag_at(local).unwrap(), "b2");
    }
}
