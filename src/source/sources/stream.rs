use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use crate::data::{FieldValue, SequenceRecord};
use crate::errors::DatasetError;
use crate::lengths::LengthVector;
use crate::source::{SeqCount, SequenceSource};
use crate::types::{Epoch, FieldName, SequenceTag, SourceId};

/// Builds the record stream for one epoch.
pub type RecordStreamFactory = Arc<
    dyn Fn(Epoch) -> Box<dyn Iterator<Item = SequenceRecord> + Send> + Send + Sync + 'static,
>;

/// Source that pulls records lazily from a per-epoch stream.
///
/// Its size is unknown until the stream is exhausted. Records before the
/// start of the most recent window are released, so only the window and what
/// was read ahead of it stay buffered.
pub struct StreamSource {
    id: SourceId,
    factory: RecordStreamFactory,
    stream: Option<Box<dyn Iterator<Item = SequenceRecord> + Send>>,
    buffer: VecDeque<SequenceRecord>,
    /// Local index of `buffer[0]`.
    base: usize,
    exhausted: bool,
    targets: Vec<FieldName>,
}

impl StreamSource {
    /// Source pulling records from a fresh `factory` stream each epoch.
    pub fn new(id: impl Into<SourceId>, factory: RecordStreamFactory) -> Self {
        Self {
            id: id.into(),
            factory,
            stream: None,
            buffer: VecDeque::new(),
            base: 0,
            exhausted: false,
            targets: Vec::new(),
        }
    }

    /// Stream the same records every epoch.
    pub fn from_records(id: impl Into<SourceId>, records: Vec<SequenceRecord>) -> Self {
        let records = Arc::new(records);
        Self::new(
            id,
            Arc::new(
                move |_epoch: Epoch| -> Box<dyn Iterator<Item = SequenceRecord> + Send> {
                    let records = Arc::clone(&records);
                    Box::new((0..records.len()).map(move |idx| records[idx].clone()))
                },
            ),
        )
    }

    /// Declare target field names up front.
    pub fn with_targets(mut self, targets: impl IntoIterator<Item = impl Into<FieldName>>) -> Self {
        let mut targets: Vec<FieldName> = targets.into_iter().map(Into::into).collect();
        targets.sort();
        targets.dedup();
        self.targets = targets;
        self
    }

    /// Number of records pulled so far in this epoch.
    fn pulled(&self) -> usize {
        self.base + self.buffer.len()
    }

    fn record(&self, idx: usize) -> Result<&SequenceRecord, DatasetError> {
        if idx < self.base {
            return Err(DatasetError::SourceInconsistent {
                source_id: self.id.clone(),
                details: format!("sequence {idx} was released before window start {}", self.base),
            });
        }
        self.buffer
            .get(idx - self.base)
            .ok_or_else(|| DatasetError::SourceInconsistent {
                source_id: self.id.clone(),
                details: format!("sequence {idx} has not been loaded ({} pulled)", self.pulled()),
            })
    }
}

impl SequenceSource for StreamSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn init_order(
        &mut self,
        epoch: Epoch,
        seq_list: Option<&[SequenceTag]>,
    ) -> Result<(), DatasetError> {
        if seq_list.is_some() {
            return Err(DatasetError::UnsupportedOrdering(format!(
                "stream source '{}' cannot follow an explicit tag list",
                self.id
            )));
        }
        self.stream = Some((self.factory)(epoch));
        self.buffer.clear();
        self.base = 0;
        self.exhausted = false;
        Ok(())
    }

    fn load_window(&mut self, start: usize, end: usize) -> Result<(), DatasetError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(DatasetError::EpochNotInitialized);
        };
        while self.base + self.buffer.len() < end && !self.exhausted {
            match stream.next() {
                Some(record) => self.buffer.push_back(record),
                None => {
                    self.exhausted = true;
                    debug!(
                        source = %self.id,
                        seqs = self.base + self.buffer.len(),
                        "stream source exhausted"
                    );
                }
            }
        }
        let release = start.min(self.pulled()).saturating_sub(self.base);
        self.buffer.drain(..release);
        self.base += release;
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
        if self.exhausted {
            SeqCount::Exact(self.pulled())
        } else {
            SeqCount::AtLeast(self.pulled())
        }
    }

    fn has_at_least(&self, count: usize) -> bool {
        self.pulled() >= count
    }

    fn target_field_names(&self) -> Vec<FieldName> {
        self.targets.clone()
    }

    fn seq_length(&self, idx: usize) -> Result<LengthVector, DatasetError> {
        Ok(self.record(idx)?.lengths())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<SequenceRecord> {
        (0..n)
            .map(|idx| {
                SequenceRecord::new(format!("s{idx}"))
                    .with_field("data", FieldValue::ClassIds(vec![idx as u32]))
            })
            .collect()
    }

    #[test]
    fn stream_source_discovers_its_size_lazily() {
        let mut source = StreamSource::from_records("stream", records(4));
        source.init_order(0, None).unwrap();
        source.load_window(0, 2).unwrap();
        assert_eq!(source.size(), SeqCount::AtLeast(2));
        assert!(source.has_at_least(2));
        assert_eq!(source.tag_at(1).unwrap(), "s1");

        source.load_window(2, 6).unwrap();
        assert!(!source.has_at_least(6));
        assert_eq!(source.size(), SeqCount::Exact(4));
        assert_eq!(source.tag_at(3).unwrap(), "s3");
    }

    #[test]
    fn stream_source_releases_records_before_window() {
        let mut source = StreamSource::from_records("stream", records(5));
        source.init_order(0, None).unwrap();
        source.load_window(0, 3).unwrap();
        source.load_window(2, 4).unwrap();
        assert!(source.tag_at(1).is_err());
        assert_eq!(source.tag_at(2).unwrap(), "s2");
        assert_eq!(source.seq_length(3).unwrap().primary(), 1);
    }

    #[test]
    fn stream_source_restarts_per_epoch_and_rejects_explicit_lists() {
        let mut source = StreamSource::from_records("stream", records(3));
        assert!(matches!(
            source.load_window(0, 1),
            Err(DatasetError::EpochNotInitialized)
        ));
        source.init_order(1, None).unwrap();
        source.load_window(0, 3).unwrap();
        source.init_order(2, None).unwrap();
        assert_eq!(source.size(), SeqCount::AtLeast(0));

        let list = vec!["s0".to_string()];
        assert!(matches!(
            source.init_order(3, Some(&list)),
            Err(DatasetError::UnsupportedOrdering(_))
        ));
    }
}
