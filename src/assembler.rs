use std::collections::BTreeMap;

use crate::constants::fields::PRIMARY_FIELD;
use crate::data::{AssembledRecord, FieldValue};
use crate::errors::DatasetError;
use crate::types::{FieldName, OrderedIndex, SequenceTag};

/// Builds one logical record from the primary field and a fixed target list.
///
/// Field lookup is delegated to `fetch`, which receives logical field names.
/// Each field is fetched exactly once per call.
#[derive(Clone, Copy, Debug)]
pub struct SequenceAssembler<'a> {
    targets: &'a [FieldName],
}

impl<'a> SequenceAssembler<'a> {
    /// Assembler for the given target fields, in order.
    pub fn new(targets: &'a [FieldName]) -> Self {
        Self { targets }
    }

    /// Fetch the primary field and every distinct target once.
    pub fn assemble<F>(
        &self,
        index: OrderedIndex,
        tag: SequenceTag,
        mut fetch: F,
    ) -> Result<AssembledRecord, DatasetError>
    where
        F: FnMut(&str) -> Result<FieldValue, DatasetError>,
    {
        let features = fetch(PRIMARY_FIELD)?;
        let mut targets = BTreeMap::new();
        for target in self.targets {
            if target == PRIMARY_FIELD || targets.contains_key(target) {
                continue;
            }
            targets.insert(target.clone(), fetch(target)?);
        }
        Ok(AssembledRecord {
            index,
            tag,
            features,
            targets,
        })
    }
}
