use std::io;

use thiserror::Error;

use crate::types::{OrderedIndex, SequenceTag, SourceId};

/// Error type for dataset configuration, ordering, loading, and alignment failures.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Invalid configuration or call arguments.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A tag outside the canonical list.
    #[error("sequence tag '{0}' is not in the canonical tag list")]
    UnknownTag(SequenceTag),
    /// A source disagrees with the epoch order after loading.
    #[error(
        "source '{source_id}' reports tag '{found}' at index {index}, expected '{expected}'"
    )]
    Alignment {
        /// Offending source.
        source_id: SourceId,
        /// Ordered index of the mismatch.
        index: OrderedIndex,
        /// Tag the epoch order puts there.
        expected: SequenceTag,
        /// Tag the source reports.
        found: SequenceTag,
    },
    /// An ordering the dataset cannot honour.
    #[error("unsupported sequence ordering: {0}")]
    UnsupportedOrdering(String),
    /// The window runs past the end of the data.
    #[error("window [{start}, {end}) extends past the available {available} sequences")]
    Underflow {
        /// Requested window start.
        start: OrderedIndex,
        /// Requested window end.
        end: OrderedIndex,
        /// Sequences that do exist.
        available: usize,
    },
    /// Access before `init_epoch`.
    #[error("no epoch has been initialized; call init_epoch first")]
    EpochNotInitialized,
    /// Access outside the loaded window.
    #[error("sequence {index} is outside the loaded window [{start}, {end})")]
    NotLoaded {
        /// Requested ordered index.
        index: OrderedIndex,
        /// Loaded window start.
        start: OrderedIndex,
        /// Loaded window end.
        end: OrderedIndex,
    },
    /// A source could not be reached or built.
    #[error("data source '{source_id}' is unavailable: {reason}")]
    SourceUnavailable {
        /// Offending source.
        source_id: SourceId,
        /// What went wrong.
        reason: String,
    },
    /// A source contradicted what it reported earlier.
    #[error("data source '{source_id}' returned inconsistent state: {details}")]
    SourceInconsistent {
        /// Offending source.
        source_id: SourceId,
        /// What was contradicted.
        details: String,
    },
    /// Reading a tag, length or config file failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A JSON config or length file is malformed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DatasetError {
    /// True for the recoverable end-of-data signal.
    pub fn is_underflow(&self) -> bool {
        matches!(self, DatasetError::Underflow { .. })
    }
}
