#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Record assembly from primary and target fields.
pub mod assembler;
/// Concatenated datasets with lazily discovered boundaries.
pub mod concat;
/// Declarative dataset configuration loaded from JSON.
pub mod config;
/// Centralized constants used across fields, epochs, and the registry.
pub mod constants;
/// Field payloads, source records, and assembled records.
pub mod data;
/// Epoch ordering policies and per-epoch session state.
pub mod epoch;
/// Field mapping and the encoding/dtype cascade.
pub mod fields;
/// Per-field length vectors and the optional length table.
pub mod lengths;
/// Multi-source datasets sharing one canonical order.
pub mod meta;
/// Offset discovery and global-to-local index resolution.
pub mod offsets;
/// Sequence source trait, built-in sources, and the source registry.
pub mod source;
/// Canonical tag list.
pub mod tags;
/// Shared type aliases.
pub mod types;

mod errors;

pub use concat::ConcatDataset;
pub use config::{ConcatDatasetConfig, MetaDatasetConfig};
pub use data::{AssembledRecord, FieldValue, SequenceRecord};
pub use epoch::{OrderPlanner, SeqOrdering};
pub use errors::DatasetError;
pub use fields::{Dtype, Encoding, EncodingOverrides, FieldBinding, FieldLayout};
pub use lengths::{LengthTable, LengthVector};
pub use meta::MetaDataset;
pub use offsets::OffsetResolver;
pub use source::{
    InMemorySource, SeqCount, SequenceSource, SourceRegistry, SourceSpec, StreamSource,
};
pub use tags::CanonicalTags;
