/// Authoritative sequence identifier from the master tag list.
/// Example: `corpus/speaker_12/utt_0042`
pub type SequenceTag = String;
/// Identifier for a configured source.
/// Examples: `audio`, `alignment`, `part_2`
pub type SourceId = String;
/// Logical or source-local field name.
/// Examples: `data`, `classes`, `orth`
pub type FieldName = String;
/// Position in the master tag list.
pub type CanonicalIndex = usize;
/// Position within one epoch's ordering.
pub type OrderedIndex = usize;
/// Epoch number. Re-planning the same epoch is a no-op.
pub type Epoch = u64;
/// Registered source class name.
/// Examples: `memory`, `meta`, `concat`
pub type SourceClass = String;
