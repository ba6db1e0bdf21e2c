/// Constants used by field layout and encoding defaults.
pub mod fields {
    use crate::fields::Dtype;

    /// Logical name of the primary (model input) field.
    pub const PRIMARY_FIELD: &str = "data";
    /// Dtype assumed for compact categorical fields.
    pub const DEFAULT_CATEGORICAL_DTYPE: Dtype = Dtype::Int32;
    /// Dtype assumed for dense fields.
    pub const DEFAULT_DENSE_DTYPE: Dtype = Dtype::Float32;
}

/// Constants used by epoch ordering.
pub mod epoch {
    /// Offset mixed into epoch RNG seed derivation for deterministic variation.
    pub const EPOCH_SEED_OFFSET: u64 = 0xB4C3_5EED;
    /// Only supported sequence window size.
    pub const SUPPORTED_WINDOW: usize = 1;
}

/// Constants used by the source registry.
pub mod registry {
    /// Class name of the in-memory source.
    pub const CLASS_MEMORY: &str = "memory";
    /// Class name of the multi-source dataset.
    pub const CLASS_META: &str = "meta";
    /// Class name of the concatenated dataset.
    pub const CLASS_CONCAT: &str = "concat";
}
