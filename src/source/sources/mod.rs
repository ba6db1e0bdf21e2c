/// Lazily pulled, unknown-length record stream source.
pub mod stream;
