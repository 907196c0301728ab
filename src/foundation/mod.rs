//! Shared primitives: frame indices and ranges, rationals, errors, blend math, timecode.

/// Frame indexing, ranges and rational time.
pub mod core;
/// Error taxonomy.
pub mod error;
pub(crate) mod math;
/// SMPTE timecode arithmetic.
pub mod timecode;
