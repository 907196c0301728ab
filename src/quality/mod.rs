//! Quality validation: proves an output kept what the job promised to keep.
//!
//! [`validator::validate`] compares a finished output with its source (audio samples, untouched
//! pixels, timestamps, field order and stream tags) and returns a [`report::QualityReport`]. Broken
//! guarantees are findings in the report, not errors.

/// Audio PCM hashing.
pub mod audio_hash;
/// CIEDE2000 color difference.
pub mod delta_e;
/// Validation report types.
pub mod report;
/// Source/output comparison.
pub mod validator;

pub use audio_hash::{AudioDigest, hash_audio};
pub use delta_e::{DeltaEStats, VISIBLE_DELTA_E, ciede2000, frame_delta_e, rgb_to_lab};
pub use report::{
    AudioCheck, AudioVerdict, FieldOrderCheck, FieldOrderVerdict, FrameCount, FrameDiff,
    QualityReport, Violation,
};
pub use validator::{ValidatorOptions, validate, validate_plan};
