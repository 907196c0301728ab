//! Mask inputs: per-frame mask images, detection documents and id-merge tables.

/// Detections JSON document.
pub mod detections;
/// Duplicate-id merge tables.
pub mod merge;
/// Mask sources feeding the compositor.
pub mod source;

pub use detections::{BoundingBox, Detection, DetectionClass, Detections, DetectionsMetadata};
pub use merge::IdMergeTable;
pub use source::{
    BoxMaskSource, DEFAULT_MASK_PATTERN, InMemoryMaskSource, MaskSource, ObjectRef,
    PngMaskSource,
};
