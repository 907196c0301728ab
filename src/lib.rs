//! maskfx applies masked mosaic, blur and pixelate effects to video without degrading anything
//! the masks do not cover.
//!
//! The pipeline is job-oriented:
//!
//! - Describe a [`RenderJob`] (source, masks, effect assignments, output format)
//! - Run it with [`run_job`]: frames are decoded into a shared [`FrameStore`], masked frames are
//!   composited on a worker pool, and the [`Muxer`] stream-copies, splices or re-encodes
//! - Read the [`QualityReport`] saved next to the output: audio hash identity, ΔE00 of untouched
//!   frames, timestamp drift, field order and stream tags
//!
//! Sources are read through system `ffprobe`/`ffmpeg` (feature `media-ffmpeg`) or the native
//! YUV4MPEG2 backend.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Mask-driven effect compositing.
pub mod composite;
/// Output planning, sinks and muxing.
pub mod encode;
/// Core primitives and errors.
pub mod foundation;
/// Mask inputs.
pub mod masks;
/// Source probing, indexing and decoding.
pub mod media;
/// Output validation.
pub mod quality;
/// Jobs, configuration and the staged pipeline.
pub mod session;
/// Decoded frame cache.
pub mod store;

#[cfg(test)]
#[path = "../tests/unit/testutil.rs"]
pub(crate) mod testutil;

pub use crate::foundation::core::{FrameIndex, FrameRange, RangeSet, Rational};
pub use crate::foundation::error::{ErrorClass, MaskfxError, MaskfxResult, Stage};
pub use crate::foundation::timecode::Timecode;

pub use crate::composite::{
    AssignmentTarget, Effect, EffectAssignment, EffectParams, EffectRegistry, Mask, MaskSet,
    OverlapRule, ParamValue,
};
pub use crate::encode::{
    CfrPolicy, ColorTransform, DeinterlacePolicy, EncodePlan, EncodeRequest, Muxer, OutputSpec,
    Route,
};
pub use crate::masks::{
    BoxMaskSource, Detections, IdMergeTable, InMemoryMaskSource, MaskSource, PngMaskSource,
};
pub use crate::media::{Frame, Metadata, PixelData, ReaderOptions, SourceReader};
pub use crate::quality::{QualityReport, ValidatorOptions, Violation, validate};
pub use crate::session::{
    CancelToken, JobOutcome, MaskSourceSpec, PipelineConfig, RenderJob, render_preview, run_job,
    validate_job,
};
pub use crate::store::{CacheCapacity, FrameStore};
