//! Output side: route planning, frame-rate mapping, sinks and muxing.
//!
//! [`plan::EncodePlan`] decides how video and audio reach the output (stream copy, GOP splice,
//! full re-encode or native Y4M rewrite) before anything is written; [`muxer::Muxer`] carries the
//! plan out through a [`sink::FrameSink`].

/// Frame-rate policies and source-to-output frame mapping.
pub mod cfr;
/// ffmpeg encode sink.
pub mod ffmpeg;
/// Plan execution and atomic output files.
pub mod muxer;
/// Output route planning.
pub mod plan;
/// Frame sink trait and configuration.
pub mod sink;
/// Native YUV4MPEG2 writer.
pub mod y4m;

pub use cfr::{CfrPolicy, FrameMapping, MappedFrame};
pub use ffmpeg::{AudioInput, FfmpegSink, FfmpegSinkOpts};
pub use muxer::{Muxer, PartialOutput, WriteSummary};
pub use plan::{
    AudioRoute, ColorTransform, Container, DeinterlacePolicy, EncodePlan, EncodeRequest,
    OutputSpec, Route, Segment, ToneMapCurve, VideoCodec,
};
pub use sink::{FrameSink, InMemorySink, SinkConfig};
pub use y4m::{Y4mSink, Y4mWriteStats};

use crate::foundation::error::{MaskfxError, MaskfxResult};
use std::path::Path;

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> MaskfxResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            MaskfxError::encode(format!(
                "failed to create output directory '{}': {e}",
                parent.display()
            ))
        })?;
    }
    Ok(())
}
