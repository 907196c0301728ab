//! Job orchestration: configuration, render jobs, cancellation and the staged pipeline.
//!
//! [`pipeline::run_job`] decodes, composites and encodes one [`job::RenderJob`] on bounded
//! channels, then validates the output against its source.

/// Cooperative cancellation.
pub mod cancel;
/// Pipeline configuration.
pub mod config;
/// Render job description.
pub mod job;
/// Staged decode/composite/encode pipeline.
pub mod pipeline;

pub use cancel::CancelToken;
pub use config::PipelineConfig;
pub use job::{MaskSourceSpec, RenderJob};
pub use pipeline::{
    JobOutcome, frame_to_image, render_preview, run_job, run_job_with, validate_job,
};
