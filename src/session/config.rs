use crate::encode::cfr::CfrPolicy;
use crate::encode::plan::DeinterlacePolicy;
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::reader::{BackendChoice, ReaderOptions};
use crate::quality::validator::ValidatorOptions;
use crate::store::frame_store::CacheCapacity;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Pipeline settings shared by every job of a run.
///
/// Jobs override `audio_passthrough`, `cfr_policy` and `deinterlace` when they set them.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Copy source audio bit-exactly.
    pub audio_passthrough: bool,
    /// Constant frame rate handling.
    pub cfr_policy: CfrPolicy,
    /// Field handling.
    pub deinterlace: DeinterlacePolicy,
    /// Decoded frame cache bound.
    pub frame_cache: CacheCapacity,
    /// Compositing worker threads; `None` uses rayon defaults.
    pub threads: Option<usize>,
    /// Ask ffmpeg for hardware-accelerated decoding.
    pub gpu_acceleration: bool,
    /// Decode backend.
    pub backend: BackendChoice,
    /// Bounded channel capacity between stages.
    pub channel_capacity: usize,
    /// Frames composited per parallel chunk.
    pub chunk_size: usize,
    /// Validate the output and write its report after every job.
    pub validate_output: bool,
    /// Validator thresholds.
    pub validator: ValidatorOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio_passthrough: true,
            cfr_policy: CfrPolicy::KeepVfr,
            deinterlace: DeinterlacePolicy::Keep,
            frame_cache: CacheCapacity::default(),
            threads: None,
            gpu_acceleration: false,
            backend: BackendChoice::Auto,
            channel_capacity: 4,
            chunk_size: 16,
            validate_output: true,
            validator: ValidatorOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a config from a JSON reader; missing fields take their defaults.
    pub fn from_reader<R: std::io::Read>(r: R) -> MaskfxResult<Self> {
        let cfg: Self = serde_json::from_reader(r)
            .map_err(|e| MaskfxError::validation(format!("parse pipeline config JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a config from a JSON file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> MaskfxResult<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| {
            MaskfxError::validation(format!("open pipeline config '{}': {e}", path.display()))
        })?;
        Self::from_reader(BufReader::new(f))
    }

    /// Reject settings no pipeline can run with.
    pub fn validate(&self) -> MaskfxResult<()> {
        if self.threads == Some(0) {
            return Err(MaskfxError::validation("'threads' must be >= 1 when set"));
        }
        match self.frame_cache {
            CacheCapacity::Slots(0) | CacheCapacity::Bytes(0) => {
                return Err(MaskfxError::validation("'frame_cache' must be non-zero"));
            }
            _ => {}
        }
        let t = self.validator.delta_e_mean_threshold;
        if !t.is_finite() || t < 0.0 {
            return Err(MaskfxError::validation(
                "'validator.delta_e_mean_threshold' must be a non-negative number",
            ));
        }
        if self.validator.pts_threshold_us < 0 {
            return Err(MaskfxError::validation(
                "'validator.pts_threshold_us' must be non-negative",
            ));
        }
        Ok(())
    }

    /// Reader options for sources.
    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            backend: self.backend,
            gpu_acceleration: self.gpu_acceleration,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/config.rs"]
mod tests;
