use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::metadata::FieldOrder;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Outcome of the audio passthrough check.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum AudioVerdict {
    /// Source and output decode to identical samples.
    Match,
    /// Samples differ, or the output has no audio.
    Mismatch,
    /// Passthrough was not requested.
    NotRequested,
    /// The check could not be run.
    Skipped {
        /// Why.
        reason: String,
    },
}

/// Audio section of a report.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AudioCheck {
    /// Verdict.
    #[serde(flatten)]
    pub verdict: AudioVerdict,
    /// Source PCM digest.
    pub source_sha256: Option<String>,
    /// Output PCM digest.
    pub output_sha256: Option<String>,
}

impl AudioCheck {
    pub(crate) fn without_hashes(verdict: AudioVerdict) -> Self {
        Self {
            verdict,
            source_sha256: None,
            output_sha256: None,
        }
    }
}

/// Comparison of one output frame with the source frame it shows.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FrameDiff {
    /// Output frame index.
    pub index: u64,
    /// Source frame index.
    pub source_index: u64,
    /// Mean ΔE00.
    pub delta_e00_mean: f64,
    /// Max ΔE00.
    pub delta_e00_max: f64,
    /// Output pts minus expected pts, in microseconds.
    pub pts_delta_us: i64,
    /// Pixels are bit-identical.
    pub bit_exact: bool,
    /// The source frame was composited; only its timing is checked.
    #[serde(default)]
    pub touched: bool,
}

/// Outcome of the field order check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrderVerdict {
    /// Output matches the expected order.
    Match,
    /// Output differs from the expected order.
    Mismatch,
    /// A field transform was requested; the output is checked against its target order.
    Transformed,
    /// One side does not declare a field order.
    Unknown,
}

/// Field order section of a report.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FieldOrderCheck {
    /// Verdict.
    pub verdict: FieldOrderVerdict,
    /// Source field order.
    pub source: Option<FieldOrder>,
    /// Output field order.
    pub output: Option<FieldOrder>,
}

/// Expected and actual output frame counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameCount {
    /// Frames the plan produces.
    pub expected: u64,
    /// Frames found in the output.
    pub actual: u64,
}

/// One broken preservation guarantee.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Output audio differs from source audio.
    AudioHashMismatch {
        /// Source digest.
        source: Option<String>,
        /// Output digest.
        output: Option<String>,
    },
    /// An untouched frame drifted in color.
    ColorDrift {
        /// Output frame index.
        index: u64,
        /// Mean ΔE00.
        mean: f64,
        /// Max ΔE00.
        max: f64,
        /// Pixels above the visibility threshold.
        #[serde(default)]
        visible_pixels: u64,
    },
    /// An output frame's timestamp is off.
    PtsDrift {
        /// Output frame index.
        index: u64,
        /// Drift in microseconds.
        delta_us: i64,
    },
    /// Field order was not preserved.
    FieldOrderMismatch {
        /// Expected order.
        expected: Option<FieldOrder>,
        /// Output order.
        actual: Option<FieldOrder>,
    },
    /// The output has the wrong number of frames.
    FrameCountMismatch {
        /// Expected.
        expected: u64,
        /// Actual.
        actual: u64,
    },
    /// A stream property was not carried over.
    MetadataMismatch {
        /// Property name.
        field: String,
        /// Source value.
        expected: String,
        /// Output value.
        actual: String,
    },
    /// Output frame size differs from the source.
    DimensionMismatch {
        /// Source `(width, height)`.
        expected: (u32, u32),
        /// Output `(width, height)`.
        actual: (u32, u32),
    },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AudioHashMismatch { .. } => f.write_str("audio differs from source"),
            Self::ColorDrift {
                index,
                mean,
                max,
                visible_pixels,
            } => write!(
                f,
                "frame {index} drifted (mean dE00 {mean:.3}, max {max:.3}, \
                 {visible_pixels} visible pixels)"
            ),
            Self::PtsDrift { index, delta_us } => {
                write!(f, "frame {index} pts off by {delta_us} us")
            }
            Self::FieldOrderMismatch { expected, actual } => write!(
                f,
                "field order {} expected, found {}",
                expected.map_or("unknown", FieldOrder::label),
                actual.map_or("unknown", FieldOrder::label)
            ),
            Self::FrameCountMismatch { expected, actual } => {
                write!(f, "{actual} frames written, {expected} expected")
            }
            Self::MetadataMismatch {
                field,
                expected,
                actual,
            } => write!(f, "{field} is '{actual}', expected '{expected}'"),
            Self::DimensionMismatch { expected, actual } => write!(
                f,
                "output is {}x{}, source is {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
        }
    }
}

/// Findings of one validation run.
///
/// A report with violations is still a successful validation; callers decide what a violation
/// means for the job.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QualityReport {
    /// Source path.
    pub source: PathBuf,
    /// Output path.
    pub output: PathBuf,
    /// Audio check.
    pub audio: AudioCheck,
    /// Compared frames.
    pub frames: Vec<FrameDiff>,
    /// Field order check.
    pub field_order: FieldOrderCheck,
    /// Frame counts.
    pub frame_count: FrameCount,
    /// Broken guarantees.
    pub violations: Vec<Violation>,
    /// What the pipeline changed on purpose.
    pub transformation_log: Vec<String>,
}

impl QualityReport {
    /// Return `true` when no guarantee was broken.
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Frames whose pixels were compared, i.e. the untouched ones.
    pub fn compared_frames(&self) -> impl Iterator<Item = &FrameDiff> {
        self.frames.iter().filter(|d| !d.touched)
    }

    /// Largest mean ΔE00 over the compared frames.
    pub fn worst_mean_delta_e(&self) -> f64 {
        self.compared_frames()
            .map(|f| f.delta_e00_mean)
            .fold(0.0, f64::max)
    }

    /// Where the report of `output` is stored: `<output>.quality.json`.
    pub fn default_path(output: &Path) -> PathBuf {
        let mut name = output.as_os_str().to_os_string();
        name.push(".quality.json");
        PathBuf::from(name)
    }

    /// Write pretty-printed JSON to `path`.
    pub fn save(&self, path: &Path) -> MaskfxResult<()> {
        let f = File::create(path).map_err(|e| {
            MaskfxError::validation(format!("create report '{}': {e}", path.display()))
        })?;
        let mut w = BufWriter::new(f);
        serde_json::to_writer_pretty(&mut w, self)
            .map_err(|e| MaskfxError::serde(format!("serialize quality report: {e}")))?;
        w.write_all(b"\n")
            .and_then(|()| w.flush())
            .map_err(|e| {
                MaskfxError::validation(format!("write report '{}': {e}", path.display()))
            })
    }

    /// Parse a report from JSON.
    pub fn from_reader<R: std::io::Read>(r: R) -> MaskfxResult<Self> {
        serde_json::from_reader(r)
            .map_err(|e| MaskfxError::serde(format!("parse quality report JSON: {e}")))
    }

    /// Load a report written by [`QualityReport::save`].
    pub fn from_path(path: impl AsRef<Path>) -> MaskfxResult<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| {
            MaskfxError::input(format!("open quality report '{}': {e}", path.display()))
        })?;
        Self::from_reader(BufReader::new(f))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/quality/report.rs"]
mod tests;
