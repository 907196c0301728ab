use crate::foundation::core::{FrameIndex, Rational};
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::frame::Frame;
use crate::media::metadata::{ChromaSubsampling, ColorInfo, FieldOrder, HdrStaticMetadata};

/// Stream properties handed to a [`FrameSink`] before the first frame.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkConfig {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Output frame rate.
    pub rate: Rational,
    /// Color tags written to the output.
    pub color: ColorInfo,
    /// Field order tag.
    pub field_order: Option<FieldOrder>,
    /// Chroma subsampling of the output planes.
    pub subsampling: ChromaSubsampling,
    /// Bits per output sample.
    pub bit_depth: u8,
    /// HDR static metadata.
    pub hdr: Option<HdrStaticMetadata>,
    /// Timecode of the first output frame.
    pub start_timecode: Option<String>,
    /// Reel / tape name.
    pub reel_name: Option<String>,
}

impl SinkConfig {
    /// Reject configurations no writer can honor.
    pub fn validate(&self) -> MaskfxResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MaskfxError::validation("sink width/height must be non-zero"));
        }
        if self.rate.num == 0 {
            return Err(MaskfxError::validation("sink frame rate must be non-zero"));
        }
        if !(8..=16).contains(&self.bit_depth) {
            return Err(MaskfxError::encode(format!(
                "unsupported output bit depth {}",
                self.bit_depth
            )));
        }
        Ok(())
    }
}

/// Consumer of output frames.
///
/// `push_frame` is called with strictly increasing output indices between one `begin` and one
/// `end`.
pub trait FrameSink: Send {
    /// Called once before any frame.
    fn begin(&mut self, cfg: SinkConfig) -> MaskfxResult<()>;
    /// Push output frame `idx`.
    fn push_frame(&mut self, idx: FrameIndex, frame: &Frame) -> MaskfxResult<()>;
    /// Called once after the last frame; the output is complete when this returns `Ok`.
    fn end(&mut self) -> MaskfxResult<()>;
}

/// Sink that keeps frames in memory.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    frames: Vec<(FrameIndex, Frame)>,
    finished: bool,
}

impl InMemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration captured by `begin`.
    pub fn config(&self) -> Option<&SinkConfig> {
        self.cfg.as_ref()
    }

    /// Frames received, in order.
    pub fn frames(&self) -> &[(FrameIndex, Frame)] {
        &self.frames
    }

    /// Return `true` once `end` was called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> MaskfxResult<()> {
        cfg.validate()?;
        self.cfg = Some(cfg);
        self.frames.clear();
        self.finished = false;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &Frame) -> MaskfxResult<()> {
        if self.cfg.is_none() {
            return Err(MaskfxError::encode("in-memory sink not started"));
        }
        if let Some((last, _)) = self.frames.last()
            && idx <= *last
        {
            return Err(MaskfxError::encode(format!(
                "sink received frame {} after {}",
                idx.0, last.0
            )));
        }
        self.frames.push((idx, frame.clone()));
        Ok(())
    }

    fn end(&mut self) -> MaskfxResult<()> {
        self.finished = true;
        Ok(())
    }
}
