use crate::foundation::core::{FrameIndex, Rational};
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::metadata::{ChromaSubsampling, ColorInfo, FieldOrder, HdrStaticMetadata};
use std::sync::Arc;

/// Interleaved RGB pixel storage.
///
/// 8-bit sources decode to [`PixelData::Rgb8`]; deeper sources decode to full-range 16-bit
/// [`PixelData::Rgb16`] so no precision is lost before compositing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PixelData {
    /// 3 bytes per pixel.
    Rgb8(Vec<u8>),
    /// 3 samples per pixel, each `0..=65535`.
    Rgb16(Vec<u16>),
}

impl PixelData {
    /// Number of samples (3 per pixel).
    pub fn len(&self) -> usize {
        match self {
            Self::Rgb8(v) => v.len(),
            Self::Rgb16(v) => v.len(),
        }
    }

    /// Return `true` when the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the buffer in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Rgb8(v) => v.len(),
            Self::Rgb16(v) => v.len() * 2,
        }
    }

    /// Maximum sample value of this layout.
    pub fn max_value(&self) -> u16 {
        match self {
            Self::Rgb8(_) => u16::from(u8::MAX),
            Self::Rgb16(_) => u16::MAX,
        }
    }

    /// Sample `i` widened to `u16` (not rescaled).
    pub fn sample(&self, i: usize) -> u16 {
        match self {
            Self::Rgb8(v) => u16::from(v[i]),
            Self::Rgb16(v) => v[i],
        }
    }

    /// Pixel `p` as normalized RGB in `[0, 1]`.
    pub fn rgb_f32(&self, p: usize) -> [f32; 3] {
        let max = f32::from(self.max_value());
        let i = p * 3;
        [
            f32::from(self.sample(i)) / max,
            f32::from(self.sample(i + 1)) / max,
            f32::from(self.sample(i + 2)) / max,
        ]
    }

    /// Return `true` when both buffers use the same sample layout.
    pub fn same_layout(&self, other: &PixelData) -> bool {
        matches!(
            (self, other),
            (Self::Rgb8(_), Self::Rgb8(_)) | (Self::Rgb16(_), Self::Rgb16(_))
        )
    }

    /// 128-bit content hash, used for bit-exactness checks.
    pub fn content_hash(&self) -> u128 {
        match self {
            Self::Rgb8(v) => xxhash_rust::xxh3::xxh3_128_with_seed(v, 8),
            Self::Rgb16(v) => {
                let mut h = xxhash_rust::xxh3::Xxh3::with_seed(16);
                for s in v {
                    h.update(&s.to_le_bytes());
                }
                h.digest128()
            }
        }
    }
}

/// Geometry of a backend's native planar sample layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeLayout {
    /// Luma width.
    pub width: u32,
    /// Luma height.
    pub height: u32,
    /// Chroma subsampling.
    pub subsampling: ChromaSubsampling,
    /// Bits per sample; > 8 stores 16-bit little-endian samples.
    pub bit_depth: u8,
}

impl NativeLayout {
    /// Bytes per stored sample.
    pub fn bytes_per_sample(&self) -> usize {
        if self.bit_depth > 8 { 2 } else { 1 }
    }

    /// Chroma plane dimensions (zero for mono).
    pub fn chroma_dims(&self) -> (u32, u32) {
        if self.subsampling == ChromaSubsampling::Mono {
            return (0, 0);
        }
        let (sx, sy) = self.subsampling.shifts();
        (self.width.div_ceil(1 << sx), self.height.div_ceil(1 << sy))
    }

    /// Byte sizes of the Y, Cb and Cr planes.
    pub fn plane_sizes(&self) -> [usize; 3] {
        let bps = self.bytes_per_sample();
        let y = self.width as usize * self.height as usize * bps;
        let (cw, ch) = self.chroma_dims();
        let c = cw as usize * ch as usize * bps;
        [y, c, c]
    }

    /// Total payload size of one frame.
    pub fn frame_len(&self) -> usize {
        self.plane_sizes().iter().sum()
    }
}

/// Raw native-layout samples of one decoded picture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativePayload {
    /// Plane geometry.
    pub layout: NativeLayout,
    /// Y, Cb, Cr planes back to back.
    pub bytes: Vec<u8>,
}

/// One decoded video picture with its timing and color metadata.
///
/// Frames are values: effects produce new frames via [`Frame::with_pixels`], they never edit one
/// in place.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Index in presentation order.
    pub index: FrameIndex,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Interleaved RGB pixels.
    pub pixels: PixelData,
    /// Presentation timestamp in `time_base` units.
    pub pts: i64,
    /// Decode timestamp, when the container provides one.
    pub dts: Option<i64>,
    /// Time base of `pts`/`dts`.
    pub time_base: Rational,
    /// Timecode derived from the source start timecode.
    pub timecode: Option<String>,
    /// Color tags.
    pub color: ColorInfo,
    /// Source bit depth.
    pub bit_depth: Option<u8>,
    /// Source chroma subsampling.
    pub subsampling: Option<ChromaSubsampling>,
    /// Field order.
    pub field_order: Option<FieldOrder>,
    /// HDR static metadata.
    pub hdr: Option<HdrStaticMetadata>,
    /// Sync point.
    pub keyframe: bool,
    /// Native samples, kept by backends that can write them back untouched.
    pub native: Option<Arc<NativePayload>>,
}

impl Frame {
    /// Check buffer/geometry agreement.
    pub fn validate(&self) -> MaskfxResult<()> {
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| MaskfxError::decode("frame buffer size overflow"))?;
        if self.pixels.len() != expected {
            return Err(MaskfxError::decode(format!(
                "frame {} buffer has {} samples, expected {expected} for {}x{} rgb",
                self.index.0,
                self.pixels.len(),
                self.width,
                self.height
            )));
        }
        if let Some(native) = self.native.as_ref() {
            let l = native.layout;
            if l.width != self.width || l.height != self.height {
                return Err(MaskfxError::decode(format!(
                    "frame {} native layout is {}x{}, frame is {}x{}",
                    self.index.0, l.width, l.height, self.width, self.height
                )));
            }
            if self.subsampling.is_some_and(|s| s != l.subsampling) {
                return Err(MaskfxError::decode(format!(
                    "frame {} native subsampling disagrees with frame tag",
                    self.index.0
                )));
            }
            if native.bytes.len() != l.frame_len() {
                return Err(MaskfxError::decode(format!(
                    "frame {} native payload has {} bytes, layout needs {}",
                    self.index.0,
                    native.bytes.len(),
                    l.frame_len()
                )));
            }
        }
        Ok(())
    }

    /// Presentation time in microseconds.
    pub fn pts_micros(&self) -> i64 {
        self.time_base.to_micros(self.pts)
    }

    /// Approximate heap footprint, used by byte-budgeted caches.
    pub fn byte_size(&self) -> usize {
        self.pixels.byte_len() + self.native.as_ref().map_or(0, |n| n.bytes.len())
    }

    /// New frame with the same metadata and different pixels.
    pub fn with_pixels(&self, pixels: PixelData) -> Frame {
        Frame {
            pixels,
            ..self.clone_metadata()
        }
    }

    fn clone_metadata(&self) -> Frame {
        Frame {
            index: self.index,
            width: self.width,
            height: self.height,
            pixels: PixelData::Rgb8(Vec::new()),
            pts: self.pts,
            dts: self.dts,
            time_base: self.time_base,
            timecode: self.timecode.clone(),
            color: self.color.clone(),
            bit_depth: self.bit_depth,
            subsampling: self.subsampling,
            field_order: self.field_order,
            hdr: self.hdr,
            keyframe: self.keyframe,
            native: self.native.clone(),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/media/frame.rs"]
mod tests;
