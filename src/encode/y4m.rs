//! Native YUV4MPEG2 writer.
//!
//! Frames that still carry their decoded native planes are written from those planes: an
//! unchanged frame is copied byte for byte, and a composited frame only has the luma samples of
//! changed pixels and the chroma sites covering them recomputed.

use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::frame::{Frame, NativeLayout, NativePayload, PixelData};
use crate::media::metadata::{ChromaSubsampling, ColorRange};
use crate::media::y4m::{self, Quant, Y4mHeader};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Y4M `C` tag for a layout.
pub(crate) fn colorspace_tag(subsampling: ChromaSubsampling, bit_depth: u8) -> String {
    match (subsampling, bit_depth) {
        (ChromaSubsampling::Cs420, 8) => "420jpeg".to_string(),
        (ChromaSubsampling::Mono, 8) => "mono".to_string(),
        (ChromaSubsampling::Mono, d) => format!("mono{d}"),
        (s, 8) => s.digits().to_string(),
        (s, d) => format!("{}p{d}", s.digits()),
    }
}

/// Per-frame write counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Y4mWriteStats {
    /// Frames copied from their native planes unchanged.
    pub copied: u64,
    /// Frames whose native planes were patched where pixels changed.
    pub patched: u64,
    /// Frames converted from RGB in full.
    pub converted: u64,
}

/// [`FrameSink`] writing a `.y4m` file.
pub struct Y4mSink {
    out_path: PathBuf,
    writer: Option<BufWriter<File>>,
    layout: Option<NativeLayout>,
    range: Option<ColorRange>,
    last_idx: Option<FrameIndex>,
    stats: Y4mWriteStats,
}

impl Y4mSink {
    /// Sink writing to `out_path`; the file is created by `begin`.
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            writer: None,
            layout: None,
            range: None,
            last_idx: None,
            stats: Y4mWriteStats::default(),
        }
    }

    /// Counters of the current or last write.
    pub fn stats(&self) -> Y4mWriteStats {
        self.stats
    }

    fn io_err(&self, e: std::io::Error) -> MaskfxError {
        MaskfxError::encode(format!("write '{}': {e}", self.out_path.display()))
    }
}

impl FrameSink for Y4mSink {
    fn begin(&mut self, cfg: SinkConfig) -> MaskfxResult<()> {
        cfg.validate()?;
        let header = Y4mHeader {
            width: cfg.width,
            height: cfg.height,
            rate: cfg.rate,
            field_order: cfg.field_order,
            aspect: None,
            colorspace_tag: colorspace_tag(cfg.subsampling, cfg.bit_depth),
            subsampling: cfg.subsampling,
            bit_depth: cfg.bit_depth,
            range: cfg.color.range,
            extensions: Vec::new(),
        };
        crate::encode::ensure_parent_dir(&self.out_path)?;
        let file = File::create(&self.out_path).map_err(|e| self.io_err(e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(header.to_line().as_bytes())
            .map_err(|e| self.io_err(e))?;
        self.layout = Some(header.layout());
        self.range = cfg.color.range;
        self.writer = Some(writer);
        self.last_idx = None;
        self.stats = Y4mWriteStats::default();
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &Frame) -> MaskfxResult<()> {
        let layout = self
            .layout
            .ok_or_else(|| MaskfxError::encode("y4m sink not started"))?;
        if let Some(last) = self.last_idx
            && idx <= last
        {
            return Err(MaskfxError::encode(format!(
                "y4m sink received frame {} after {}",
                idx.0, last.0
            )));
        }
        self.last_idx = Some(idx);
        if frame.width != layout.width || frame.height != layout.height {
            return Err(MaskfxError::encode(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, layout.width, layout.height
            )));
        }

        let native = frame
            .native
            .as_deref()
            .filter(|n| n.layout == layout && n.bytes.len() == layout.frame_len());
        let patched;
        let bytes: &[u8] = match native {
            Some(n) => {
                let original = y4m::payload_to_rgb(n, frame.color.range);
                if original == frame.pixels {
                    self.stats.copied += 1;
                    &n.bytes
                } else {
                    let changed = changed_pixels(&original, &frame.pixels);
                    patched = encode_planes(&frame.pixels, layout, self.range, Some((n, &changed)));
                    self.stats.patched += 1;
                    &patched
                }
            }
            None => {
                patched = encode_planes(&frame.pixels, layout, self.range, None);
                self.stats.converted += 1;
                &patched
            }
        };

        let out_path = &self.out_path;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| MaskfxError::encode("y4m sink is already finalized"))?;
        writer
            .write_all(b"FRAME\n")
            .and_then(|()| writer.write_all(bytes))
            .map_err(|e| MaskfxError::encode(format!("write '{}': {e}", out_path.display())))
    }

    fn end(&mut self) -> MaskfxResult<()> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| MaskfxError::encode("y4m sink not started"))?;
        writer.flush().map_err(|e| self.io_err(e))?;
        tracing::debug!(
            path = %self.out_path.display(),
            copied = self.stats.copied,
            patched = self.stats.patched,
            converted = self.stats.converted,
            "y4m written"
        );
        Ok(())
    }
}

fn changed_pixels(a: &PixelData, b: &PixelData) -> Vec<bool> {
    let n = a.len().min(b.len()) / 3;
    (0..n)
        .map(|p| (0..3).any(|c| a.sample(p * 3 + c) != b.sample(p * 3 + c)))
        .collect()
}

/// Convert RGB to native planes. With a base payload only changed pixels and the chroma sites
/// covering them are recomputed; every other sample is kept.
fn encode_planes(
    pixels: &PixelData,
    layout: NativeLayout,
    range: Option<ColorRange>,
    base: Option<(&NativePayload, &[bool])>,
) -> Vec<u8> {
    let q = Quant::new(layout.bit_depth, range);
    let wide = layout.bytes_per_sample() == 2;
    let [ys, cs, _] = layout.plane_sizes();
    let mut bytes = match base {
        Some((n, _)) => n.bytes.clone(),
        None => vec![0u8; layout.frame_len()],
    };
    let dirty = |p: usize| base.is_none_or(|(_, changed)| changed.get(p).copied().unwrap_or(true));
    let (w, h) = (layout.width, layout.height);

    let (y_plane, rest) = bytes.split_at_mut(ys);
    for p in 0..(w as usize * h as usize) {
        if dirty(p) {
            let ycc = y4m::rgb_to_ycbcr(pixels.rgb_f32(p), &q);
            y4m::set_plane_sample(y_plane, p, wide, y4m::quantize(ycc[0], &q));
        }
    }
    if layout.subsampling == ChromaSubsampling::Mono {
        return bytes;
    }

    let (cb_plane, cr_plane) = rest.split_at_mut(cs);
    let (cw, ch) = layout.chroma_dims();
    let (sx, sy) = layout.subsampling.shifts();
    for cy in 0..ch {
        for cx in 0..cw {
            let xs = (cx << sx)..((cx + 1) << sx).min(w);
            let ys_ = (cy << sy)..((cy + 1) << sy).min(h);
            let covered = || {
                ys_.clone()
                    .flat_map(|y| xs.clone().map(move |x| (y * w + x) as usize))
            };
            if !covered().any(dirty) {
                continue;
            }
            let (mut cb, mut cr, mut n) = (0.0f32, 0.0f32, 0.0f32);
            for p in covered() {
                let ycc = y4m::rgb_to_ycbcr(pixels.rgb_f32(p), &q);
                cb += ycc[1];
                cr += ycc[2];
                n += 1.0;
            }
            let ci = (cy * cw + cx) as usize;
            y4m::set_plane_sample(cb_plane, ci, wide, y4m::quantize(cb / n, &q));
            y4m::set_plane_sample(cr_plane, ci, wide, y4m::quantize(cr / n, &q));
        }
    }
    bytes
}

#[cfg(test)]
#[path = "../../tests/unit/encode/y4m.rs"]
mod tests;
