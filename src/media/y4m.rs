//! Native YUV4MPEG2 demuxer/decoder.
//!
//! Y4M stores uncompressed planar YCbCr, so every frame is a sync point and the frame offset
//! table doubles as the seek table. Decoded frames keep their native planes so the Y4M writer can
//! copy untouched samples verbatim.

use crate::foundation::core::Rational;
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::frame::{NativeLayout, NativePayload, PixelData};
use crate::media::metadata::{ChromaSubsampling, ColorRange, FieldOrder};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

pub(crate) const MAGIC: &str = "YUV4MPEG2";

/// Parsed stream header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Y4mHeader {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) rate: Rational,
    /// `None` for `Im` (mixed) or a missing `I` tag.
    pub(crate) field_order: Option<FieldOrder>,
    pub(crate) aspect: Option<String>,
    pub(crate) colorspace_tag: String,
    pub(crate) subsampling: ChromaSubsampling,
    pub(crate) bit_depth: u8,
    pub(crate) range: Option<ColorRange>,
    /// `X` parameters other than the color range, kept for writing back.
    pub(crate) extensions: Vec<String>,
}

impl Y4mHeader {
    pub(crate) fn parse(line: &str) -> MaskfxResult<Self> {
        let mut tokens = line.split_ascii_whitespace();
        if tokens.next() != Some(MAGIC) {
            return Err(MaskfxError::unsupported_container(
                "missing YUV4MPEG2 signature",
            ));
        }

        let mut width = None;
        let mut height = None;
        let mut rate = None;
        let mut field_order = None;
        let mut aspect = None;
        let mut colorspace_tag = "420jpeg".to_string();
        let mut range = None;
        let mut extensions = Vec::new();

        for tok in tokens {
            let mut chars = tok.chars();
            let key = chars.next().unwrap_or(' ');
            let value = chars.as_str();
            match key {
                'W' => width = value.parse::<u32>().ok(),
                'H' => height = value.parse::<u32>().ok(),
                'F' => rate = Rational::parse(value),
                'I' => {
                    field_order = match value {
                        "p" => Some(FieldOrder::Progressive),
                        "t" => Some(FieldOrder::TopFieldFirst),
                        "b" => Some(FieldOrder::BottomFieldFirst),
                        "m" => None,
                        other => {
                            return Err(MaskfxError::corrupt(format!(
                                "invalid y4m interlace tag 'I{other}'"
                            )));
                        }
                    }
                }
                'A' => aspect = Some(value.to_string()),
                'C' => colorspace_tag = value.to_string(),
                'X' => match value {
                    "COLORRANGE=FULL" => range = Some(ColorRange::Full),
                    "COLORRANGE=LIMITED" => range = Some(ColorRange::Limited),
                    _ => extensions.push(value.to_string()),
                },
                _ => {
                    return Err(MaskfxError::corrupt(format!(
                        "unknown y4m header token '{tok}'"
                    )));
                }
            }
        }

        let width = width
            .filter(|w| *w > 0)
            .ok_or_else(|| MaskfxError::corrupt("y4m header lacks a valid W tag"))?;
        let height = height
            .filter(|h| *h > 0)
            .ok_or_else(|| MaskfxError::corrupt("y4m header lacks a valid H tag"))?;
        let rate = rate.ok_or_else(|| MaskfxError::corrupt("y4m header lacks a valid F tag"))?;
        let (subsampling, bit_depth) = parse_colorspace(&colorspace_tag)?;

        Ok(Self {
            width,
            height,
            rate,
            field_order,
            aspect,
            colorspace_tag,
            subsampling,
            bit_depth,
            range,
            extensions,
        })
    }

    pub(crate) fn to_line(&self) -> String {
        let mut line = format!(
            "{MAGIC} W{} H{} F{}:{}",
            self.width, self.height, self.rate.num, self.rate.den
        );
        let interlace = match self.field_order {
            Some(FieldOrder::Progressive) => "p",
            Some(FieldOrder::TopFieldFirst) => "t",
            Some(FieldOrder::BottomFieldFirst) => "b",
            None => "m",
        };
        line.push_str(&format!(" I{interlace}"));
        if let Some(a) = self.aspect.as_deref() {
            line.push_str(&format!(" A{a}"));
        }
        line.push_str(&format!(" C{}", self.colorspace_tag));
        match self.range {
            Some(ColorRange::Full) => line.push_str(" XCOLORRANGE=FULL"),
            Some(ColorRange::Limited) => line.push_str(" XCOLORRANGE=LIMITED"),
            None => {}
        }
        for x in &self.extensions {
            line.push_str(&format!(" X{x}"));
        }
        line.push('\n');
        line
    }

    pub(crate) fn layout(&self) -> NativeLayout {
        NativeLayout {
            width: self.width,
            height: self.height,
            subsampling: self.subsampling,
            bit_depth: self.bit_depth,
        }
    }
}

fn parse_colorspace(tag: &str) -> MaskfxResult<(ChromaSubsampling, u8)> {
    let digits = |d: &str| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit());
    let (base, depth) = match tag.rsplit_once('p') {
        Some((base, d)) if digits(d) => (base, d.parse::<u8>().unwrap_or(0)),
        _ => match tag.strip_prefix("mono") {
            Some(d) if digits(d) => ("mono", d.parse::<u8>().unwrap_or(0)),
            _ => (tag, 8),
        },
    };
    let sub = match base {
        "420" | "420jpeg" | "420paldv" | "420mpeg2" => ChromaSubsampling::Cs420,
        "422" => ChromaSubsampling::Cs422,
        "444" => ChromaSubsampling::Cs444,
        "mono" => ChromaSubsampling::Mono,
        _ => {
            return Err(MaskfxError::unsupported_codec(format!(
                "unsupported y4m colorspace 'C{tag}'"
            )));
        }
    };
    if !(8..=16).contains(&depth) {
        return Err(MaskfxError::unsupported_codec(format!(
            "unsupported y4m bit depth {depth}"
        )));
    }
    Ok((sub, depth))
}

/// Open Y4M file with a scanned frame offset table.
pub(crate) struct Y4mDecoder {
    reader: BufReader<File>,
    pub(crate) header: Y4mHeader,
    offsets: Vec<u64>,
    next: usize,
}

impl Y4mDecoder {
    /// Open and index `path`, returning warnings for a truncated tail.
    pub(crate) fn open(path: &Path) -> MaskfxResult<(Self, Vec<String>)> {
        let file = File::open(path).map_err(|e| {
            MaskfxError::input(format!("failed to open '{}': {e}", path.display()))
        })?;
        let file_len = file
            .metadata()
            .map_err(|e| MaskfxError::input(format!("failed to stat '{}': {e}", path.display())))?
            .len();
        let mut reader = BufReader::new(file);

        let mut line = String::new();
        read_line_limited(&mut reader, &mut line)?;
        let header = Y4mHeader::parse(line.trim_end())?;
        let frame_len = header.layout().frame_len() as u64;

        let mut offsets = Vec::new();
        let mut warnings = Vec::new();
        loop {
            line.clear();
            let n = read_line_limited(&mut reader, &mut line)?;
            if n == 0 {
                break;
            }
            if !line.starts_with("FRAME") {
                warnings.push(format!(
                    "stopped indexing at byte {}: expected FRAME marker",
                    reader.stream_position().unwrap_or(0)
                ));
                break;
            }
            let pos = reader
                .stream_position()
                .map_err(|e| MaskfxError::decode(format!("y4m seek failed: {e}")))?;
            if pos + frame_len > file_len {
                warnings.push(format!(
                    "skipped truncated frame #{} ({} of {frame_len} bytes)",
                    offsets.len(),
                    file_len - pos
                ));
                break;
            }
            offsets.push(pos);
            reader
                .seek_relative(frame_len as i64)
                .map_err(|e| MaskfxError::decode(format!("y4m seek failed: {e}")))?;
        }

        if offsets.is_empty() {
            return Err(MaskfxError::corrupt(format!(
                "'{}' contains no complete y4m frame",
                path.display()
            )));
        }

        Ok((
            Self {
                reader,
                header,
                offsets,
                next: 0,
            },
            warnings,
        ))
    }

    pub(crate) fn frame_count(&self) -> u64 {
        self.offsets.len() as u64
    }

    pub(crate) fn start_at(&mut self, index: u64) -> MaskfxResult<()> {
        let i = usize::try_from(index)
            .ok()
            .filter(|i| *i < self.offsets.len())
            .ok_or_else(|| MaskfxError::decode(format!("y4m frame {index} out of range")))?;
        self.reader
            .seek(SeekFrom::Start(self.offsets[i]))
            .map_err(|e| MaskfxError::decode(format!("y4m seek failed: {e}")))?;
        self.next = i;
        Ok(())
    }

    /// Read the next frame's native payload, `None` at end of stream.
    pub(crate) fn next_payload(&mut self) -> MaskfxResult<Option<NativePayload>> {
        if self.next >= self.offsets.len() {
            return Ok(None);
        }
        let layout = self.header.layout();
        let mut bytes = vec![0u8; layout.frame_len()];
        self.reader
            .read_exact(&mut bytes)
            .map_err(|e| MaskfxError::decode(format!("y4m frame {} read failed: {e}", self.next)))?;
        self.next += 1;
        if let Some(&off) = self.offsets.get(self.next) {
            self.reader
                .seek(SeekFrom::Start(off))
                .map_err(|e| MaskfxError::decode(format!("y4m seek failed: {e}")))?;
        }
        Ok(Some(NativePayload { layout, bytes }))
    }
}

fn read_line_limited(reader: &mut BufReader<File>, line: &mut String) -> MaskfxResult<usize> {
    const MAX_LINE: u64 = 4096;
    let n = reader
        .by_ref()
        .take(MAX_LINE)
        .read_line(line)
        .map_err(|e| MaskfxError::corrupt(format!("y4m header read failed: {e}")))?;
    if n > 0 && !line.ends_with('\n') {
        return Err(MaskfxError::corrupt("y4m header line is not terminated"));
    }
    Ok(n)
}

/// YCbCr quantization parameters for one bit depth and range.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Quant {
    y_off: f32,
    y_scale: f32,
    c_mid: f32,
    c_scale: f32,
    max: f32,
}

impl Quant {
    pub(crate) fn new(bit_depth: u8, range: Option<ColorRange>) -> Self {
        let max = ((1u32 << bit_depth) - 1) as f32;
        let shift = (1u32 << (bit_depth - 8)) as f32;
        match range {
            Some(ColorRange::Full) => Self {
                y_off: 0.0,
                y_scale: max,
                c_mid: (1u32 << (bit_depth - 1)) as f32,
                c_scale: max,
                max,
            },
            _ => Self {
                y_off: 16.0 * shift,
                y_scale: 219.0 * shift,
                c_mid: 128.0 * shift,
                c_scale: 224.0 * shift,
                max,
            },
        }
    }
}

const KR: f32 = 0.2126;
const KB: f32 = 0.0722;
const KG: f32 = 1.0 - KR - KB;

/// BT.709 YCbCr sample triple to normalized RGB.
pub(crate) fn ycbcr_to_rgb(y: u16, cb: u16, cr: u16, q: &Quant) -> [f32; 3] {
    let yn = (f32::from(y) - q.y_off) / q.y_scale;
    let cbn = (f32::from(cb) - q.c_mid) / q.c_scale;
    let crn = (f32::from(cr) - q.c_mid) / q.c_scale;
    let r = yn + 2.0 * (1.0 - KR) * crn;
    let b = yn + 2.0 * (1.0 - KB) * cbn;
    let g = (yn - KR * r - KB * b) / KG;
    [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0)]
}

/// Normalized RGB to BT.709 YCbCr as unquantized sample values.
pub(crate) fn rgb_to_ycbcr(rgb: [f32; 3], q: &Quant) -> [f32; 3] {
    let [r, g, b] = rgb;
    let y = KR * r + KG * g + KB * b;
    let cb = (b - y) / (2.0 * (1.0 - KB));
    let cr = (r - y) / (2.0 * (1.0 - KR));
    [
        y * q.y_scale + q.y_off,
        cb * q.c_scale + q.c_mid,
        cr * q.c_scale + q.c_mid,
    ]
}

pub(crate) fn quantize(v: f32, q: &Quant) -> u16 {
    v.round().clamp(0.0, q.max) as u16
}

/// Read sample `i` of a plane.
pub(crate) fn plane_sample(plane: &[u8], i: usize, wide: bool) -> u16 {
    if wide {
        u16::from_le_bytes([plane[2 * i], plane[2 * i + 1]])
    } else {
        u16::from(plane[i])
    }
}

pub(crate) fn set_plane_sample(plane: &mut [u8], i: usize, wide: bool, v: u16) {
    if wide {
        plane[2 * i..2 * i + 2].copy_from_slice(&v.to_le_bytes());
    } else {
        plane[i] = v as u8;
    }
}

/// Convert a native payload to interleaved RGB (nearest chroma upsampling).
pub(crate) fn payload_to_rgb(payload: &NativePayload, range: Option<ColorRange>) -> PixelData {
    let l = payload.layout;
    let q = Quant::new(l.bit_depth, range);
    let wide = l.bytes_per_sample() == 2;
    let [ys, cs, _] = l.plane_sizes();
    let (y_plane, rest) = payload.bytes.split_at(ys);
    let (cb_plane, cr_plane) = rest.split_at(cs);
    let (cw, _) = l.chroma_dims();
    let (sx, sy) = l.subsampling.shifts();
    let mono = l.subsampling == ChromaSubsampling::Mono;
    let neutral = q.c_mid as u16;

    let n = l.width as usize * l.height as usize;
    let mut rgb = Vec::with_capacity(n * 3);
    for py in 0..l.height {
        for px in 0..l.width {
            let i = (py * l.width + px) as usize;
            let y = plane_sample(y_plane, i, wide);
            let (cb, cr) = if mono {
                (neutral, neutral)
            } else {
                let ci = ((py >> sy) * cw + (px >> sx)) as usize;
                (
                    plane_sample(cb_plane, ci, wide),
                    plane_sample(cr_plane, ci, wide),
                )
            };
            rgb.extend(ycbcr_to_rgb(y, cb, cr, &q));
        }
    }

    if l.bit_depth == 8 {
        PixelData::Rgb8(rgb.into_iter().map(|v| (v * 255.0).round() as u8).collect())
    } else {
        PixelData::Rgb16(
            rgb.into_iter()
                .map(|v| (v * 65535.0).round() as u16)
                .collect(),
        )
    }
}

#[cfg(test)]
#[path = "../../tests/unit/media/y4m.rs"]
mod tests;
