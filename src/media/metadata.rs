use crate::foundation::core::Rational;
use std::path::PathBuf;

/// Chroma subsampling of the source's native pixel layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChromaSubsampling {
    /// 4:2:0.
    #[serde(rename = "420")]
    Cs420,
    /// 4:2:2.
    #[serde(rename = "422")]
    Cs422,
    /// 4:4:4 (also RGB planar formats).
    #[serde(rename = "444")]
    Cs444,
    /// Luma only.
    #[serde(rename = "mono")]
    Mono,
}

impl ChromaSubsampling {
    /// Horizontal and vertical chroma decimation shifts.
    pub fn shifts(self) -> (u32, u32) {
        match self {
            Self::Cs420 => (1, 1),
            Self::Cs422 => (1, 0),
            Self::Cs444 | Self::Mono => (0, 0),
        }
    }

    /// Digits used in ffmpeg pixel format names (`yuv420p`).
    pub fn digits(self) -> &'static str {
        match self {
            Self::Cs420 => "420",
            Self::Cs422 => "422",
            Self::Cs444 => "444",
            Self::Mono => "400",
        }
    }
}

/// Display field order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldOrder {
    /// Progressive scan.
    Progressive,
    /// Interlaced, top field displayed first.
    TopFieldFirst,
    /// Interlaced, bottom field displayed first.
    BottomFieldFirst,
}

impl FieldOrder {
    /// Map an ffprobe `field_order` value; `unknown` maps to `None`.
    pub fn from_ffprobe(s: &str) -> Option<Self> {
        match s {
            "progressive" => Some(Self::Progressive),
            "tt" | "bt" => Some(Self::TopFieldFirst),
            "bb" | "tb" => Some(Self::BottomFieldFirst),
            _ => None,
        }
    }

    /// Value for ffmpeg's `-field_order` output option.
    pub fn as_ffmpeg(self) -> &'static str {
        match self {
            Self::Progressive => "progressive",
            Self::TopFieldFirst => "tt",
            Self::BottomFieldFirst => "bb",
        }
    }

    /// Human-readable tag.
    pub fn label(self) -> &'static str {
        match self {
            Self::Progressive => "progressive",
            Self::TopFieldFirst => "top-field-first",
            Self::BottomFieldFirst => "bottom-field-first",
        }
    }

    /// Return `true` for either interlaced order.
    pub fn is_interlaced(self) -> bool {
        !matches!(self, Self::Progressive)
    }
}

/// Quantization range of the coded samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorRange {
    /// Studio / limited / "tv" range.
    Limited,
    /// Full / "pc" range.
    Full,
}

impl ColorRange {
    /// Map an ffprobe `color_range` value.
    pub fn from_ffprobe(s: &str) -> Option<Self> {
        match s {
            "tv" | "mpeg" | "limited" => Some(Self::Limited),
            "pc" | "jpeg" | "full" => Some(Self::Full),
            _ => None,
        }
    }

    /// ffmpeg option value.
    pub fn as_ffmpeg(self) -> &'static str {
        match self {
            Self::Limited => "tv",
            Self::Full => "pc",
        }
    }
}

/// Interpreted color space family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorSpace {
    /// SD (BT.601 / BT.470BG / SMPTE 170M).
    Bt601,
    /// HD (BT.709).
    Bt709,
    /// UHD / HDR (BT.2020).
    Bt2020,
    /// sRGB (BT.709 primaries, sRGB transfer).
    Srgb,
    /// DCI / Display P3 primaries.
    P3,
    /// ACES AP0/AP1 working spaces.
    Aces,
}

/// Interpreted transfer characteristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transfer {
    /// Pure power 2.2.
    Gamma22,
    /// BT.709/BT.1886 display gamma (~2.4).
    Gamma24,
    /// sRGB piecewise curve.
    Srgb,
    /// Hybrid log-gamma (ARIB STD-B67).
    Hlg,
    /// Perceptual quantizer (SMPTE ST 2084).
    Pq,
    /// Linear light.
    Linear,
}

impl Transfer {
    /// Return `true` for HDR transfer functions.
    pub fn is_hdr(self) -> bool {
        matches!(self, Self::Hlg | Self::Pq)
    }
}

/// Color tags exactly as reported by the container, plus their interpretation.
///
/// The raw tags are what gets written back on output so passthrough never renames a tag.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ColorInfo {
    /// Color primaries tag (`bt709`, `bt2020`, ...).
    pub primaries: Option<String>,
    /// Matrix coefficients tag (`bt709`, `bt2020nc`, ...).
    pub matrix: Option<String>,
    /// Transfer characteristic tag (`bt709`, `smpte2084`, `arib-std-b67`, ...).
    pub transfer: Option<String>,
    /// Sample range.
    pub range: Option<ColorRange>,
}

impl ColorInfo {
    /// Normalize an ffprobe tag; `unknown`, `unspecified` and `reserved` become `None`.
    pub fn tag(raw: Option<&str>) -> Option<String> {
        let raw = raw?.trim();
        match raw {
            "" | "unknown" | "unspecified" | "reserved" => None,
            other => Some(other.to_ascii_lowercase()),
        }
    }

    /// Interpreted color space, from primaries first and matrix second.
    pub fn color_space(&self) -> Option<ColorSpace> {
        let from_primaries = self.primaries.as_deref().and_then(|p| match p {
            "bt709" => Some(if self.transfer.as_deref() == Some("iec61966-2-1") {
                ColorSpace::Srgb
            } else {
                ColorSpace::Bt709
            }),
            "bt470bg" | "smpte170m" | "smpte240m" | "bt470m" => Some(ColorSpace::Bt601),
            "bt2020" => Some(ColorSpace::Bt2020),
            "smpte431" | "smpte432" => Some(ColorSpace::P3),
            _ => None,
        });
        from_primaries.or_else(|| {
            self.matrix.as_deref().and_then(|m| match m {
                "bt709" => Some(ColorSpace::Bt709),
                "bt470bg" | "smpte170m" | "fcc" => Some(ColorSpace::Bt601),
                "bt2020nc" | "bt2020c" => Some(ColorSpace::Bt2020),
                _ => None,
            })
        })
    }

    /// Interpreted transfer characteristic.
    pub fn transfer_kind(&self) -> Option<Transfer> {
        match self.transfer.as_deref()? {
            "bt709" | "smpte170m" | "bt2020-10" | "bt2020-12" => Some(Transfer::Gamma24),
            "gamma22" | "bt470m" => Some(Transfer::Gamma22),
            "iec61966-2-1" => Some(Transfer::Srgb),
            "arib-std-b67" => Some(Transfer::Hlg),
            "smpte2084" => Some(Transfer::Pq),
            "linear" => Some(Transfer::Linear),
            _ => None,
        }
    }

    /// Return `true` when the transfer is PQ or HLG.
    pub fn is_hdr(&self) -> bool {
        self.transfer_kind().is_some_and(Transfer::is_hdr)
    }
}

/// SMPTE ST 2086 mastering display color volume.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MasteringDisplay {
    /// Red primary CIE 1931 xy.
    pub red: [f64; 2],
    /// Green primary CIE 1931 xy.
    pub green: [f64; 2],
    /// Blue primary CIE 1931 xy.
    pub blue: [f64; 2],
    /// White point CIE 1931 xy.
    pub white_point: [f64; 2],
    /// Peak luminance in cd/m².
    pub max_luminance: f64,
    /// Minimum luminance in cd/m².
    pub min_luminance: f64,
}

impl MasteringDisplay {
    /// Encode as an x265 `master-display` parameter.
    pub fn to_x265(&self) -> String {
        let xy = |v: [f64; 2]| {
            format!(
                "({},{})",
                (v[0] * 50_000.0).round() as u32,
                (v[1] * 50_000.0).round() as u32
            )
        };
        format!(
            "G{}B{}R{}WP{}L({},{})",
            xy(self.green),
            xy(self.blue),
            xy(self.red),
            xy(self.white_point),
            (self.max_luminance * 10_000.0).round() as u64,
            (self.min_luminance * 10_000.0).round() as u64
        )
    }
}

/// CTA-861.3 content light level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ContentLight {
    /// Maximum content light level in cd/m².
    pub max_cll: u32,
    /// Maximum frame-average light level in cd/m².
    pub max_fall: u32,
}

/// HDR static metadata block.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HdrStaticMetadata {
    /// Mastering display volume, when present.
    pub mastering: Option<MasteringDisplay>,
    /// Content light levels, when present.
    pub content_light: Option<ContentLight>,
}

impl HdrStaticMetadata {
    /// Return `true` when neither block is present.
    pub fn is_empty(&self) -> bool {
        self.mastering.is_none() && self.content_light.is_none()
    }
}

/// Audio stream description.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AudioInfo {
    /// Codec identifier (`aac`, `pcm_s16le`, ...).
    pub codec: String,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Channel layout name, when known.
    pub channel_layout: Option<String>,
    /// Decoded sample format (`s16`, `fltp`, ...), when known.
    pub sample_fmt: Option<String>,
}

/// Stream and container properties of an opened source.
///
/// Every field the quality layer checks is optional: absence means "unknown" and is never filled
/// with a guessed default.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Metadata {
    /// Source path.
    pub path: PathBuf,
    /// Container (demuxer) name.
    pub container: String,
    /// Video codec identifier.
    pub codec: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Average frame rate over the stream.
    pub avg_frame_rate: Option<Rational>,
    /// Declared (base) frame rate.
    pub declared_frame_rate: Option<Rational>,
    /// Video stream time base.
    pub time_base: Rational,
    /// Total frame count, when known.
    pub frame_count: Option<u64>,
    /// Variable frame rate.
    pub vfr: bool,
    /// Duration in microseconds, when known.
    pub duration_us: Option<i64>,
    /// Native pixel format name, when known.
    pub pix_fmt: Option<String>,
    /// Bits per sample.
    pub bit_depth: Option<u8>,
    /// Chroma subsampling.
    pub subsampling: Option<ChromaSubsampling>,
    /// Field order.
    pub field_order: Option<FieldOrder>,
    /// Color tags.
    pub color: ColorInfo,
    /// HDR static metadata.
    pub hdr: Option<HdrStaticMetadata>,
    /// Start timecode (`HH:MM:SS:FF` or drop-frame `HH:MM:SS;FF`).
    pub start_timecode: Option<String>,
    /// Reel / tape name.
    pub reel_name: Option<String>,
    /// First audio stream, when present.
    pub audio: Option<AudioInfo>,
}

impl Metadata {
    /// Frame rate used for index↔time mapping: average, then declared.
    pub fn nominal_frame_rate(&self) -> Option<Rational> {
        self.avg_frame_rate.or(self.declared_frame_rate)
    }

    /// Return `true` when the source carries an audio stream.
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

/// Bit depth implied by an ffmpeg pixel format name.
pub fn bit_depth_from_pix_fmt(pix_fmt: &str) -> Option<u8> {
    for (suffix, depth) in [("p16", 16), ("p14", 14), ("p12", 12), ("p10", 10), ("p9", 9)] {
        if pix_fmt.contains(suffix) {
            return Some(depth);
        }
    }
    if pix_fmt.starts_with("rgb48")
        || pix_fmt.starts_with("rgba64")
        || pix_fmt.starts_with("gray16")
    {
        return Some(16);
    }
    if pix_fmt.starts_with("gray10") {
        return Some(10);
    }
    if pix_fmt.starts_with("gray12") {
        return Some(12);
    }
    let eight_bit = [
        "yuv420p", "yuvj420p", "yuv422p", "yuvj422p", "yuv444p", "yuvj444p", "nv12", "nv21",
        "nv16", "yuyv422", "uyvy422", "rgb24", "bgr24", "rgba", "bgra", "gbrp", "gray",
    ];
    eight_bit.contains(&pix_fmt).then_some(8)
}

/// Chroma subsampling implied by an ffmpeg pixel format name.
pub fn subsampling_from_pix_fmt(pix_fmt: &str) -> Option<ChromaSubsampling> {
    if pix_fmt.starts_with("gray") {
        return Some(ChromaSubsampling::Mono);
    }
    if pix_fmt.contains("420") || pix_fmt.starts_with("nv12") || pix_fmt.starts_with("nv21") {
        return Some(ChromaSubsampling::Cs420);
    }
    if pix_fmt.contains("422") || pix_fmt.starts_with("nv16") {
        return Some(ChromaSubsampling::Cs422);
    }
    if pix_fmt.contains("444")
        || pix_fmt.starts_with("gbr")
        || pix_fmt.starts_with("rgb")
        || pix_fmt.starts_with("bgr")
    {
        return Some(ChromaSubsampling::Cs444);
    }
    None
}

#[cfg(test)]
#[path = "../../tests/unit/media/metadata.rs"]
mod tests;
