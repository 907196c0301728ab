use crate::encode::cfr::{CfrPolicy, FrameMapping};
use crate::foundation::core::{FrameIndex, FrameRange, RangeSet, Rational};
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::index::FrameTable;
use crate::media::metadata::{FieldOrder, Metadata};
use std::path::{Path, PathBuf};

/// Output container formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    /// ISO MP4.
    Mp4,
    /// QuickTime.
    Mov,
    /// Matroska.
    Mkv,
    /// WebM.
    Webm,
    /// YUV4MPEG2, written natively.
    Y4m,
}

impl Container {
    /// Parse a container name or file extension.
    pub fn from_name(name: &str) -> MaskfxResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mp4" | "m4v" => Ok(Self::Mp4),
            "mov" | "qt" => Ok(Self::Mov),
            "mkv" | "matroska" => Ok(Self::Mkv),
            "webm" => Ok(Self::Webm),
            "y4m" | "yuv4mpegpipe" => Ok(Self::Y4m),
            other => Err(MaskfxError::encode(format!(
                "unsupported output container '{other}'"
            ))),
        }
    }

    /// Container implied by the extension of `path`.
    pub fn from_path(path: &Path) -> MaskfxResult<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::from_name(ext)
    }

    /// Container of an opened source, from its extension first and demuxer name second.
    pub fn of_source(meta: &Metadata) -> Option<Self> {
        Self::from_path(&meta.path).ok().or_else(|| {
            let demuxer = meta.container.as_str();
            if demuxer == "yuv4mpegpipe" {
                Some(Self::Y4m)
            } else if demuxer.starts_with("matroska") {
                Some(Self::Mkv)
            } else if demuxer.starts_with("mov") {
                Some(Self::Mov)
            } else {
                None
            }
        })
    }

    /// Lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Mkv => "mkv",
            Self::Webm => "webm",
            Self::Y4m => "y4m",
        }
    }

    /// ffmpeg muxer name.
    pub fn ffmpeg_format(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Mkv => "matroska",
            Self::Webm => "webm",
            Self::Y4m => "yuv4mpegpipe",
        }
    }

    /// Return `true` when `codec` can be stored.
    pub fn allows(self, codec: VideoCodec) -> bool {
        match self {
            Self::Mp4 => matches!(codec, VideoCodec::H264 | VideoCodec::Hevc | VideoCodec::Vp9),
            Self::Mov => matches!(
                codec,
                VideoCodec::H264 | VideoCodec::Hevc | VideoCodec::ProRes
            ),
            Self::Mkv => codec != VideoCodec::RawVideo,
            Self::Webm => codec == VideoCodec::Vp9,
            Self::Y4m => codec == VideoCodec::RawVideo,
        }
    }

    /// Codec used when neither the job nor the source decides.
    pub fn default_video_codec(self) -> VideoCodec {
        match self {
            Self::Mp4 | Self::Mkv => VideoCodec::H264,
            Self::Mov => VideoCodec::ProRes,
            Self::Webm => VideoCodec::Vp9,
            Self::Y4m => VideoCodec::RawVideo,
        }
    }

    /// Audio codec transcoded to when passthrough is off.
    pub fn default_audio_codec(self) -> Option<&'static str> {
        match self {
            Self::Mp4 | Self::Mov => Some("aac"),
            Self::Mkv => Some("flac"),
            Self::Webm => Some("libopus"),
            Self::Y4m => None,
        }
    }

    /// Return `true` when an audio stream of `codec` can be copied in unchanged.
    pub fn accepts_audio_copy(self, codec: &str) -> bool {
        match self {
            Self::Mp4 => !codec.starts_with("pcm_"),
            Self::Mov | Self::Mkv => true,
            Self::Webm => matches!(codec, "opus" | "vorbis"),
            Self::Y4m => false,
        }
    }
}

/// Output video codecs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264 / AVC (libx264).
    H264,
    /// H.265 / HEVC (libx265).
    Hevc,
    /// Apple ProRes (prores_ks).
    ProRes,
    /// FFV1 lossless.
    Ffv1,
    /// VP9 (libvpx-vp9).
    Vp9,
    /// Uncompressed planar YCbCr.
    RawVideo,
}

impl VideoCodec {
    /// Parse a codec name as used in jobs or reported by ffprobe.
    pub fn from_name(name: &str) -> MaskfxResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "h264" | "avc" | "libx264" => Ok(Self::H264),
            "hevc" | "h265" | "libx265" => Ok(Self::Hevc),
            "prores" | "prores_ks" => Ok(Self::ProRes),
            "ffv1" => Ok(Self::Ffv1),
            "vp9" | "libvpx-vp9" => Ok(Self::Vp9),
            "rawvideo" | "raw" => Ok(Self::RawVideo),
            other => Err(MaskfxError::encode(format!(
                "unsupported output codec '{other}'"
            ))),
        }
    }

    /// Canonical name, matching ffprobe's `codec_name`.
    pub fn name(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
            Self::ProRes => "prores",
            Self::Ffv1 => "ffv1",
            Self::Vp9 => "vp9",
            Self::RawVideo => "rawvideo",
        }
    }

    /// ffmpeg encoder name.
    pub fn encoder(self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::Hevc => "libx265",
            Self::ProRes => "prores_ks",
            Self::Ffv1 => "ffv1",
            Self::Vp9 => "libvpx-vp9",
            Self::RawVideo => "rawvideo",
        }
    }
}

/// Tone-mapping operator for HDR to SDR conversion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMapCurve {
    /// Filmic curve.
    #[default]
    Hable,
    /// Simple Reinhard.
    Reinhard,
    /// Mobius (preserves in-gamut colors).
    Mobius,
    /// Hard clip.
    Clip,
}

impl ToneMapCurve {
    /// ffmpeg `tonemap` filter operator.
    pub fn as_ffmpeg(self) -> &'static str {
        match self {
            Self::Hable => "hable",
            Self::Reinhard => "reinhard",
            Self::Mobius => "mobius",
            Self::Clip => "clip",
        }
    }
}

/// Explicitly requested color transform.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColorTransform {
    /// Colors pass through unchanged.
    #[default]
    None,
    /// Tone-map PQ/HLG to BT.709 SDR.
    ToneMapHdrToSdr {
        /// Operator.
        #[serde(default)]
        curve: ToneMapCurve,
    },
    /// Apply a 3D LUT file (`.cube`, `.3dl`).
    Lut3d {
        /// LUT file.
        path: PathBuf,
    },
}

impl ColorTransform {
    /// Return `true` unless this is [`ColorTransform::None`].
    pub fn is_requested(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Field structure handling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeinterlacePolicy {
    /// Keep the source field structure and field-order tag.
    #[default]
    Keep,
    /// Deinterlace to progressive.
    Deinterlace,
    /// Interlace, top field first.
    ReinterlaceTff,
    /// Interlace, bottom field first.
    ReinterlaceBff,
}

impl DeinterlacePolicy {
    /// Field order of the output given the source's.
    pub fn output_field_order(self, source: Option<FieldOrder>) -> Option<FieldOrder> {
        match self {
            Self::Keep => source,
            Self::Deinterlace => Some(FieldOrder::Progressive),
            Self::ReinterlaceTff => Some(FieldOrder::TopFieldFirst),
            Self::ReinterlaceBff => Some(FieldOrder::BottomFieldFirst),
        }
    }

    /// Return `true` when the field structure changes.
    pub fn transforms(self) -> bool {
        !matches!(self, Self::Keep)
    }
}

/// Container and codec choices for the output.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OutputSpec {
    /// Container name; `None` means "from the output extension".
    pub container: Option<String>,
    /// Video codec; `None` keeps the source codec when the container allows it.
    pub video_codec: Option<String>,
    /// Audio codec used when audio is transcoded; `None` means the container default.
    pub audio_codec: Option<String>,
    /// Allow GOP-level stream copy around touched frames.
    pub allow_splice: bool,
    /// Encoder quality (CRF / quantizer) for lossy codecs.
    pub quality: Option<u8>,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            container: None,
            video_codec: None,
            audio_codec: None,
            allow_splice: true,
            quality: None,
        }
    }
}

/// What the caller asks of the encoder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncodeRequest {
    /// Container/codec choices.
    pub output: OutputSpec,
    /// Copy source audio bit-exactly.
    pub audio_passthrough: bool,
    /// Constant frame rate handling.
    pub cfr_policy: CfrPolicy,
    /// Target rate for CFR conversion; `None` uses the source's nominal rate.
    pub cfr_rate: Option<Rational>,
    /// Field handling.
    pub deinterlace: DeinterlacePolicy,
    /// Color transform.
    pub color_transform: ColorTransform,
}

/// One span of a spliced output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "range", rename_all = "snake_case")]
pub enum Segment {
    /// Stream-copied GOPs.
    Copy(FrameRange),
    /// Re-encoded GOPs.
    Reencode(FrameRange),
}

impl Segment {
    /// Frames covered.
    pub fn range(self) -> FrameRange {
        match self {
            Self::Copy(r) | Self::Reencode(r) => r,
        }
    }
}

/// How video reaches the output.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum Route {
    /// Every stream copied; video is decode-identical.
    StreamCopy,
    /// Untouched GOPs copied, touched GOPs re-encoded, segments concatenated.
    Splice {
        /// Segments in order.
        segments: Vec<Segment>,
    },
    /// Whole video encoded from decoded frames.
    Reencode,
    /// Uncompressed output written natively; untouched samples are copied from the source.
    NativeRewrite,
}

/// How audio reaches the output.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AudioRoute {
    /// No audio in the output.
    None,
    /// Bit-exact copy.
    Copy,
    /// Re-encoded.
    Transcode {
        /// Encoder name.
        codec: String,
    },
}

/// Resolved output plan.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodePlan {
    /// Video route.
    pub route: Route,
    /// Audio route.
    pub audio: AudioRoute,
    /// Whether bit-exact audio was requested.
    pub audio_passthrough: bool,
    /// Source frames rendered.
    pub range: FrameRange,
    /// Source frames changed by compositing.
    pub touched: RangeSet,
    /// Output container.
    pub container: Container,
    /// Output video codec.
    pub video_codec: VideoCodec,
    /// Output frame sequence.
    pub mapping: FrameMapping,
    /// Output frame rate; `None` only when timestamps stay variable.
    pub rate: Option<Rational>,
    /// Field handling.
    pub deinterlace: DeinterlacePolicy,
    /// Output field order tag.
    pub field_order: Option<FieldOrder>,
    /// Color transform.
    pub color_transform: ColorTransform,
    /// Encoder quality.
    pub quality: Option<u8>,
    /// Human-readable record of every transformation applied.
    pub log: Vec<String>,
}

impl EncodePlan {
    /// Choose routes for writing `range` of the source to `output_path`.
    ///
    /// Everything that can make the write fail for reasons known up front (unsupported container
    /// or codec, missing audio, impossible frame-rate handling) fails here, before any file is
    /// created.
    pub fn build(
        meta: &Metadata,
        table: &FrameTable,
        output_path: &Path,
        request: &EncodeRequest,
        range: FrameRange,
        touched: RangeSet,
    ) -> MaskfxResult<Self> {
        let mut log = Vec::new();
        let container = match request.output.container.as_deref() {
            Some(name) => Container::from_name(name)?,
            None => Container::from_path(output_path)?,
        };
        let source_codec = VideoCodec::from_name(&meta.codec).ok();
        let video_codec = match request.output.video_codec.as_deref() {
            Some(name) => VideoCodec::from_name(name)?,
            None => source_codec
                .filter(|c| container.allows(*c))
                .unwrap_or_else(|| container.default_video_codec()),
        };
        if !container.allows(video_codec) {
            return Err(MaskfxError::encode(format!(
                "unsupported output codec '{}' for container '{}'",
                video_codec.name(),
                container.name()
            )));
        }
        if range.end.0 > table.len() || range.is_empty() {
            return Err(MaskfxError::validation(format!(
                "frame range {}..{} is outside the source ({} frames)",
                range.start.0,
                range.end.0,
                table.len()
            )));
        }

        let audio = plan_audio(meta, container, request, &mut log)?;

        let mut reasons = Vec::new();
        if source_codec != Some(video_codec) {
            reasons.push(format!("codec {} -> {}", meta.codec, video_codec.name()));
        }
        if Container::of_source(meta) != Some(container) {
            reasons.push(format!("container {} -> {}", meta.container, container.name()));
        }
        if request.cfr_policy.converts() {
            reasons.push(format!("cfr conversion ({:?})", request.cfr_policy));
        }
        if request.deinterlace.transforms() {
            reasons.push(format!("field handling ({:?})", request.deinterlace));
        }
        if request.color_transform.is_requested() {
            reasons.push(format!("color transform ({:?})", request.color_transform));
        }

        let route = if container == Container::Y4m {
            if request.deinterlace.transforms() || request.color_transform.is_requested() {
                return Err(MaskfxError::encode(
                    "y4m output cannot apply field or color transforms",
                ));
            }
            Route::NativeRewrite
        } else if !reasons.is_empty() {
            Route::Reencode
        } else {
            let segments = gop_segments(table, range, &touched);
            if segments.iter().all(|s| matches!(s, Segment::Copy(_))) {
                Route::StreamCopy
            } else if request.output.allow_splice {
                Route::Splice { segments }
            } else {
                reasons.push("splicing disabled".to_string());
                Route::Reencode
            }
        };

        let vfr = table.is_vfr();
        if route != Route::StreamCopy && vfr && !request.cfr_policy.converts() {
            return Err(MaskfxError::encode(
                "cannot re-encode a variable frame rate source with cfr policy 'keep-vfr'; \
                 choose 'remap', 'duplicate' or 'drop'",
            ));
        }

        let rate = request.cfr_rate.or_else(|| meta.nominal_frame_rate());
        let tb = table.time_base();
        let pts: Vec<i64> = range
            .iter()
            .filter_map(|i| table.pts_micros(i.0))
            .collect();
        let end_us = match table.pts_micros(range.end.0) {
            Some(next) => next,
            None => {
                let last = pts.last().copied().unwrap_or(0);
                let step = match pts.len() {
                    0 | 1 => rate.map_or(0, |r| r.frame_time_micros(1)),
                    n => pts[n - 1] - pts[n - 2],
                };
                last + step
            }
        };
        let mapping = FrameMapping::build(request.cfr_policy, range.start, &pts, end_us, rate)?;
        if route != Route::StreamCopy && rate.is_none() {
            return Err(MaskfxError::encode(format!(
                "source frame rate is unknown (time base {tb}); set a cfr rate to re-encode"
            )));
        }

        match &route {
            Route::StreamCopy => log.push("video: stream copy".to_string()),
            Route::Splice { segments } => {
                let re = segments
                    .iter()
                    .filter(|s| matches!(s, Segment::Reencode(_)))
                    .count();
                log.push(format!(
                    "video: spliced, {re} of {} segments re-encoded with {}",
                    segments.len(),
                    video_codec.encoder()
                ));
            }
            Route::Reencode => log.push(format!(
                "video: re-encoded with {} ({})",
                video_codec.encoder(),
                reasons.join(", ")
            )),
            Route::NativeRewrite => log.push("video: native y4m rewrite".to_string()),
        }
        if request.cfr_policy.converts()
            && let Some(r) = mapping.rate
        {
            log.push(format!(
                "timing: {:?} onto {r} fps, {} -> {} frames",
                request.cfr_policy,
                range.len_frames(),
                mapping.len()
            ));
        }
        let field_order = request.deinterlace.output_field_order(meta.field_order);
        if request.deinterlace.transforms() {
            log.push(format!(
                "fields: {} -> {}",
                meta.field_order.map_or("unknown", FieldOrder::label),
                field_order.map_or("unknown", FieldOrder::label)
            ));
        }
        if request.color_transform.is_requested() {
            log.push(format!("color: {:?}", request.color_transform));
        }
        tracing::debug!(?route, ?audio, container = container.name(), "encode plan");

        Ok(Self {
            route,
            audio,
            audio_passthrough: request.audio_passthrough,
            range,
            touched,
            container,
            video_codec,
            mapping,
            rate: if request.cfr_policy.converts() || !vfr { rate } else { None },
            deinterlace: request.deinterlace,
            field_order,
            color_transform: request.color_transform.clone(),
            quality: request.output.quality,
            log,
        })
    }

    /// Source frames the writer needs decoded and composited.
    pub fn frames_needed(&self) -> RangeSet {
        match &self.route {
            Route::StreamCopy => RangeSet::new(),
            Route::Splice { segments } => RangeSet::from_ranges(segments.iter().filter_map(|s| {
                match s {
                    Segment::Reencode(r) => Some(*r),
                    Segment::Copy(_) => None,
                }
            })),
            Route::Reencode | Route::NativeRewrite => RangeSet::from_ranges([self.range]),
        }
    }
}

fn plan_audio(
    meta: &Metadata,
    container: Container,
    request: &EncodeRequest,
    log: &mut Vec<String>,
) -> MaskfxResult<AudioRoute> {
    let Some(src) = meta.audio.as_ref() else {
        if request.audio_passthrough {
            return Err(MaskfxError::input(format!(
                "audio passthrough requested but '{}' has no audio stream",
                meta.path.display()
            )));
        }
        return Ok(AudioRoute::None);
    };
    if request.audio_passthrough {
        if !container.accepts_audio_copy(&src.codec) {
            return Err(MaskfxError::encode(format!(
                "container '{}' cannot carry a copied '{}' audio stream",
                container.name(),
                src.codec
            )));
        }
        log.push(format!("audio: {} copied bit-exact", src.codec));
        return Ok(AudioRoute::Copy);
    }
    let codec = request
        .output
        .audio_codec
        .clone()
        .or_else(|| container.default_audio_codec().map(str::to_string));
    Ok(match codec {
        Some(codec) => {
            log.push(format!("audio: {} transcoded to {codec}", src.codec));
            AudioRoute::Transcode { codec }
        }
        None => {
            log.push(format!(
                "audio: {} dropped, {} carries no audio",
                src.codec,
                container.name()
            ));
            AudioRoute::None
        }
    })
}

/// Split `range` at sync points. A GOP is copied when it starts on a keyframe and contains no
/// touched frame; adjacent segments of the same kind are merged.
fn gop_segments(table: &FrameTable, range: FrameRange, touched: &RangeSet) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut start = range.start.0;
    while start < range.end.0 {
        let end = table
            .next_keyframe_after(start)
            .unwrap_or(range.end.0)
            .min(range.end.0);
        let gop = FrameRange {
            start: FrameIndex(start),
            end: FrameIndex(end),
        };
        let on_key = table.entry(start).is_some_and(|e| e.keyframe);
        let seg = if on_key && !touched.intersects(gop) {
            Segment::Copy(gop)
        } else {
            Segment::Reencode(gop)
        };
        match (segments.last_mut(), seg) {
            (Some(Segment::Copy(r)), Segment::Copy(g))
            | (Some(Segment::Reencode(r)), Segment::Reencode(g)) => r.end = g.end,
            _ => segments.push(seg),
        }
        start = end;
    }
    segments
}

#[cfg(test)]
#[path = "../../tests/unit/encode/plan.rs"]
mod tests;
