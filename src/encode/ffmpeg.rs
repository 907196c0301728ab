//! System `ffmpeg` writer: raw RGB frames on stdin, encoded and muxed with source audio.
//!
//! Stream copy and GOP splicing also live here, since both are plain ffmpeg invocations.

use crate::encode::plan::{
    AudioRoute, ColorTransform, Container, DeinterlacePolicy, EncodePlan, Segment, VideoCodec,
};
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{FrameIndex, FrameRange};
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::ffmpeg::{run_capture, tool_command};
use crate::media::frame::{Frame, PixelData};
use crate::media::index::FrameTable;
use crate::media::metadata::{ChromaSubsampling, ColorRange, FieldOrder};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Stdio};

/// Source audio muxed next to the encoded video.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioInput {
    /// File whose first audio stream is used.
    pub source: PathBuf,
    /// Offset into the source, in seconds.
    pub start_secs: f64,
    /// Length to take, in seconds.
    pub duration_secs: Option<f64>,
    /// Copy or transcode.
    pub route: AudioRoute,
}

impl AudioInput {
    fn input_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.start_secs > 0.0 {
            args.extend(["-ss".to_string(), format!("{:.6}", self.start_secs)]);
        }
        if let Some(d) = self.duration_secs {
            args.extend(["-t".to_string(), format!("{d:.6}")]);
        }
        args.push("-i".to_string());
        args.push(self.source.display().to_string());
        args
    }

    fn codec_args(&self) -> Vec<String> {
        match &self.route {
            AudioRoute::None => vec!["-an".to_string()],
            AudioRoute::Copy => vec!["-c:a".to_string(), "copy".to_string()],
            AudioRoute::Transcode { codec } => vec!["-c:a".to_string(), codec.clone()],
        }
    }
}

/// Options for [`FfmpegSink`].
#[derive(Clone, Debug, PartialEq)]
pub struct FfmpegSinkOpts {
    /// Output file.
    pub out_path: PathBuf,
    /// Output container.
    pub container: Container,
    /// Output video codec.
    pub codec: VideoCodec,
    /// CRF / quantizer for lossy codecs.
    pub quality: Option<u8>,
    /// Field handling.
    pub deinterlace: DeinterlacePolicy,
    /// Color transform.
    pub color_transform: ColorTransform,
    /// Audio to mux in.
    pub audio: Option<AudioInput>,
}

impl FfmpegSinkOpts {
    /// Options for the video part of `plan`, without audio.
    pub fn from_plan(plan: &EncodePlan, out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            container: plan.container,
            codec: plan.video_codec,
            quality: plan.quality,
            deinterlace: plan.deinterlace,
            color_transform: plan.color_transform.clone(),
            audio: None,
        }
    }

    /// Attach audio.
    pub fn with_audio(mut self, audio: Option<AudioInput>) -> Self {
        self.audio = audio;
        self
    }
}

/// Pixel format of the encoded stream.
pub(crate) fn output_pix_fmt(codec: VideoCodec, sub: ChromaSubsampling, depth: u8) -> String {
    let max_depth = match codec {
        VideoCodec::H264 => 10,
        VideoCodec::Hevc | VideoCodec::Vp9 => 12,
        VideoCodec::ProRes => 10,
        VideoCodec::Ffv1 | VideoCodec::RawVideo => 16,
    };
    let sub = match (codec, sub) {
        (VideoCodec::ProRes, ChromaSubsampling::Cs444) => ChromaSubsampling::Cs444,
        (VideoCodec::ProRes, _) => ChromaSubsampling::Cs422,
        (VideoCodec::Ffv1, s) => s,
        (_, ChromaSubsampling::Mono) => ChromaSubsampling::Cs420,
        (_, s) => s,
    };
    let depth = match codec {
        VideoCodec::ProRes => 10,
        _ => depth.min(max_depth),
    };
    match (sub, depth) {
        (ChromaSubsampling::Mono, 8) => "gray".to_string(),
        (ChromaSubsampling::Mono, d) => format!("gray{d}le"),
        (s, 8) => format!("yuv{}p", s.digits()),
        (s, d) => format!("yuv{}p{d}le", s.digits()),
    }
}

/// `out_color_matrix` name for the RGB to YCbCr conversion.
fn scale_matrix(matrix: Option<&str>, height: u32) -> &'static str {
    match matrix {
        Some("bt709") => "bt709",
        Some("bt2020nc" | "bt2020c") => "bt2020",
        Some("smpte170m" | "bt470bg") => "bt601",
        Some("smpte240m") => "smpte240m",
        Some("fcc") => "fcc",
        _ if height >= 720 => "bt709",
        _ => "bt601",
    }
}

/// ffmpeg filters the conversion chain needs.
pub(crate) fn required_filters(opts: &FfmpegSinkOpts) -> Vec<&'static str> {
    let mut names = vec!["scale"];
    match opts.deinterlace {
        DeinterlacePolicy::Deinterlace => names.push("yadif"),
        DeinterlacePolicy::ReinterlaceTff | DeinterlacePolicy::ReinterlaceBff => {
            names.push("setfield")
        }
        DeinterlacePolicy::Keep => {}
    }
    match opts.color_transform {
        ColorTransform::ToneMapHdrToSdr { .. } => names.extend(["zscale", "tonemap"]),
        ColorTransform::Lut3d { .. } => names.push("lut3d"),
        ColorTransform::None => {}
    }
    names
}

/// Escape a path for use inside a filtergraph option value.
fn filter_path(path: &Path) -> String {
    path.display()
        .to_string()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Complete ffmpeg argument list for encoding frames described by `cfg` from stdin.
pub(crate) fn encoder_args(opts: &FfmpegSinkOpts, cfg: &SinkConfig) -> Vec<String> {
    let s = |v: &str| v.to_string();
    let wide = cfg.bit_depth > 8;
    let mut args: Vec<String> = vec![
        s("-y"),
        s("-loglevel"),
        s("error"),
        s("-f"),
        s("rawvideo"),
        s("-pix_fmt"),
        s(if wide { "rgb48le" } else { "rgb24" }),
        s("-s"),
        format!("{}x{}", cfg.width, cfg.height),
        s("-r"),
        format!("{}/{}", cfg.rate.num, cfg.rate.den),
        s("-i"),
        s("pipe:0"),
    ];
    if let Some(audio) = opts.audio.as_ref().filter(|a| a.route != AudioRoute::None) {
        args.extend(audio.input_args());
        args.extend([s("-map"), s("0:v:0"), s("-map"), s("1:a:0")]);
    } else {
        args.extend([s("-map"), s("0:v:0")]);
    }

    let tone_mapped = matches!(opts.color_transform, ColorTransform::ToneMapHdrToSdr { .. });
    let range = cfg.color.range.unwrap_or(ColorRange::Limited);
    let mut filters = Vec::new();
    match opts.deinterlace {
        DeinterlacePolicy::Deinterlace => filters.push(s("yadif=mode=send_frame")),
        DeinterlacePolicy::ReinterlaceTff => filters.push(s("setfield=tff")),
        DeinterlacePolicy::ReinterlaceBff => filters.push(s("setfield=bff")),
        DeinterlacePolicy::Keep => {}
    }
    match &opts.color_transform {
        ColorTransform::ToneMapHdrToSdr { curve } => {
            let tin = cfg.color.transfer.as_deref().unwrap_or("smpte2084");
            let pin = cfg.color.primaries.as_deref().unwrap_or("bt2020");
            filters.push(format!("zscale=tin={tin}:pin={pin}:t=linear:npl=100"));
            filters.push(s("format=gbrpf32le"));
            filters.push(s("zscale=p=bt709"));
            filters.push(format!("tonemap=tonemap={}:desat=0", curve.as_ffmpeg()));
            filters.push(s("zscale=t=bt709"));
        }
        ColorTransform::Lut3d { path } => {
            filters.push(format!("lut3d=file='{}'", filter_path(path)));
        }
        ColorTransform::None => {}
    }
    let matrix = if tone_mapped {
        "bt709"
    } else {
        scale_matrix(cfg.color.matrix.as_deref(), cfg.height)
    };
    filters.push(format!(
        "scale=out_color_matrix={matrix}:out_range={}",
        range.as_ffmpeg()
    ));
    let pix_fmt = output_pix_fmt(opts.codec, cfg.subsampling, cfg.bit_depth);
    filters.push(format!("format={pix_fmt}"));
    args.extend([s("-vf"), filters.join(",")]);

    args.extend([s("-c:v"), s(opts.codec.encoder()), s("-pix_fmt"), pix_fmt]);
    match opts.codec {
        VideoCodec::H264 | VideoCodec::Hevc => {
            if let Some(q) = opts.quality {
                args.extend([s("-crf"), q.to_string()]);
            }
        }
        VideoCodec::Vp9 => {
            args.extend([s("-b:v"), s("0")]);
            if let Some(q) = opts.quality {
                args.extend([s("-crf"), q.to_string()]);
            }
        }
        VideoCodec::ProRes => args.extend([s("-profile:v"), s("3")]),
        VideoCodec::Ffv1 => args.extend([s("-level"), s("3")]),
        VideoCodec::RawVideo => {}
    }
    // Interlaced output is field-coded, whether the fields were kept or rebuilt.
    let interlaced = (opts.deinterlace != DeinterlacePolicy::Deinterlace)
        .then_some(cfg.field_order)
        .flatten()
        .filter(|fo| fo.is_interlaced());
    let mut x265_params = Vec::new();
    match (interlaced, opts.codec) {
        (Some(_), VideoCodec::H264) => args.extend([s("-flags"), s("+ildct+ilme")]),
        (Some(fo), VideoCodec::Hevc) => x265_params.push(format!(
            "interlace={}",
            if fo == FieldOrder::TopFieldFirst { "tff" } else { "bff" }
        )),
        _ => {}
    }

    // Color tags.
    if tone_mapped {
        args.extend([
            s("-color_primaries"),
            s("bt709"),
            s("-color_trc"),
            s("bt709"),
            s("-colorspace"),
            s("bt709"),
        ]);
    } else {
        if let Some(p) = cfg.color.primaries.as_deref() {
            args.extend([s("-color_primaries"), s(p)]);
        }
        if let Some(t) = cfg.color.transfer.as_deref() {
            args.extend([s("-color_trc"), s(t)]);
        }
        if let Some(m) = cfg.color.matrix.as_deref() {
            args.extend([s("-colorspace"), s(m)]);
        }
    }
    args.extend([s("-color_range"), s(range.as_ffmpeg())]);
    if let Some(fo) = cfg.field_order {
        args.extend([s("-field_order"), s(fo.as_ffmpeg())]);
    }

    // HDR static metadata survives only through the encoder's own headers.
    if opts.codec == VideoCodec::Hevc
        && !tone_mapped
        && let Some(hdr) = cfg.hdr.as_ref().filter(|h| !h.is_empty())
    {
        x265_params.extend([s("hdr-opt=1"), s("repeat-headers=1")]);
        if let Some(md) = hdr.mastering.as_ref() {
            x265_params.push(format!("master-display={}", md.to_x265()));
        }
        if let Some(cl) = hdr.content_light {
            x265_params.push(format!("max-cll={},{}", cl.max_cll, cl.max_fall));
        }
    }
    if !x265_params.is_empty() {
        args.extend([s("-x265-params"), x265_params.join(":")]);
    }

    if let Some(tc) = cfg.start_timecode.as_deref() {
        args.extend([s("-timecode"), s(tc)]);
    }
    if let Some(reel) = cfg.reel_name.as_deref() {
        args.extend([s("-metadata:s:v:0"), format!("reel_name={reel}")]);
    }

    if let Some(audio) = opts.audio.as_ref() {
        args.extend(audio.codec_args());
    } else {
        args.push(s("-an"));
    }
    if matches!(opts.container, Container::Mp4 | Container::Mov) {
        args.extend([s("-movflags"), s("+faststart")]);
    }
    args.extend([s("-f"), s(opts.container.ffmpeg_format())]);
    args.push(opts.out_path.display().to_string());
    args
}

/// Return the names in `wanted` the local ffmpeg lacks.
pub(crate) fn missing_filters(wanted: &[&str]) -> MaskfxResult<Vec<String>> {
    let mut cmd = tool_command("ffmpeg")?;
    cmd.args(["-v", "error", "-filters"]);
    let out = run_capture(cmd, "ffmpeg -filters", MaskfxError::Encode)?;
    let listing = String::from_utf8_lossy(&out);
    let available: Vec<&str> = listing
        .lines()
        .filter_map(|l| l.split_whitespace().nth(1))
        .collect();
    Ok(wanted
        .iter()
        .filter(|w| !available.contains(w))
        .map(|w| w.to_string())
        .collect())
}

/// [`FrameSink`] that spawns ffmpeg and streams raw RGB into its stdin.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,
    scratch: Vec<u8>,
    cfg: Option<SinkConfig>,
    last_idx: Option<FrameIndex>,
}

impl FfmpegSink {
    /// Sink writing with `opts`; ffmpeg starts in `begin`.
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            scratch: Vec::new(),
            cfg: None,
            last_idx: None,
        }
    }

    fn fill_scratch(&mut self, pixels: &PixelData, wide: bool) {
        self.scratch.clear();
        match (pixels, wide) {
            (PixelData::Rgb8(v), false) => self.scratch.extend_from_slice(v),
            (PixelData::Rgb8(v), true) => self
                .scratch
                .extend(v.iter().flat_map(|s| (u16::from(*s) * 257).to_le_bytes())),
            (PixelData::Rgb16(v), true) => {
                self.scratch.extend(v.iter().flat_map(|s| s.to_le_bytes()))
            }
            (PixelData::Rgb16(v), false) => self
                .scratch
                .extend(v.iter().map(|s| ((u32::from(*s) * 255 + 32767) / 65535) as u8)),
        }
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> MaskfxResult<()> {
        cfg.validate()?;
        let (sx, sy) = output_sub_shifts(self.opts.codec, cfg.subsampling);
        if cfg.width % (1 << sx) != 0 || cfg.height % (1 << sy) != 0 {
            return Err(MaskfxError::encode(format!(
                "{}x{} cannot be encoded with {} chroma subsampling",
                cfg.width,
                cfg.height,
                cfg.subsampling.digits()
            )));
        }
        let missing = missing_filters(&required_filters(&self.opts))?;
        if !missing.is_empty() {
            return Err(MaskfxError::encode(format!(
                "local ffmpeg lacks required filters: {}",
                missing.join(", ")
            )));
        }
        crate::encode::ensure_parent_dir(&self.opts.out_path)?;

        let mut cmd = tool_command("ffmpeg")?;
        cmd.args(encoder_args(&self.opts, &cfg))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        tracing::debug!(command = ?cmd, "spawning ffmpeg encoder");

        let mut child = cmd
            .spawn()
            .map_err(|e| MaskfxError::encode(format!("failed to spawn ffmpeg: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MaskfxError::encode("failed to open ffmpeg stdin (unexpected)"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| MaskfxError::encode("failed to open ffmpeg stderr (unexpected)"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            stderr.read_to_end(&mut bytes)?;
            Ok(bytes)
        });

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        self.last_idx = None;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &Frame) -> MaskfxResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| MaskfxError::encode("ffmpeg sink not started"))?;
        if let Some(last) = self.last_idx
            && idx <= last
        {
            return Err(MaskfxError::encode(format!(
                "ffmpeg sink received frame {} after {}",
                idx.0, last.0
            )));
        }
        if frame.width != cfg.width || frame.height != cfg.height {
            return Err(MaskfxError::encode(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, cfg.width, cfg.height
            )));
        }
        self.last_idx = Some(idx);
        let wide = cfg.bit_depth > 8;
        self.fill_scratch(&frame.pixels, wide);

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(MaskfxError::encode("ffmpeg sink is already finalized"));
        };
        stdin.write_all(&self.scratch).map_err(|e| {
            MaskfxError::encode(format!("failed to write frame to ffmpeg stdin: {e}"))
        })
    }

    fn end(&mut self) -> MaskfxResult<()> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| MaskfxError::encode("ffmpeg sink not started"))?;
        let status = child
            .wait()
            .map_err(|e| MaskfxError::encode(format!("failed to wait for ffmpeg: {e}")))?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| MaskfxError::encode("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| MaskfxError::encode(format!("ffmpeg stderr read failed: {e}")))?,
            None => Vec::new(),
        };
        if !status.success() {
            return Err(MaskfxError::encode(format!(
                "ffmpeg encoder exited with status {status}: {}",
                String::from_utf8_lossy(&stderr_bytes).trim()
            )));
        }
        self.cfg = None;
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take()
            && matches!(child.try_wait(), Ok(None))
        {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn output_sub_shifts(codec: VideoCodec, sub: ChromaSubsampling) -> (u32, u32) {
    match (codec, sub) {
        (VideoCodec::ProRes, ChromaSubsampling::Cs444) => (0, 0),
        (VideoCodec::ProRes, _) => (1, 0),
        (VideoCodec::Ffv1, s) => s.shifts(),
        (_, ChromaSubsampling::Mono) => (1, 1),
        (_, s) => s.shifts(),
    }
}

fn secs(us: i64) -> String {
    format!("{:.6}", us as f64 / 1_000_000.0)
}

/// Copy `range` of the source's streams into `out` without decoding.
///
/// `range.start` must be a sync point. Audio follows `audio`.
pub(crate) fn stream_copy(
    source: &Path,
    table: &FrameTable,
    range: FrameRange,
    audio: &AudioRoute,
    container: Container,
    out: &Path,
) -> MaskfxResult<()> {
    let first = table.pts_micros(0).unwrap_or(0);
    let start = table.pts_micros(range.start.0).unwrap_or(first) - first;
    let mut cmd = tool_command("ffmpeg")?;
    cmd.args(["-y", "-loglevel", "error", "-nostdin"]);
    if start > 0 {
        cmd.args(["-ss", &secs(start)]);
    }
    cmd.arg("-i").arg(source).args([
        "-map",
        "0:v:0",
        "-frames:v",
        &range.len_frames().to_string(),
        "-c:v",
        "copy",
        "-map_metadata",
        "0",
    ]);
    match audio {
        AudioRoute::None => {
            cmd.arg("-an");
        }
        AudioRoute::Copy => {
            cmd.args(["-map", "0:a:0", "-c:a", "copy"]);
        }
        AudioRoute::Transcode { codec } => {
            cmd.args(["-map", "0:a:0", "-c:a", codec]);
        }
    }
    if let Some(end) = table.pts_micros(range.end.0) {
        cmd.args(["-t", &secs(end - first - start)]);
    }
    cmd.args(["-f", container.ffmpeg_format()]).arg(out);
    run_capture(cmd, "ffmpeg stream copy", MaskfxError::Encode)?;
    Ok(())
}

/// Concatenate video-only segment files and mux audio from the source.
pub(crate) fn concat_segments(
    segments: &[PathBuf],
    audio: Option<&AudioInput>,
    container: Container,
    out: &Path,
) -> MaskfxResult<()> {
    let list_path = out.with_extension("concat.txt");
    let mut list = String::new();
    for seg in segments {
        let escaped = seg.display().to_string().replace('\'', "'\\''");
        list.push_str(&format!("file '{escaped}'\n"));
    }
    std::fs::write(&list_path, list).map_err(|e| {
        MaskfxError::encode(format!("write concat list '{}': {e}", list_path.display()))
    })?;

    let mut cmd = tool_command("ffmpeg")?;
    cmd.args(["-y", "-loglevel", "error", "-nostdin", "-f", "concat", "-safe", "0", "-i"])
        .arg(&list_path);
    match audio.filter(|a| a.route != AudioRoute::None) {
        Some(a) => {
            cmd.args(a.input_args())
                .args(["-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy"])
                .args(a.codec_args());
        }
        None => {
            cmd.args(["-map", "0:v:0", "-c:v", "copy", "-an"]);
        }
    }
    cmd.args(["-f", container.ffmpeg_format()]).arg(out);
    let result = run_capture(cmd, "ffmpeg concat", MaskfxError::Encode);
    let _ = std::fs::remove_file(&list_path);
    result.map(|_| ())
}

/// Copy-segment plus re-encode-segment file names for a splice.
pub(crate) fn segment_paths(out: &Path, segments: &[Segment]) -> Vec<PathBuf> {
    let stem = out.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
    let ext = out.extension().and_then(|s| s.to_str()).unwrap_or("mkv");
    segments
        .iter()
        .enumerate()
        .map(|(i, _)| out.with_file_name(format!(".{stem}.seg{i:03}.{ext}")))
        .collect()
}

#[cfg(test)]
#[path = "../../tests/unit/encode/ffmpeg.rs"]
mod tests;
