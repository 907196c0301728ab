//! System `ffprobe`/`ffmpeg` process plumbing for the decode side.
//!
//! Everything that spawns a tool goes through [`tool_command`], which fails without the
//! `media-ffmpeg` feature. ffmpeg's CLI and JSON shapes stay inside `media`.

use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::frame::PixelData;
use crate::media::index::PacketInfo;
use crate::media::metadata::{AudioInfo, Metadata};
use crate::media::probe::{parse_packets_json, parse_probe_json};
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

/// Build a command for `tool` (`ffmpeg` or `ffprobe`).
#[cfg(feature = "media-ffmpeg")]
pub(crate) fn tool_command(tool: &str) -> MaskfxResult<Command> {
    let mut cmd = Command::new(tool);
    cmd.arg("-hide_banner");
    Ok(cmd)
}

/// Build a command for `tool` (`ffmpeg` or `ffprobe`).
///
/// Returns an error when `media-ffmpeg` feature is disabled.
#[cfg(not(feature = "media-ffmpeg"))]
pub(crate) fn tool_command(tool: &str) -> MaskfxResult<Command> {
    Err(MaskfxError::input(format!(
        "{tool} support requires the 'media-ffmpeg' feature"
    )))
}

/// Return `true` when both `ffmpeg` and `ffprobe` can be invoked from `PATH`.
pub fn ffmpeg_tools_available() -> bool {
    ["ffmpeg", "ffprobe"].iter().all(|tool| {
        tool_command(tool).is_ok_and(|mut cmd| {
            cmd.arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        })
    })
}

/// Run a command to completion, returning stdout; a non-zero exit maps through `err`.
pub(crate) fn run_capture(
    mut cmd: Command,
    what: &str,
    err: fn(String) -> MaskfxError,
) -> MaskfxResult<Vec<u8>> {
    tracing::debug!(command = ?cmd, "running {what}");
    let out = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| err(format!("failed to run {what}: {e}")))?;
    if !out.status.success() {
        return Err(err(format!(
            "{what} exited with status {}: {}",
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    Ok(out.stdout)
}

/// Probe container and stream properties.
pub(crate) fn probe_metadata(path: &Path) -> MaskfxResult<Metadata> {
    let mut cmd = tool_command("ffprobe")?;
    cmd.args([
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_streams",
        "-show_format",
    ])
    .arg(path);
    let out = run_capture(cmd, "ffprobe", MaskfxError::UnsupportedContainer)?;
    parse_probe_json(path, &out)
}

/// List the first video stream's packets in decode order.
pub(crate) fn probe_packets(path: &Path) -> MaskfxResult<Vec<PacketInfo>> {
    let mut cmd = tool_command("ffprobe")?;
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "packet=pts,dts,flags",
        "-of",
        "json",
    ])
    .arg(path);
    let out = run_capture(cmd, "ffprobe packet scan", MaskfxError::CorruptFile)?;
    parse_packets_json(&out)
}

/// Live `ffmpeg` process emitting raw RGB pictures on stdout.
pub(crate) struct FfmpegDecoder {
    child: Child,
    stdout: ChildStdout,
    stderr_drain: Option<std::thread::JoinHandle<Vec<u8>>>,
    width: u32,
    height: u32,
    wide: bool,
    frame_bytes: usize,
}

impl FfmpegDecoder {
    /// Start decoding `path` at `start_secs` (relative to the stream start).
    pub(crate) fn spawn(
        path: &Path,
        start_secs: f64,
        width: u32,
        height: u32,
        wide: bool,
        hwaccel: bool,
    ) -> MaskfxResult<Self> {
        let mut cmd = tool_command("ffmpeg")?;
        cmd.args(["-v", "error", "-nostdin"]);
        if hwaccel {
            cmd.args(["-hwaccel", "auto"]);
        }
        if start_secs > 0.0 {
            cmd.args(["-ss", &format!("{start_secs:.6}")]);
        }
        cmd.arg("-i").arg(path).args([
            "-map",
            "0:v:0",
            "-fps_mode",
            "passthrough",
            "-f",
            "rawvideo",
            "-pix_fmt",
            if wide { "rgb48le" } else { "rgb24" },
            "pipe:1",
        ]);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        tracing::debug!(command = ?cmd, "spawning ffmpeg decoder");

        let mut child = cmd
            .spawn()
            .map_err(|e| MaskfxError::decode(format!("failed to spawn ffmpeg: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MaskfxError::decode("failed to open ffmpeg stdout (unexpected)"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| MaskfxError::decode("failed to open ffmpeg stderr (unexpected)"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            let _ = stderr.read_to_end(&mut bytes);
            bytes
        });

        let samples = width as usize * height as usize * 3;
        Ok(Self {
            child,
            stdout,
            stderr_drain: Some(stderr_drain),
            width,
            height,
            wide,
            frame_bytes: if wide { samples * 2 } else { samples },
        })
    }

    /// Read the next picture, `None` once ffmpeg closes its output cleanly.
    pub(crate) fn next_picture(&mut self) -> MaskfxResult<Option<PixelData>> {
        let mut buf = vec![0u8; self.frame_bytes];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .stdout
                .read(&mut buf[filled..])
                .map_err(|e| MaskfxError::decode(format!("ffmpeg pipe read failed: {e}")))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            self.finish()?;
            return Ok(None);
        }
        if filled < buf.len() {
            return Err(MaskfxError::decode(format!(
                "ffmpeg emitted a partial {}x{} picture ({filled} of {} bytes)",
                self.width,
                self.height,
                buf.len()
            )));
        }
        Ok(Some(if self.wide {
            PixelData::Rgb16(
                buf.chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            )
        } else {
            PixelData::Rgb8(buf)
        }))
    }

    fn finish(&mut self) -> MaskfxResult<()> {
        let status = self
            .child
            .wait()
            .map_err(|e| MaskfxError::decode(format!("failed to wait for ffmpeg: {e}")))?;
        let stderr = self
            .stderr_drain
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        if !status.success() {
            return Err(MaskfxError::decode(format!(
                "ffmpeg decoder exited with status {status}: {}",
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        Ok(())
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Raw PCM sample format matching a decoded sample format, so no conversion happens.
///
/// Planar formats map to their interleaved counterpart; the sample values are unchanged.
pub(crate) fn native_pcm_format(sample_fmt: Option<&str>) -> MaskfxResult<&'static str> {
    let fmt = sample_fmt.unwrap_or("");
    let packed = fmt.strip_suffix('p').unwrap_or(fmt);
    match packed {
        "u8" => Ok("u8"),
        "s16" => Ok("s16le"),
        "s32" => Ok("s32le"),
        "s64" => Ok("s64le"),
        "flt" => Ok("f32le"),
        "dbl" => Ok("f64le"),
        other => Err(MaskfxError::input(format!(
            "audio sample format '{other}' has no raw PCM equivalent"
        ))),
    }
}

/// Stream the first audio stream's decoded PCM, in its native format, into `sink`.
///
/// No resampling, channel remixing or format conversion is requested. Returns the byte count.
pub(crate) fn stream_audio_pcm(
    path: &Path,
    audio: &AudioInfo,
    mut sink: impl FnMut(&[u8]),
) -> MaskfxResult<u64> {
    let pcm = native_pcm_format(audio.sample_fmt.as_deref())?;
    let mut cmd = tool_command("ffmpeg")?;
    cmd.args(["-v", "error", "-nostdin", "-i"])
        .arg(path)
        .args([
            "-map",
            "0:a:0",
            "-vn",
            "-c:a",
            &format!("pcm_{pcm}"),
            "-f",
            pcm,
            "pipe:1",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    tracing::debug!(command = ?cmd, "spawning ffmpeg audio decode");

    let mut child = cmd
        .spawn()
        .map_err(|e| MaskfxError::decode(format!("failed to spawn ffmpeg: {e}")))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| MaskfxError::decode("failed to open ffmpeg stdout (unexpected)"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| MaskfxError::decode("failed to open ffmpeg stderr (unexpected)"))?;
    let stderr_drain = std::thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = stderr.read_to_end(&mut bytes);
        bytes
    });

    let mut total = 0u64;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = stdout
            .read(&mut buf)
            .map_err(|e| MaskfxError::decode(format!("ffmpeg audio pipe read failed: {e}")))?;
        if n == 0 {
            break;
        }
        sink(&buf[..n]);
        total += n as u64;
    }

    let status = child
        .wait()
        .map_err(|e| MaskfxError::decode(format!("failed to wait for ffmpeg: {e}")))?;
    let stderr = stderr_drain.join().unwrap_or_default();
    if !status.success() {
        return Err(MaskfxError::decode(format!(
            "ffmpeg audio decode of '{}' failed: {}",
            path.display(),
            String::from_utf8_lossy(&stderr).trim()
        )));
    }
    Ok(total)
}

#[cfg(test)]
#[path = "../../tests/unit/media/ffmpeg.rs"]
mod tests;
