//! Source reader: open, seek and decode frames through an enumerated backend.

use crate::foundation::core::{FrameIndex, FrameRange, Rational};
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::foundation::timecode::Timecode;
use crate::media::ffmpeg::{self, FfmpegDecoder};
use crate::media::frame::{Frame, NativePayload, PixelData};
use crate::media::index::FrameTable;
use crate::media::metadata::{ColorInfo, Metadata};
use crate::media::y4m::{self, Y4mDecoder};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which decode backend to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendChoice {
    /// `.y4m` files use the native backend, everything else ffmpeg.
    #[default]
    Auto,
    /// System `ffprobe`/`ffmpeg`.
    Ffmpeg,
    /// Native YUV4MPEG2 demuxer.
    Y4m,
}

impl BackendChoice {
    fn resolve(self, path: &Path) -> BackendChoice {
        match self {
            Self::Auto => {
                let is_y4m = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("y4m"));
                if is_y4m { Self::Y4m } else { Self::Ffmpeg }
            }
            other => other,
        }
    }
}

/// Options for [`SourceReader::open`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Backend selection.
    pub backend: BackendChoice,
    /// Ask ffmpeg for hardware-accelerated decoding.
    pub gpu_acceleration: bool,
}

/// One decoded picture before timing metadata is attached.
struct RawPicture {
    pixels: PixelData,
    native: Option<NativePayload>,
}

struct FfmpegBackend {
    path: PathBuf,
    width: u32,
    height: u32,
    wide: bool,
    hwaccel: bool,
    decoder: Option<FfmpegDecoder>,
}

impl FfmpegBackend {
    fn start_at(&mut self, start_secs: f64) -> MaskfxResult<()> {
        self.decoder = None;
        self.decoder = Some(FfmpegDecoder::spawn(
            &self.path,
            start_secs,
            self.width,
            self.height,
            self.wide,
            self.hwaccel,
        )?);
        Ok(())
    }
}

struct Y4mBackend {
    decoder: Y4mDecoder,
}

enum Backend {
    Ffmpeg(FfmpegBackend),
    Y4m(Y4mBackend),
}

impl Backend {
    /// Position the backend so the next picture is frame `keyframe`.
    fn start_at(&mut self, keyframe: u64, table: &FrameTable, rate: Rational) -> MaskfxResult<()> {
        match self {
            Self::Ffmpeg(b) => {
                let first = table.pts_micros(0).unwrap_or(0);
                let at = table.pts_micros(keyframe).unwrap_or(first);
                // Half a frame early so rounding inside ffmpeg cannot skip the keyframe.
                let half_frame = rate.frame_duration_secs() / 2.0;
                let secs = ((at - first) as f64 / 1_000_000.0 - half_frame).max(0.0);
                let secs = if keyframe == 0 { 0.0 } else { secs };
                b.start_at(secs)
            }
            Self::Y4m(b) => b.decoder.start_at(keyframe),
        }
    }

    fn next_picture(&mut self) -> MaskfxResult<Option<RawPicture>> {
        match self {
            Self::Ffmpeg(b) => {
                let Some(decoder) = b.decoder.as_mut() else {
                    return Err(MaskfxError::decode("ffmpeg decoder is not running"));
                };
                Ok(decoder.next_picture()?.map(|pixels| RawPicture {
                    pixels,
                    native: None,
                }))
            }
            Self::Y4m(b) => {
                let range = b.decoder.header.range;
                Ok(b.decoder.next_payload()?.map(|payload| RawPicture {
                    pixels: y4m::payload_to_rgb(&payload, range),
                    native: Some(payload),
                }))
            }
        }
    }

    fn close(&mut self) {
        if let Self::Ffmpeg(b) = self {
            b.decoder = None;
        }
    }
}

/// An opened video source.
///
/// Sequential reads stream from one live decode; a non-sequential [`SourceReader::read_frame`]
/// restarts decoding at the nearest keyframe at or before the target.
pub struct SourceReader {
    metadata: Metadata,
    table: FrameTable,
    rate: Rational,
    start_timecode: Option<Timecode>,
    backend: Backend,
    /// Index of the picture the live decode will emit next.
    cursor: Option<u64>,
    /// Index `read_next` decodes.
    position: u64,
    warnings: Vec<String>,
}

impl SourceReader {
    /// Open and index `path`.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, opts: &ReaderOptions) -> MaskfxResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(MaskfxError::input(format!(
                "source '{}' does not exist or is not a file",
                path.display()
            )));
        }
        let reader = match opts.backend.resolve(path) {
            BackendChoice::Y4m => Self::open_y4m(path)?,
            _ => Self::open_ffmpeg(path, opts)?,
        };
        for w in &reader.warnings {
            tracing::warn!(path = %path.display(), "{w}");
        }
        tracing::debug!(
            frames = reader.table.len(),
            vfr = reader.metadata.vfr,
            codec = %reader.metadata.codec,
            "source opened"
        );
        Ok(reader)
    }

    fn open_ffmpeg(path: &Path, opts: &ReaderOptions) -> MaskfxResult<Self> {
        let mut metadata = ffmpeg::probe_metadata(path)?;
        let packets = ffmpeg::probe_packets(path)?;
        let (table, warnings) = FrameTable::from_packets(&packets, metadata.time_base);
        if table.is_empty() {
            return Err(MaskfxError::corrupt(format!(
                "'{}' contains no decodable video frame",
                path.display()
            )));
        }
        metadata.frame_count = Some(table.len());
        metadata.vfr = metadata.vfr || table.is_vfr();
        if metadata.duration_us.is_none() {
            metadata.duration_us = table.duration_micros();
        }
        let rate = metadata
            .nominal_frame_rate()
            .unwrap_or_else(|| metadata.time_base.recip());
        let wide = metadata.bit_depth.is_some_and(|d| d > 8);
        let backend = Backend::Ffmpeg(FfmpegBackend {
            path: path.to_path_buf(),
            width: metadata.width,
            height: metadata.height,
            wide,
            hwaccel: opts.gpu_acceleration,
            decoder: None,
        });
        Self::assemble(metadata, table, rate, backend, warnings)
    }

    fn open_y4m(path: &Path) -> MaskfxResult<Self> {
        let (decoder, warnings) = Y4mDecoder::open(path)?;
        let h = decoder.header.clone();
        let frames = decoder.frame_count();
        let table = FrameTable::constant_rate(frames, h.rate);
        let pix_fmt = match (h.subsampling.digits(), h.bit_depth) {
            ("400", 8) => "gray".to_string(),
            ("400", d) => format!("gray{d}le"),
            (digits, 8) => format!("yuv{digits}p"),
            (digits, d) => format!("yuv{digits}p{d}le"),
        };
        let metadata = Metadata {
            path: path.to_path_buf(),
            container: "yuv4mpegpipe".to_string(),
            codec: "rawvideo".to_string(),
            width: h.width,
            height: h.height,
            avg_frame_rate: Some(h.rate),
            declared_frame_rate: Some(h.rate),
            time_base: h.rate.recip(),
            frame_count: Some(frames),
            vfr: false,
            duration_us: table.duration_micros(),
            pix_fmt: Some(pix_fmt),
            bit_depth: Some(h.bit_depth),
            subsampling: Some(h.subsampling),
            field_order: h.field_order,
            color: ColorInfo {
                range: h.range,
                ..ColorInfo::default()
            },
            hdr: None,
            start_timecode: None,
            reel_name: None,
            audio: None,
        };
        Self::assemble(
            metadata,
            table,
            h.rate,
            Backend::Y4m(Y4mBackend { decoder }),
            warnings,
        )
    }

    fn assemble(
        metadata: Metadata,
        table: FrameTable,
        rate: Rational,
        backend: Backend,
        mut warnings: Vec<String>,
    ) -> MaskfxResult<Self> {
        let start_timecode = match metadata.start_timecode.as_deref() {
            Some(tc) => match Timecode::parse(tc) {
                Ok(tc) => Some(tc),
                Err(e) => {
                    warnings.push(format!("ignoring start timecode: {e}"));
                    None
                }
            },
            None => None,
        };
        Ok(Self {
            metadata,
            table,
            rate,
            start_timecode,
            backend,
            cursor: None,
            position: 0,
            warnings,
        })
    }

    /// Container and stream properties.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Seek table in presentation order.
    pub fn frame_table(&self) -> &FrameTable {
        &self.table
    }

    /// Number of decodable frames.
    pub fn frame_count(&self) -> u64 {
        self.table.len()
    }

    /// Frame rate used for timecode derivation.
    pub fn frame_rate(&self) -> Rational {
        self.rate
    }

    /// Non-fatal problems found while indexing (skipped packets, truncated tail).
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Decode frame `index`, or `None` past the end of the stream.
    pub fn read_frame(&mut self, index: FrameIndex) -> MaskfxResult<Option<Frame>> {
        let i = index.0;
        if i >= self.table.len() {
            return Ok(None);
        }
        let keyframe = self
            .table
            .keyframe_at_or_before(i)
            .ok_or_else(|| MaskfxError::decode(format!("no keyframe at or before frame {i}")))?;

        let mut c = match self.cursor {
            Some(c) if c <= i && keyframe <= c => c,
            _ => {
                self.backend.start_at(keyframe, &self.table, self.rate)?;
                self.cursor = Some(keyframe);
                keyframe
            }
        };
        while c < i {
            if self.pull()?.is_none() {
                return Err(self.ended_early(c, i));
            }
            c += 1;
        }
        let raw = self.pull()?.ok_or_else(|| self.ended_early(c, i))?;
        self.position = i + 1;
        self.build_frame(i, raw).map(Some)
    }

    fn pull(&mut self) -> MaskfxResult<Option<RawPicture>> {
        let pic = self.backend.next_picture();
        match &pic {
            Ok(Some(_)) => self.cursor = self.cursor.map(|c| c + 1),
            _ => self.cursor = None,
        }
        pic
    }

    fn ended_early(&mut self, at: u64, target: u64) -> MaskfxError {
        self.cursor = None;
        MaskfxError::decode(format!(
            "decoder stopped at frame {at} before reaching frame {target} of '{}'",
            self.metadata.path.display()
        ))
    }

    fn build_frame(&self, index: u64, raw: RawPicture) -> MaskfxResult<Frame> {
        let entry = self
            .table
            .entry(index)
            .ok_or_else(|| MaskfxError::decode(format!("frame {index} missing from seek table")))?;
        let timecode = match self.start_timecode {
            Some(tc) => Some(tc.offset(index, self.rate)?.to_string()),
            None => None,
        };
        let frame = Frame {
            index: FrameIndex(index),
            width: self.metadata.width,
            height: self.metadata.height,
            pixels: raw.pixels,
            pts: entry.pts,
            dts: entry.dts,
            time_base: self.table.time_base(),
            timecode,
            color: self.metadata.color.clone(),
            bit_depth: self.metadata.bit_depth,
            subsampling: self.metadata.subsampling,
            field_order: self.metadata.field_order,
            hdr: self.metadata.hdr,
            keyframe: entry.keyframe,
            native: raw.native.map(Arc::new),
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Sequentially decode `range`, clamped to the stream.
    pub fn read_frames(
        &mut self,
        range: FrameRange,
    ) -> impl Iterator<Item = MaskfxResult<Frame>> + '_ {
        let end = range.end.0.min(self.table.len());
        (range.start.0..end).map_while(move |i| match self.read_frame(FrameIndex(i)) {
            Ok(Some(f)) => Some(Ok(f)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        })
    }

    /// Move the read position to the first frame with pts at or after `pts_us`, measured from
    /// the first frame. Negative targets are rejected like targets past the end.
    pub fn seek(&mut self, pts_us: i64) -> MaskfxResult<FrameIndex> {
        if self.table.is_empty() {
            return Err(MaskfxError::decode("source has no seek table"));
        }
        if pts_us < 0 {
            return Err(MaskfxError::decode(format!(
                "seek to {pts_us} us is before the start of '{}'",
                self.metadata.path.display()
            )));
        }
        let first = self.table.pts_micros(0).unwrap_or(0);
        let index = self
            .table
            .index_at_or_after_micros(first + pts_us)
            .ok_or_else(|| {
                MaskfxError::decode(format!(
                    "seek to {pts_us} us is past the end of '{}'",
                    self.metadata.path.display()
                ))
            })?;
        self.position = index;
        Ok(FrameIndex(index))
    }

    /// Decode the frame at the read position and advance it.
    pub fn read_next(&mut self) -> MaskfxResult<Option<Frame>> {
        self.read_frame(FrameIndex(self.position))
    }

    /// Release the decode process. Further reads restart it.
    pub fn close(&mut self) {
        self.backend.close();
        self.cursor = None;
    }
}

impl Drop for SourceReader {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/media/reader.rs"]
mod tests;
