use crate::encode::cfr::MappedFrame;
use crate::encode::ffmpeg::{self, AudioInput, FfmpegSink, FfmpegSinkOpts};
use crate::encode::plan::{AudioRoute, ColorTransform, EncodePlan, Route, Segment};
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::encode::y4m::Y4mSink;
use crate::foundation::core::{FrameIndex, FrameRange};
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::foundation::timecode::Timecode;
use crate::media::frame::Frame;
use crate::media::index::FrameTable;
use crate::media::metadata::{ChromaSubsampling, ColorInfo, Metadata};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Output file written under a hidden sibling name and renamed into place on commit.
///
/// Dropping an uncommitted guard removes the partial file, so a failed or cancelled job never
/// leaves a truncated output behind.
#[derive(Debug)]
pub struct PartialOutput {
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PartialOutput {
    /// Reserve a temporary sibling of `target`.
    pub fn new(target: impl Into<PathBuf>) -> MaskfxResult<Self> {
        let target = target.into();
        crate::encode::ensure_parent_dir(&target)?;
        let stem = target
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let ext = target.extension().and_then(|s| s.to_str()).unwrap_or("tmp");
        let temp = target.with_file_name(format!(
            ".{stem}.{}.partial.{ext}",
            uuid::Uuid::new_v4().simple()
        ));
        Ok(Self {
            temp,
            target,
            committed: false,
        })
    }

    /// Path writers should write to.
    pub fn path(&self) -> &Path {
        &self.temp
    }

    /// Final output path.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Move the finished file into place.
    pub fn commit(mut self) -> MaskfxResult<PathBuf> {
        std::fs::rename(&self.temp, &self.target).map_err(|e| {
            MaskfxError::encode(format!(
                "move '{}' into place at '{}': {e}",
                self.temp.display(),
                self.target.display()
            ))
        })?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

/// Scratch files removed on drop.
struct ScratchFiles(Vec<PathBuf>);

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for p in &self.0 {
            let _ = std::fs::remove_file(p);
        }
    }
}

/// What a finished write did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteSummary {
    /// Final output path.
    pub path: PathBuf,
    /// Output video frames pushed through a sink (zero for stream copy).
    pub frames_encoded: u64,
    /// Output video frames in total.
    pub frames_total: u64,
}

/// Writes one planned output.
///
/// `frames` must yield the composited frames of [`EncodePlan::frames_needed`] in ascending index
/// order; an `Err` item aborts the write.
pub struct Muxer<'a> {
    plan: &'a EncodePlan,
    meta: &'a Metadata,
    table: &'a FrameTable,
}

impl<'a> Muxer<'a> {
    /// Muxer for `plan` over a source described by `meta` and `table`.
    pub fn new(plan: &'a EncodePlan, meta: &'a Metadata, table: &'a FrameTable) -> Self {
        Self { plan, meta, table }
    }

    /// Stream properties handed to sinks.
    pub fn sink_config(&self) -> MaskfxResult<SinkConfig> {
        let rate = self
            .plan
            .rate
            .ok_or_else(|| MaskfxError::encode("output frame rate is unknown"))?;
        Ok(SinkConfig {
            width: self.meta.width,
            height: self.meta.height,
            rate,
            color: output_color(self.plan, self.meta),
            field_order: self.plan.field_order,
            subsampling: self.meta.subsampling.unwrap_or(ChromaSubsampling::Cs420),
            bit_depth: self.meta.bit_depth.unwrap_or(8),
            hdr: if tone_mapped(self.plan) {
                None
            } else {
                self.meta.hdr
            },
            start_timecode: output_timecode(self.plan, self.meta)?,
            reel_name: self.meta.reel_name.clone(),
        })
    }

    /// Audio input covering the planned range.
    fn audio_input(&self) -> Option<AudioInput> {
        if self.plan.audio == AudioRoute::None {
            return None;
        }
        let first = self.table.pts_micros(0).unwrap_or(0);
        let start = self
            .table
            .pts_micros(self.plan.range.start.0)
            .unwrap_or(first)
            - first;
        let duration_secs = self
            .table
            .pts_micros(self.plan.range.end.0)
            .map(|end| (end - first - start) as f64 / 1_000_000.0);
        Some(AudioInput {
            source: self.meta.path.clone(),
            start_secs: start as f64 / 1_000_000.0,
            duration_secs,
            route: self.plan.audio.clone(),
        })
    }

    /// Write the output to `out_path`.
    #[tracing::instrument(skip_all, fields(out = %out_path.display()))]
    pub fn write<I>(&self, out_path: &Path, frames: I) -> MaskfxResult<WriteSummary>
    where
        I: IntoIterator<Item = MaskfxResult<Arc<Frame>>>,
    {
        let mut frames = frames.into_iter();
        let guard = PartialOutput::new(out_path)?;
        let total = self.plan.mapping.len() as u64;
        let encoded = match &self.plan.route {
            Route::StreamCopy => {
                ffmpeg::stream_copy(
                    &self.meta.path,
                    self.table,
                    self.plan.range,
                    &self.plan.audio,
                    self.plan.container,
                    guard.path(),
                )?;
                0
            }
            Route::NativeRewrite => {
                let mut sink = Y4mSink::new(guard.path());
                push_mapped(
                    &mut sink,
                    self.sink_config()?,
                    self.plan.mapping.frames(),
                    &mut frames,
                )?
            }
            Route::Reencode => {
                let opts = FfmpegSinkOpts::from_plan(self.plan, guard.path())
                    .with_audio(self.audio_input());
                let mut sink = FfmpegSink::new(opts);
                push_mapped(
                    &mut sink,
                    self.sink_config()?,
                    self.plan.mapping.frames(),
                    &mut frames,
                )?
            }
            Route::Splice { segments } => self.splice(segments, guard.path(), &mut frames)?,
        };
        let path = guard.commit()?;
        tracing::info!(
            route = ?self.plan.route,
            frames_encoded = encoded,
            frames_total = total,
            "output written"
        );
        Ok(WriteSummary {
            path,
            frames_encoded: encoded,
            frames_total: total,
        })
    }

    fn splice(
        &self,
        segments: &[Segment],
        out: &Path,
        frames: &mut dyn Iterator<Item = MaskfxResult<Arc<Frame>>>,
    ) -> MaskfxResult<u64> {
        let paths = ffmpeg::segment_paths(out, segments);
        let scratch = ScratchFiles(paths.clone());
        let mut encoded = 0;
        for (seg, path) in segments.iter().zip(&paths) {
            match *seg {
                Segment::Copy(r) => ffmpeg::stream_copy(
                    &self.meta.path,
                    self.table,
                    r,
                    &AudioRoute::None,
                    self.plan.container,
                    path,
                )?,
                Segment::Reencode(r) => {
                    let mut sink = FfmpegSink::new(FfmpegSinkOpts::from_plan(self.plan, path));
                    encoded += push_mapped(
                        &mut sink,
                        self.sink_config()?,
                        self.mapped_slice(r),
                        frames,
                    )?;
                }
            }
        }
        ffmpeg::concat_segments(
            &paths,
            self.audio_input().as_ref(),
            self.plan.container,
            out,
        )?;
        drop(scratch);
        Ok(encoded)
    }

    /// Mapped frames showing sources in `r`; splices never convert timing, so the mapping is
    /// one-to-one.
    fn mapped_slice(&self, r: FrameRange) -> &[MappedFrame] {
        let base = self.plan.range.start.0;
        let all = self.plan.mapping.frames();
        let lo = (r.start.0.saturating_sub(base) as usize).min(all.len());
        let hi = (r.end.0.saturating_sub(base) as usize).min(all.len());
        &all[lo..hi]
    }
}

fn tone_mapped(plan: &EncodePlan) -> bool {
    matches!(plan.color_transform, ColorTransform::ToneMapHdrToSdr { .. })
}

/// Color tags the output of `plan` carries.
pub(crate) fn output_color(plan: &EncodePlan, meta: &Metadata) -> ColorInfo {
    if tone_mapped(plan) {
        ColorInfo {
            primaries: Some("bt709".to_string()),
            matrix: Some("bt709".to_string()),
            transfer: Some("bt709".to_string()),
            range: meta.color.range,
        }
    } else {
        meta.color.clone()
    }
}

/// Start timecode of the output: the source's, advanced to the first rendered frame.
pub(crate) fn output_timecode(plan: &EncodePlan, meta: &Metadata) -> MaskfxResult<Option<String>> {
    match (meta.start_timecode.as_deref(), meta.nominal_frame_rate()) {
        (Some(tc), Some(rate)) => Ok(Some(
            Timecode::parse(tc)?.offset(plan.range.start.0, rate)?.to_string(),
        )),
        _ => Ok(None),
    }
}

/// Push `mapped` output frames into `sink`, pulling source frames from `frames` as needed.
///
/// Repeated sources (duplication) reuse the held frame; skipped sources (decimation) are pulled
/// and discarded.
fn push_mapped(
    sink: &mut dyn FrameSink,
    cfg: SinkConfig,
    mapped: &[MappedFrame],
    frames: &mut dyn Iterator<Item = MaskfxResult<Arc<Frame>>>,
) -> MaskfxResult<u64> {
    sink.begin(cfg)?;
    let mut current: Option<Arc<Frame>> = None;
    for (k, m) in mapped.iter().enumerate() {
        while current.as_ref().is_none_or(|f| f.index < m.source) {
            let next = frames.next().ok_or_else(|| {
                MaskfxError::encode(format!(
                    "frame source ended before source frame {}",
                    m.source.0
                ))
            })??;
            current = Some(next);
        }
        let Some(frame) = current.as_deref() else {
            continue;
        };
        if frame.index != m.source {
            return Err(MaskfxError::encode(format!(
                "source frame {} was not delivered (got {})",
                m.source.0, frame.index.0
            )));
        }
        sink.push_frame(FrameIndex(k as u64), frame)?;
    }
    sink.end()?;
    Ok(mapped.len() as u64)
}

#[cfg(test)]
#[path = "../../tests/unit/encode/muxer.rs"]
mod tests;
