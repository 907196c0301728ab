use crate::composite::compositor::composite;
use crate::composite::effects::EffectRegistry;
use crate::encode::muxer::{Muxer, WriteSummary};
use crate::encode::plan::EncodePlan;
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{MaskfxError, MaskfxResult, Stage};
use crate::masks::source::MaskSource;
use crate::media::frame::{Frame, PixelData};
use crate::media::reader::SourceReader;
use crate::quality::report::QualityReport;
use crate::quality::validator;
use crate::session::cancel::CancelToken;
use crate::session::config::PipelineConfig;
use crate::session::job::RenderJob;
use crate::store::frame_store::{FrameStore, StoreStats};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, mpsc};

/// What a finished job produced.
#[derive(Clone, Debug)]
pub struct JobOutcome {
    /// Job identifier.
    pub job_id: String,
    /// Written output.
    pub summary: WriteSummary,
    /// Transformations the plan applied.
    pub plan_log: Vec<String>,
    /// Source frames changed by compositing.
    pub frames_touched: u64,
    /// Frames the compositor produced new pixels for.
    pub frames_composited: u64,
    /// Frame cache counters at the end of the job.
    pub cache: StoreStats,
    /// Validation report, when validation ran.
    pub report: Option<QualityReport>,
    /// Where the report was saved.
    pub report_path: Option<PathBuf>,
}

/// Run `job`: decode, composite, encode, then validate the output.
///
/// Unset job policies take their `cfg` values. Fatal errors carry the job id and the stage that
/// raised them; a cancelled job returns [`MaskfxError::Cancelled`] and leaves no output file.
pub fn run_job(
    job: &RenderJob,
    cfg: &PipelineConfig,
    cancel: &CancelToken,
) -> MaskfxResult<JobOutcome> {
    let masks = job.mask_source().map_err(|e| e.in_job(&job.id, Stage::Plan))?;
    run_job_with(
        job,
        cfg,
        &EffectRegistry::with_builtins(),
        masks.as_ref(),
        cancel,
    )
}

/// [`run_job`] with a caller-built effect registry and mask source.
#[tracing::instrument(skip_all, fields(job = %job.id))]
pub fn run_job_with(
    job: &RenderJob,
    cfg: &PipelineConfig,
    registry: &EffectRegistry,
    masks: &dyn MaskSource,
    cancel: &CancelToken,
) -> MaskfxResult<JobOutcome> {
    let mut job = job.clone();
    job.apply_defaults(cfg);
    let id = job.id.as_str();
    let at = |stage: Stage| in_job(id, stage);

    cfg.validate().map_err(at(Stage::Plan))?;
    job.validate(registry).map_err(at(Stage::Plan))?;
    cancel.check().map_err(at(Stage::Open))?;

    let mut reader =
        SourceReader::open(&job.input, &cfg.reader_options()).map_err(at(Stage::Open))?;
    for w in reader.warnings() {
        tracing::warn!(warning = %w, "source indexing");
    }
    let meta = reader.metadata().clone();
    let table = reader.frame_table().clone();

    let plan = {
        let range = job.resolve_range(table.len()).map_err(at(Stage::Plan))?;
        let touched = job
            .touched_frames(masks, range)
            .map_err(at(Stage::Plan))?;
        EncodePlan::build(
            &meta,
            &table,
            &job.output,
            &job.encode_request(),
            range,
            touched,
        )
        .map_err(at(Stage::Plan))?
    };
    tracing::debug!(route = ?plan.route, audio = ?plan.audio, "output planned");
    for line in &plan.log {
        tracing::info!(%line, "plan");
    }
    cancel.check().map_err(at(Stage::Plan))?;

    let store = FrameStore::new(cfg.frame_cache);
    let stages = Stages {
        job: &job,
        cfg,
        registry,
        masks,
        plan: &plan,
        store: &store,
        cancel,
    };
    let (summary, composited) = stages.run(&mut reader, Muxer::new(&plan, &meta, &table))?;
    reader.close();

    let (report, report_path) = if cfg.validate_output {
        let report = validator::validate_plan(&job.input, &summary.path, &plan, &cfg.validator)
            .map_err(at(Stage::Validate))?;
        let path = QualityReport::default_path(&summary.path);
        report.save(&path).map_err(at(Stage::Validate))?;
        (Some(report), Some(path))
    } else {
        (None, None)
    };

    tracing::info!(
        output = %summary.path.display(),
        frames = summary.frames_total,
        composited,
        passed = report.as_ref().map(QualityReport::passed),
        "job finished"
    );
    Ok(JobOutcome {
        job_id: job.id.clone(),
        plan_log: plan.log.clone(),
        frames_touched: plan.touched.len_frames(),
        frames_composited: composited,
        cache: store.stats(),
        summary,
        report,
        report_path,
    })
}

/// Re-validate the existing output of `job` and save the report next to it.
pub fn validate_job(job: &RenderJob, cfg: &PipelineConfig) -> MaskfxResult<QualityReport> {
    let mut job = job.clone();
    job.apply_defaults(cfg);
    let report = validator::validate(&job.input, &job.output, &job, &cfg.validator)
        .and_then(|r| {
            r.save(&QualityReport::default_path(&job.output))?;
            Ok(r)
        })
        .map_err(|e| e.in_job(&job.id, Stage::Validate))?;
    Ok(report)
}

/// Composite one source frame of `job` and scale it to fit `max_side` pixels (`0` keeps the
/// source size).
pub fn render_preview(
    job: &RenderJob,
    cfg: &PipelineConfig,
    index: FrameIndex,
    max_side: u32,
) -> MaskfxResult<image::RgbImage> {
    let registry = EffectRegistry::with_builtins();
    job.validate(&registry)?;
    let masks = job.mask_source()?;
    let mut reader = SourceReader::open(&job.input, &cfg.reader_options())?;
    let frame = reader.read_frame(index)?.ok_or_else(|| {
        MaskfxError::input(format!(
            "frame {} is past the end of '{}' ({} frames)",
            index.0,
            job.input.display(),
            reader.frame_count()
        ))
    })?;
    let out = composite(
        &frame,
        &masks.masks_for(index)?,
        job.assignments.as_slice(),
        &registry,
        job.overlap,
    )?;
    let img = frame_to_image(&out)?;
    let img = if max_side > 0 && (out.width > max_side || out.height > max_side) {
        img.resize(max_side, max_side, image::imageops::FilterType::Triangle)
    } else {
        img
    };
    Ok(img.to_rgb8())
}

/// Decoded frame as an image of the same bit depth.
pub fn frame_to_image(frame: &Frame) -> MaskfxResult<image::DynamicImage> {
    let bad = || {
        MaskfxError::decode(format!(
            "frame {} buffer does not fit its size",
            frame.index.0
        ))
    };
    Ok(match &frame.pixels {
        PixelData::Rgb8(v) => image::DynamicImage::ImageRgb8(
            image::RgbImage::from_raw(frame.width, frame.height, v.clone()).ok_or_else(bad)?,
        ),
        PixelData::Rgb16(v) => image::DynamicImage::ImageRgb16(
            image::ImageBuffer::from_raw(frame.width, frame.height, v.clone()).ok_or_else(bad)?,
        ),
    })
}

fn in_job(job_id: &str, stage: Stage) -> impl Fn(MaskfxError) -> MaskfxError + '_ {
    move |e| e.in_job(job_id, stage)
}

/// Borrowed state shared by the decode, composite and encode stages of one job.
struct Stages<'a> {
    job: &'a RenderJob,
    cfg: &'a PipelineConfig,
    registry: &'a EffectRegistry,
    masks: &'a dyn MaskSource,
    plan: &'a EncodePlan,
    store: &'a FrameStore,
    cancel: &'a CancelToken,
}

impl Stages<'_> {
    fn wrap(&self, stage: Stage) -> impl Fn(MaskfxError) -> MaskfxError + '_ {
        in_job(&self.job.id, stage)
    }

    /// Decode on one thread, composite on the rayon pool, encode on another thread.
    ///
    /// The encoder receives frames in index order regardless of compositing completion order.
    fn run(
        &self,
        reader: &mut SourceReader,
        muxer: Muxer<'_>,
    ) -> MaskfxResult<(WriteSummary, u64)> {
        let needed: Vec<FrameIndex> = self
            .plan
            .frames_needed()
            .ranges()
            .iter()
            .flat_map(|r| r.iter())
            .collect();
        let pool = build_thread_pool(self.cfg.threads).map_err(self.wrap(Stage::Composite))?;
        let cap = self.cfg.channel_capacity.max(1);
        let chunk = self.cfg.chunk_size.max(1);

        std::thread::scope(|scope| -> MaskfxResult<(WriteSummary, u64)> {
            let (dec_tx, dec_rx) = mpsc::sync_channel::<Arc<Frame>>(cap);
            let (enc_tx, enc_rx) = mpsc::sync_channel::<Arc<Frame>>(cap);
            let needed = needed.as_slice();

            let decoder =
                scope.spawn(move || decode_stage(reader, self.store, needed, dec_tx, self.cancel));
            let muxer = &muxer;
            let encoder = scope.spawn(move || {
                let frames = InOrder {
                    rx: enc_rx,
                    order: needed.iter().copied(),
                    pending: BTreeMap::new(),
                    cancel: self.cancel,
                };
                muxer.write(&self.job.output, frames)
            });

            let composited = self.composite_stage(&pool, chunk, dec_rx, enc_tx);

            let decoded = decoder
                .join()
                .map_err(|_| MaskfxError::decode("decoder thread panicked"))
                .and_then(|r| r);
            let written = encoder
                .join()
                .map_err(|_| MaskfxError::encode("encoder thread panicked"))
                .and_then(|r| r);

            decoded.map_err(self.wrap(Stage::Decode))?;
            let composited = composited.map_err(self.wrap(Stage::Composite))?;
            let summary = written.map_err(self.wrap(Stage::Encode))?;
            Ok((summary, composited))
        })
    }

    /// Composite decoded frames in chunks; untouched frames pass through as the same allocation.
    ///
    /// Stops quietly when the encoder stops accepting frames.
    fn composite_stage(
        &self,
        pool: &rayon::ThreadPool,
        chunk: usize,
        rx: mpsc::Receiver<Arc<Frame>>,
        tx: mpsc::SyncSender<Arc<Frame>>,
    ) -> MaskfxResult<u64> {
        let composited = AtomicU64::new(0);
        let closed = AtomicBool::new(false);
        let mut batch: Vec<Arc<Frame>> = Vec::with_capacity(chunk);
        loop {
            let next = rx.recv().ok();
            let done = next.is_none();
            batch.extend(next);
            if batch.len() < chunk && !done {
                continue;
            }
            if !batch.is_empty() {
                self.cancel.check()?;
                pool.install(|| {
                    batch.par_iter().try_for_each(|frame| -> MaskfxResult<()> {
                        if closed.load(Ordering::Relaxed) {
                            return Ok(());
                        }
                        let out = self.composite_one(frame, &composited)?;
                        if tx.send(out).is_err() {
                            closed.store(true, Ordering::Relaxed);
                        }
                        Ok(())
                    })
                })?;
                batch.clear();
            }
            if done || closed.load(Ordering::Relaxed) {
                break;
            }
        }
        Ok(composited.into_inner())
    }

    fn composite_one(&self, frame: &Arc<Frame>, counter: &AtomicU64) -> MaskfxResult<Arc<Frame>> {
        self.cancel.check()?;
        if !self.plan.touched.contains(frame.index) {
            return Ok(Arc::clone(frame));
        }
        let masks = self.masks.masks_for(frame.index)?;
        let out = composite(
            frame,
            &masks,
            self.job.assignments.as_slice(),
            self.registry,
            self.job.overlap,
        )?;
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(out))
    }
}

/// Decode `needed` through the frame store, stopping quietly when the consumer hangs up.
fn decode_stage(
    reader: &mut SourceReader,
    store: &FrameStore,
    needed: &[FrameIndex],
    tx: mpsc::SyncSender<Arc<Frame>>,
    cancel: &CancelToken,
) -> MaskfxResult<u64> {
    let mut sent = 0;
    for &index in needed {
        cancel.check()?;
        let frame = store.get_or_decode(index, reader)?;
        if tx.send(frame).is_err() {
            break;
        }
        sent += 1;
    }
    tracing::debug!(sent, stats = ?store.stats(), "decode stage done");
    Ok(sent)
}

/// Yields frames in `order`, buffering early arrivals.
struct InOrder<'a, I> {
    rx: mpsc::Receiver<Arc<Frame>>,
    order: I,
    pending: BTreeMap<u64, Arc<Frame>>,
    cancel: &'a CancelToken,
}

impl<I: Iterator<Item = FrameIndex>> Iterator for InOrder<'_, I> {
    type Item = MaskfxResult<Arc<Frame>>;

    fn next(&mut self) -> Option<Self::Item> {
        let want = self.order.next()?;
        loop {
            if let Some(frame) = self.pending.remove(&want.0) {
                return Some(Ok(frame));
            }
            if let Err(e) = self.cancel.check() {
                return Some(Err(e));
            }
            match self.rx.recv() {
                Ok(frame) => {
                    self.pending.insert(frame.index.0, frame);
                }
                Err(_) => {
                    return Some(Err(MaskfxError::compositing(
                        want.0,
                        "frame stream ended before this frame",
                    )));
                }
            }
        }
    }
}

fn build_thread_pool(threads: Option<usize>) -> MaskfxResult<rayon::ThreadPool> {
    if threads == Some(0) {
        return Err(MaskfxError::validation("'threads' must be >= 1 when set"));
    }
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| {
            MaskfxError::compositing(None, format!("failed to build rayon thread pool: {e}"))
        })
}

#[cfg(test)]
#[path = "../../tests/unit/session/pipeline.rs"]
mod tests;
