use crate::encode::ffmpeg::output_pix_fmt;
use crate::encode::muxer::{output_color, output_timecode};
use crate::encode::plan::{DeinterlacePolicy, EncodePlan, Route};
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::metadata::{
    ChromaSubsampling, Metadata, bit_depth_from_pix_fmt, subsampling_from_pix_fmt,
};
use crate::media::reader::{BackendChoice, ReaderOptions, SourceReader};
use crate::quality::audio_hash::hash_audio;
use crate::quality::delta_e::{VISIBLE_DELTA_E, frame_delta_e};
use crate::quality::report::{
    AudioCheck, AudioVerdict, FieldOrderCheck, FieldOrderVerdict, FrameCount, FrameDiff,
    QualityReport, Violation,
};
use crate::session::job::RenderJob;
use std::path::Path;

/// Thresholds and sampling for [`validate`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ValidatorOptions {
    /// Mean ΔE00 above which an untouched frame counts as drifted.
    pub delta_e_mean_threshold: f64,
    /// Per-pixel ΔE00 above which a pixel counts as visibly changed.
    pub delta_e_pixel_threshold: f64,
    /// Share of visibly changed pixels an untouched frame may have, in `[0, 1]`.
    pub visible_pixel_tolerance: f64,
    /// Largest tolerated pts difference, in microseconds.
    pub pts_threshold_us: i64,
    /// Compare every n-th output frame; `0` and `1` compare all.
    pub sample_stride: u64,
    /// Decode backend for both files.
    pub backend: BackendChoice,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            delta_e_mean_threshold: 1.0,
            delta_e_pixel_threshold: VISIBLE_DELTA_E,
            visible_pixel_tolerance: 0.001,
            pts_threshold_us: 500,
            sample_stride: 1,
            backend: BackendChoice::Auto,
        }
    }
}

impl ValidatorOptions {
    fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            backend: self.backend,
            gpu_acceleration: false,
        }
    }
}

/// Check the output of `job` against its source.
///
/// The output plan is re-derived from the job and the source, so the report judges the output
/// against what the job asked for. Neither file is modified.
#[tracing::instrument(skip_all, fields(job = %job.id, output = %output.display()))]
pub fn validate(
    input: &Path,
    output: &Path,
    job: &RenderJob,
    opts: &ValidatorOptions,
) -> MaskfxResult<QualityReport> {
    let mut source = SourceReader::open(input, &opts.reader_options())?;
    let meta = source.metadata().clone();
    let table = source.frame_table().clone();
    let range = job.resolve_range(table.len())?;
    let masks = job.mask_source()?;
    let touched = job.touched_frames(masks.as_ref(), range)?;
    let plan = EncodePlan::build(&meta, &table, output, &job.encode_request(), range, touched)?;
    check_output(&mut source, output, &plan, opts)
}

/// Check `output` against `input` for an already resolved plan.
#[tracing::instrument(skip_all, fields(output = %output.display()))]
pub fn validate_plan(
    input: &Path,
    output: &Path,
    plan: &EncodePlan,
    opts: &ValidatorOptions,
) -> MaskfxResult<QualityReport> {
    let mut source = SourceReader::open(input, &opts.reader_options())?;
    check_output(&mut source, output, plan, opts)
}

fn check_output(
    source: &mut SourceReader,
    output: &Path,
    plan: &EncodePlan,
    opts: &ValidatorOptions,
) -> MaskfxResult<QualityReport> {
    let mut out = SourceReader::open(output, &opts.reader_options())
        .map_err(|e| MaskfxError::validation(format!("cannot open output for validation: {e}")))?;
    let src_meta = source.metadata().clone();
    let out_meta = out.metadata().clone();
    let mut violations = Vec::new();

    let audio = check_audio(source, &out_meta, plan)?;
    if audio.verdict == AudioVerdict::Mismatch {
        violations.push(Violation::AudioHashMismatch {
            source: audio.source_sha256.clone(),
            output: audio.output_sha256.clone(),
        });
    }

    let frame_count = FrameCount {
        expected: plan.mapping.len() as u64,
        actual: out.frame_count(),
    };
    if frame_count.expected != frame_count.actual {
        violations.push(Violation::FrameCountMismatch {
            expected: frame_count.expected,
            actual: frame_count.actual,
        });
    }

    let dims = ((src_meta.width, src_meta.height), (out_meta.width, out_meta.height));
    let frames = if dims.0 == dims.1 {
        compare_frames(source, &mut out, plan, opts, &mut violations)?
    } else {
        violations.push(Violation::DimensionMismatch {
            expected: dims.0,
            actual: dims.1,
        });
        Vec::new()
    };

    let field_order = check_field_order(&src_meta, &out_meta, plan);
    if field_order.verdict == FieldOrderVerdict::Mismatch {
        violations.push(Violation::FieldOrderMismatch {
            expected: plan.field_order,
            actual: out_meta.field_order,
        });
    }
    check_metadata(&src_meta, &out_meta, plan, &mut violations)?;

    for v in &violations {
        tracing::warn!(violation = %v, "quality violation");
    }
    let report = QualityReport {
        source: src_meta.path.clone(),
        output: output.to_path_buf(),
        audio,
        frames,
        field_order,
        frame_count,
        violations,
        transformation_log: plan.log.clone(),
    };
    tracing::info!(
        passed = report.passed(),
        compared = report.compared_frames().count(),
        worst_mean_delta_e = report.worst_mean_delta_e(),
        "validation finished"
    );
    Ok(report)
}

fn check_audio(
    source: &SourceReader,
    out_meta: &Metadata,
    plan: &EncodePlan,
) -> MaskfxResult<AudioCheck> {
    if !plan.audio_passthrough {
        return Ok(AudioCheck::without_hashes(AudioVerdict::NotRequested));
    }
    let src_meta = source.metadata();
    if plan.range.start.0 != 0 || plan.range.end.0 < source.frame_count() {
        return Ok(AudioCheck::without_hashes(AudioVerdict::Skipped {
            reason: format!(
                "output covers frames {}..{} of {}; audio is compared for whole sources only",
                plan.range.start.0,
                plan.range.end.0,
                source.frame_count()
            ),
        }));
    }
    let src = hash_audio(&src_meta.path, src_meta.audio.as_ref())?;
    let Some(out_audio) = out_meta.audio.as_ref() else {
        return Ok(AudioCheck {
            verdict: AudioVerdict::Mismatch,
            source_sha256: Some(src.sha256),
            output_sha256: None,
        });
    };
    let out = hash_audio(&out_meta.path, Some(out_audio))?;
    let verdict = if src.sha256 == out.sha256 {
        AudioVerdict::Match
    } else {
        AudioVerdict::Mismatch
    };
    Ok(AudioCheck {
        verdict,
        source_sha256: Some(src.sha256),
        output_sha256: Some(out.sha256),
    })
}

/// Whether the plan changes pixels of untouched frames on purpose.
fn alters_pixels(plan: &EncodePlan) -> bool {
    plan.deinterlace == DeinterlacePolicy::Deinterlace || plan.color_transform.is_requested()
}

fn compare_frames(
    source: &mut SourceReader,
    out: &mut SourceReader,
    plan: &EncodePlan,
    opts: &ValidatorOptions,
    violations: &mut Vec<Violation>,
) -> MaskfxResult<Vec<FrameDiff>> {
    let stride = opts.sample_stride.max(1) as usize;
    let out_table = out.frame_table().clone();
    let out_origin = out_table.pts_micros(0).unwrap_or(0);
    let drift_counts = !alters_pixels(plan);
    let compared = plan.mapping.len().min(out_table.len() as usize);

    let mut diffs = Vec::new();
    for k in (0..compared).step_by(stride) {
        let m = plan.mapping.frames()[k];
        let index = k as u64;
        let Some(out_pts) = out_table.pts_micros(index) else {
            break;
        };
        let pts_delta_us = out_pts - out_origin - m.pts_us;
        if pts_delta_us.abs() > opts.pts_threshold_us {
            violations.push(Violation::PtsDrift {
                index,
                delta_us: pts_delta_us,
            });
        }

        if plan.touched.contains(m.source) {
            diffs.push(FrameDiff {
                index,
                source_index: m.source.0,
                delta_e00_mean: 0.0,
                delta_e00_max: 0.0,
                pts_delta_us,
                bit_exact: false,
                touched: true,
            });
            continue;
        }
        let (Some(src), Some(dst)) = (
            source.read_frame(m.source)?,
            out.read_frame(FrameIndex(index))?,
        ) else {
            break;
        };
        let stats = frame_delta_e(&src.pixels, &dst.pixels, opts.delta_e_pixel_threshold)?;
        let pixels = (src.pixels.len() / 3).max(1) as f64;
        let too_visible = stats.visible as f64 / pixels > opts.visible_pixel_tolerance;

        if drift_counts && (stats.mean > opts.delta_e_mean_threshold || too_visible) {
            violations.push(Violation::ColorDrift {
                index,
                mean: stats.mean,
                max: stats.max,
                visible_pixels: stats.visible,
            });
        }
        diffs.push(FrameDiff {
            index,
            source_index: m.source.0,
            delta_e00_mean: stats.mean,
            delta_e00_max: stats.max,
            pts_delta_us,
            bit_exact: stats.bit_exact,
            touched: false,
        });
    }
    Ok(diffs)
}

fn check_field_order(src: &Metadata, out: &Metadata, plan: &EncodePlan) -> FieldOrderCheck {
    let verdict = if plan.deinterlace.transforms() {
        FieldOrderVerdict::Transformed
    } else {
        match (plan.field_order, out.field_order) {
            (Some(expected), Some(actual)) if expected == actual => FieldOrderVerdict::Match,
            (Some(_), Some(_)) => FieldOrderVerdict::Mismatch,
            _ => FieldOrderVerdict::Unknown,
        }
    };
    FieldOrderCheck {
        verdict,
        source: src.field_order,
        output: out.field_order,
    }
}

fn compare_tag<T: PartialEq + std::fmt::Display>(
    field: &str,
    expected: Option<T>,
    actual: Option<T>,
    violations: &mut Vec<Violation>,
) {
    if let (Some(e), Some(a)) = (expected, actual)
        && e != a
    {
        violations.push(Violation::MetadataMismatch {
            field: field.to_string(),
            expected: e.to_string(),
            actual: a.to_string(),
        });
    }
}

/// Subsampling and bit depth the output should have.
fn expected_format(src: &Metadata, plan: &EncodePlan) -> (Option<ChromaSubsampling>, Option<u8>) {
    match (&plan.route, src.subsampling, src.bit_depth) {
        (Route::Reencode | Route::Splice { .. }, Some(sub), Some(depth)) => {
            let fmt = output_pix_fmt(plan.video_codec, sub, depth);
            (subsampling_from_pix_fmt(&fmt), bit_depth_from_pix_fmt(&fmt))
        }
        _ => (src.subsampling, src.bit_depth),
    }
}

fn check_metadata(
    src: &Metadata,
    out: &Metadata,
    plan: &EncodePlan,
    violations: &mut Vec<Violation>,
) -> MaskfxResult<()> {
    let color = output_color(plan, src);
    compare_tag(
        "color_primaries",
        color.primaries.as_deref(),
        out.color.primaries.as_deref(),
        violations,
    );
    compare_tag(
        "color_space",
        color.matrix.as_deref(),
        out.color.matrix.as_deref(),
        violations,
    );
    compare_tag(
        "color_transfer",
        color.transfer.as_deref(),
        out.color.transfer.as_deref(),
        violations,
    );
    compare_tag(
        "color_range",
        color.range.map(|r| r.as_ffmpeg()),
        out.color.range.map(|r| r.as_ffmpeg()),
        violations,
    );

    let (sub, depth) = expected_format(src, plan);
    compare_tag(
        "chroma_subsampling",
        sub.map(|s| s.digits()),
        out.subsampling.map(|s| s.digits()),
        violations,
    );
    compare_tag("bit_depth", depth, out.bit_depth, violations);

    let timecode = output_timecode(plan, src)?;
    compare_tag(
        "timecode",
        timecode.as_deref(),
        out.start_timecode.as_deref(),
        violations,
    );
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/quality/validator.rs"]
mod tests;
