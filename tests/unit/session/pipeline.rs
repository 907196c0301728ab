use super::*;
use crate::composite::params::{AssignmentTarget, EffectAssignment, EffectParams, ParamValue};
use crate::foundation::core::FrameRange;
use crate::foundation::error::ErrorClass;
use crate::masks::source::InMemoryMaskSource;
use crate::quality::report::FieldOrderVerdict;
use crate::testutil::{rect_mask, temp_dir, write_y4m, y444_payload};
use std::path::Path;

const W: u32 = 64;
const H: u32 = 64;

struct Fixture {
    input: PathBuf,
    output: PathBuf,
    payloads: Vec<Vec<u8>>,
}

fn fixture(name: &str, header: &str, frames: u32) -> Fixture {
    let dir = temp_dir(name);
    let payloads: Vec<Vec<u8>> = (0..frames).map(|s| y444_payload(W, H, s)).collect();
    let input = dir.join("in.y4m");
    write_y4m(&input, header, &payloads);
    Fixture {
        input,
        output: dir.join("out.y4m"),
        payloads,
    }
}

fn progressive(name: &str, frames: u32) -> Fixture {
    fixture(name, "YUV4MPEG2 W64 H64 F25:1 Ip C444", frames)
}

/// Y4M sources carry no audio.
fn config() -> PipelineConfig {
    PipelineConfig {
        audio_passthrough: false,
        threads: Some(2),
        chunk_size: 3,
        ..PipelineConfig::default()
    }
}

fn mosaic_all() -> EffectAssignment {
    EffectAssignment {
        target: AssignmentTarget::All,
        range: None,
        effect: EffectParams::new("mosaic").with("block_size", ParamValue::Int(8)),
    }
}

/// Masks covering (0,0)-(10,10) on `frames`.
fn corner_masks(frames: std::ops::Range<u64>) -> InMemoryMaskSource {
    let mut masks = InMemoryMaskSource::new();
    for f in frames {
        masks.insert(rect_mask(1, f, W, H, 0, 0, 10, 10)).unwrap();
    }
    masks
}

fn mosaic_job(f: &Fixture) -> RenderJob {
    let mut job = RenderJob::new(&f.input, &f.output);
    job.assignments.push(mosaic_all());
    job
}

/// Frame payloads of a Y4M file.
fn y4m_payloads(path: &Path, frame_len: usize) -> Vec<Vec<u8>> {
    let bytes = std::fs::read(path).unwrap();
    let mut at = bytes.iter().position(|&b| b == b'\n').unwrap() + 1;
    let mut out = Vec::new();
    while at < bytes.len() {
        assert!(bytes[at..].starts_with(b"FRAME"));
        at += bytes[at..].iter().position(|&b| b == b'\n').unwrap() + 1;
        out.push(bytes[at..at + frame_len].to_vec());
        at += frame_len;
    }
    out
}

fn run(job: &RenderJob, masks: &dyn MaskSource) -> MaskfxResult<JobOutcome> {
    run_job_with(
        job,
        &config(),
        &EffectRegistry::with_builtins(),
        masks,
        &CancelToken::new(),
    )
}

#[test]
fn mosaic_changes_only_the_masked_region() {
    let f = progressive("pipe_mosaic", 10);
    let outcome = run(&mosaic_job(&f), &corner_masks(0..8)).unwrap();

    assert_eq!(outcome.frames_touched, 8);
    assert_eq!(outcome.frames_composited, 8);
    assert_eq!(outcome.summary.frames_total, 10);

    let plane = (W * H) as usize;
    let out = y4m_payloads(&f.output, plane * 3);
    assert_eq!(out.len(), 10);
    for (i, (src, dst)) in f.payloads.iter().zip(&out).enumerate() {
        if i >= 8 {
            assert_eq!(src, dst, "untouched frame {i} must be bit-exact");
            continue;
        }
        let mut differs = false;
        for (k, (a, b)) in src.iter().zip(dst).enumerate() {
            if a == b {
                continue;
            }
            differs = true;
            let p = (k % plane) as u32;
            let (x, y) = (p % W, p / W);
            assert!(x < 10 && y < 10, "frame {i} changed outside the mask at ({x},{y})");
        }
        assert!(differs, "frame {i} should be mosaicked");
    }

    let report = outcome.report.unwrap();
    assert!(report.passed(), "{:?}", report.violations);
    let compared: Vec<u64> = report.compared_frames().map(|d| d.source_index).collect();
    assert_eq!(compared, vec![8, 9]);
    assert!(report.compared_frames().all(|d| d.bit_exact));
    assert!(report.frames.iter().all(|d| d.pts_delta_us == 0));
    assert!(outcome.report_path.unwrap().exists());
}

#[test]
fn job_without_assignments_copies_frames() {
    let f = progressive("pipe_copy", 5);
    let outcome = run(&RenderJob::new(&f.input, &f.output), &corner_masks(0..5)).unwrap();
    assert_eq!(outcome.frames_touched, 0);
    assert_eq!(outcome.frames_composited, 0);
    assert_eq!(y4m_payloads(&f.output, (W * H * 3) as usize), f.payloads);
}

#[test]
fn thread_counts_agree() {
    let f = progressive("pipe_threads", 7);
    let masks = corner_masks(0..7);
    let mut outputs = Vec::new();
    for threads in [1, 4] {
        let mut job = mosaic_job(&f);
        job.output = f.output.with_file_name(format!("out_{threads}.y4m"));
        let cfg = PipelineConfig {
            threads: Some(threads),
            ..config()
        };
        let out = run_job_with(
            &job,
            &cfg,
            &EffectRegistry::with_builtins(),
            &masks,
            &CancelToken::new(),
        )
        .unwrap();
        outputs.push(std::fs::read(out.summary.path).unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn sub_range_renders_only_those_frames() {
    let f = progressive("pipe_range", 6);
    let mut job = mosaic_job(&f);
    job.range = Some(FrameRange::from_bounds(2, 5).unwrap());
    let outcome = run(&job, &corner_masks(0..6)).unwrap();
    assert_eq!(outcome.summary.frames_total, 3);
    assert_eq!(outcome.frames_touched, 3);
    assert_eq!(y4m_payloads(&f.output, (W * H * 3) as usize).len(), 3);
}

#[test]
fn interlaced_source_keeps_field_order() {
    let f = fixture("pipe_tff", "YUV4MPEG2 W64 H64 F30000:1001 It C444", 3);
    let outcome = run(&mosaic_job(&f), &corner_masks(0..1)).unwrap();
    let raw = std::fs::read(&f.output).unwrap();
    let header = String::from_utf8_lossy(&raw[..raw.iter().position(|&b| b == b'\n').unwrap()]);
    assert!(header.contains(" It"), "{header}");
    let report = outcome.report.unwrap();
    assert_eq!(report.field_order.verdict, FieldOrderVerdict::Match);
}

#[test]
fn cancelled_job_leaves_no_output() {
    let f = progressive("pipe_cancel", 4);
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = run_job_with(
        &mosaic_job(&f),
        &config(),
        &EffectRegistry::with_builtins(),
        &corner_masks(0..4),
        &cancel,
    )
    .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Cancelled);
    assert!(!f.output.exists());
}

#[test]
fn unsupported_codec_fails_before_writing() {
    let f = progressive("pipe_codec", 3);
    let mut job = mosaic_job(&f);
    job.format.video_codec = Some("cinepak".into());
    let err = run(&job, &corner_masks(0..3)).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Encode);
    assert_eq!(err.stage(), Some(Stage::Plan));
    assert!(err.to_string().contains("cinepak"), "{err}");
    assert!(!f.output.exists());
}

#[test]
fn unknown_effect_is_rejected_while_planning() {
    let f = progressive("pipe_effect", 2);
    let mut job = mosaic_job(&f);
    job.assignments[0].effect = EffectParams::new("swirl");
    let err = run(&job, &corner_masks(0..2)).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Validation);
    assert_eq!(err.stage(), Some(Stage::Plan));
    assert!(err.to_string().contains(&job.id), "{err}");
    assert!(!f.output.exists());
}

#[test]
fn missing_input_fails_at_open() {
    let dir = temp_dir("pipe_missing");
    let job = RenderJob::new(dir.join("nope.y4m"), dir.join("out.y4m"));
    let err = run(&job, &InMemoryMaskSource::new()).unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Open));
}

#[test]
fn validation_can_be_skipped() {
    let f = progressive("pipe_novalidate", 2);
    let cfg = PipelineConfig {
        validate_output: false,
        ..config()
    };
    let out = run_job_with(
        &RenderJob::new(&f.input, &f.output),
        &cfg,
        &EffectRegistry::with_builtins(),
        &InMemoryMaskSource::new(),
        &CancelToken::new(),
    )
    .unwrap();
    assert!(out.report.is_none());
    assert!(!QualityReport::default_path(&f.output).exists());
}

#[test]
fn validate_job_rechecks_an_existing_output() {
    let f = progressive("pipe_revalidate", 3);
    run(&RenderJob::new(&f.input, &f.output), &InMemoryMaskSource::new()).unwrap();
    let report = validate_job(&RenderJob::new(&f.input, &f.output), &config()).unwrap();
    assert!(report.passed(), "{:?}", report.violations);
    assert_eq!(report.frames.len(), 3);
}

#[test]
fn preview_is_scaled_to_fit() {
    let f = progressive("pipe_preview", 2);
    let job = RenderJob::new(&f.input, &f.output);
    let img = render_preview(&job, &config(), FrameIndex(1), 32).unwrap();
    assert_eq!(img.dimensions(), (32, 32));
    let full = render_preview(&job, &config(), FrameIndex(1), 0).unwrap();
    assert_eq!(full.dimensions(), (W, H));
    assert!(render_preview(&job, &config(), FrameIndex(9), 0).is_err());
}

#[test]
fn frame_to_image_keeps_depth() {
    let frame = crate::testutil::gradient_frame(0, 5, 3);
    let img = frame_to_image(&frame).unwrap();
    assert_eq!((img.width(), img.height()), (5, 3));
    assert!(matches!(img, image::DynamicImage::ImageRgb8(_)));

    let deep = frame.with_pixels(PixelData::Rgb16(vec![0; 5 * 3 * 3]));
    assert!(matches!(
        frame_to_image(&deep).unwrap(),
        image::DynamicImage::ImageRgb16(_)
    ));
    let short = frame.with_pixels(PixelData::Rgb8(vec![0; 4]));
    assert!(frame_to_image(&short).is_err());
}

#[test]
fn in_order_buffers_early_frames() {
    let (tx, rx) = mpsc::sync_channel(8);
    for i in [2u64, 0, 1] {
        tx.send(Arc::new(crate::testutil::gradient_frame(i, 2, 2)))
            .unwrap();
    }
    drop(tx);
    let cancel = CancelToken::new();
    let order = [0u64, 1, 2, 3].map(FrameIndex);
    let got: Vec<_> = InOrder {
        rx,
        order: order.into_iter(),
        pending: BTreeMap::new(),
        cancel: &cancel,
    }
    .collect();
    let indices: Vec<u64> = got[..3]
        .iter()
        .map(|r| r.as_ref().unwrap().index.0)
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(got[3].is_err(), "stream ended before frame 3");
}

#[test]
fn zero_threads_is_rejected() {
    assert!(build_thread_pool(Some(0)).is_err());
    assert_eq!(build_thread_pool(Some(3)).unwrap().current_num_threads(), 3);
}
