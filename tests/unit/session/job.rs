use super::*;
use crate::composite::params::{AssignmentTarget, EffectParams, ParamValue};
use crate::testutil::temp_dir;

const JOB: &str = r#"{
  "id": "job-1",
  "input": "clip.mov",
  "output": "out/clip.mov",
  "range": {"start": 10, "end": 20},
  "masks": {"kind": "boxes", "detections": "det.json"},
  "assignments": [
    {"target": {"class": "face"}, "effect": {"kind": "mosaic", "values": {"block_size": 12}}}
  ],
  "format": {"video_codec": "prores"},
  "cfr_policy": "remap",
  "color_transform": {"kind": "lut3d", "path": "grade.cube"}
}"#;

const DETECTIONS: &str = r#"{
  "metadata": {"video_width": 8, "video_height": 4, "fps": 25.0, "total_frames": 4},
  "frames": {
    "1": [{"track_id": 1, "class": {"id": 0, "name": "face"}, "confidence": 0.9,
           "bounding_box": {"x1": 0, "y1": 0, "x2": 2, "y2": 2}}],
    "2": [{"track_id": 2, "class": {"id": 1, "name": "plate"}, "confidence": 0.9,
           "bounding_box": {"x1": 4, "y1": 0, "x2": 8, "y2": 2}}]
  }
}"#;

fn face_mosaic() -> EffectAssignment {
    EffectAssignment {
        target: AssignmentTarget::Class("face".into()),
        range: None,
        effect: EffectParams::new("mosaic").with("block_size", ParamValue::Int(4)),
    }
}

#[test]
fn parse_job_json() {
    let job = RenderJob::from_reader(JOB.as_bytes()).unwrap();
    assert_eq!(job.id, "job-1");
    assert_eq!(job.range, Some(FrameRange::from_bounds(10, 20).unwrap()));
    assert_eq!(job.assignments.len(), 1);
    assert_eq!(job.format.video_codec.as_deref(), Some("prores"));
    assert!(job.format.allow_splice);
    assert_eq!(job.cfr_policy, Some(CfrPolicy::Remap));
    assert_eq!(job.audio_passthrough, None);
    assert_eq!(job.overlap, OverlapRule::MaxWeight);
    assert!(matches!(job.masks, MaskSourceSpec::Boxes { merge: None, .. }));
}

#[test]
fn missing_id_is_generated() {
    let job = RenderJob::from_reader(r#"{"input": "a.y4m", "output": "b.y4m"}"#.as_bytes())
        .unwrap();
    assert_eq!(job.id.len(), 36);
    assert_eq!(job.masks, MaskSourceSpec::None);
}

#[test]
fn from_path_resolves_relative_paths() {
    let dir = temp_dir("job_paths");
    let path = dir.join("job.json");
    std::fs::write(&path, JOB).unwrap();
    let job = RenderJob::from_path(&path).unwrap();
    assert_eq!(job.input, dir.join("clip.mov"));
    assert_eq!(job.output, dir.join("out/clip.mov"));
    let MaskSourceSpec::Boxes { detections, .. } = &job.masks else {
        panic!("boxes expected");
    };
    assert_eq!(detections, &dir.join("det.json"));
    assert_eq!(
        job.color_transform,
        ColorTransform::Lut3d {
            path: dir.join("grade.cube")
        }
    );
}

#[test]
fn defaults_fill_only_unset_policies() {
    let mut job = RenderJob::from_reader(JOB.as_bytes()).unwrap();
    let cfg = PipelineConfig {
        audio_passthrough: false,
        cfr_policy: CfrPolicy::Drop,
        deinterlace: DeinterlacePolicy::Deinterlace,
        ..PipelineConfig::default()
    };
    job.apply_defaults(&cfg);
    let req = job.encode_request();
    assert!(!req.audio_passthrough);
    assert_eq!(req.cfr_policy, CfrPolicy::Remap);
    assert_eq!(req.deinterlace, DeinterlacePolicy::Deinterlace);

    let bare = RenderJob::new("a.mov", "b.mov").encode_request();
    assert!(bare.audio_passthrough);
    assert_eq!(bare.cfr_policy, CfrPolicy::KeepVfr);
}

#[test]
fn validate_rejects_bad_jobs() {
    let registry = EffectRegistry::with_builtins();
    let mut job = RenderJob::new("a.mov", "b.mov");
    job.assignments.push(face_mosaic());
    job.validate(&registry).unwrap();

    let mut same = job.clone();
    same.output = same.input.clone();
    assert!(same.validate(&registry).is_err());

    let mut unknown = job.clone();
    unknown.assignments[0].effect = EffectParams::new("swirl");
    let err = unknown.validate(&registry).unwrap_err();
    assert!(err.to_string().contains("swirl"), "{err}");

    let mut empty = job;
    empty.range = Some(FrameRange::from_bounds(3, 3).unwrap());
    assert!(empty.validate(&registry).is_err());
}

#[test]
fn resolve_range_defaults_to_whole_source() {
    let job = RenderJob::new("a.mov", "b.mov");
    assert_eq!(
        job.resolve_range(42).unwrap(),
        FrameRange::from_bounds(0, 42).unwrap()
    );
    assert!(job.resolve_range(0).is_err());
}

#[test]
fn touched_frames_follow_assignments() {
    let dir = temp_dir("job_touched");
    let det = dir.join("det.json");
    std::fs::write(&det, DETECTIONS).unwrap();
    let mut job = RenderJob::new("a.y4m", "b.y4m");
    job.masks = MaskSourceSpec::Boxes {
        detections: det,
        merge: None,
    };
    let masks = job.mask_source().unwrap();
    let range = FrameRange::from_bounds(0, 4).unwrap();

    // No assignments: nothing is touched even where masks exist.
    assert!(job.touched_frames(masks.as_ref(), range).unwrap().is_empty());

    job.assignments.push(face_mosaic());
    let touched = job.touched_frames(masks.as_ref(), range).unwrap();
    assert_eq!(touched.ranges(), &[FrameRange::from_bounds(1, 2).unwrap()]);
}

#[test]
fn missing_mask_dir_is_an_input_error() {
    let mut job = RenderJob::new("a.y4m", "b.y4m");
    job.masks = MaskSourceSpec::Png {
        dir: PathBuf::from("/no/such/masks"),
        pattern: None,
        detections: None,
        merge: None,
    };
    let err = job.mask_source().err().unwrap();
    assert_eq!(err.class(), crate::foundation::error::ErrorClass::Input);
}
