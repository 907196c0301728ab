use super::*;

const VFR: [i64; 4] = [0, 33_367, 66_733, 100_100];

fn fps(n: u32, d: u32) -> Option<Rational> {
    Some(Rational::new(n, d).unwrap())
}

fn pts(m: &FrameMapping) -> Vec<i64> {
    m.frames().iter().map(|f| f.pts_us).collect()
}

fn sources(m: &FrameMapping) -> Vec<u64> {
    m.frames().iter().map(|f| f.source.0).collect()
}

#[test]
fn remap_rewrites_to_the_grid() {
    let m = FrameMapping::build(CfrPolicy::Remap, FrameIndex(0), &VFR, 133_467, fps(30, 1))
        .unwrap();
    assert_eq!(pts(&m), vec![0, 33_333, 66_667, 100_000]);
    assert_eq!(sources(&m), vec![0, 1, 2, 3]);
    assert!(m.is_one_to_one());
}

#[test]
fn keep_vfr_keeps_relative_times() {
    let shifted: Vec<i64> = VFR.iter().map(|p| p + 5_000).collect();
    let m = FrameMapping::build(CfrPolicy::KeepVfr, FrameIndex(10), &shifted, 0, None).unwrap();
    assert_eq!(pts(&m), VFR.to_vec());
    assert_eq!(m.source_of(2), Some(FrameIndex(12)));
    assert_eq!(m.rate, None);
}

#[test]
fn conversion_needs_a_rate() {
    assert!(FrameMapping::build(CfrPolicy::Drop, FrameIndex(0), &VFR, 133_467, None).is_err());
}

#[test]
fn duplicate_holds_frames_across_gaps() {
    // 15 fps content onto a 30 fps grid.
    let src = [0, 66_667, 133_333];
    let m = FrameMapping::build(CfrPolicy::Duplicate, FrameIndex(0), &src, 200_000, fps(30, 1))
        .unwrap();
    assert_eq!(sources(&m), vec![0, 0, 1, 1, 2, 2]);
    assert!(!m.is_one_to_one());
}

#[test]
fn duplicate_refuses_to_drop() {
    // 60 fps content onto a 30 fps grid.
    let src = [0, 16_667, 33_333, 50_000];
    let err = FrameMapping::build(CfrPolicy::Duplicate, FrameIndex(0), &src, 66_667, fps(30, 1))
        .unwrap_err();
    assert!(err.to_string().contains("would drop"));
}

#[test]
fn drop_decimates_to_nearest() {
    let src = [0, 16_667, 33_333, 50_000];
    let m = FrameMapping::build(CfrPolicy::Drop, FrameIndex(0), &src, 66_667, fps(30, 1)).unwrap();
    assert_eq!(sources(&m), vec![0, 2]);

    let m = FrameMapping::build(CfrPolicy::Drop, FrameIndex(0), &VFR, 133_467, fps(30, 1)).unwrap();
    assert_eq!(sources(&m), vec![0, 1, 2, 3]);
    assert_eq!(pts(&m), vec![0, 33_333, 66_667, 100_000]);
}

#[test]
fn drop_refuses_to_duplicate() {
    let src = [0, 66_667];
    let err = FrameMapping::build(CfrPolicy::Drop, FrameIndex(0), &src, 133_333, fps(30, 1))
        .unwrap_err();
    assert!(err.to_string().contains("would duplicate"));
}

#[test]
fn policies_parse_kebab_case() {
    let p: CfrPolicy = serde_json::from_str("\"keep-vfr\"").unwrap();
    assert_eq!(p, CfrPolicy::KeepVfr);
    assert!(!p.converts());
    assert!(CfrPolicy::Remap.converts());
}
