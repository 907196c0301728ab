use super::*;

#[test]
fn frame_range_rejects_inverted_bounds() {
    assert!(FrameRange::from_bounds(5, 2).is_err());
    let r = FrameRange::from_bounds(2, 5).unwrap();
    assert_eq!(r.len_frames(), 3);
    assert!(r.contains(FrameIndex(2)));
    assert!(!r.contains(FrameIndex(5)));
}

#[test]
fn frame_range_intersection() {
    let a = FrameRange::from_bounds(0, 10).unwrap();
    let b = FrameRange::from_bounds(8, 12).unwrap();
    assert_eq!(a.intersect(b), Some(FrameRange::from_bounds(8, 10).unwrap()));
    let c = FrameRange::from_bounds(10, 12).unwrap();
    assert_eq!(a.intersect(c), None);
    assert!(!a.overlaps(c));
}

#[test]
fn range_set_merges_overlapping_and_adjacent() {
    let set = RangeSet::from_ranges([
        FrameRange::from_bounds(10, 12).unwrap(),
        FrameRange::from_bounds(0, 3).unwrap(),
        FrameRange::from_bounds(3, 5).unwrap(),
        FrameRange::from_bounds(11, 20).unwrap(),
    ]);
    assert_eq!(
        set.ranges(),
        &[
            FrameRange::from_bounds(0, 5).unwrap(),
            FrameRange::from_bounds(10, 20).unwrap()
        ]
    );
    assert_eq!(set.len_frames(), 15);
    assert!(set.contains(FrameIndex(4)));
    assert!(!set.contains(FrameIndex(5)));
    assert!(set.contains(FrameIndex(19)));
}

#[test]
fn range_set_from_frames_builds_runs() {
    let set = RangeSet::from_frames([7, 1, 2, 3, 9, 8, 2].map(FrameIndex));
    assert_eq!(
        set.ranges(),
        &[
            FrameRange::from_bounds(1, 4).unwrap(),
            FrameRange::from_bounds(7, 10).unwrap()
        ]
    );
    assert!(RangeSet::from_frames([]).is_empty());
}

#[test]
fn rational_parses_ffmpeg_ratios() {
    assert_eq!(Rational::parse("30000/1001"), Some(Rational::new(30000, 1001).unwrap()));
    assert_eq!(Rational::parse("25"), Some(Rational::new(25, 1).unwrap()));
    assert_eq!(Rational::parse("60:2"), Some(Rational::new(30, 1).unwrap()));
    assert_eq!(Rational::parse("0/0"), None);
    assert_eq!(Rational::parse("abc"), None);
}

#[test]
fn rational_rescale_rounds_to_nearest() {
    let tb = Rational::new(1, 90_000).unwrap();
    assert_eq!(tb.to_micros(3003), 33367);
    assert_eq!(tb.to_micros(-3003), -33367);

    let fps = Rational::new(30, 1).unwrap();
    let grid: Vec<i64> = (0..4).map(|i| fps.frame_time_micros(i)).collect();
    assert_eq!(grid, vec![0, 33333, 66667, 100000]);
}
