use super::*;

fn pkt(pts: i64, keyframe: bool) -> PacketInfo {
    PacketInfo {
        pts: Some(pts),
        dts: None,
        keyframe,
        corrupt: false,
    }
}

fn tb90k() -> Rational {
    Rational::new(1, 90_000).unwrap()
}

#[test]
fn packets_are_sorted_into_presentation_order() {
    // I P B B in decode order.
    let packets = [pkt(0, true), pkt(9009, false), pkt(3003, false), pkt(6006, false)];
    let (table, warnings) = FrameTable::from_packets(&packets, tb90k());
    assert!(warnings.is_empty());
    let pts: Vec<i64> = table.entries().iter().map(|e| e.pts).collect();
    assert_eq!(pts, vec![0, 3003, 6006, 9009]);
    assert_eq!(table.pts_micros(1), Some(33367));
}

#[test]
fn corrupt_packets_are_skipped_with_warning() {
    let mut bad = pkt(3003, false);
    bad.corrupt = true;
    let packets = [pkt(0, true), bad, pkt(6006, false)];
    let (table, warnings) = FrameTable::from_packets(&packets, tb90k());
    assert_eq!(table.len(), 2);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("corrupt"));
}

#[test]
fn table_without_keyframe_is_empty() {
    let packets = [pkt(0, false), pkt(3003, false)];
    let (table, _) = FrameTable::from_packets(&packets, tb90k());
    assert!(table.is_empty());
}

#[test]
fn leading_frames_before_first_keyframe_are_dropped() {
    let packets = [pkt(0, false), pkt(3003, true), pkt(6006, false)];
    let (table, warnings) = FrameTable::from_packets(&packets, tb90k());
    assert_eq!(table.len(), 2);
    assert_eq!(table.entry(0).unwrap().pts, 3003);
    assert!(warnings.iter().any(|w| w.contains("leading")));
}

#[test]
fn keyframe_lookup() {
    let packets = [
        pkt(0, true),
        pkt(1, false),
        pkt(2, false),
        pkt(3, true),
        pkt(4, false),
    ];
    let (table, _) = FrameTable::from_packets(&packets, tb90k());
    assert_eq!(table.keyframe_at_or_before(2), Some(0));
    assert_eq!(table.keyframe_at_or_before(3), Some(3));
    assert_eq!(table.keyframe_at_or_before(99), Some(3));
    assert_eq!(table.next_keyframe_after(0), Some(3));
    assert_eq!(table.next_keyframe_after(3), None);
}

#[test]
fn vfr_detection_and_seek_by_time() {
    let cfr = FrameTable::constant_rate(4, Rational::new(30, 1).unwrap());
    assert!(!cfr.is_vfr());
    assert_eq!(cfr.pts_micros(3), Some(100_000));
    assert_eq!(cfr.duration_micros(), Some(133_333));

    let packets = [pkt(0, true), pkt(3003, false), pkt(9009, false), pkt(12012, false)];
    let (vfr, _) = FrameTable::from_packets(&packets, tb90k());
    assert!(vfr.is_vfr());
    assert_eq!(vfr.index_at_or_after_micros(40_000), Some(2));
    assert_eq!(vfr.index_at_or_after_micros(0), Some(0));
    assert_eq!(vfr.index_at_or_after_micros(1_000_000), None);
}
