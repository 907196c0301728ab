use super::*;
use crate::foundation::core::Rational;
use crate::media::metadata::{ColorInfo, FieldOrder};
use crate::media::y4m::Y4mDecoder;
use crate::testutil::{rgb8_frame, temp_dir, write_y4m, y444_payload};
use std::sync::Arc;

const HEADER: &str = "YUV4MPEG2 W8 H6 F30:1 Ip C444";

fn cfg(sub: ChromaSubsampling) -> SinkConfig {
    SinkConfig {
        width: 8,
        height: 6,
        rate: Rational::new(30, 1).unwrap(),
        color: ColorInfo::default(),
        field_order: Some(FieldOrder::Progressive),
        subsampling: sub,
        bit_depth: 8,
        hdr: None,
        start_timecode: None,
        reel_name: None,
    }
}

/// Decode a y4m file into frames that carry their native planes.
fn decode_all(path: &std::path::Path) -> Vec<Frame> {
    let (mut dec, warnings) = Y4mDecoder::open(path).unwrap();
    assert!(warnings.is_empty());
    let mut out = Vec::new();
    let mut i = 0;
    while let Some(payload) = dec.next_payload().unwrap() {
        let mut f = rgb8_frame(i, dec.header.width, dec.header.height, Vec::new());
        f.pixels = y4m::payload_to_rgb(&payload, dec.header.range);
        f.native = Some(Arc::new(payload));
        out.push(f);
        i += 1;
    }
    out
}

fn payloads(path: &std::path::Path) -> Vec<Vec<u8>> {
    let (mut dec, _) = Y4mDecoder::open(path).unwrap();
    std::iter::from_fn(|| dec.next_payload().unwrap().map(|p| p.bytes)).collect()
}

#[test]
fn colorspace_tags() {
    assert_eq!(colorspace_tag(ChromaSubsampling::Cs420, 8), "420jpeg");
    assert_eq!(colorspace_tag(ChromaSubsampling::Cs422, 10), "422p10");
    assert_eq!(colorspace_tag(ChromaSubsampling::Cs444, 8), "444");
    assert_eq!(colorspace_tag(ChromaSubsampling::Mono, 8), "mono");
    assert_eq!(colorspace_tag(ChromaSubsampling::Mono, 12), "mono12");
}

#[test]
fn untouched_frames_are_copied_bit_exact() {
    let dir = temp_dir("y4m_copy");
    let src = dir.join("in.y4m");
    let frames_in = vec![y444_payload(8, 6, 1), y444_payload(8, 6, 2)];
    write_y4m(&src, HEADER, &frames_in);

    let out = dir.join("out.y4m");
    let mut sink = Y4mSink::new(&out);
    sink.begin(cfg(ChromaSubsampling::Cs444)).unwrap();
    for (i, f) in decode_all(&src).iter().enumerate() {
        sink.push_frame(FrameIndex(i as u64), f).unwrap();
    }
    sink.end().unwrap();

    assert_eq!(payloads(&out), frames_in);
    assert_eq!(sink.stats().copied, 2);
    assert_eq!(sink.stats().patched, 0);
}

#[test]
fn changed_pixels_only_touch_their_samples() {
    let dir = temp_dir("y4m_patch");
    let src = dir.join("in.y4m");
    let original = y444_payload(8, 6, 3);
    write_y4m(&src, HEADER, std::slice::from_ref(&original));
    let frame = decode_all(&src).remove(0);

    // Paint pixel (2, 1) white.
    let PixelData::Rgb8(mut px) = frame.pixels.clone() else {
        panic!("8-bit source");
    };
    let p = 8 + 2;
    px[p * 3..p * 3 + 3].copy_from_slice(&[255, 255, 255]);
    let edited = frame.with_pixels(PixelData::Rgb8(px));

    let out = dir.join("out.y4m");
    let mut sink = Y4mSink::new(&out);
    sink.begin(cfg(ChromaSubsampling::Cs444)).unwrap();
    sink.push_frame(FrameIndex(0), &edited).unwrap();
    sink.end().unwrap();
    assert_eq!(sink.stats().patched, 1);

    let written = payloads(&out).remove(0);
    let plane = 48;
    for (i, (a, b)) in original.iter().zip(&written).enumerate() {
        if i % plane == p {
            continue;
        }
        assert_eq!(a, b, "sample {i} changed");
    }
    // White in limited range.
    assert_eq!(written[p], 235);
    assert_eq!(written[plane + p], 128);
    assert_eq!(written[2 * plane + p], 128);
}

#[test]
fn subsampled_chroma_is_recomputed_only_where_covered() {
    let dir = temp_dir("y4m_420");
    let src = dir.join("in.y4m");
    let mut payload = vec![0u8; 8 * 6 + 2 * 4 * 3];
    for (i, s) in payload.iter_mut().enumerate() {
        *s = if i < 48 { 60 + (i as u8) } else { 120 + (i as u8 % 7) };
    }
    write_y4m(&src, "YUV4MPEG2 W8 H6 F30:1 Ip C420jpeg", std::slice::from_ref(&payload));
    let frame = decode_all(&src).remove(0);
    let PixelData::Rgb8(mut px) = frame.pixels.clone() else {
        panic!("8-bit source");
    };
    // Pixel (5, 4) lies in chroma site (2, 2).
    let p = 4 * 8 + 5;
    px[p * 3..p * 3 + 3].copy_from_slice(&[0, 0, 0]);
    let edited = frame.with_pixels(PixelData::Rgb8(px));

    let out = dir.join("out.y4m");
    let mut sink = Y4mSink::new(&out);
    sink.begin(cfg(ChromaSubsampling::Cs420)).unwrap();
    sink.push_frame(FrameIndex(0), &edited).unwrap();
    sink.end().unwrap();

    let written = payloads(&out).remove(0);
    let site = 2 * 4 + 2;
    for i in 0..payload.len() {
        let is_luma = i == p;
        let is_chroma = i == 48 + site || i == 48 + 12 + site;
        if !is_luma && !is_chroma {
            assert_eq!(payload[i], written[i], "sample {i} changed");
        }
    }
    assert_eq!(written[p], 16);
}

#[test]
fn frames_without_native_planes_are_converted() {
    let dir = temp_dir("y4m_convert");
    let out = dir.join("out.y4m");
    let frame = crate::testutil::gradient_frame(0, 8, 6);
    let mut sink = Y4mSink::new(&out);
    sink.begin(cfg(ChromaSubsampling::Cs444)).unwrap();
    sink.push_frame(FrameIndex(0), &frame).unwrap();
    sink.end().unwrap();
    assert_eq!(sink.stats().converted, 1);

    let back = decode_all(&out).remove(0);
    let (PixelData::Rgb8(a), PixelData::Rgb8(b)) = (&frame.pixels, &back.pixels) else {
        panic!("8-bit frames");
    };
    for (x, y) in a.iter().zip(b) {
        assert!(x.abs_diff(*y) <= 3, "{x} vs {y}");
    }
}

#[test]
fn out_of_order_and_unstarted_pushes_fail() {
    let dir = temp_dir("y4m_order");
    let frame = crate::testutil::gradient_frame(0, 8, 6);
    let mut sink = Y4mSink::new(dir.join("out.y4m"));
    assert!(sink.push_frame(FrameIndex(0), &frame).is_err());
    sink.begin(cfg(ChromaSubsampling::Cs444)).unwrap();
    sink.push_frame(FrameIndex(1), &frame).unwrap();
    assert!(sink.push_frame(FrameIndex(1), &frame).is_err());
    let small = crate::testutil::gradient_frame(2, 4, 4);
    assert!(sink.push_frame(FrameIndex(2), &small).is_err());
}
