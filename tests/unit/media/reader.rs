use super::*;
use crate::media::metadata::{ChromaSubsampling, ColorRange, FieldOrder};
use crate::testutil::{temp_dir, write_y4m, y444_payload};

fn y4m_source(name: &str, frames: u32, header: &str) -> PathBuf {
    let dir = temp_dir(name);
    let path = dir.join("src.y4m");
    let payloads: Vec<Vec<u8>> = (0..frames).map(|i| y444_payload(8, 4, i)).collect();
    write_y4m(&path, header, &payloads);
    path
}

#[test]
fn opens_y4m_with_metadata() {
    let path = y4m_source("reader_meta", 5, "YUV4MPEG2 W8 H4 F25:1 It C444 XCOLORRANGE=FULL");
    let reader = SourceReader::open(&path, &ReaderOptions::default()).unwrap();
    let md = reader.metadata();
    assert_eq!((md.width, md.height), (8, 4));
    assert_eq!(md.frame_count, Some(5));
    assert_eq!(md.subsampling, Some(ChromaSubsampling::Cs444));
    assert_eq!(md.field_order, Some(FieldOrder::TopFieldFirst));
    assert_eq!(md.pix_fmt.as_deref(), Some("yuv444p"));
    assert_eq!(md.color.range, Some(ColorRange::Full));
    assert_eq!(md.duration_us, Some(200_000));
    assert!(!md.vfr);
    assert!(md.audio.is_none());
    assert!(reader.warnings().is_empty());
}

#[test]
fn random_access_matches_sequential_decode() {
    let path = y4m_source("reader_random", 6, "YUV4MPEG2 W8 H4 F30:1 Ip C444");
    let mut reader = SourceReader::open(&path, &ReaderOptions::default()).unwrap();
    let sequential: Vec<Frame> = reader
        .read_frames(FrameRange::from_bounds(0, 6).unwrap())
        .collect::<MaskfxResult<_>>()
        .unwrap();
    assert_eq!(sequential.len(), 6);
    assert_eq!(sequential[3].pts, 3);
    assert_eq!(sequential[3].pts_micros(), 100_000);

    let f4 = reader.read_frame(FrameIndex(4)).unwrap().unwrap();
    let f1 = reader.read_frame(FrameIndex(1)).unwrap().unwrap();
    assert_eq!(f4, sequential[4]);
    assert_eq!(f1, sequential[1]);
    assert!(f1.native.is_some());
    assert!(reader.read_frame(FrameIndex(6)).unwrap().is_none());
}

#[test]
fn seek_positions_read_next() {
    let path = y4m_source("reader_seek", 4, "YUV4MPEG2 W8 H4 F25:1 Ip C444");
    let mut reader = SourceReader::open(&path, &ReaderOptions::default()).unwrap();
    assert_eq!(reader.seek(50_000).unwrap(), FrameIndex(2));
    assert_eq!(reader.read_next().unwrap().unwrap().index, FrameIndex(2));
    assert_eq!(reader.read_next().unwrap().unwrap().index, FrameIndex(3));
    assert!(reader.read_next().unwrap().is_none());
    assert!(reader.seek(1_000_000).is_err());
}

#[test]
fn negative_seek_is_rejected_and_keeps_position() {
    let path = y4m_source("reader_seek_neg", 3, "YUV4MPEG2 W8 H4 F25:1 Ip C444");
    let mut reader = SourceReader::open(&path, &ReaderOptions::default()).unwrap();
    assert_eq!(reader.seek(40_000).unwrap(), FrameIndex(1));
    let err = reader.seek(-1).unwrap_err();
    assert_eq!(err.class(), crate::foundation::error::ErrorClass::Decode);
    assert!(err.to_string().contains("before the start"), "{err}");
    assert_eq!(reader.read_next().unwrap().unwrap().index, FrameIndex(1));
    assert_eq!(reader.seek(0).unwrap(), FrameIndex(0));
}

#[test]
fn close_then_read_restarts_decode() {
    let path = y4m_source("reader_close", 3, "YUV4MPEG2 W8 H4 F25:1 Ip C444");
    let mut reader = SourceReader::open(&path, &ReaderOptions::default()).unwrap();
    let a = reader.read_frame(FrameIndex(2)).unwrap().unwrap();
    reader.close();
    let b = reader.read_frame(FrameIndex(2)).unwrap().unwrap();
    assert_eq!(a, b);
}

#[test]
fn missing_file_is_input_error() {
    let err = SourceReader::open("/definitely/not/here.y4m", &ReaderOptions::default())
        .err()
        .unwrap();
    assert!(matches!(err, MaskfxError::Input(_)));
}

#[test]
fn auto_backend_picks_by_extension() {
    assert_eq!(
        BackendChoice::Auto.resolve(Path::new("a.Y4M")),
        BackendChoice::Y4m
    );
    assert_eq!(
        BackendChoice::Auto.resolve(Path::new("a.mov")),
        BackendChoice::Ffmpeg
    );
    assert_eq!(
        BackendChoice::Y4m.resolve(Path::new("a.mov")),
        BackendChoice::Y4m
    );
}
