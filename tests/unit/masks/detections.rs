use super::*;
use std::io::Cursor;

const DOC: &str = r#"{
  "metadata": {"video_width": 8, "video_height": 6, "fps": 30.0, "total_frames": 3,
               "id_mappings": {"7": 2}},
  "frames": {
    "0": [{"track_id": 2, "class": {"id": 0, "name": "face"}, "confidence": 0.8,
           "bounding_box": {"x1": 1, "y1": 1, "x2": 4, "y2": 3}}],
    "2": [{"track_id": 7, "class": {"id": 1, "name": "plate"}, "confidence": 0.5,
           "bounding_box": {"x1": 0, "y1": 0, "x2": 2, "y2": 2}}],
    "1": []
  }
}"#;

#[test]
fn parses_frames_by_index() {
    let d = Detections::from_reader(Cursor::new(DOC)).unwrap();
    assert_eq!(d.metadata.video_width, 8);
    assert_eq!(d.at(FrameIndex(0))[0].class.name, "face");
    assert!(d.at(FrameIndex(1)).is_empty());
    assert!(d.at(FrameIndex(5)).is_empty());
    let frames: Vec<_> = d.frames().collect();
    assert_eq!(frames, vec![FrameIndex(0), FrameIndex(2)]);
    assert_eq!(d.id_mappings().unwrap(), vec![(7, 2)]);
}

#[test]
fn bad_frame_key_is_rejected() {
    let doc = DOC.replace("\"2\": [", "\"two\": [");
    let err = Detections::from_reader(Cursor::new(doc)).unwrap_err();
    assert!(err.to_string().contains("two"));
}

#[test]
fn missing_file_is_an_input_error() {
    let err = Detections::from_path("/nonexistent/detections.json").unwrap_err();
    assert!(matches!(err, MaskfxError::Input(_)));
}
