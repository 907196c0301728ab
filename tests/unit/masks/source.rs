use super::*;
use crate::testutil::{rect_mask, temp_dir};
use std::io::Cursor;

fn write_ids(path: &Path, w: u32, h: u32, ids: &[u8]) {
    image::GrayImage::from_raw(w, h, ids.to_vec())
        .unwrap()
        .save(path)
        .unwrap();
}

const DOC: &str = r#"{
  "metadata": {"video_width": 4, "video_height": 2, "fps": 25.0, "total_frames": 2,
               "id_mappings": {"9": 3}},
  "frames": {
    "0": [{"track_id": 3, "class": {"id": 0, "name": "face"}, "confidence": 0.7,
           "bounding_box": {"x1": 0, "y1": 0, "x2": 2, "y2": 1}}]
  }
}"#;

#[test]
fn pattern_placeholders() {
    assert_eq!(
        format_pattern(DEFAULT_MASK_PATTERN, 42).unwrap(),
        "mask_filtered_000042.png"
    );
    assert_eq!(format_pattern("m{}.png", 7).unwrap(), "m7.png");
    assert!(format_pattern("mask.png", 1).is_err());
    assert!(format_pattern("m{x}.png", 1).is_err());
}

#[test]
fn png_pixels_become_masks_per_id() {
    let dir = temp_dir("png_masks");
    write_ids(
        &dir.join("mask_filtered_000000.png"),
        4,
        2,
        &[3, 3, 0, 5, 0, 9, 0, 0],
    );
    let src = PngMaskSource::new(&dir)
        .unwrap()
        .with_detections(Detections::from_reader(Cursor::new(DOC)).unwrap())
        .unwrap();

    let set = src.masks_for(FrameIndex(0)).unwrap();
    assert_eq!(set.len(), 2);
    let three = set.get(3).unwrap();
    // Id 9 merges into 3.
    assert_eq!(three.weights(), &[255, 255, 0, 0, 0, 255, 0, 0]);
    assert_eq!(three.class_label, "face");
    assert_eq!(three.confidence, 0.7);
    let five = set.get(5).unwrap();
    assert_eq!(five.class_label, UNKNOWN_CLASS);
    assert_eq!(five.weight(3, 0), 255);

    let objects = src.objects_at(FrameIndex(0)).unwrap();
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].object_id, 3);
}

#[test]
fn missing_frame_image_has_no_masks() {
    let dir = temp_dir("png_missing");
    let src = PngMaskSource::new(&dir).unwrap();
    assert!(src.masks_for(FrameIndex(3)).unwrap().is_empty());
}

#[test]
fn missing_directory_is_an_input_error() {
    let err = PngMaskSource::new("/nonexistent/masks").unwrap_err();
    assert!(matches!(err, MaskfxError::Input(_)));
}

#[test]
fn color_mask_images_are_rejected() {
    let dir = temp_dir("png_rgb");
    image::RgbImage::new(2, 2)
        .save(dir.join("mask_filtered_000001.png"))
        .unwrap();
    let err = PngMaskSource::new(&dir)
        .unwrap()
        .masks_for(FrameIndex(1))
        .unwrap_err();
    assert!(err.to_string().contains("single-channel"));
}

#[test]
fn boxes_fill_detection_rectangles() {
    let src = BoxMaskSource::new(Detections::from_reader(Cursor::new(DOC)).unwrap()).unwrap();
    let set = src.masks_for(FrameIndex(0)).unwrap();
    let m = set.get(3).unwrap();
    assert_eq!(m.weights(), &[255, 255, 0, 0, 0, 0, 0, 0]);
    assert!(src.masks_for(FrameIndex(1)).unwrap().is_empty());
}

#[test]
fn in_memory_source_groups_by_frame() {
    let mut src = InMemoryMaskSource::new();
    src.insert(rect_mask(1, 4, 4, 4, 0, 0, 2, 2)).unwrap();
    src.insert(rect_mask(2, 4, 4, 4, 2, 2, 4, 4)).unwrap();
    assert!(src.insert(rect_mask(2, 4, 4, 4, 0, 0, 1, 1)).is_err());
    assert_eq!(src.masks_for(FrameIndex(4)).unwrap().len(), 2);
    assert!(src.masks_for(FrameIndex(0)).unwrap().is_empty());
}
