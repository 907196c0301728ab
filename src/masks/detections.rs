use crate::foundation::core::FrameIndex;
use crate::foundation::error::{MaskfxError, MaskfxResult};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Detector class of one detection.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DetectionClass {
    /// Numeric class id.
    pub id: u32,
    /// Class label.
    pub name: String,
}

/// Axis-aligned box in source pixels; `x2`/`y2` are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    /// Left.
    pub x1: f64,
    /// Top.
    pub y1: f64,
    /// Right.
    pub x2: f64,
    /// Bottom.
    pub y2: f64,
}

/// One tracked detection at one frame.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Detection {
    /// Tracker id; the mask pixel value of this object.
    pub track_id: u32,
    /// Detector class.
    pub class: DetectionClass,
    /// Detector confidence.
    pub confidence: f32,
    /// Box around the object.
    pub bounding_box: BoundingBox,
}

/// Header of a detections document.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DetectionsMetadata {
    /// Width of the video the detector ran on.
    pub video_width: u32,
    /// Height of the video the detector ran on.
    pub video_height: u32,
    /// Frame rate of the video.
    pub fps: f64,
    /// Frame count of the video.
    pub total_frames: u64,
    /// Duplicate track id to canonical id, as strings of digits.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub id_mappings: BTreeMap<String, u32>,
}

#[derive(serde::Deserialize)]
struct DetectionsDef {
    metadata: DetectionsMetadata,
    #[serde(default)]
    frames: BTreeMap<String, Vec<Detection>>,
}

/// Parsed detections document, frames keyed by index.
#[derive(Clone, Debug, PartialEq)]
pub struct Detections {
    /// Document header.
    pub metadata: DetectionsMetadata,
    frames: BTreeMap<u64, Vec<Detection>>,
}

impl Detections {
    /// Parse a detections document from a JSON reader.
    pub fn from_reader<R: std::io::Read>(r: R) -> MaskfxResult<Self> {
        let def: DetectionsDef = serde_json::from_reader(r)
            .map_err(|e| MaskfxError::serde(format!("parse detections JSON: {e}")))?;
        let mut frames = BTreeMap::new();
        for (key, dets) in def.frames {
            let idx: u64 = key.trim().parse().map_err(|_| {
                MaskfxError::validation(format!("detections frame key '{key}' is not an index"))
            })?;
            frames.insert(idx, dets);
        }
        Ok(Self {
            metadata: def.metadata,
            frames,
        })
    }

    /// Parse a detections document from a file.
    pub fn from_path(path: impl AsRef<Path>) -> MaskfxResult<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| {
            MaskfxError::input(format!("open detections JSON '{}': {e}", path.display()))
        })?;
        Self::from_reader(BufReader::new(f))
    }

    /// Detections at `frame` (empty when the frame has none).
    pub fn at(&self, frame: FrameIndex) -> &[Detection] {
        self.frames.get(&frame.0).map_or(&[], Vec::as_slice)
    }

    /// Frames that carry at least one detection.
    pub fn frames(&self) -> impl Iterator<Item = FrameIndex> + '_ {
        self.frames
            .iter()
            .filter(|(_, d)| !d.is_empty())
            .map(|(k, _)| FrameIndex(*k))
    }

    /// Merge pairs declared in `metadata.id_mappings`.
    pub fn id_mappings(&self) -> MaskfxResult<Vec<(u32, u32)>> {
        self.metadata
            .id_mappings
            .iter()
            .map(|(k, v)| {
                k.trim().parse::<u32>().map(|dup| (dup, *v)).map_err(|_| {
                    MaskfxError::validation(format!("id mapping key '{k}' is not an object id"))
                })
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/masks/detections.rs"]
mod tests;
