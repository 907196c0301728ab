use crate::composite::mask::{Mask, MaskSet};
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::masks::detections::{Detection, Detections};
use crate::masks::merge::IdMergeTable;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Default file name pattern of per-frame mask images.
pub const DEFAULT_MASK_PATTERN: &str = "mask_filtered_{:06}.png";

/// Class label given to objects no detection describes.
pub const UNKNOWN_CLASS: &str = "unknown";

/// Object present in a frame's masks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRef {
    /// Canonical object id.
    pub object_id: u32,
    /// Class label.
    pub class_label: String,
}

/// Supplies the masks of each frame.
pub trait MaskSource: Send + Sync {
    /// Masks of `frame`; a frame without masks yields an empty set.
    fn masks_for(&self, frame: FrameIndex) -> MaskfxResult<MaskSet>;

    /// Objects with at least one masked pixel at `frame`.
    fn objects_at(&self, frame: FrameIndex) -> MaskfxResult<Vec<ObjectRef>> {
        Ok(self
            .masks_for(frame)?
            .iter()
            .filter(|m| m.bbox().is_some())
            .map(|m| ObjectRef {
                object_id: m.object_id,
                class_label: m.class_label.clone(),
            })
            .collect())
    }
}

/// Expand a `{}` / `{:0N}` placeholder with the frame index.
pub(crate) fn format_pattern(pattern: &str, frame: u64) -> MaskfxResult<String> {
    let (Some(open), Some(close)) = (pattern.find('{'), pattern.find('}')) else {
        return Err(MaskfxError::validation(format!(
            "mask pattern '{pattern}' has no frame placeholder"
        )));
    };
    if close < open {
        return Err(MaskfxError::validation(format!(
            "mask pattern '{pattern}' is malformed"
        )));
    }
    let placeholder = &pattern[open + 1..close];
    let width = match placeholder.strip_prefix(":0").or_else(|| placeholder.strip_prefix(':')) {
        None if placeholder.is_empty() => 0,
        Some(w) => w.parse::<usize>().map_err(|_| {
            MaskfxError::validation(format!(
                "mask pattern placeholder '{{{placeholder}}}' is invalid"
            ))
        })?,
        None => {
            return Err(MaskfxError::validation(format!(
                "mask pattern placeholder '{{{placeholder}}}' is invalid"
            )));
        }
    };
    Ok(format!(
        "{}{frame:0width$}{}",
        &pattern[..open],
        &pattern[close + 1..]
    ))
}

fn describe<'a>(
    detections: Option<&'a Detections>,
    merge: &IdMergeTable,
    frame: FrameIndex,
    object_id: u32,
) -> Option<&'a Detection> {
    detections?
        .at(frame)
        .iter()
        .find(|d| merge.canonical(d.track_id) == object_id)
}

/// Per-frame single-channel mask images whose pixel values are object ids (0 = background).
///
/// Ids are passed through the merge table, so duplicate tracker ids end up in one mask. A frame
/// whose image file does not exist has no masks.
#[derive(Debug)]
pub struct PngMaskSource {
    dir: PathBuf,
    pattern: String,
    detections: Option<Detections>,
    merge: IdMergeTable,
}

impl PngMaskSource {
    /// Source over `dir` using [`DEFAULT_MASK_PATTERN`].
    pub fn new(dir: impl Into<PathBuf>) -> MaskfxResult<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(MaskfxError::input(format!(
                "mask directory '{}' does not exist",
                dir.display()
            )));
        }
        Ok(Self {
            dir,
            pattern: DEFAULT_MASK_PATTERN.to_string(),
            detections: None,
            merge: IdMergeTable::identity(),
        })
    }

    /// Use another file name pattern.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> MaskfxResult<Self> {
        let pattern = pattern.into();
        format_pattern(&pattern, 0)?;
        self.pattern = pattern;
        Ok(self)
    }

    /// Attach detections for class labels and confidences; their id mappings join the merge table.
    pub fn with_detections(mut self, detections: Detections) -> MaskfxResult<Self> {
        let from_doc = IdMergeTable::from_pairs(detections.id_mappings()?)?;
        self.merge = self.merge.merged(&from_doc)?;
        self.detections = Some(detections);
        Ok(self)
    }

    /// Add an id merge table.
    pub fn with_merge(mut self, merge: &IdMergeTable) -> MaskfxResult<Self> {
        self.merge = self.merge.merged(merge)?;
        Ok(self)
    }

    /// Path of the mask image for `frame`.
    pub fn path_for(&self, frame: FrameIndex) -> MaskfxResult<PathBuf> {
        Ok(self.dir.join(format_pattern(&self.pattern, frame.0)?))
    }

    fn load_ids(path: &Path, frame: FrameIndex) -> MaskfxResult<(u32, u32, Vec<u32>)> {
        let img = image::open(path).map_err(|e| {
            MaskfxError::compositing(
                frame.0,
                format!("decode mask image '{}': {e}", path.display()),
            )
        })?;
        let (w, h) = (img.width(), img.height());
        let ids: Vec<u32> = match img {
            image::DynamicImage::ImageLuma8(b) => b.into_raw().into_iter().map(u32::from).collect(),
            image::DynamicImage::ImageLumaA8(b) => {
                b.pixels().map(|p| u32::from(p.0[0])).collect()
            }
            image::DynamicImage::ImageLuma16(b) => {
                b.into_raw().into_iter().map(u32::from).collect()
            }
            _ => {
                return Err(MaskfxError::compositing(
                    frame.0,
                    format!("mask image '{}' is not single-channel", path.display()),
                ));
            }
        };
        Ok((w, h, ids))
    }
}

impl MaskSource for PngMaskSource {
    fn masks_for(&self, frame: FrameIndex) -> MaskfxResult<MaskSet> {
        let path = self.path_for(frame)?;
        if !path.exists() {
            return Ok(MaskSet::new());
        }
        let (w, h, ids) = Self::load_ids(&path, frame)?;

        let mut weights: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
        for (i, raw) in ids.iter().enumerate() {
            if *raw == 0 {
                continue;
            }
            let id = self.merge.canonical(*raw);
            weights
                .entry(id)
                .or_insert_with(|| vec![0u8; ids.len()])[i] = 255;
        }

        let mut set = MaskSet::new();
        for (id, w_buf) in weights {
            let det = describe(self.detections.as_ref(), &self.merge, frame, id);
            set.push(Mask::new(
                id,
                det.map_or(UNKNOWN_CLASS, |d| d.class.name.as_str()),
                det.map_or(1.0, |d| d.confidence.clamp(0.0, 1.0)),
                frame,
                w,
                h,
                w_buf,
            )?)?;
        }
        Ok(set)
    }
}

/// Rectangular masks built from detection boxes, for sources without segmentation images.
#[derive(Debug)]
pub struct BoxMaskSource {
    detections: Detections,
    merge: IdMergeTable,
}

impl BoxMaskSource {
    /// Source over `detections`, honouring their id mappings.
    pub fn new(detections: Detections) -> MaskfxResult<Self> {
        let merge = IdMergeTable::from_pairs(detections.id_mappings()?)?;
        Ok(Self { detections, merge })
    }

    /// Add an id merge table.
    pub fn with_merge(mut self, merge: &IdMergeTable) -> MaskfxResult<Self> {
        self.merge = self.merge.merged(merge)?;
        Ok(self)
    }
}

impl MaskSource for BoxMaskSource {
    fn masks_for(&self, frame: FrameIndex) -> MaskfxResult<MaskSet> {
        let (w, h) = (
            self.detections.metadata.video_width,
            self.detections.metadata.video_height,
        );
        let mut weights: BTreeMap<u32, (Vec<u8>, &Detection)> = BTreeMap::new();
        for det in self.detections.at(frame) {
            let b = det.bounding_box;
            let clip = |v: f64, max: u32| v.round().clamp(0.0, f64::from(max)) as u32;
            let (x0, y0, x1, y1) = (clip(b.x1, w), clip(b.y1, h), clip(b.x2, w), clip(b.y2, h));
            let id = self.merge.canonical(det.track_id);
            let (buf, _) = weights
                .entry(id)
                .or_insert_with(|| (vec![0u8; w as usize * h as usize], det));
            for y in y0..y1 {
                let row = (y * w) as usize;
                buf[row + x0 as usize..row + x1.max(x0) as usize].fill(255);
            }
        }
        let mut set = MaskSet::new();
        for (id, (buf, det)) in weights {
            set.push(Mask::new(
                id,
                det.class.name.as_str(),
                det.confidence.clamp(0.0, 1.0),
                frame,
                w,
                h,
                buf,
            )?)?;
        }
        Ok(set)
    }
}

/// Masks held in memory, for programmatic use.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMaskSource {
    frames: HashMap<u64, MaskSet>,
}

impl InMemoryMaskSource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mask to its frame; a duplicate object id in one frame is an error.
    pub fn insert(&mut self, mask: Mask) -> MaskfxResult<()> {
        self.frames.entry(mask.frame.0).or_default().push(mask)
    }
}

impl MaskSource for InMemoryMaskSource {
    fn masks_for(&self, frame: FrameIndex) -> MaskfxResult<MaskSet> {
        Ok(self.frames.get(&frame.0).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/masks/source.rs"]
mod tests;
