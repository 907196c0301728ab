use crate::foundation::core::FrameIndex;
use crate::foundation::error::{MaskfxError, MaskfxResult};
use smallvec::SmallVec;

/// Half-open pixel rectangle `[x0, x1) x [y0, y1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rect {
    /// Left edge (inclusive).
    pub x0: u32,
    /// Top edge (inclusive).
    pub y0: u32,
    /// Right edge (exclusive).
    pub x1: u32,
    /// Bottom edge (exclusive).
    pub y1: u32,
}

impl Rect {
    /// Width in pixels.
    pub fn width(self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    /// Height in pixels.
    pub fn height(self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    /// Return `true` when the rectangle covers no pixel.
    pub fn is_empty(self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Return `true` when `(x, y)` lies inside.
    pub fn contains(self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    /// Smallest rectangle covering both.
    pub fn union(self, other: Rect) -> Rect {
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Grow by `pad` on every side, clipped to a `width` x `height` frame.
    pub fn padded(self, pad: u32, width: u32, height: u32) -> Rect {
        Rect {
            x0: self.x0.saturating_sub(pad),
            y0: self.y0.saturating_sub(pad),
            x1: self.x1.saturating_add(pad).min(width),
            y1: self.y1.saturating_add(pad).min(height),
        }
    }
}

/// Per-frame weight map of one tracked object.
///
/// Weights are 8-bit coverage (binary masks use 0/255). The weight buffer is row-major and sized
/// to the frame it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    /// Object id, stable across frames for one tracked entity.
    pub object_id: u32,
    /// Detector class label.
    pub class_label: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
    /// Frame this mask belongs to.
    pub frame: FrameIndex,
    width: u32,
    height: u32,
    weights: Vec<u8>,
    bbox: Option<Rect>,
}

impl Mask {
    /// Create a mask, checking buffer size and confidence range.
    pub fn new(
        object_id: u32,
        class_label: impl Into<String>,
        confidence: f32,
        frame: FrameIndex,
        width: u32,
        height: u32,
        weights: Vec<u8>,
    ) -> MaskfxResult<Self> {
        if weights.len() != width as usize * height as usize {
            return Err(MaskfxError::compositing(
                frame.0,
                format!(
                    "mask for object {object_id} has {} weights, expected {width}x{height}",
                    weights.len()
                ),
            ));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(MaskfxError::compositing(
                frame.0,
                format!("mask for object {object_id} has confidence {confidence} outside [0,1]"),
            ));
        }
        let bbox = support_bbox(&weights, width, height);
        Ok(Self {
            object_id,
            class_label: class_label.into(),
            confidence,
            frame,
            width,
            height,
            weights,
            bbox,
        })
    }

    /// Mask width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Mask height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major weights.
    pub fn weights(&self) -> &[u8] {
        &self.weights
    }

    /// Weight at `(x, y)`.
    pub fn weight(&self, x: u32, y: u32) -> u8 {
        self.weights[(y * self.width + x) as usize]
    }

    /// Bounding box of the non-zero weights, `None` for an empty mask.
    pub fn bbox(&self) -> Option<Rect> {
        self.bbox
    }
}

fn support_bbox(weights: &[u8], width: u32, height: u32) -> Option<Rect> {
    let mut bbox: Option<Rect> = None;
    for y in 0..height {
        let row = &weights[(y * width) as usize..((y + 1) * width) as usize];
        let Some(first) = row.iter().position(|w| *w != 0) else {
            continue;
        };
        let last = row.iter().rposition(|w| *w != 0).unwrap_or(first);
        let r = Rect {
            x0: first as u32,
            y0: y,
            x1: last as u32 + 1,
            y1: y + 1,
        };
        bbox = Some(bbox.map_or(r, |b| b.union(r)));
    }
    bbox
}

/// All masks of one frame, object ids unique.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaskSet {
    masks: SmallVec<[Mask; 4]>,
}

impl MaskSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set, rejecting duplicate object ids.
    pub fn from_masks(masks: impl IntoIterator<Item = Mask>) -> MaskfxResult<Self> {
        let mut set = Self::new();
        for m in masks {
            set.push(m)?;
        }
        Ok(set)
    }

    /// Add a mask; a second mask with the same object id is an error.
    pub fn push(&mut self, mask: Mask) -> MaskfxResult<()> {
        if self.get(mask.object_id).is_some() {
            return Err(MaskfxError::compositing(
                mask.frame.0,
                format!("duplicate mask for object id {}", mask.object_id),
            ));
        }
        self.masks.push(mask);
        Ok(())
    }

    /// Mask of `object_id`.
    pub fn get(&self, object_id: u32) -> Option<&Mask> {
        self.masks.iter().find(|m| m.object_id == object_id)
    }

    /// Masks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Mask> {
        self.masks.iter()
    }

    /// Number of masks.
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    /// Return `true` when there are no masks.
    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/composite/mask.rs"]
mod tests;
