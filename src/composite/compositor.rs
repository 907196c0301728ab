use crate::composite::effects::{EffectRegistry, gaussian_kernel_q16};
use crate::composite::mask::{Mask, MaskSet, Rect};
use crate::composite::params::AssignmentLookup;
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::foundation::math::{blend_u8, blend_u16, scale_weight};
use crate::media::frame::{Frame, PixelData};
use rayon::prelude::*;
use std::borrow::Borrow;

/// How overlapping masks of one frame combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapRule {
    /// Each pixel takes the effect of the mask with the largest weight there (ties go to the
    /// lowest object id). Every effect reads the source frame.
    #[default]
    MaxWeight,
    /// Masks apply one after another in ascending object id, each reading the previous result.
    Sequential,
}

struct Layer<'a> {
    mask: &'a Mask,
    region: Rect,
    intensity: f64,
    pixels: PixelData,
    /// Feathered weights over `region`, when the effect softens the mask edge.
    feathered: Option<Vec<u8>>,
}

impl Layer<'_> {
    fn alpha(&self, x: u32, y: u32) -> u8 {
        let w = match &self.feathered {
            Some(w) => {
                w[(y - self.region.y0) as usize * self.region.width() as usize
                    + (x - self.region.x0) as usize]
            }
            None => self.mask.weight(x, y),
        };
        scale_weight(w, self.intensity)
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        ((y - self.region.y0) as usize * self.region.width() as usize
            + (x - self.region.x0) as usize)
            * 3
    }
}

fn check_mask(frame: &Frame, mask: &Mask) -> MaskfxResult<()> {
    if mask.width() != frame.width || mask.height() != frame.height {
        return Err(MaskfxError::compositing(
            frame.index.0,
            format!(
                "mask for object {} is {}x{}, frame is {}x{}",
                mask.object_id,
                mask.width(),
                mask.height(),
                frame.width,
                frame.height
            ),
        ));
    }
    if mask.frame != frame.index {
        return Err(MaskfxError::compositing(
            frame.index.0,
            format!(
                "mask for object {} belongs to frame {}",
                mask.object_id, mask.frame.0
            ),
        ));
    }
    Ok(())
}

/// Mask weights over `region` after a gaussian of `radius`, capped by the original weight.
///
/// Interior weights stay as they are and the edge fades inward; pixels with zero weight keep
/// zero. Reads past the frame edge are clamped.
pub(crate) fn feather_weights(mask: &Mask, region: Rect, radius: u32) -> Vec<u8> {
    let k = gaussian_kernel_q16(radius, (f64::from(radius) / 2.0).max(0.5));
    let r = i64::from(radius);
    let (w, h) = (i64::from(mask.width()), i64::from(mask.height()));
    let rw = region.width() as usize;
    let ry0 = (i64::from(region.y0) - r).max(0);
    let ry1 = (i64::from(region.y1) + r).min(h);

    let mut tmp = vec![0u64; (ry1 - ry0) as usize * rw];
    for y in ry0..ry1 {
        for xo in 0..rw {
            let x = i64::from(region.x0) + xo as i64;
            let acc: u64 = k
                .iter()
                .enumerate()
                .map(|(i, &kw)| {
                    let sx = (x + i as i64 - r).clamp(0, w - 1);
                    u64::from(kw) * u64::from(mask.weight(sx as u32, y as u32))
                })
                .sum();
            tmp[(y - ry0) as usize * rw + xo] = (acc + 32768) >> 16;
        }
    }

    let mut out = Vec::with_capacity(rw * region.height() as usize);
    for y in region.y0..region.y1 {
        for xo in 0..rw {
            let acc: u64 = k
                .iter()
                .enumerate()
                .map(|(i, &kw)| {
                    let sy = (i64::from(y) + i as i64 - r).clamp(0, h - 1);
                    u64::from(kw) * tmp[(sy - ry0) as usize * rw + xo]
                })
                .sum();
            let soft = ((acc + 32768) >> 16).min(255) as u8;
            out.push(soft.min(mask.weight(region.x0 + xo as u32, y)));
        }
    }
    out
}

/// Masks of `masks` that have pixels and an assigned effect, in ascending object id.
fn active_masks<'a, L: AssignmentLookup + ?Sized>(
    masks: &'a MaskSet,
    lookup: &'a L,
) -> Vec<&'a Mask> {
    let mut active: Vec<&Mask> = masks
        .iter()
        .filter(|m| m.bbox().is_some() && lookup.effect_for_mask(m).is_some())
        .collect();
    active.sort_by_key(|m| m.object_id);
    active
}

/// Return `true` when compositing `masks` would change anything.
pub fn is_touched<L: AssignmentLookup + ?Sized>(masks: &MaskSet, lookup: &L) -> bool {
    !active_masks(masks, lookup).is_empty()
}

fn build_layer<'a, L: AssignmentLookup + ?Sized>(
    base: &Frame,
    mask: &'a Mask,
    lookup: &L,
    registry: &EffectRegistry,
) -> MaskfxResult<Layer<'a>> {
    let index = base.index.0;
    let (Some(bbox), Some(assigned)) = (mask.bbox(), lookup.effect_for_mask(mask)) else {
        return Err(MaskfxError::compositing(index, "inactive mask in layer list"));
    };
    let params = assigned.resolve(base.index);
    let effect = registry.get(&params.kind).ok_or_else(|| {
        MaskfxError::compositing(index, format!("unknown effect kind '{}'", params.kind))
    })?;
    let intensity = params.intensity()?;
    let feather = effect.feather(&params).map_err(|e| e.at_frame(index))?;
    let pixels = effect
        .apply(base, bbox, &params)
        .map_err(|e| e.at_frame(index))?;
    if !pixels.same_layout(&base.pixels)
        || pixels.len() != bbox.width() as usize * bbox.height() as usize * 3
    {
        return Err(MaskfxError::compositing(
            index,
            format!(
                "effect '{}' returned {} samples for a {}x{} region",
                params.kind,
                pixels.len(),
                bbox.width(),
                bbox.height()
            ),
        ));
    }
    Ok(Layer {
        mask,
        region: bbox,
        intensity,
        pixels,
        feathered: (feather > 0).then(|| feather_weights(mask, bbox, feather)),
    })
}

fn blend_pixel(
    out: &mut PixelData,
    base: &PixelData,
    effect: &PixelData,
    oi: usize,
    ei: usize,
    a: u8,
) {
    match (out, base, effect) {
        (PixelData::Rgb8(o), PixelData::Rgb8(b), PixelData::Rgb8(e)) => {
            for c in 0..3 {
                o[oi + c] = blend_u8(e[ei + c], b[oi + c], a);
            }
        }
        (PixelData::Rgb16(o), PixelData::Rgb16(b), PixelData::Rgb16(e)) => {
            for c in 0..3 {
                o[oi + c] = blend_u16(e[ei + c], b[oi + c], a);
            }
        }
        // Layouts are checked when the layer is built.
        _ => {}
    }
}

fn blend_layer(out: &mut PixelData, base: &Frame, layer: &Layer<'_>) {
    let r = layer.region;
    for y in r.y0..r.y1 {
        for x in r.x0..r.x1 {
            let a = layer.alpha(x, y);
            if a == 0 {
                continue;
            }
            let oi = (y as usize * base.width as usize + x as usize) * 3;
            blend_pixel(out, &base.pixels, &layer.pixels, oi, layer.offset(x, y), a);
        }
    }
}

/// Apply the effects assigned to `masks` to `frame`, returning a new frame.
///
/// Inputs are never modified. With no mask that has both pixels and an assigned effect the
/// result is an exact copy of `frame`. Per pixel, `alpha = weight * intensity`, where `weight` is
/// the mask weight softened inward when the effect feathers. The effect is blended as
/// `round((e * a + s * (255 - a)) / 255)`, so pixels where the effect equals the source stay
/// bit-identical.
pub fn composite<L: AssignmentLookup + ?Sized>(
    frame: &Frame,
    masks: &MaskSet,
    lookup: &L,
    registry: &EffectRegistry,
    overlap: OverlapRule,
) -> MaskfxResult<Frame> {
    for m in masks.iter() {
        check_mask(frame, m)?;
    }
    let active = active_masks(masks, lookup);
    if active.is_empty() {
        return Ok(frame.clone());
    }

    match overlap {
        OverlapRule::MaxWeight => {
            let layers = active
                .iter()
                .map(|m| build_layer(frame, m, lookup, registry))
                .collect::<MaskfxResult<Vec<_>>>()?;
            let Some(union) = layers.iter().map(|l| l.region).reduce(Rect::union) else {
                return Ok(frame.clone());
            };
            let mut out = frame.pixels.clone();
            for y in union.y0..union.y1 {
                for x in union.x0..union.x1 {
                    let mut best: Option<(&Layer<'_>, u8)> = None;
                    for l in &layers {
                        if !l.region.contains(x, y) {
                            continue;
                        }
                        let a = l.alpha(x, y);
                        if a > 0 && best.is_none_or(|(_, b)| a > b) {
                            best = Some((l, a));
                        }
                    }
                    if let Some((l, a)) = best {
                        let oi = (y as usize * frame.width as usize + x as usize) * 3;
                        blend_pixel(&mut out, &frame.pixels, &l.pixels, oi, l.offset(x, y), a);
                    }
                }
            }
            Ok(frame.with_pixels(out))
        }
        OverlapRule::Sequential => {
            let mut current = frame.clone();
            for m in active {
                let layer = build_layer(&current, m, lookup, registry)?;
                let mut out = current.pixels.clone();
                blend_layer(&mut out, &current, &layer);
                current = current.with_pixels(out);
            }
            Ok(current)
        }
    }
}

/// [`composite`] over many frames on the current rayon pool.
///
/// `masks[i]` belongs to `frames[i]`. The result equals calling [`composite`] per frame, in the
/// same order.
pub fn composite_batch<F, L>(
    frames: &[F],
    masks: &[MaskSet],
    lookup: &L,
    registry: &EffectRegistry,
    overlap: OverlapRule,
) -> MaskfxResult<Vec<Frame>>
where
    F: Borrow<Frame> + Sync,
    L: AssignmentLookup + ?Sized,
{
    if frames.len() != masks.len() {
        return Err(MaskfxError::compositing(
            None,
            format!(
                "batch has {} frames but {} mask sets",
                frames.len(),
                masks.len()
            ),
        ));
    }
    frames
        .par_iter()
        .zip(masks.par_iter())
        .map(|(f, m)| composite(f.borrow(), m, lookup, registry, overlap))
        .collect()
}

#[cfg(test)]
#[path = "../../tests/unit/composite/compositor.rs"]
mod tests;
