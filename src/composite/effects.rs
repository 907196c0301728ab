use crate::composite::mask::Rect;
use crate::composite::params::ResolvedParams;
use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::frame::{Frame, PixelData};
use smallvec::{SmallVec, smallvec};
use std::collections::HashMap;
use std::sync::Arc;

/// A region effect.
///
/// `apply` reads `src` and returns the effect pixels for `region` only: `region.width() *
/// region.height() * 3` samples in the frame's layout, row-major. It must not depend on anything
/// but its arguments; the compositor blends the result with the mask.
pub trait Effect: Send + Sync {
    /// Registry key.
    fn name(&self) -> &str;

    /// Compute effect pixels over `region`.
    fn apply(&self, src: &Frame, region: Rect, params: &ResolvedParams) -> MaskfxResult<PixelData>;

    /// Extra source pixels the effect reads around `region`.
    fn support_padding(&self, _params: &ResolvedParams) -> MaskfxResult<u32> {
        Ok(0)
    }

    /// Radius by which the compositor softens the mask edge inward; `0` keeps it hard.
    fn feather(&self, _params: &ResolvedParams) -> MaskfxResult<u32> {
        Ok(0)
    }
}

/// Effects by name.
///
/// Built per job; plugins are added with [`EffectRegistry::register`].
#[derive(Clone, Default)]
pub struct EffectRegistry {
    effects: HashMap<String, Arc<dyn Effect>>,
}

impl EffectRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `mosaic`, `blur` and `pixelate`.
    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register(Arc::new(Mosaic));
        r.register(Arc::new(Blur));
        r.register(Arc::new(Pixelate));
        r
    }

    /// Add or replace an effect under its own name.
    pub fn register(&mut self, effect: Arc<dyn Effect>) {
        self.effects.insert(effect.name().to_string(), effect);
    }

    /// Effect registered as `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Effect>> {
        self.effects.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.effects.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }
}

impl std::fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRegistry")
            .field("effects", &self.names())
            .finish()
    }
}

pub(crate) trait Sample: Copy + Default {
    fn widen(self) -> u64;
    fn narrow(v: u64) -> Self;
}

impl Sample for u8 {
    fn widen(self) -> u64 {
        u64::from(self)
    }
    fn narrow(v: u64) -> Self {
        v.min(u64::from(u8::MAX)) as u8
    }
}

impl Sample for u16 {
    fn widen(self) -> u64 {
        u64::from(self)
    }
    fn narrow(v: u64) -> Self {
        v.min(u64::from(u16::MAX)) as u16
    }
}

fn check_region(src: &Frame, region: Rect, name: &str) -> MaskfxResult<()> {
    if region.is_empty() || region.x1 > src.width || region.y1 > src.height {
        return Err(MaskfxError::compositing(
            src.index.0,
            format!(
                "effect '{name}' region {region:?} is empty or outside the {}x{} frame",
                src.width, src.height
            ),
        ));
    }
    Ok(())
}

macro_rules! per_layout {
    ($pixels:expr, |$buf:ident| $body:expr) => {
        match $pixels {
            PixelData::Rgb8($buf) => PixelData::Rgb8($body),
            PixelData::Rgb16($buf) => PixelData::Rgb16($body),
        }
    };
}

/// Block partition of `region` anchored at its origin; edge blocks are truncated.
fn blocks(region: Rect, size: u32) -> impl Iterator<Item = Rect> {
    let size = size.max(1);
    (region.y0..region.y1).step_by(size as usize).flat_map(move |by| {
        (region.x0..region.x1)
            .step_by(size as usize)
            .map(move |bx| Rect {
                x0: bx,
                y0: by,
                x1: (bx + size).min(region.x1),
                y1: (by + size).min(region.y1),
            })
    })
}

fn fill_block<T: Sample>(out: &mut [T], region: Rect, block: Rect, color: [T; 3]) {
    let rw = region.width() as usize;
    for y in block.y0..block.y1 {
        for x in block.x0..block.x1 {
            let o = ((y - region.y0) as usize * rw + (x - region.x0) as usize) * 3;
            out[o..o + 3].copy_from_slice(&color);
        }
    }
}

fn block_mean<T: Sample>(
    src: &[T],
    width: u32,
    pixels: impl Iterator<Item = (u32, u32)>,
) -> [T; 3] {
    let mut acc = [0u64; 3];
    let mut n = 0u64;
    for (x, y) in pixels {
        let i = (y as usize * width as usize + x as usize) * 3;
        for c in 0..3 {
            acc[c] += src[i + c].widen();
        }
        n += 1;
    }
    let n = n.max(1);
    acc.map(|a| T::narrow((a + n / 2) / n))
}

fn mosaic_region<T: Sample>(src: &[T], width: u32, region: Rect, size: u32) -> Vec<T> {
    let mut out = vec![T::default(); region.width() as usize * region.height() as usize * 3];
    for block in blocks(region, size) {
        let pixels = (block.y0..block.y1)
            .flat_map(|y| (block.x0..block.x1).map(move |x| (x, y)));
        let color = block_mean(src, width, pixels);
        fill_block(&mut out, region, block, color);
    }
    out
}

/// Circular cells of diameter `size` on a grid anchored at the region origin, each filled with
/// its own mean. Pixels outside every cell keep their source value.
fn circle_mosaic_region<T: Sample>(src: &[T], width: u32, region: Rect, size: u32) -> Vec<T> {
    let mut out = crop_region(src, width, region);
    let r = size / 2;
    let r2 = u64::from(r) * u64::from(r);
    let rw = region.width() as usize;
    let centres = |len: u32| (r..len.saturating_sub(r)).step_by(size.max(1) as usize);
    for cy in centres(region.height()) {
        for cx in centres(region.width()) {
            let (cx, cy) = (region.x0 + cx, region.y0 + cy);
            let cell: Vec<(u32, u32)> = (cy - r..=cy + r)
                .flat_map(|y| (cx - r..=cx + r).map(move |x| (x, y)))
                .filter(|&(x, y)| {
                    let (dx, dy) = (u64::from(x.abs_diff(cx)), u64::from(y.abs_diff(cy)));
                    region.contains(x, y) && dx * dx + dy * dy <= r2
                })
                .collect();
            let color = block_mean(src, width, cell.iter().copied());
            for (x, y) in cell {
                let o = ((y - region.y0) as usize * rw + (x - region.x0) as usize) * 3;
                out[o..o + 3].copy_from_slice(&color);
            }
        }
    }
    out
}

fn crop_region<T: Sample>(src: &[T], width: u32, region: Rect) -> Vec<T> {
    let mut out = Vec::with_capacity(region.width() as usize * region.height() as usize * 3);
    for y in region.y0..region.y1 {
        let s = (y as usize * width as usize + region.x0 as usize) * 3;
        out.extend_from_slice(&src[s..s + region.width() as usize * 3]);
    }
    out
}

fn pixelate_region<T: Sample>(
    src: &[T],
    width: u32,
    region: Rect,
    size: u32,
    sampling: PixelSampling,
) -> Vec<T> {
    let mut out = vec![T::default(); region.width() as usize * region.height() as usize * 3];
    for block in blocks(region, size) {
        let color = match sampling {
            PixelSampling::Nearest => {
                let cx = block.x0 + block.width() / 2;
                let cy = block.y0 + block.height() / 2;
                let i = (cy as usize * width as usize + cx as usize) * 3;
                [src[i], src[i + 1], src[i + 2]]
            }
            PixelSampling::Linear | PixelSampling::Cubic => {
                let cx = f64::from(block.x0 + block.x1 - 1) / 2.0;
                let cy = f64::from(block.y0 + block.y1 - 1) / 2.0;
                let xs = taps(cx, region.x0, region.x1, sampling);
                let ys = taps(cy, region.y0, region.y1, sampling);
                let mut acc = [0.0f64; 3];
                for &(y, wy) in &ys {
                    for &(x, wx) in &xs {
                        let i = (y as usize * width as usize + x as usize) * 3;
                        for c in 0..3 {
                            acc[c] += wx * wy * src[i + c].widen() as f64;
                        }
                    }
                }
                acc.map(|v| T::narrow(v.round().max(0.0) as u64))
            }
        };
        fill_block(&mut out, region, block, color);
    }
    out
}

/// Filter taps around `centre`, clamped to `[lo, hi)`.
fn taps(centre: f64, lo: u32, hi: u32, sampling: PixelSampling) -> SmallVec<[(u32, f64); 4]> {
    let clamp = |i: i64| i.clamp(i64::from(lo), i64::from(hi) - 1) as u32;
    let base = centre.floor();
    let t = centre - base;
    let b = base as i64;
    match sampling {
        PixelSampling::Nearest => smallvec![(clamp(centre.round() as i64), 1.0)],
        PixelSampling::Linear => smallvec![(clamp(b), 1.0 - t), (clamp(b + 1), t)],
        PixelSampling::Cubic => {
            let w = cubic_weights(t);
            (0..4).map(|i| (clamp(b - 1 + i as i64), w[i])).collect()
        }
    }
}

/// Bicubic convolution weights (a = -0.75) for the taps at `-1, 0, 1, 2` around `t`.
fn cubic_weights(t: f64) -> [f64; 4] {
    const A: f64 = -0.75;
    let k = |x: f64| {
        let x = x.abs();
        if x <= 1.0 {
            ((A + 2.0) * x - (A + 3.0)) * x * x + 1.0
        } else if x < 2.0 {
            ((A * x - 5.0 * A) * x + 8.0 * A) * x - 4.0 * A
        } else {
            0.0
        }
    };
    [k(1.0 + t), k(t), k(1.0 - t), k(2.0 - t)]
}

/// Mosaic cell shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MosaicShape {
    /// Square blocks.
    Square,
    /// Circles inscribed in the block grid.
    Circle,
}

impl MosaicShape {
    /// Parse `shape`: `square` (default), `circle`, or `hexagon` (rendered as squares).
    pub fn from_params(params: &ResolvedParams) -> MaskfxResult<Self> {
        Ok(
            match params.choice("shape", &["square", "hexagon", "circle"], "square")? {
                "circle" => Self::Circle,
                _ => Self::Square,
            },
        )
    }
}

/// Block-average mosaic (`block_size`, optional `shape`).
#[derive(Clone, Copy, Debug, Default)]
pub struct Mosaic;

impl Effect for Mosaic {
    fn name(&self) -> &str {
        "mosaic"
    }

    fn apply(&self, src: &Frame, region: Rect, params: &ResolvedParams) -> MaskfxResult<PixelData> {
        check_region(src, region, self.name())?;
        let size = params.size(&["block_size"])?.max(1);
        let shape = MosaicShape::from_params(params)?;
        Ok(per_layout!(&src.pixels, |v| match shape {
            MosaicShape::Square => mosaic_region(v, src.width, region, size),
            MosaicShape::Circle => circle_mosaic_region(v, src.width, region, size),
        }))
    }
}

/// How a pixelate block picks its color.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelSampling {
    /// The block's centre pixel.
    Nearest,
    /// Bilinear sample at the block centre.
    Linear,
    /// Bicubic sample at the block centre.
    Cubic,
}

impl PixelSampling {
    /// Parse `interpolation`: `nearest` (default), `linear` or `cubic`.
    pub fn from_params(params: &ResolvedParams) -> MaskfxResult<Self> {
        Ok(
            match params.choice("interpolation", &["nearest", "linear", "cubic"], "nearest")? {
                "linear" => Self::Linear,
                "cubic" => Self::Cubic,
                _ => Self::Nearest,
            },
        )
    }
}

/// Pixelation (`block_size`, alias `pixel_size`; optional `interpolation`).
///
/// Filtered sampling also feathers the mask edge by a quarter block.
#[derive(Clone, Copy, Debug, Default)]
pub struct Pixelate;

impl Pixelate {
    fn size(params: &ResolvedParams) -> MaskfxResult<u32> {
        Ok(params.size(&["block_size", "pixel_size"])?.max(1))
    }
}

impl Effect for Pixelate {
    fn name(&self) -> &str {
        "pixelate"
    }

    fn feather(&self, params: &ResolvedParams) -> MaskfxResult<u32> {
        Ok(match PixelSampling::from_params(params)? {
            PixelSampling::Nearest => 0,
            _ => (Self::size(params)? / 4).max(1),
        })
    }

    fn apply(&self, src: &Frame, region: Rect, params: &ResolvedParams) -> MaskfxResult<PixelData> {
        check_region(src, region, self.name())?;
        let size = Self::size(params)?;
        let sampling = PixelSampling::from_params(params)?;
        Ok(per_layout!(&src.pixels, |v| {
            pixelate_region(v, src.width, region, size, sampling)
        }))
    }
}

/// Blur quality level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlurQuality {
    /// One box filter pass.
    Low,
    /// One gaussian pass.
    Medium,
    /// Three gaussian passes with sigma rising to the full value.
    High,
}

impl BlurQuality {
    /// Parse `quality`: `low`, `medium` (default) or `high`.
    pub fn from_params(params: &ResolvedParams) -> MaskfxResult<Self> {
        Ok(
            match params.choice("quality", &["low", "medium", "high"], "medium")? {
                "low" => Self::Low,
                "high" => Self::High,
                _ => Self::Medium,
            },
        )
    }

    fn passes(self) -> u32 {
        match self {
            Self::High => 3,
            _ => 1,
        }
    }
}

/// Separable blur (`radius`, optional `sigma` and `quality`).
///
/// `medium` and `high` feather the mask edge by a quarter radius.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blur;

impl Blur {
    fn radius(params: &ResolvedParams) -> MaskfxResult<u32> {
        let r = params.size(&["radius"])?;
        Ok(if r % 2 == 0 { r.saturating_add(1) } else { r })
    }

    fn sigma(params: &ResolvedParams, radius: u32) -> MaskfxResult<f64> {
        let sigma = params
            .float("sigma")?
            .unwrap_or(0.3 * (f64::from(radius) - 1.0) + 0.8);
        if sigma <= 0.0 {
            return Err(MaskfxError::compositing(
                params.frame.0,
                format!("parameter 'sigma' of effect 'blur' must be > 0, got {sigma}"),
            ));
        }
        Ok(sigma)
    }

    fn kernels(params: &ResolvedParams) -> MaskfxResult<Vec<Vec<u32>>> {
        let radius = Self::radius(params)?;
        Ok(match BlurQuality::from_params(params)? {
            BlurQuality::Low => vec![box_kernel_q16(radius)],
            BlurQuality::Medium => {
                vec![gaussian_kernel_q16(radius, Self::sigma(params, radius)?)]
            }
            BlurQuality::High => {
                let sigma = Self::sigma(params, radius)?;
                (1..=3)
                    .map(|i| gaussian_kernel_q16(radius, sigma * f64::from(i) / 3.0))
                    .collect()
            }
        })
    }
}

impl Effect for Blur {
    fn name(&self) -> &str {
        "blur"
    }

    fn support_padding(&self, params: &ResolvedParams) -> MaskfxResult<u32> {
        let passes = BlurQuality::from_params(params)?.passes();
        Ok(Self::radius(params)?.saturating_mul(passes))
    }

    fn feather(&self, params: &ResolvedParams) -> MaskfxResult<u32> {
        Ok(match BlurQuality::from_params(params)? {
            BlurQuality::Low => 0,
            _ => (Self::radius(params)? / 4).max(1),
        })
    }

    fn apply(&self, src: &Frame, region: Rect, params: &ResolvedParams) -> MaskfxResult<PixelData> {
        check_region(src, region, self.name())?;
        let kernels = Self::kernels(params)?;
        Ok(per_layout!(&src.pixels, |v| {
            blur_region(v, src.width, src.height, region, &kernels)
        }))
    }
}

/// Uniform kernel of `2 * radius + 1` taps in Q16, summing to exactly 1.0.
pub(crate) fn box_kernel_q16(radius: u32) -> Vec<u32> {
    let n = 2 * radius as usize + 1;
    let tap = 65536 / n as u32;
    let mut weights = vec![tap; n];
    weights[n / 2] += 65536 - tap * n as u32;
    weights
}

pub(crate) fn gaussian_kernel_q16(radius: u32, sigma: f64) -> Vec<u32> {
    let r = radius as i64;
    let denom = 2.0 * sigma * sigma;
    let weights_f: Vec<f64> = (-r..=r)
        .map(|i| {
            let x = i as f64;
            (-x * x / denom).exp()
        })
        .collect();
    let sum: f64 = weights_f.iter().sum();

    let mut weights: Vec<u32> = weights_f
        .iter()
        .map(|wf| ((wf / sum) * 65536.0).round().clamp(0.0, 65536.0) as u32)
        .collect();
    // Rounding drift goes to the centre tap so the kernel sums to exactly 1.0 in Q16.
    let acc: i64 = weights.iter().map(|w| i64::from(*w)).sum();
    let mid = weights.len() / 2;
    weights[mid] = (i64::from(weights[mid]) + 65536 - acc).clamp(0, 65536) as u32;
    weights
}

/// Blur over `region`, one separable pass per kernel, reading source pixels clamped to the
/// frame.
///
/// Each pass covers the region padded by the radii of the passes after it, so the result
/// equals a full-frame blur cropped to `region`.
fn blur_region<T: Sample>(
    src: &[T],
    width: u32,
    height: u32,
    region: Rect,
    kernels: &[Vec<u32>],
) -> Vec<T> {
    let frame = Rect {
        x0: 0,
        y0: 0,
        x1: width,
        y1: height,
    };
    let mut current: Option<(Vec<T>, Rect)> = None;
    for (i, k) in kernels.iter().enumerate() {
        let rest: u32 = kernels[i + 1..].iter().map(|k| (k.len() / 2) as u32).sum();
        let target = region.padded(rest, width, height);
        let next = match &current {
            Some((buf, area)) => blur_pass(buf, *area, frame, target, k),
            None => blur_pass(src, frame, frame, target, k),
        };
        current = Some((next, target));
    }
    match current {
        Some((buf, _)) => buf,
        None => crop_region(src, width, region),
    }
}

/// One separable pass over `target`. `src` holds the pixels of `area`, which must cover
/// `target` padded by the kernel radius and clipped to `frame`.
fn blur_pass<T: Sample>(src: &[T], area: Rect, frame: Rect, target: Rect, k: &[u32]) -> Vec<T> {
    let radius = (k.len() / 2) as i64;
    let (w, h) = (i64::from(frame.x1), i64::from(frame.y1));
    let aw = area.width() as usize;
    let at = |x: i64, y: i64| {
        ((y - i64::from(area.y0)) as usize * aw + (x - i64::from(area.x0)) as usize) * 3
    };
    let ry0 = (i64::from(target.y0) - radius).max(0);
    let ry1 = (i64::from(target.y1) + radius).min(h);
    let tw = target.width() as usize;

    let rows = (ry1 - ry0) as usize;
    let mut tmp = vec![T::default(); rows * tw * 3];
    for y in ry0..ry1 {
        for x in target.x0..target.x1 {
            let mut acc = [0u64; 3];
            for (ki, &kw) in k.iter().enumerate() {
                let sx = (i64::from(x) + ki as i64 - radius).clamp(0, w - 1);
                let i = at(sx, y);
                for c in 0..3 {
                    acc[c] += u64::from(kw) * src[i + c].widen();
                }
            }
            let o = ((y - ry0) as usize * tw + (x - target.x0) as usize) * 3;
            for c in 0..3 {
                tmp[o + c] = T::narrow((acc[c] + 32768) >> 16);
            }
        }
    }

    let mut out = vec![T::default(); target.height() as usize * tw * 3];
    for y in target.y0..target.y1 {
        for xo in 0..tw {
            let mut acc = [0u64; 3];
            for (ki, &kw) in k.iter().enumerate() {
                let sy = (i64::from(y) + ki as i64 - radius).clamp(0, h - 1);
                let i = ((sy - ry0) as usize * tw + xo) * 3;
                for c in 0..3 {
                    acc[c] += u64::from(kw) * tmp[i + c].widen();
                }
            }
            let o = ((y - target.y0) as usize * tw + xo) * 3;
            for c in 0..3 {
                out[o + c] = T::narrow((acc[c] + 32768) >> 16);
            }
        }
    }
    out
}

#[cfg(test)]
#[path = "../../tests/unit/composite/effects.rs"]
mod tests;
