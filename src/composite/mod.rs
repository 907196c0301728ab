//! Mask-driven effect compositing.
//!
//! Masks select pixels, assignments pick an effect per mask, and the compositor blends effect
//! output into a new frame without touching anything outside the masks.

/// Frame compositing and overlap rules.
pub mod compositor;
/// Built-in effects and the effect registry.
pub mod effects;
/// Per-object weight masks.
pub mod mask;
/// Effect parameters, keyframes and assignments.
pub mod params;

pub use compositor::{OverlapRule, composite, composite_batch, is_touched};
pub use effects::{
    Blur, BlurQuality, Effect, EffectRegistry, Mosaic, MosaicShape, PixelSampling, Pixelate,
};
pub use mask::{Mask, MaskSet, Rect};
pub use params::{
    AssignmentLookup, AssignmentTarget, EffectAssignment, EffectParams, Interpolation,
    ParamKeyframe, ParamSnapshot, ParamValue, ResolvedParams,
};
