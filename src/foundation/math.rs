pub(crate) fn mul_div255_u32(x: u32, y: u32) -> u32 {
    (x * y + 127) / 255
}

/// Blend `effect` over `source` with 8-bit alpha `a`.
///
/// Integer rounding keeps `blend(s, s, a) == s` for every alpha.
pub(crate) fn blend_u8(effect: u8, source: u8, a: u8) -> u8 {
    let a = u32::from(a);
    ((u32::from(effect) * a + u32::from(source) * (255 - a) + 127) / 255) as u8
}

pub(crate) fn blend_u16(effect: u16, source: u16, a: u8) -> u16 {
    let a = u64::from(a);
    ((u64::from(effect) * a + u64::from(source) * (255 - a) + 127) / 255) as u16
}

/// Combine an 8-bit mask weight with an intensity in `[0, 1]`.
pub(crate) fn scale_weight(weight: u8, intensity: f64) -> u8 {
    let i = (intensity.clamp(0.0, 1.0) * 255.0).round() as u32;
    mul_div255_u32(u32::from(weight), i) as u8
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/math.rs"]
mod tests;
