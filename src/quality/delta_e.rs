//! CIEDE2000 color difference between decoded frames.

use crate::foundation::error::{MaskfxError, MaskfxResult};
use crate::media::frame::PixelData;
use rayon::prelude::*;

/// CIELAB color `[L, a, b]`.
pub type Lab = [f64; 3];

// D65 reference white.
const XN: f64 = 0.950_47;
const YN: f64 = 1.0;
const ZN: f64 = 1.088_83;

fn srgb_to_linear(c: f64) -> f64 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn lab_f(t: f64) -> f64 {
    const D: f64 = 6.0 / 29.0;
    if t > D * D * D {
        t.cbrt()
    } else {
        t / (3.0 * D * D) + 4.0 / 29.0
    }
}

/// Normalized non-linear RGB to CIELAB (D65).
pub fn rgb_to_lab(rgb: [f32; 3]) -> Lab {
    let [r, g, b] = rgb.map(|c| srgb_to_linear(f64::from(c)));
    let x = 0.412_456_4 * r + 0.357_576_1 * g + 0.180_437_5 * b;
    let y = 0.212_672_9 * r + 0.715_152_2 * g + 0.072_175_0 * b;
    let z = 0.019_333_9 * r + 0.119_192_0 * g + 0.950_304_1 * b;
    let (fx, fy, fz) = (lab_f(x / XN), lab_f(y / YN), lab_f(z / ZN));
    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

fn hue_deg(b: f64, a: f64) -> f64 {
    if a == 0.0 && b == 0.0 {
        return 0.0;
    }
    let h = b.atan2(a).to_degrees();
    if h < 0.0 { h + 360.0 } else { h }
}

/// CIEDE2000 difference with unit weighting factors.
pub fn ciede2000(lab1: Lab, lab2: Lab) -> f64 {
    const POW25_7: f64 = 6_103_515_625.0;
    let [l1, a1, b1] = lab1;
    let [l2, a2, b2] = lab2;

    let c_bar = (a1.hypot(b1) + a2.hypot(b2)) / 2.0;
    let c_bar7 = c_bar.powi(7);
    let g = 0.5 * (1.0 - (c_bar7 / (c_bar7 + POW25_7)).sqrt());
    let a1p = (1.0 + g) * a1;
    let a2p = (1.0 + g) * a2;
    let c1p = a1p.hypot(b1);
    let c2p = a2p.hypot(b2);
    let h1p = hue_deg(b1, a1p);
    let h2p = hue_deg(b2, a2p);

    let dl = l2 - l1;
    let dc = c2p - c1p;
    let chroma_zero = c1p * c2p == 0.0;
    let dh_deg = if chroma_zero {
        0.0
    } else {
        let d = h2p - h1p;
        if d > 180.0 {
            d - 360.0
        } else if d < -180.0 {
            d + 360.0
        } else {
            d
        }
    };
    let dh = 2.0 * (c1p * c2p).sqrt() * (dh_deg.to_radians() / 2.0).sin();

    let l_bar = (l1 + l2) / 2.0;
    let c_bar_p = (c1p + c2p) / 2.0;
    let h_bar = if chroma_zero {
        h1p + h2p
    } else if (h1p - h2p).abs() <= 180.0 {
        (h1p + h2p) / 2.0
    } else if h1p + h2p < 360.0 {
        (h1p + h2p + 360.0) / 2.0
    } else {
        (h1p + h2p - 360.0) / 2.0
    };

    let t = 1.0 - 0.17 * (h_bar - 30.0).to_radians().cos()
        + 0.24 * (2.0 * h_bar).to_radians().cos()
        + 0.32 * (3.0 * h_bar + 6.0).to_radians().cos()
        - 0.20 * (4.0 * h_bar - 63.0).to_radians().cos();
    let d_theta = 30.0 * (-((h_bar - 275.0) / 25.0).powi(2)).exp();
    let c_bar_p7 = c_bar_p.powi(7);
    let rc = 2.0 * (c_bar_p7 / (c_bar_p7 + POW25_7)).sqrt();
    let l50 = (l_bar - 50.0).powi(2);
    let sl = 1.0 + 0.015 * l50 / (20.0 + l50).sqrt();
    let sc = 1.0 + 0.045 * c_bar_p;
    let sh = 1.0 + 0.015 * c_bar_p * t;
    let rt = -(2.0 * d_theta).to_radians().sin() * rc;

    let (tl, tc, th) = (dl / sl, dc / sc, dh / sh);
    (tl * tl + tc * tc + th * th + rt * tc * th).max(0.0).sqrt()
}

/// Aggregate ΔE00 over one frame pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeltaEStats {
    /// Mean over all pixels.
    pub mean: f64,
    /// Maximum over all pixels.
    pub max: f64,
    /// Pixels whose ΔE00 exceeds the visibility threshold passed to [`frame_delta_e`].
    #[serde(default)]
    pub visible: u64,
    /// Whether the buffers were bit-identical.
    pub bit_exact: bool,
}

/// ΔE00 at which a difference is taken as visible.
pub const VISIBLE_DELTA_E: f64 = 1.0;

/// Per-pixel ΔE00 between two frames of equal size, aggregated.
///
/// Pixels differing by more than `visible_above` are counted in [`DeltaEStats::visible`].
/// Bit-identical buffers return zero without converting any pixel.
pub fn frame_delta_e(
    a: &PixelData,
    b: &PixelData,
    visible_above: f64,
) -> MaskfxResult<DeltaEStats> {
    if a.len() != b.len() {
        return Err(MaskfxError::validation(format!(
            "cannot compare frames of {} and {} samples",
            a.len(),
            b.len()
        )));
    }
    if a.same_layout(b) && a.content_hash() == b.content_hash() {
        return Ok(DeltaEStats {
            mean: 0.0,
            max: 0.0,
            visible: 0,
            bit_exact: true,
        });
    }
    let n = a.len() / 3;
    if n == 0 {
        return Ok(DeltaEStats::default());
    }
    let (sum, max, visible) = (0..n)
        .into_par_iter()
        .map(|p| {
            let (pa, pb) = (a.rgb_f32(p), b.rgb_f32(p));
            if pa == pb {
                0.0
            } else {
                ciede2000(rgb_to_lab(pa), rgb_to_lab(pb))
            }
        })
        .fold(
            || (0.0f64, 0.0f64, 0u64),
            |(s, m, v), d| (s + d, m.max(d), v + u64::from(d > visible_above)),
        )
        .reduce(
            || (0.0, 0.0, 0),
            |(s1, m1, v1), (s2, m2, v2)| (s1 + s2, m1.max(m2), v1 + v2),
        );
    Ok(DeltaEStats {
        mean: sum / n as f64,
        max,
        visible,
        bit_exact: false,
    })
}

#[cfg(test)]
#[path = "../../tests/unit/quality/delta_e.rs"]
mod tests;
