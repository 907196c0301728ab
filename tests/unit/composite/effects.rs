use super::*;
use crate::composite::params::{EffectParams, ParamValue};
use crate::foundation::core::FrameIndex;
use crate::testutil::{gradient_frame, rgb8_frame};

fn params(kind: &str, pairs: &[(&str, i64)]) -> ResolvedParams {
    let mut p = EffectParams::new(kind);
    for (k, v) in pairs {
        p = p.with(*k, ParamValue::Int(*v));
    }
    p.resolve(FrameIndex(0))
}

fn with_text(mut p: ResolvedParams, name: &str, value: &str) -> ResolvedParams {
    p.values.insert(name.into(), ParamValue::Text(value.into()));
    p
}

fn crop(frame: &Frame, r: Rect) -> Vec<u8> {
    let PixelData::Rgb8(v) = &frame.pixels else {
        panic!("expected rgb8");
    };
    let mut out = Vec::new();
    for y in r.y0..r.y1 {
        let s = ((y * frame.width + r.x0) * 3) as usize;
        out.extend_from_slice(&v[s..s + r.width() as usize * 3]);
    }
    out
}

const FULL: Rect = Rect {
    x0: 0,
    y0: 0,
    x1: 8,
    y1: 8,
};

#[test]
fn mosaic_block_one_is_identity() {
    let f = gradient_frame(0, 8, 8);
    let out = Mosaic.apply(&f, FULL, &params("mosaic", &[("block_size", 1)])).unwrap();
    assert_eq!(out, PixelData::Rgb8(crop(&f, FULL)));
}

#[test]
fn mosaic_zero_block_clamps_to_one() {
    let f = gradient_frame(0, 8, 8);
    let out = Mosaic.apply(&f, FULL, &params("mosaic", &[("block_size", 0)])).unwrap();
    assert_eq!(out, PixelData::Rgb8(crop(&f, FULL)));
}

#[test]
fn mosaic_averages_with_rounding() {
    // Two pixels 0 and 3 in one 2x1 block: mean 1.5 rounds to 2.
    let f = rgb8_frame(0, 2, 1, vec![0, 0, 0, 3, 3, 3]);
    let r = Rect {
        x0: 0,
        y0: 0,
        x1: 2,
        y1: 1,
    };
    let out = Mosaic.apply(&f, r, &params("mosaic", &[("block_size", 2)])).unwrap();
    assert_eq!(out, PixelData::Rgb8(vec![2; 6]));
}

#[test]
fn mosaic_blocks_anchor_at_region_origin() {
    let f = gradient_frame(0, 8, 8);
    let r = Rect {
        x0: 1,
        y0: 1,
        x1: 6,
        y1: 4,
    };
    let PixelData::Rgb8(out) = Mosaic.apply(&f, r, &params("mosaic", &[("block_size", 4)])).unwrap()
    else {
        panic!("expected rgb8");
    };
    assert_eq!(out.len(), 5 * 3 * 3);
    // Pixels (1,1) and (4,1) share the first block; (5,1) starts the truncated second one.
    assert_eq!(out[0..3], out[3 * 3..3 * 3 + 3]);
    let second = crop(
        &f,
        Rect {
            x0: 5,
            y0: 1,
            x1: 6,
            y1: 4,
        },
    );
    let mean = |c: usize| {
        let s: u32 = (0..3).map(|i| u32::from(second[i * 3 + c])).sum();
        ((s + 1) / 3) as u8
    };
    assert_eq!(out[4 * 3], mean(0));
}

#[test]
fn pixelate_takes_block_centre_and_accepts_alias() {
    let f = gradient_frame(0, 8, 8);
    let out = Pixelate
        .apply(&f, FULL, &params("pixelate", &[("pixel_size", 4)]))
        .unwrap();
    let PixelData::Rgb8(v) = &f.pixels else {
        panic!()
    };
    let centre = ((2 * 8 + 2) * 3) as usize;
    let PixelData::Rgb8(out) = out else { panic!() };
    assert_eq!(out[0..3], v[centre..centre + 3]);
}

#[test]
fn missing_or_negative_size_is_an_error() {
    let f = gradient_frame(0, 8, 8);
    assert!(Mosaic.apply(&f, FULL, &params("mosaic", &[])).is_err());
    let err = Pixelate
        .apply(&f, FULL, &params("pixelate", &[("block_size", -1)]))
        .unwrap_err();
    assert!(err.to_string().contains("block_size"));
}

#[test]
fn kernel_sums_to_one_in_q16() {
    for (r, s) in [(1, 0.8), (3, 1.4), (9, 3.2)] {
        let k = gaussian_kernel_q16(r, s);
        assert_eq!(k.len(), 2 * r as usize + 1);
        assert_eq!(k.iter().sum::<u32>(), 65536);
    }
}

#[test]
fn blur_of_constant_image_is_identity() {
    let f = rgb8_frame(0, 6, 6, [40u8, 90, 200].repeat(36));
    let r = Rect {
        x0: 1,
        y0: 1,
        x1: 5,
        y1: 5,
    };
    let out = Blur.apply(&f, r, &params("blur", &[("radius", 3)])).unwrap();
    assert_eq!(out, PixelData::Rgb8([40u8, 90, 200].repeat(16)));
}

#[test]
fn region_blur_matches_full_frame_blur() {
    let f = gradient_frame(3, 16, 12);
    let p = params("blur", &[("radius", 4)]);
    let full = Rect {
        x0: 0,
        y0: 0,
        x1: 16,
        y1: 12,
    };
    let whole = f.with_pixels(Blur.apply(&f, full, &p).unwrap());
    let r = Rect {
        x0: 5,
        y0: 3,
        x1: 11,
        y1: 9,
    };
    let part = Blur.apply(&f, r, &p).unwrap();
    assert_eq!(part, PixelData::Rgb8(crop(&whole, r)));
    // Even radius is forced up to the next odd value.
    assert_eq!(Blur.support_padding(&p).unwrap(), 5);
}

#[test]
fn region_outside_frame_is_rejected() {
    let f = gradient_frame(0, 4, 4);
    let r = Rect {
        x0: 2,
        y0: 2,
        x1: 6,
        y1: 3,
    };
    assert!(Mosaic.apply(&f, r, &params("mosaic", &[("block_size", 2)])).is_err());
}

#[test]
fn registry_holds_builtins_and_plugins() {
    struct Invert;
    impl Effect for Invert {
        fn name(&self) -> &str {
            "invert"
        }
        fn apply(&self, src: &Frame, region: Rect, _: &ResolvedParams) -> MaskfxResult<PixelData> {
            let PixelData::Rgb8(v) = &src.pixels else {
                return Err(MaskfxError::compositing(None, "rgb8 only"));
            };
            let mut out = Vec::new();
            for y in region.y0..region.y1 {
                for x in region.x0..region.x1 {
                    let i = ((y * src.width + x) * 3) as usize;
                    out.extend(v[i..i + 3].iter().map(|s| 255 - s));
                }
            }
            Ok(PixelData::Rgb8(out))
        }
    }

    let mut reg = EffectRegistry::with_builtins();
    assert_eq!(reg.names(), vec!["blur", "mosaic", "pixelate"]);
    reg.register(Arc::new(Invert));
    assert!(reg.get("invert").is_some());
    assert!(reg.get("sharpen").is_none());
}

#[test]
fn hexagon_mosaic_renders_as_squares() {
    let f = gradient_frame(0, 8, 8);
    let p = params("mosaic", &[("block_size", 4)]);
    let square = Mosaic.apply(&f, FULL, &p).unwrap();
    let hex = Mosaic.apply(&f, FULL, &with_text(p.clone(), "shape", "hexagon")).unwrap();
    assert_eq!(square, hex);
    assert_eq!(
        Mosaic.apply(&f, FULL, &with_text(p, "shape", "square")).unwrap(),
        square
    );
}

#[test]
fn circle_mosaic_fills_inscribed_cells_only() {
    let f = gradient_frame(0, 8, 8);
    let p = with_text(params("mosaic", &[("block_size", 4)]), "shape", "circle");
    let PixelData::Rgb8(out) = Mosaic.apply(&f, FULL, &p).unwrap() else {
        panic!("expected rgb8");
    };
    let src = crop(&f, FULL);
    let px = |v: &[u8], x: usize, y: usize| v[(y * 8 + x) * 3..(y * 8 + x) * 3 + 3].to_vec();

    // One cell of radius 2 centred at (2,2); corners and the far side keep the source.
    let cell: Vec<(usize, usize)> = (0..5)
        .flat_map(|y| (0..5).map(move |x| (x, y)))
        .filter(|&(x, y)| (x as i32 - 2).pow(2) + (y as i32 - 2).pow(2) <= 4)
        .collect();
    assert_eq!(cell.len(), 13);
    let mean = |c: usize| {
        let s: u32 = cell.iter().map(|&(x, y)| u32::from(px(&src, x, y)[c])).sum();
        ((s + 6) / 13) as u8
    };
    assert_eq!(px(&out, 2, 2), vec![mean(0), mean(1), mean(2)]);
    assert_eq!(px(&out, 4, 2), px(&out, 2, 2));
    assert_eq!(px(&out, 0, 0), px(&src, 0, 0));
    assert_eq!(px(&out, 7, 7), px(&src, 7, 7));
}

#[test]
fn unknown_choice_values_are_compositing_errors() {
    let f = gradient_frame(2, 8, 8);
    let sized = |kind: &str, name: &str| params(kind, &[(name, 2)]);
    let cases: [(&dyn Effect, ResolvedParams); 3] = [
        (&Mosaic, with_text(sized("mosaic", "block_size"), "shape", "star")),
        (&Blur, with_text(sized("blur", "radius"), "quality", "ultra")),
        (&Pixelate, with_text(sized("pixelate", "block_size"), "interpolation", "lanczos")),
    ];
    for (effect, p) in cases {
        let err = effect.apply(&f, FULL, &p).unwrap_err();
        assert_eq!(err.class(), crate::foundation::error::ErrorClass::Compositing);
    }
}

#[test]
fn linear_pixelate_averages_the_centre_pixels() {
    // One 2x2 block: the bilinear sample at its centre is the mean of all four.
    let f = rgb8_frame(0, 2, 2, vec![0, 0, 0, 4, 4, 4, 8, 8, 8, 12, 12, 12]);
    let r = Rect {
        x0: 0,
        y0: 0,
        x1: 2,
        y1: 2,
    };
    let p = with_text(params("pixelate", &[("block_size", 2)]), "interpolation", "linear");
    assert_eq!(Pixelate.apply(&f, r, &p).unwrap(), PixelData::Rgb8(vec![6; 12]));
}

#[test]
fn cubic_pixelate_on_odd_blocks_matches_nearest() {
    let f = gradient_frame(1, 9, 9);
    let r = Rect {
        x0: 0,
        y0: 0,
        x1: 9,
        y1: 9,
    };
    let p = params("pixelate", &[("block_size", 3)]);
    let nearest = Pixelate.apply(&f, r, &p).unwrap();
    let cubic = Pixelate
        .apply(&f, r, &with_text(p, "interpolation", "cubic"))
        .unwrap();
    assert_eq!(nearest, cubic);
}

#[test]
fn filtered_pixelate_and_smooth_blur_feather() {
    let p = params("pixelate", &[("block_size", 8)]);
    assert_eq!(Pixelate.feather(&p).unwrap(), 0);
    assert_eq!(Pixelate.feather(&with_text(p, "interpolation", "linear")).unwrap(), 2);

    let b = params("blur", &[("radius", 9)]);
    assert_eq!(Blur.feather(&b).unwrap(), 2);
    assert_eq!(Blur.feather(&with_text(b.clone(), "quality", "low")).unwrap(), 0);
    assert_eq!(Blur.feather(&with_text(b, "quality", "high")).unwrap(), 2);
    assert_eq!(Blur.feather(&params("blur", &[("radius", 1)])).unwrap(), 1);
}

#[test]
fn box_kernel_sums_to_one_in_q16() {
    for r in [0, 1, 4, 10] {
        let k = box_kernel_q16(r);
        assert_eq!(k.len(), 2 * r as usize + 1);
        assert_eq!(k.iter().sum::<u32>(), 65536);
    }
}

#[test]
fn low_quality_blur_is_a_box_filter() {
    let f = rgb8_frame(0, 3, 1, vec![0, 0, 0, 90, 90, 90, 30, 30, 30]);
    let r = Rect {
        x0: 1,
        y0: 0,
        x1: 2,
        y1: 1,
    };
    let p = with_text(params("blur", &[("radius", 1)]), "quality", "low");
    // (0 + 90 + 30) / 3 horizontally; a single row stays put vertically.
    assert_eq!(Blur.apply(&f, r, &p).unwrap(), PixelData::Rgb8(vec![40; 3]));
}

#[test]
fn high_quality_region_blur_matches_full_frame_blur() {
    let f = gradient_frame(5, 24, 20);
    let p = with_text(params("blur", &[("radius", 3)]), "quality", "high");
    assert_eq!(Blur.support_padding(&p).unwrap(), 9);
    let full = Rect {
        x0: 0,
        y0: 0,
        x1: 24,
        y1: 20,
    };
    let whole = f.with_pixels(Blur.apply(&f, full, &p).unwrap());
    for r in [
        Rect {
            x0: 8,
            y0: 6,
            x1: 15,
            y1: 13,
        },
        Rect {
            x0: 0,
            y0: 0,
            x1: 5,
            y1: 4,
        },
    ] {
        assert_eq!(Blur.apply(&f, r, &p).unwrap(), PixelData::Rgb8(crop(&whole, r)));
    }
    let medium = Blur.apply(&f, full, &params("blur", &[("radius", 3)])).unwrap();
    assert_ne!(whole.pixels, medium);
}
