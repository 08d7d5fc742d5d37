//! Two-image blend engine.
//!
//! Normal mode is direct straight-alpha source-over. Every other mode runs in
//! premultiplied-alpha space: premultiply both inputs, combine RGB with the
//! mode's function, interpolate toward the result by the layer's alpha,
//! composite alpha source-over, then un-premultiply. All math is f32 in
//! [0,1]; final channels clamp and quantize to 8-bit, and fully-transparent
//! output pixels get RGB 0 rather than a divide-by-zero.

use image::RgbaImage;

use crate::{
    error::{ComposerError, ComposerResult},
    model::BlendMode,
};

/// Composites `layer` onto `base` under `mode`. Inputs must share dimensions;
/// the layer pipeline always produces target-sized canvases, so a mismatch is
/// a caller bug surfaced as an error.
pub fn blend(base: &RgbaImage, layer: &RgbaImage, mode: BlendMode) -> ComposerResult<RgbaImage> {
    if base.dimensions() != layer.dimensions() {
        return Err(ComposerError::pipeline(format!(
            "blend inputs differ in size: {:?} vs {:?}",
            base.dimensions(),
            layer.dimensions()
        )));
    }

    let (w, h) = base.dimensions();
    let mut out = RgbaImage::new(w, h);
    for (dst, (b, l)) in out
        .pixels_mut()
        .zip(base.pixels().zip(layer.pixels()))
    {
        dst.0 = match mode {
            BlendMode::Normal => source_over(b.0, l.0),
            _ => blend_premultiplied(b.0, l.0, mode),
        };
    }
    Ok(out)
}

fn to_f32(px: [u8; 4]) -> [f32; 4] {
    [
        f32::from(px[0]) / 255.0,
        f32::from(px[1]) / 255.0,
        f32::from(px[2]) / 255.0,
        f32::from(px[3]) / 255.0,
    ]
}

fn quantize(rgb: [f32; 3], a: f32) -> [u8; 4] {
    [
        (rgb[0].clamp(0.0, 1.0) * 255.0).round() as u8,
        (rgb[1].clamp(0.0, 1.0) * 255.0).round() as u8,
        (rgb[2].clamp(0.0, 1.0) * 255.0).round() as u8,
        (a.clamp(0.0, 1.0) * 255.0).round() as u8,
    ]
}

/// Straight-alpha source-over; the closed form of the general formula, so no
/// premultiply round trip.
fn source_over(base: [u8; 4], layer: [u8; 4]) -> [u8; 4] {
    let b = to_f32(base);
    let l = to_f32(layer);
    let ba = b[3];
    let la = l[3];
    let out_a = la + ba * (1.0 - la);
    if out_a <= 0.0 {
        return [0, 0, 0, 0];
    }
    let mut rgb = [0.0f32; 3];
    for i in 0..3 {
        rgb[i] = (l[i] * la + b[i] * ba * (1.0 - la)) / out_a;
    }
    quantize(rgb, out_a)
}

fn blend_premultiplied(base: [u8; 4], layer: [u8; 4], mode: BlendMode) -> [u8; 4] {
    let b = to_f32(base);
    let l = to_f32(layer);
    let ba = b[3];
    let la = l[3];

    let out_a = la + ba * (1.0 - la);
    let mut rgb = [0.0f32; 3];
    if out_a > 0.0 {
        for i in 0..3 {
            let bp = b[i] * ba;
            let lp = l[i] * la;
            let f = match mode {
                BlendMode::Screen => 1.0 - (1.0 - bp) * (1.0 - lp),
                BlendMode::Multiply => bp * lp,
                BlendMode::Add => (bp + lp).clamp(0.0, 1.0),
                BlendMode::Subtract => (bp - lp).clamp(0.0, 1.0),
                BlendMode::Normal => unreachable!("normal mode uses source_over"),
            };
            let blended_p = bp + (f - bp) * la;
            rgb[i] = blended_p / out_a;
        }
    }
    quantize(rgb, out_a)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, px: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, image::Rgba(px))
    }

    fn close(a: [u8; 4], b: [u8; 4], tol: u8) {
        for i in 0..4 {
            assert!(
                a[i].abs_diff(b[i]) <= tol,
                "channel {i}: {a:?} vs {b:?} (tol {tol})"
            );
        }
    }

    #[test]
    fn normal_opaque_layer_wins() {
        let base = solid(2, 2, [0, 0, 255, 255]);
        let layer = solid(2, 2, [255, 0, 0, 255]);
        let out = blend(&base, &layer, BlendMode::Normal).unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn normal_matches_source_over_closed_form() {
        let base = solid(1, 1, [40, 80, 120, 200]);
        let layer = solid(1, 1, [200, 100, 50, 100]);
        let out = blend(&base, &layer, BlendMode::Normal).unwrap();

        let ba = 200.0 / 255.0;
        let la = 100.0 / 255.0;
        let out_a = la + ba * (1.0 - la);
        let exp = |bc: f32, lc: f32| {
            (((lc / 255.0) * la + (bc / 255.0) * ba * (1.0 - la)) / out_a * 255.0).round() as u8
        };
        close(
            out.get_pixel(0, 0).0,
            [
                exp(40.0, 200.0),
                exp(80.0, 100.0),
                exp(120.0, 50.0),
                (out_a * 255.0).round() as u8,
            ],
            1,
        );
    }

    #[test]
    fn screen_is_exact_for_opaque_inputs() {
        let base = solid(1, 1, [128, 0, 255, 255]);
        let layer = solid(1, 1, [128, 255, 0, 255]);
        let out = blend(&base, &layer, BlendMode::Screen).unwrap();
        let s = |b: f32, l: f32| {
            ((1.0 - (1.0 - b / 255.0) * (1.0 - l / 255.0)) * 255.0).round() as u8
        };
        close(
            out.get_pixel(0, 0).0,
            [s(128.0, 128.0), s(0.0, 255.0), s(255.0, 0.0), 255],
            1,
        );
    }

    #[test]
    fn multiply_is_exact_for_opaque_inputs() {
        let base = solid(1, 1, [128, 64, 255, 255]);
        let layer = solid(1, 1, [128, 255, 0, 255]);
        let out = blend(&base, &layer, BlendMode::Multiply).unwrap();
        let m = |b: f32, l: f32| ((b / 255.0) * (l / 255.0) * 255.0).round() as u8;
        close(
            out.get_pixel(0, 0).0,
            [m(128.0, 128.0), m(64.0, 255.0), m(255.0, 0.0), 255],
            1,
        );
    }

    #[test]
    fn transparent_layer_is_noop_under_every_mode() {
        let base = solid(2, 2, [90, 140, 30, 180]);
        let layer = solid(2, 2, [255, 255, 255, 0]);
        for mode in [
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Add,
            BlendMode::Subtract,
        ] {
            let out = blend(&base, &layer, mode).unwrap();
            close(out.get_pixel(0, 0).0, base.get_pixel(0, 0).0, 1);
        }
    }

    #[test]
    fn add_and_subtract_clamp() {
        let base = solid(1, 1, [200, 10, 0, 255]);
        let layer = solid(1, 1, [200, 30, 0, 255]);
        let added = blend(&base, &layer, BlendMode::Add).unwrap();
        assert_eq!(added.get_pixel(0, 0).0[0], 255);
        let subbed = blend(&base, &layer, BlendMode::Subtract).unwrap();
        assert_eq!(subbed.get_pixel(0, 0).0[1], 0);
    }

    #[test]
    fn fully_transparent_result_has_zero_rgb() {
        let base = solid(1, 1, [255, 255, 255, 0]);
        let layer = solid(1, 1, [255, 255, 255, 0]);
        for mode in [BlendMode::Normal, BlendMode::Screen] {
            let out = blend(&base, &layer, mode).unwrap();
            assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 0]);
        }
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let base = solid(2, 2, [0, 0, 0, 255]);
        let layer = solid(3, 2, [0, 0, 0, 255]);
        assert!(blend(&base, &layer, BlendMode::Normal).is_err());
    }
}
