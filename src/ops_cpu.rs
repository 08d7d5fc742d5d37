//! Per-layer pixel operations on straight-alpha RGBA canvases.
//!
//! Everything here is plain CPU loops over `image` buffers; only `rotate`
//! resamples, and only for angles that are not multiples of 360.

use image::{imageops, GrayImage, RgbaImage};

use crate::transform::{FlipDirection, TransformAction};

/// Multiplies the alpha channel by `opacity`. Values are truncated into u8
/// range; callers validate `opacity` to [0,1] at job-build time.
pub fn apply_opacity(img: &mut RgbaImage, opacity: f32) {
    if opacity == 1.0 {
        return;
    }
    for px in img.pixels_mut() {
        px.0[3] = (f32::from(px.0[3]) * opacity).clamp(0.0, 255.0) as u8;
    }
}

/// Power-law gamma correction on the RGB channels; alpha is untouched.
/// `out = (in/255)^(1/gamma) * 255`, gamma 1.0 is the identity.
pub fn adjust_gamma(img: &mut RgbaImage, gamma: f32) {
    if gamma == 1.0 {
        return;
    }
    let inv = 1.0 / gamma;
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = ((i as f32 / 255.0).powf(inv) * 255.0).clamp(0.0, 255.0).round() as u8;
    }
    for px in img.pixels_mut() {
        px.0[0] = lut[px.0[0] as usize];
        px.0[1] = lut[px.0[1] as usize];
        px.0[2] = lut[px.0[2] as usize];
    }
}

/// Rotates counter-clockwise about the canvas center without resizing the
/// canvas; corners that leave the frame are clipped and vacated area is
/// transparent. Bilinear resampling over premultiplied values (transparent
/// neighbors must not bleed color). Angles that are multiples of 360 return
/// the input bit-for-bit.
pub fn rotate(img: &RgbaImage, angle_deg: f32) -> RgbaImage {
    if angle_deg.rem_euclid(360.0) == 0.0 {
        return img.clone();
    }

    let (w, h) = img.dimensions();
    let cx = w as f32 / 2.0;
    let cy = h as f32 / 2.0;
    let theta = angle_deg.to_radians();
    let (sin, cos) = theta.sin_cos();

    let mut out = RgbaImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            // Inverse mapping: where did this output pixel come from.
            let sx = cos * dx - sin * dy + cx;
            let sy = sin * dx + cos * dy + cy;
            out.put_pixel(x, y, image::Rgba(sample_bilinear(img, sx, sy)));
        }
    }
    out
}

fn sample_bilinear(img: &RgbaImage, sx: f32, sy: f32) -> [u8; 4] {
    let (w, h) = img.dimensions();
    // Continuous -> pixel-index space.
    let fx = sx - 0.5;
    let fy = sy - 0.5;
    let x0 = fx.floor();
    let y0 = fy.floor();
    let tx = fx - x0;
    let ty = fy - y0;

    let mut acc = [0.0f32; 4];
    for (ix, iy, wgt) in [
        (x0, y0, (1.0 - tx) * (1.0 - ty)),
        (x0 + 1.0, y0, tx * (1.0 - ty)),
        (x0, y0 + 1.0, (1.0 - tx) * ty),
        (x0 + 1.0, y0 + 1.0, tx * ty),
    ] {
        if ix < 0.0 || iy < 0.0 || ix >= w as f32 || iy >= h as f32 {
            continue; // outside contributes transparent
        }
        let px = img.get_pixel(ix as u32, iy as u32).0;
        let a = f32::from(px[3]) / 255.0;
        acc[0] += f32::from(px[0]) * a * wgt;
        acc[1] += f32::from(px[1]) * a * wgt;
        acc[2] += f32::from(px[2]) * a * wgt;
        acc[3] += f32::from(px[3]) * wgt;
    }

    if acc[3] <= 0.0 {
        return [0, 0, 0, 0];
    }
    let a = acc[3] / 255.0;
    [
        (acc[0] / a).clamp(0.0, 255.0).round() as u8,
        (acc[1] / a).clamp(0.0, 255.0).round() as u8,
        (acc[2] / a).clamp(0.0, 255.0).round() as u8,
        acc[3].clamp(0.0, 255.0).round() as u8,
    ]
}

pub fn flip(img: &RgbaImage, direction: FlipDirection) -> RgbaImage {
    match direction {
        FlipDirection::Horizontal => imageops::flip_horizontal(img),
        FlipDirection::Vertical => imageops::flip_vertical(img),
    }
}

/// Toroidal shift: positive `dx` moves content right, positive `dy` moves it
/// down; pixels leaving one edge re-enter at the opposite edge.
pub fn roll(img: &RgbaImage, dx: i64, dy: i64) -> RgbaImage {
    let (w, h) = img.dimensions();
    let dx = dx.rem_euclid(i64::from(w)) as u32;
    let dy = dy.rem_euclid(i64::from(h)) as u32;
    if dx == 0 && dy == 0 {
        return img.clone();
    }
    let mut out = RgbaImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            out.put_pixel((x + dx) % w, (y + dy) % h, *img.get_pixel(x, y));
        }
    }
    out
}

pub fn apply_transform(img: &RgbaImage, action: TransformAction) -> RgbaImage {
    match action {
        TransformAction::Rotate { angle_deg } => rotate(img, angle_deg),
        TransformAction::Flip { direction } => flip(img, direction),
        TransformAction::Roll { dx, dy } => roll(img, dx, dy),
    }
}

/// Replaces the alpha channel with a luminance mask scaled by `opacity`.
/// The mask must already match the image's dimensions.
pub fn replace_alpha(img: &mut RgbaImage, mask: &GrayImage, opacity: f32) {
    debug_assert_eq!(img.dimensions(), mask.dimensions());
    for (px, m) in img.pixels_mut().zip(mask.pixels()) {
        px.0[3] = (f32::from(m.0[0]) * opacity).clamp(0.0, 255.0) as u8;
    }
}

/// Resizes to the target canvas with a Lanczos3 filter; same-size inputs
/// pass through untouched.
pub fn resize_to(img: RgbaImage, width: u32, height: u32) -> RgbaImage {
    if img.dimensions() == (width, height) {
        return img;
    }
    imageops::resize(&img, width, height, imageops::FilterType::Lanczos3)
}

/// Same for single-channel masks.
pub fn resize_mask_to(mask: GrayImage, width: u32, height: u32) -> GrayImage {
    if mask.dimensions() == (width, height) {
        return mask;
    }
    imageops::resize(&mask, width, height, imageops::FilterType::Lanczos3)
}
