//! Pixel-level compositing shared by the attribution methods.

use image::{Rgb, RgbImage};
use ndarray::Array2;

pub const OVERLAY_IMAGE_WEIGHT: f32 = 0.7;
pub const OVERLAY_HEATMAP_WEIGHT: f32 = 0.3;

const BOUNDARY_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const POSITIVE_COLOR: [f32; 3] = [255.0, 13.0, 87.0];
const NEGATIVE_COLOR: [f32; 3] = [30.0, 136.0, 229.0];

/// 5x7 block capitals, one row per byte, low five bits used.
const GLYPHS: [[u8; 7]; 26] = [
    [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
    [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
    [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
    [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
    [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
    [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
    [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
    [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
    [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
    [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
    [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
    [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
    [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
    [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
    [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
    [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
    [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
    [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
    [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
    [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
    [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
];

fn saturate(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// OpenCV-style JET ramp: dark blue at 0, dark red at 1.
pub fn jet(value: f32) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0);
    let channel = |offset: f32| {
        let c = (4.0 * v - offset).min(-4.0 * v + offset + 3.0).clamp(0.0, 1.0);
        saturate(c * 255.0)
    };
    Rgb([channel(1.5), channel(0.5), channel(-0.5)])
}

/// Colors a `[0, 1]` heatmap, quantized to 8 bits first like a LUT lookup.
pub fn colorize(heatmap: &Array2<f32>) -> RgbImage {
    let (h, w) = heatmap.dim();
    RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let q = (255.0 * heatmap[[y as usize, x as usize]].clamp(0.0, 1.0)) as u8;
        jet(q as f32 / 255.0)
    })
}

/// Per-channel `a * wa + b * wb`, rounded and saturated.
pub fn blend(a: &RgbImage, wa: f32, b: &RgbImage, wb: f32) -> RgbImage {
    RgbImage::from_fn(a.width(), a.height(), |x, y| {
        let pa = a.get_pixel(x, y);
        let pb = b.get_pixel(x, y);
        Rgb(std::array::from_fn(|c| saturate(pa[c] as f32 * wa + pb[c] as f32 * wb)))
    })
}

/// Outlines the masked area by coloring unmasked pixels that touch it.
pub fn mark_boundaries(image: &RgbImage, mask: &Array2<bool>) -> RgbImage {
    let (h, w) = mask.dim();
    let mut out = image.clone();
    for y in 0..h {
        for x in 0..w {
            if mask[[y, x]] {
                continue;
            }
            let touches = (y > 0 && mask[[y - 1, x]])
                || (y + 1 < h && mask[[y + 1, x]])
                || (x > 0 && mask[[y, x - 1]])
                || (x + 1 < w && mask[[y, x + 1]]);
            if touches {
                out.put_pixel(x as u32, y as u32, BOUNDARY_COLOR);
            }
        }
    }
    out
}

/// Red for positive and blue for negative attribution over a faded
/// grayscale copy of the image. Opacity follows `|value| / max|value|`.
pub fn diverging_overlay(image: &RgbImage, values: &Array2<f32>) -> RgbImage {
    let vmax = values.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y);
        let gray = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
        let base = gray * 0.35 + 255.0 * 0.65;
        if vmax <= 0.0 {
            return Rgb([saturate(base); 3]);
        }
        let t = values[[y as usize, x as usize]] / vmax;
        let color = if t >= 0.0 { POSITIVE_COLOR } else { NEGATIVE_COLOR };
        let alpha = t.abs().min(1.0);
        Rgb(std::array::from_fn(|c| saturate(base * (1.0 - alpha) + color[c] * alpha)))
    })
}

/// Black frame with `label` in white capitals, centred.
pub fn placeholder(width: u32, height: u32, label: &str) -> RgbImage {
    let mut img = RgbImage::new(width, height);
    let chars: Vec<char> = label.chars().map(|c| c.to_ascii_uppercase()).collect();
    if chars.is_empty() {
        return img;
    }

    // Two pixels per glyph dot when it fits, otherwise one.
    let advance = |scale: u32| chars.len() as u32 * 6 * scale;
    let scale = if advance(2) <= width { 2 } else { 1 };
    let x0 = width.saturating_sub(advance(scale)) / 2;
    let y0 = height.saturating_sub(7 * scale) / 2;

    for (i, ch) in chars.iter().enumerate() {
        if !ch.is_ascii_uppercase() {
            continue;
        }
        let glyph = GLYPHS[(*ch as u8 - b'A') as usize];
        let gx = x0 + i as u32 * 6 * scale;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..5u32 {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = gx + col * scale + dx;
                        let py = y0 + row as u32 * scale + dy;
                        if px < width && py < height {
                            img.put_pixel(px, py, Rgb([255, 255, 255]));
                        }
                    }
                }
            }
        }
    }
    img
}
