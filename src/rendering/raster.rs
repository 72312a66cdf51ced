/// Rasterizer: draws paint commands into an RGB canvas

use super::font::{glyph, CELL_WIDTH, GLYPH_COLUMNS};
use super::layout::Rgba;
use super::paint::PaintCommand;
use crate::{Error, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba as Pixel, RgbaImage, RgbImage};

/// Largest canvas the rasterizer will allocate (16384 x 16384).
pub const MAX_CANVAS_PIXELS: u64 = 1 << 28;

/// Draw `commands` for a `width` x `height` surface at `scale` device pixels
/// per surface unit. `images` is indexed by paint slot.
pub fn rasterize(
    commands: &[PaintCommand],
    width: u32,
    height: u32,
    scale: f32,
    images: &[Option<&DynamicImage>],
) -> Result<RgbImage> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(Error::RenderError(format!("invalid raster scale {}", scale)));
    }
    let cw = ((width as f32 * scale).ceil() as u32).max(1);
    let ch = ((height as f32 * scale).ceil() as u32).max(1);
    if cw as u64 * ch as u64 > MAX_CANVAS_PIXELS {
        return Err(Error::RenderError(format!(
            "surface too large to rasterize ({}x{} px)",
            cw, ch
        )));
    }

    let mut canvas = RgbaImage::from_pixel(cw, ch, Pixel([255, 255, 255, 255]));
    let px = |v: i32| (v as f32 * scale).floor() as i64;
    let span = |v: u32| ((v as f32 * scale).round() as u32).max(1);

    for cmd in commands {
        match cmd {
            PaintCommand::SolidRect { x, y, width, height, rgba } => {
                if *width == 0 || *height == 0 {
                    continue;
                }
                fill_rect(&mut canvas, px(*x), px(*y), span(*width), span(*height), *rgba);
            }
            PaintCommand::Text { x, y, text, unit, rgba } => {
                let dot = span(*unit);
                for (i, c) in text.chars().enumerate() {
                    let cell_x = *x + (i as u32 * CELL_WIDTH * unit) as i32;
                    for (col, bits) in glyph(c).iter().enumerate().take(GLYPH_COLUMNS as usize) {
                        for row in 0..8u32 {
                            if bits & (1 << row) == 0 {
                                continue;
                            }
                            let gx = cell_x + (col as u32 * unit) as i32;
                            let gy = *y + (row * unit) as i32;
                            fill_rect(&mut canvas, px(gx), px(gy), dot, dot, *rgba);
                        }
                    }
                }
            }
            PaintCommand::Image { x, y, width, height, slot } => {
                let Some(Some(img)) = images.get(*slot) else {
                    continue;
                };
                let resized = imageops::resize(&img.to_rgba8(), span(*width), span(*height), FilterType::Triangle);
                imageops::overlay(&mut canvas, &resized, px(*x), px(*y));
            }
        }
    }

    Ok(DynamicImage::ImageRgba8(canvas).to_rgb8())
}

fn fill_rect(canvas: &mut RgbaImage, x: i64, y: i64, w: u32, h: u32, rgba: Rgba) {
    let (cw, ch) = (canvas.width() as i64, canvas.height() as i64);
    let x0 = x.clamp(0, cw);
    let y0 = y.clamp(0, ch);
    let x1 = (x + w as i64).clamp(0, cw);
    let y1 = (y + h as i64).clamp(0, ch);
    let (r, g, b, a) = rgba;
    for yy in y0..y1 {
        for xx in x0..x1 {
            let p = canvas.get_pixel_mut(xx as u32, yy as u32);
            if a == 255 {
                *p = Pixel([r, g, b, 255]);
            } else {
                let blend = |dst: u8, src: u8| ((src as u32 * a as u32 + dst as u32 * (255 - a as u32)) / 255) as u8;
                *p = Pixel([blend(p[0], r), blend(p[1], g), blend(p[2], b), 255]);
            }
        }
    }
}
