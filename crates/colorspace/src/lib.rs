//! Color-space capability boundary.
//!
//! The raster engine never interprets pixel bytes itself; everything it
//! needs (pixel size, opacity, mixing, conversion) goes through the
//! [`ColorSpace`] trait. Two reference implementations live here so the
//! boundary is exercised end to end; neither claims colorimetric accuracy.

use std::fmt;
use std::sync::Arc;

pub const OPACITY_TRANSPARENT_U8: u8 = 0;
pub const OPACITY_OPAQUE_U8: u8 = 255;

/// Interchange color value used by `from_color`/`to_color`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum RenderingIntent {
    #[default]
    Perceptual,
    RelativeColorimetric,
    Saturation,
    AbsoluteColorimetric,
}

/// Weighted pixel mixing, polymorphic over the channel layout.
pub trait MixOp: fmt::Debug + Send + Sync {
    /// Mixes `count` pixels packed back to back in `pixels` into `out`
    /// (one pixel's worth of bytes). `weights` carries one entry per
    /// pixel and must sum to 255.
    fn mix(&self, pixels: &[u8], weights: &[u8], count: usize, out: &mut [u8]);
}

pub trait ColorSpace: fmt::Debug + Send + Sync {
    fn id(&self) -> &'static str;

    fn pixel_size(&self) -> usize;

    fn channel_count(&self) -> usize;

    fn opacity_u8(&self, pixel: &[u8]) -> u8;

    fn set_opacity_u8(&self, pixel: &mut [u8], opacity: u8);

    fn mix_op(&self) -> &dyn MixOp;

    fn from_color(&self, color: Color, pixel: &mut [u8]);

    fn to_color(&self, pixel: &[u8]) -> Color;

    /// Bulk conversion of `count` pixels from this space into
    /// `dst_space`. The reference spaces route through [`Color`] and
    /// ignore the rendering intent; same-space conversion is a plain
    /// copy.
    fn convert_pixels_to(
        &self,
        src: &[u8],
        dst: &mut [u8],
        dst_space: &dyn ColorSpace,
        count: usize,
        _intent: RenderingIntent,
    ) {
        let src_size = self.pixel_size();
        let dst_size = dst_space.pixel_size();
        assert_eq!(
            src.len(),
            count * src_size,
            "convert source length does not match pixel count"
        );
        assert_eq!(
            dst.len(),
            count * dst_size,
            "convert destination length does not match pixel count"
        );
        if self.id() == dst_space.id() && src_size == dst_size {
            dst.copy_from_slice(src);
            return;
        }
        for index in 0..count {
            let source = &src[index * src_size..(index + 1) * src_size];
            let target = &mut dst[index * dst_size..(index + 1) * dst_size];
            dst_space.from_color(self.to_color(source), target);
        }
    }

    /// Reduces each pixel's opacity by the matching mask entry:
    /// a mask value of 255 clears the pixel, 0 leaves it untouched.
    fn apply_inverse_alpha_mask(&self, pixels: &mut [u8], mask: &[u8], count: usize) {
        let pixel_size = self.pixel_size();
        assert_eq!(
            pixels.len(),
            count * pixel_size,
            "mask target length does not match pixel count"
        );
        assert_eq!(mask.len(), count, "mask length does not match pixel count");
        for index in 0..count {
            let pixel = &mut pixels[index * pixel_size..(index + 1) * pixel_size];
            let opacity = self.opacity_u8(pixel);
            let keep = 255 - mask[index];
            let reduced = ((opacity as u16 * keep as u16 + 127) / 255) as u8;
            self.set_opacity_u8(pixel, reduced);
        }
    }
}

/// Value equality between color-space instances: two instances are
/// interchangeable when they agree on id and pixel layout.
pub fn same_color_space(a: &dyn ColorSpace, b: &dyn ColorSpace) -> bool {
    a.id() == b.id() && a.pixel_size() == b.pixel_size()
}

pub fn rgba8() -> Arc<dyn ColorSpace> {
    Arc::new(Rgba8)
}

pub fn gray_alpha8() -> Arc<dyn ColorSpace> {
    Arc::new(GrayAlpha8)
}

/// 8-bit-per-channel RGBA, alpha last.
#[derive(Debug, Copy, Clone, Default)]
pub struct Rgba8;

#[derive(Debug)]
struct Rgba8Mix;

impl ColorSpace for Rgba8 {
    fn id(&self) -> &'static str {
        "RGBA8"
    }

    fn pixel_size(&self) -> usize {
        4
    }

    fn channel_count(&self) -> usize {
        4
    }

    fn opacity_u8(&self, pixel: &[u8]) -> u8 {
        pixel[3]
    }

    fn set_opacity_u8(&self, pixel: &mut [u8], opacity: u8) {
        pixel[3] = opacity;
    }

    fn mix_op(&self) -> &dyn MixOp {
        &Rgba8Mix
    }

    fn from_color(&self, color: Color, pixel: &mut [u8]) {
        pixel.copy_from_slice(&[color.r, color.g, color.b, color.a]);
    }

    fn to_color(&self, pixel: &[u8]) -> Color {
        Color::new(pixel[0], pixel[1], pixel[2], pixel[3])
    }
}

impl MixOp for Rgba8Mix {
    fn mix(&self, pixels: &[u8], weights: &[u8], count: usize, out: &mut [u8]) {
        mix_alpha_last(pixels, weights, count, out, 4);
    }
}

/// 8-bit gray plus alpha. Exists so cross-space conversion has a second
/// layout to land in.
#[derive(Debug, Copy, Clone, Default)]
pub struct GrayAlpha8;

#[derive(Debug)]
struct GrayAlpha8Mix;

impl ColorSpace for GrayAlpha8 {
    fn id(&self) -> &'static str {
        "GRAYA8"
    }

    fn pixel_size(&self) -> usize {
        2
    }

    fn channel_count(&self) -> usize {
        2
    }

    fn opacity_u8(&self, pixel: &[u8]) -> u8 {
        pixel[1]
    }

    fn set_opacity_u8(&self, pixel: &mut [u8], opacity: u8) {
        pixel[1] = opacity;
    }

    fn mix_op(&self) -> &dyn MixOp {
        &GrayAlpha8Mix
    }

    fn from_color(&self, color: Color, pixel: &mut [u8]) {
        // Rec. 601 luma, integer arithmetic.
        let luma =
            (299 * color.r as u32 + 587 * color.g as u32 + 114 * color.b as u32 + 500) / 1000;
        pixel.copy_from_slice(&[luma as u8, color.a]);
    }

    fn to_color(&self, pixel: &[u8]) -> Color {
        Color::new(pixel[0], pixel[0], pixel[0], pixel[1])
    }
}

impl MixOp for GrayAlpha8Mix {
    fn mix(&self, pixels: &[u8], weights: &[u8], count: usize, out: &mut [u8]) {
        mix_alpha_last(pixels, weights, count, out, 2);
    }
}

/// Alpha-weighted mix for interleaved layouts whose last channel is
/// alpha. Color channels are weighted by `weight * alpha` so transparent
/// samples do not drag the mixed color toward their (meaningless) color
/// bytes; alpha itself is the plain weighted average.
fn mix_alpha_last(pixels: &[u8], weights: &[u8], count: usize, out: &mut [u8], pixel_size: usize) {
    assert_eq!(
        pixels.len(),
        count * pixel_size,
        "mix source length does not match pixel count"
    );
    assert_eq!(weights.len(), count, "one weight per mixed pixel required");
    assert_eq!(out.len(), pixel_size, "mix output must hold one pixel");

    let alpha_channel = pixel_size - 1;
    let mut channel_acc = [0u64; 8];
    let mut alpha_acc: u64 = 0;
    for index in 0..count {
        let pixel = &pixels[index * pixel_size..(index + 1) * pixel_size];
        let weight = weights[index] as u64;
        let alpha = pixel[alpha_channel] as u64;
        let alpha_weight = weight * alpha;
        alpha_acc += alpha_weight;
        for channel in 0..alpha_channel {
            channel_acc[channel] += alpha_weight * pixel[channel] as u64;
        }
    }

    if alpha_acc == 0 {
        out.fill(0);
        return;
    }
    for channel in 0..alpha_channel {
        out[channel] = ((channel_acc[channel] + alpha_acc / 2) / alpha_acc) as u8;
    }
    out[alpha_channel] = ((alpha_acc + 127) / 255) as u8;
}
