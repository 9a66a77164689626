//! Host implementations of the colour and resize kernels.
//!
//! Each function mirrors one CUDA kernel in `vtc-cuda` and takes the same
//! arguments: byte buffers plus [`Channel`] addressing from
//! [`PixelFormat::channel_map`](vtc_core::types::PixelFormat::channel_map).
//! Results are bit-identical to the device kernels for the lossless paths
//! (copy, repack, shuffle) and agree to ±1 for the arithmetic paths.
//!
//! # Colour math
//!
//! ```text
//! Yn = (Y - yoff) / yscale        Cb = (U - 128) / cscale     Cr = (V - 128) / cscale
//! R  = Yn + 2(1 - kr) Cr
//! B  = Yn + 2(1 - kb) Cb
//! G  = (Yn - kr R - kb B) / (1 - kr - kb)
//! ```
//!
//! BT.709 full range gives the familiar `1.5748 / 0.1873 / 0.4681 / 1.8556`.
//! RGB → YUV 4:2:0 averages chroma over each 2×2 block.

use vtc_core::types::{Channel, ColorRange, ColorSpec, Interpolation};

/// Precomputed matrix for one [`ColorSpec`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct YuvCoefficients {
    pub kr: f32,
    pub kb: f32,
    pub y_offset: f32,
    pub y_scale: f32,
    pub c_scale: f32,
}

impl YuvCoefficients {
    pub fn new(color: ColorSpec) -> Self {
        let (kr, kb) = color.luma_coefficients();
        let (y_offset, y_scale, c_scale) = match color.range {
            ColorRange::Limited => (16.0, 219.0, 224.0),
            ColorRange::Full => (0.0, 255.0, 255.0),
        };
        Self {
            kr,
            kb,
            y_offset,
            y_scale,
            c_scale,
        }
    }

    #[inline]
    pub fn to_rgb(&self, y: u8, u: u8, v: u8) -> [u8; 3] {
        let yn = (y as f32 - self.y_offset) / self.y_scale;
        let cb = (u as f32 - 128.0) / self.c_scale;
        let cr = (v as f32 - 128.0) / self.c_scale;
        let r = yn + 2.0 * (1.0 - self.kr) * cr;
        let b = yn + 2.0 * (1.0 - self.kb) * cb;
        let g = (yn - self.kr * r - self.kb * b) / (1.0 - self.kr - self.kb);
        [unit_to_u8(r), unit_to_u8(g), unit_to_u8(b)]
    }

    /// Normalized `(Y, Cb, Cr)` of an RGB pixel; Cb/Cr in [-0.5, 0.5].
    #[inline]
    pub fn to_yuv(&self, rgb: [u8; 3]) -> (f32, f32, f32) {
        let [r, g, b] = rgb.map(|c| c as f32 / 255.0);
        let kg = 1.0 - self.kr - self.kb;
        let y = self.kr * r + kg * g + self.kb * b;
        let cb = (b - y) / (2.0 * (1.0 - self.kb));
        let cr = (r - y) / (2.0 * (1.0 - self.kr));
        (y, cb, cr)
    }

    #[inline]
    pub fn luma_byte(&self, y: f32) -> u8 {
        to_u8(self.y_offset + y * self.y_scale)
    }

    #[inline]
    pub fn chroma_byte(&self, c: f32) -> u8 {
        to_u8(128.0 + c * self.c_scale)
    }
}

#[inline]
fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 255.0) + 0.5) as u8
}

#[inline]
fn unit_to_u8(v: f32) -> u8 {
    to_u8(v.clamp(0.0, 1.0) * 255.0)
}

/// Copy every sample of each source channel to the matching destination
/// channel (repack and shuffle paths). Channels after the first are
/// `chroma_shift`-subsampled.
pub fn copy_channels(
    src: &[u8],
    src_channels: &[Channel],
    dst: &mut [u8],
    dst_channels: &[Channel],
    chroma_shift: u32,
    width: usize,
    height: usize,
) {
    for (i, (s, d)) in src_channels.iter().zip(dst_channels).enumerate() {
        let shift = if i == 0 { 0 } else { chroma_shift };
        for y in 0..height >> shift {
            for x in 0..width >> shift {
                dst[d.at(x, y)] = src[s.at(x, y)];
            }
        }
    }
}

/// YUV (any sub-sampling) → RGB. `chroma_shift` is 1 for 4:2:0.
#[allow(clippy::too_many_arguments)]
pub fn yuv_to_rgb(
    src: &[u8],
    yuv: &[Channel; 3],
    chroma_shift: u32,
    dst: &mut [u8],
    rgb: &[Channel; 3],
    width: usize,
    height: usize,
    coeffs: &YuvCoefficients,
) {
    for y in 0..height {
        let cy = y >> chroma_shift;
        for x in 0..width {
            let cx = x >> chroma_shift;
            let px = coeffs.to_rgb(
                src[yuv[0].at(x, y)],
                src[yuv[1].at(cx, cy)],
                src[yuv[2].at(cx, cy)],
            );
            for (c, value) in rgb.iter().zip(px) {
                dst[c.at(x, y)] = value;
            }
        }
    }
}

/// RGB → YUV. With `chroma_shift == 1` chroma is averaged over 2×2 blocks.
#[allow(clippy::too_many_arguments)]
pub fn rgb_to_yuv(
    src: &[u8],
    rgb: &[Channel; 3],
    dst: &mut [u8],
    yuv: &[Channel; 3],
    chroma_shift: u32,
    width: usize,
    height: usize,
    coeffs: &YuvCoefficients,
) {
    let read = |x: usize, y: usize| -> [u8; 3] {
        [src[rgb[0].at(x, y)], src[rgb[1].at(x, y)], src[rgb[2].at(x, y)]]
    };
    for y in 0..height {
        for x in 0..width {
            let (luma, _, _) = coeffs.to_yuv(read(x, y));
            dst[yuv[0].at(x, y)] = coeffs.luma_byte(luma);
        }
    }
    let block = 1usize << chroma_shift;
    for cy in 0..height / block {
        for cx in 0..width / block {
            let (mut cb, mut cr) = (0.0f32, 0.0f32);
            for dy in 0..block {
                for dx in 0..block {
                    let (_, b, r) = coeffs.to_yuv(read(cx * block + dx, cy * block + dy));
                    cb += b;
                    cr += r;
                }
            }
            let n = (block * block) as f32;
            dst[yuv[1].at(cx, cy)] = coeffs.chroma_byte(cb / n);
            dst[yuv[2].at(cx, cy)] = coeffs.chroma_byte(cr / n);
        }
    }
}

/// Resample one plane of `channels` interleaved samples.
#[allow(clippy::too_many_arguments)]
pub fn resize_plane(
    src: &[u8],
    src_plane: Channel,
    src_size: (usize, usize),
    dst: &mut [u8],
    dst_plane: Channel,
    dst_size: (usize, usize),
    channels: usize,
    interpolation: Interpolation,
) {
    let (sw, sh) = src_size;
    let (dw, dh) = dst_size;
    let scale_x = sw as f32 / dw as f32;
    let scale_y = sh as f32 / dh as f32;
    let sample = |x: usize, y: usize, c: usize| src[src_plane.at(x, y) + c] as f32;

    for y in 0..dh {
        let fy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (sh - 1) as f32);
        for x in 0..dw {
            let fx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (sw - 1) as f32);
            for c in 0..channels {
                let value = match interpolation {
                    Interpolation::Nearest => {
                        let nx = (((x as f32 + 0.5) * scale_x) as usize).min(sw - 1);
                        let ny = (((y as f32 + 0.5) * scale_y) as usize).min(sh - 1);
                        sample(nx, ny, c)
                    }
                    Interpolation::Bilinear => {
                        let (x0, y0) = (fx as usize, fy as usize);
                        let (x1, y1) = ((x0 + 1).min(sw - 1), (y0 + 1).min(sh - 1));
                        let (ax, ay) = (fx - x0 as f32, fy - y0 as f32);
                        let top = sample(x0, y0, c) * (1.0 - ax) + sample(x1, y0, c) * ax;
                        let bottom = sample(x0, y1, c) * (1.0 - ax) + sample(x1, y1, c) * ax;
                        top * (1.0 - ay) + bottom * ay
                    }
                };
                dst[dst_plane.at(x, y) + c] = to_u8(value);
            }
        }
    }
}
