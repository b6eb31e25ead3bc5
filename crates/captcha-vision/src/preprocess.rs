//! Glyph normalisation ahead of inference.
//!
//! The classifier was trained on images produced by OpenCV, so every stage
//! here follows OpenCV's 8-bit semantics rather than the `image` crate's
//! defaults:
//!
//! 1. `cvtColor(BGR2GRAY)`: BT.601 weights in 14-bit fixed point.
//! 2. `adaptiveThreshold(GAUSSIAN_C, THRESH_BINARY_INV, 11, 2)` with replicated
//!    borders, glyph pixels become 255.
//! 3. `resize(INTER_LINEAR)` to 124x24 with half-pixel centres.
//! 4. Scale to `[0, 1]` and lay out as NHWC `[1, 24, 124, 1]`.

use image::{DynamicImage, GrayImage, Luma};
use ndarray::Array4;

use crate::capture::decode_bytes;
use crate::types::{CaptchaResult, IMG_HEIGHT, IMG_WIDTH};

/// Neighbourhood size of the adaptive threshold.
pub const THRESHOLD_BLOCK: usize = 11;

/// Constant subtracted from the local mean.
pub const THRESHOLD_C: i32 = 2;

/// Decode and normalise raw image bytes into the model's input tensor.
pub fn prepare_input(bytes: &[u8]) -> CaptchaResult<Array4<f32>> {
    let img = decode_bytes(bytes)?;
    let gray = to_gray(&img);
    let binary = adaptive_threshold_inv(&gray, THRESHOLD_BLOCK, THRESHOLD_C);
    let resized = resize_linear(&binary, IMG_WIDTH, IMG_HEIGHT);
    Ok(to_tensor(&resized))
}

/// Convert to 8-bit luma with OpenCV's integer BT.601 coefficients.
pub fn to_gray(img: &DynamicImage) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const SHIFT: u32 = 14;

    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    let mut out = GrayImage::new(w, h);
    for (x, y, px) in rgb.enumerate_pixels() {
        let [r, g, b] = px.0;
        let v = (r as u32 * R + g as u32 * G + b as u32 * B + (1 << (SHIFT - 1))) >> SHIFT;
        out.put_pixel(x, y, Luma([v.min(255) as u8]));
    }
    out
}

/// Gaussian kernel with OpenCV's automatic sigma for a given size.
fn gaussian_kernel(size: usize) -> Vec<f64> {
    let sigma = 0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let centre = (size as f64 - 1.0) * 0.5;
    let scale = -0.5 / (sigma * sigma);
    let mut kernel: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - centre;
            (scale * d * d).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Separable Gaussian blur with replicated borders, rounded back to 8 bits.
fn gaussian_mean(src: &GrayImage, size: usize) -> GrayImage {
    let (w, h) = src.dimensions();
    let (wi, hi) = (w as i64, h as i64);
    let kernel = gaussian_kernel(size);
    let radius = (size / 2) as i64;

    let mut horizontal = vec![0.0f64; (w * h) as usize];
    for y in 0..hi {
        for x in 0..wi {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = (x + k as i64 - radius).clamp(0, wi - 1);
                acc += weight * src.get_pixel(sx as u32, y as u32)[0] as f64;
            }
            horizontal[(y * wi + x) as usize] = acc;
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..hi {
        for x in 0..wi {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = (y + k as i64 - radius).clamp(0, hi - 1);
                acc += weight * horizontal[(sy * wi + x) as usize];
            }
            out.put_pixel(x as u32, y as u32, Luma([acc.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Adaptive Gaussian threshold with inverted binary output.
///
/// A pixel becomes foreground (255) when it is at least `c` darker than its
/// weighted neighbourhood mean.
pub fn adaptive_threshold_inv(src: &GrayImage, block: usize, c: i32) -> GrayImage {
    let mean = gaussian_mean(src, block);
    let (w, h) = src.dimensions();
    let mut out = GrayImage::new(w, h);
    for (x, y, px) in src.enumerate_pixels() {
        let diff = px[0] as i32 - mean.get_pixel(x, y)[0] as i32;
        let v = if diff <= -c { 255 } else { 0 };
        out.put_pixel(x, y, Luma([v]));
    }
    out
}

/// Map one destination coordinate onto its two source taps and weight.
fn linear_taps(dst: u32, scale: f64, src_len: u32) -> (u32, u32, f64) {
    let f = (dst as f64 + 0.5) * scale - 0.5;
    let mut s = f.floor();
    let mut frac = f - s;
    if s < 0.0 {
        s = 0.0;
        frac = 0.0;
    }
    let last = src_len.saturating_sub(1) as f64;
    if s >= last {
        s = last;
        frac = 0.0;
    }
    let s0 = s as u32;
    let s1 = (s0 + 1).min(src_len.saturating_sub(1));
    (s0, s1, frac)
}

/// Bilinear resize with half-pixel centres and no antialiasing.
pub fn resize_linear(src: &GrayImage, width: u32, height: u32) -> GrayImage {
    let (sw, sh) = src.dimensions();
    let sx = sw as f64 / width as f64;
    let sy = sh as f64 / height as f64;

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        let (y0, y1, fy) = linear_taps(y, sy, sh);
        for x in 0..width {
            let (x0, x1, fx) = linear_taps(x, sx, sw);
            let p00 = src.get_pixel(x0, y0)[0] as f64;
            let p01 = src.get_pixel(x1, y0)[0] as f64;
            let p10 = src.get_pixel(x0, y1)[0] as f64;
            let p11 = src.get_pixel(x1, y1)[0] as f64;
            let top = p00 * (1.0 - fx) + p01 * fx;
            let bottom = p10 * (1.0 - fx) + p11 * fx;
            let v = top * (1.0 - fy) + bottom * fy;
            out.put_pixel(x, y, Luma([v.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Scale to `[0, 1]` and add batch and channel axes (NHWC).
pub fn to_tensor(img: &GrayImage) -> Array4<f32> {
    let (w, h) = img.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, h as usize, w as usize, 1));
    for (x, y, px) in img.enumerate_pixels() {
        tensor[[0, y as usize, x as usize, 0]] = px[0] as f32 / 255.0;
    }
    tensor
}
