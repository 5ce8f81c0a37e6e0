//! Separable Gaussian blur, shared by cascaded sharpen (§4.4.3) and film grain (§4.4.4).
//!
//! Blurring needs neighbourhood access that the per-pixel [`crate::kernel::PixelKernel`]
//! abstraction doesn't provide, so this runs as an explicit CPU-side two-pass convolution over a
//! layer's full pixel buffer rather than through `Backend::dispatch`.

use crate::backend::{BackendId, BackendSet};
use crate::error::Result;
use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::kernel::{decode_pixel, encode_pixel};
use crate::layer::Layer;

/// Builds the 1-D Gaussian kernel used for both blur passes.
///
/// For `radius < 0.6` the filter degenerates to a renormalised 3-tap kernel from the continuous
/// Gaussian evaluated at `{-1, 0, 1}` (§4.4.3's numerical detail); otherwise a full kernel of
/// half-width `ceil(3 * radius)` is built with `sigma = radius`.
pub fn gaussian_kernel_1d(radius: f32) -> Vec<f64> {
    let radius = radius.max(0.0) as f64;
    if radius < 0.6 {
        let g = |x: f64| (-0.5 * (x / radius.max(1e-3)).powi(2)).exp();
        let mut taps = [g(-1.0), g(0.0), g(1.0)];
        if radius <= 1e-6 {
            taps = [0.0, 1.0, 0.0];
        }
        let sum: f64 = taps.iter().sum();
        return taps.iter().map(|t| t / sum).collect();
    }
    let half_width = (3.0 * radius).ceil() as i64;
    let mut taps = Vec::with_capacity((half_width * 2 + 1) as usize);
    for i in -half_width..=half_width {
        let x = i as f64;
        taps.push((-0.5 * (x / radius).powi(2)).exp());
    }
    let sum: f64 = taps.iter().sum();
    taps.iter().map(|t| t / sum).collect()
}

pub(crate) fn convolve_1d(src: &[f64], width: usize, height: usize, kernel: &[f64], horizontal: bool) -> Vec<f64> {
    let half = kernel.len() / 2;
    let mut out = vec![0.0; src.len()];
    if horizontal {
        for y in 0..height {
            for x in 0..width {
                let mut acc = 0.0;
                for (k, weight) in kernel.iter().enumerate() {
                    let sx = (x as i64 + k as i64 - half as i64).clamp(0, width as i64 - 1) as usize;
                    acc += src[y * width + sx] * weight;
                }
                out[y * width + x] = acc;
            }
        }
    } else {
        for y in 0..height {
            for x in 0..width {
                let mut acc = 0.0;
                for (k, weight) in kernel.iter().enumerate() {
                    let sy = (y as i64 + k as i64 - half as i64).clamp(0, height as i64 - 1) as usize;
                    acc += src[sy * width + x] * weight;
                }
                out[y * width + x] = acc;
            }
        }
    }
    out
}

/// Retrieves `src`'s full buffer and decodes it into one `f64` plane per channel.
pub(crate) fn layer_to_planes(backends: &BackendSet, src: &Layer) -> Result<Vec<Vec<f64>>> {
    let format = src.format();
    let width = src.width();
    let height = src.height();
    let channels = format.channel_count() as usize;

    let mut raw = vec![0u8; format.stride_for_width(width) * height as usize];
    src.retrieve(backends, &mut raw, Rect::full(width, height))?;

    let mut planes = vec![vec![0f64; (width * height) as usize]; channels];
    let bpp = format.bytes_per_pixel();
    let stride = format.stride_for_width(width);
    let mut px = vec![0f64; channels];
    for y in 0..height as usize {
        for x in 0..width as usize {
            let offset = y * stride + x * bpp;
            decode_pixel(&raw, format, offset, &mut px);
            for c in 0..channels {
                planes[c][y * width as usize + x] = px[c];
            }
        }
    }
    Ok(planes)
}

/// Encodes `planes` back into raw bytes and uploads them into `dst` on `backend_id`.
pub(crate) fn planes_to_layer(
    backends: &BackendSet,
    backend_id: BackendId,
    dst: &Layer,
    planes: &[Vec<f64>],
) -> Result<()> {
    let format = dst.format();
    let width = dst.width();
    let height = dst.height();
    let channels = format.channel_count() as usize;
    let bpp = format.bytes_per_pixel();
    let stride = format.stride_for_width(width);
    let mut out = vec![0u8; stride * height as usize];
    let mut px = vec![0f64; channels];
    for y in 0..height as usize {
        for x in 0..width as usize {
            for c in 0..channels {
                px[c] = planes[c][y * width as usize + x];
            }
            encode_pixel(format, &px, &mut out, y * stride + x * bpp);
        }
    }
    let backend = backends.get(backend_id).ok_or(crate::error::Error::DeviceLost)?;
    dst.update_data_for_backend(backend, &out, Rect::full(width, height))
}

/// Blurs `src` with the given radius and writes the result into `dst` on `backend_id`. Both
/// layers must already share `(format, width, height)`.
pub fn blur_layer(backends: &BackendSet, backend_id: BackendId, dst: &Layer, src: &Layer, radius: f32) -> Result<()> {
    let width = src.width() as usize;
    let height = src.height() as usize;
    let mut planes = layer_to_planes(backends, src)?;

    let kernel = gaussian_kernel_1d(radius);
    for plane in planes.iter_mut() {
        let h = convolve_1d(plane, width, height, &kernel, true);
        *plane = convolve_1d(&h, width, height, &kernel, false);
    }

    planes_to_layer(backends, backend_id, dst, &planes)
}

/// Box-filter downscale of `src` into `dst`, which must already be allocated at the target size
/// (§4.6 step 1, preview sizing). Each destination pixel averages the source pixels its box
/// covers; upscaling (a destination larger than the source) is not a case this is used for.
pub fn downscale_layer(backends: &BackendSet, backend_id: BackendId, dst: &Layer, src: &Layer) -> Result<()> {
    let src_planes = layer_to_planes(backends, src)?;
    let src_w = src.width() as usize;
    let src_h = src.height() as usize;
    let dst_w = dst.width() as usize;
    let dst_h = dst.height() as usize;
    let channels = src_planes.len();

    let mut dst_planes = vec![vec![0f64; dst_w * dst_h]; channels];
    for dy in 0..dst_h {
        let y0 = dy * src_h / dst_h;
        let y1 = ((dy + 1) * src_h / dst_h).max(y0 + 1).min(src_h);
        for dx in 0..dst_w {
            let x0 = dx * src_w / dst_w;
            let x1 = ((dx + 1) * src_w / dst_w).max(x0 + 1).min(src_w);
            let count = ((y1 - y0) * (x1 - x0)) as f64;
            for c in 0..channels {
                let mut sum = 0.0;
                for y in y0..y1 {
                    for x in x0..x1 {
                        sum += src_planes[c][y * src_w + x];
                    }
                }
                dst_planes[c][dy * dst_w + dx] = sum / count;
            }
        }
    }

    planes_to_layer(backends, backend_id, dst, &dst_planes)
}

/// Generates a uniform-noise tile matching `width × height × format` (§4.4.4 step 1), `mono`
/// selecting between a single shared noise channel (replicated across R/G/B) and independent
/// per-channel noise.
pub fn noise_tile(format: PixelFormat, width: u32, height: u32, mono: bool, seed: u64) -> Vec<u8> {
    let channels = format.channel_count() as usize;
    let domain_max = format.max_value();
    let bpp = format.bytes_per_pixel();
    let stride = format.stride_for_width(width);
    let mut out = vec![0u8; stride * height as usize];
    let mut rng = SplitMix64::new(seed);
    let mut px = vec![0f64; channels];
    for y in 0..height as usize {
        for x in 0..width as usize {
            if mono {
                let v = rng.next_unit() * domain_max;
                for c in px.iter_mut() {
                    *c = v;
                }
            } else {
                for c in px.iter_mut() {
                    *c = rng.next_unit() * domain_max;
                }
            }
            encode_pixel(format, &px, &mut out, y * stride + x * bpp);
        }
    }
    out
}

/// A tiny deterministic PRNG so grain tiles are reproducible from a seed (§9b: seeded once per
/// filter instance, never from wall-clock time).
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> SplitMix64 {
        SplitMix64 { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }

    fn next_unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_kernel_sums_to_one() {
        let k = gaussian_kernel_1d(0.3);
        let sum: f64 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn full_kernel_sums_to_one() {
        let k = gaussian_kernel_1d(2.0);
        let sum: f64 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn noise_tile_is_deterministic_for_a_fixed_seed() {
        let a = noise_tile(PixelFormat::Mono8, 4, 4, true, 42);
        let b = noise_tile(PixelFormat::Mono8, 4, 4, true, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn downscale_averages_a_uniform_image_unchanged() {
        use crate::backend::BackendSet;

        let backends = BackendSet::cpu_only();
        let src = Layer::new("src", PixelFormat::Mono8, 8, 8);
        let data = vec![200u8; 64];
        src.update_data_for_backend(&backends.cpu, &data, Rect::full(8, 8)).unwrap();
        let dst = Layer::new("dst", PixelFormat::Mono8, 4, 4);

        downscale_layer(&backends, BackendId::Cpu, &dst, &src).unwrap();
        let mut out = vec![0u8; 16];
        dst.retrieve(&backends, &mut out, Rect::full(4, 4)).unwrap();
        assert!(out.iter().all(|&v| (v as i32 - 200).abs() <= 1));
    }
}
