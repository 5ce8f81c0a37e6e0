//! CPU backend: raw pixel buffers behind a small slab allocator, dispatched over with a `rayon`
//! worker pool so tiles run in parallel (§4.1: "tiles are independent, may execute in any order").

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::backend::{Backend, BackendId, FillValue, MemoryUsage};
use crate::error::{self, Error, Result};
use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::kernel::{decode_pixel, encode_pixel, histogram_bin, PixelKernel};
use crate::traits::BackendImage;

/// The CPU backend's concrete image: a tightly packed pixel buffer guarded by a mutex so the
/// backend can dispatch tiles onto worker threads without each tile needing its own handle.
#[derive(Debug)]
pub struct CpuImage {
    format: PixelFormat,
    width: u32,
    height: u32,
    data: Mutex<Vec<u8>>,
}

impl CpuImage {
    fn stride(&self) -> usize {
        self.format.stride_for_width(self.width)
    }
}

impl BackendImage for CpuImage {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn format(&self) -> PixelFormat {
        self.format
    }
}

fn downcast_cpu(image: &dyn BackendImage) -> Result<&CpuImage> {
    image.downcast_ref::<CpuImage>().ok_or(Error::FormatMismatch)
}

/// Slab allocator + `rayon`-backed tile dispatcher.
///
/// Slabs are plain `Vec<u8>` buffers pooled by byte size; `reserve_pool` pre-fills the pool so a
/// render's first few allocations don't hit the system allocator (§4.2's scheduler-hint slab
/// allocator).
pub struct CpuBackend {
    slabs: Mutex<Vec<Vec<u8>>>,
    bytes_in_use: AtomicUsize,
    bytes_reserved: AtomicUsize,
    object_count: AtomicUsize,
}

impl CpuBackend {
    pub fn new() -> CpuBackend {
        CpuBackend {
            slabs: Mutex::new(Vec::new()),
            bytes_in_use: AtomicUsize::new(0),
            bytes_reserved: AtomicUsize::new(0),
            object_count: AtomicUsize::new(0),
        }
    }

    fn take_slab(&self, size: usize) -> Vec<u8> {
        let mut slabs = self.slabs.lock();
        if let Some(pos) = slabs.iter().position(|s| s.len() >= size) {
            let mut slab = slabs.swap_remove(pos);
            slab.truncate(size);
            slab
        } else {
            vec![0u8; size]
        }
    }

    /// Drops slabs not referenced by any live object. The caller is responsible for having
    /// `deallocate`d everything it no longer needs first.
    pub fn release_unused(&self) {
        self.slabs.lock().clear();
        self.bytes_reserved.store(0, Ordering::Relaxed);
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        CpuBackend::new()
    }
}

impl Backend for CpuBackend {
    fn id(&self) -> BackendId {
        BackendId::Cpu
    }

    fn allocate(&self, format: PixelFormat, width: u32, height: u32) -> Result<Box<dyn BackendImage>> {
        error::invariant(width > 0 && height > 0, "image dimensions must be non-zero")?;
        let size = format.stride_for_width(width) * height as usize;
        let data = self.take_slab(size);
        self.bytes_in_use.fetch_add(size, Ordering::Relaxed);
        self.object_count.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(CpuImage { format, width, height, data: Mutex::new(data) }))
    }

    fn deallocate(&self, image: Box<dyn BackendImage>) {
        if let Ok(cpu) = image.downcast::<CpuImage>() {
            let size = cpu.data.lock().len();
            self.bytes_in_use.fetch_sub(size, Ordering::Relaxed);
            self.object_count.fetch_sub(1, Ordering::Relaxed);
            self.slabs.lock().push(cpu.data.into_inner());
        }
    }

    fn upload(&self, dst: &dyn BackendImage, src_bytes: &[u8], rect: Rect) -> Result<()> {
        let dst = downcast_cpu(dst)?;
        error::invariant(rect.fits_within(dst.width, dst.height), "upload rect out of bounds")?;
        let bpp = dst.format.bytes_per_pixel();
        let row_bytes = rect.width as usize * bpp;
        error::invariant(
            src_bytes.len() >= row_bytes * rect.height as usize,
            "upload source buffer too small",
        )?;
        let stride = dst.stride();
        let mut data = dst.data.lock();
        for row in 0..rect.height as usize {
            let dst_off = (rect.y as usize + row) * stride + rect.x as usize * bpp;
            let src_off = row * row_bytes;
            data[dst_off..dst_off + row_bytes].copy_from_slice(&src_bytes[src_off..src_off + row_bytes]);
        }
        Ok(())
    }

    fn download(&self, src: &dyn BackendImage, dst_bytes: &mut [u8], rect: Rect) -> Result<()> {
        let src = downcast_cpu(src)?;
        error::invariant(rect.fits_within(src.width, src.height), "download rect out of bounds")?;
        let bpp = src.format.bytes_per_pixel();
        let row_bytes = rect.width as usize * bpp;
        error::invariant(
            dst_bytes.len() >= row_bytes * rect.height as usize,
            "download destination buffer too small",
        )?;
        let stride = src.stride();
        let data = src.data.lock();
        for row in 0..rect.height as usize {
            let src_off = (rect.y as usize + row) * stride + rect.x as usize * bpp;
            let dst_off = row * row_bytes;
            dst_bytes[dst_off..dst_off + row_bytes].copy_from_slice(&data[src_off..src_off + row_bytes]);
        }
        Ok(())
    }

    fn copy(
        &self,
        src: &dyn BackendImage,
        src_rect: Rect,
        dst: &dyn BackendImage,
        dst_origin: (i32, i32),
    ) -> Result<()> {
        let src_cpu = downcast_cpu(src)?;
        let dst_cpu = downcast_cpu(dst)?;
        error::invariant(src_rect.fits_within(src_cpu.width, src_cpu.height), "copy source out of bounds")?;
        let dst_rect = src_rect.at_origin(dst_origin);
        error::invariant(dst_rect.fits_within(dst_cpu.width, dst_cpu.height), "copy destination out of bounds")?;
        error::invariant(src_cpu.format == dst_cpu.format, "copy requires matching formats")?;
        let bpp = src_cpu.format.bytes_per_pixel();
        let row_bytes = src_rect.width as usize * bpp;
        let src_stride = src_cpu.stride();
        let dst_stride = dst_cpu.stride();
        let src_data = src_cpu.data.lock();
        let mut dst_data = dst_cpu.data.lock();
        for row in 0..src_rect.height as usize {
            let src_off = (src_rect.y as usize + row) * src_stride + src_rect.x as usize * bpp;
            let dst_off = (dst_rect.y as usize + row) * dst_stride + dst_rect.x as usize * bpp;
            let chunk = src_data[src_off..src_off + row_bytes].to_vec();
            dst_data[dst_off..dst_off + row_bytes].copy_from_slice(&chunk);
        }
        Ok(())
    }

    fn fill(&self, dst: &dyn BackendImage, rect: Rect, value: FillValue) -> Result<()> {
        let dst = downcast_cpu(dst)?;
        error::invariant(rect.fits_within(dst.width, dst.height), "fill rect out of bounds")?;
        let native = match value {
            FillValue::Unorm8(v) => v as f64,
            FillValue::Unorm16(v) => v as f64,
            FillValue::Snorm16(v) => v as f64 / 32767.0,
            FillValue::Float32(v) => v as f64,
        };
        let channels = dst.format.channel_count() as usize;
        let bpp = dst.format.bytes_per_pixel();
        let stride = dst.stride();
        let mut data = dst.data.lock();
        let values = vec![native; channels];
        for row in 0..rect.height as usize {
            for col in 0..rect.width as usize {
                let offset =
                    (rect.y as usize + row) * stride + (rect.x as usize + col) * bpp;
                encode_pixel(dst.format, &values, &mut data, offset);
            }
        }
        Ok(())
    }

    fn dispatch(
        &self,
        kernel: &dyn PixelKernel,
        dst: &dyn BackendImage,
        src0: &dyn BackendImage,
        src1: Option<&dyn BackendImage>,
        rect: Rect,
        tile_side: u32,
    ) -> Result<()> {
        let dst_cpu = downcast_cpu(dst)?;
        let src0_cpu = downcast_cpu(src0)?;
        let src1_cpu = src1.map(downcast_cpu).transpose()?;
        error::invariant(rect.fits_within(dst_cpu.width, dst_cpu.height), "dispatch rect out of bounds")?;

        let format = dst_cpu.format;
        let channels = format.channel_count() as usize;
        let bpp = format.bytes_per_pixel();
        let dst_stride = dst_cpu.stride();
        let src0_stride = src0_cpu.stride();
        let src1_stride = src1_cpu.map(|s| s.stride());

        let tiles = rect.tiles(tile_side);
        let mut dst_data = dst_cpu.data.lock();
        let src0_data = src0_cpu.data.lock();
        let src1_data = src1_cpu.map(|s| s.data.lock());

        // Tiles write disjoint regions of `dst_data`, so we can hand out `&mut` chunks to
        // `rayon` safely via `par_chunks_mut` over full rows is awkward with arbitrary tile
        // rects; instead each tile computes its output rows into a scratch buffer in parallel,
        // then the (cheap, sequential) copy-back keeps the mutex discipline simple.
        let computed: Vec<(Rect, Vec<u8>)> = tiles
            .par_iter()
            .map(|tile| {
                let row_bytes = tile.width as usize * bpp;
                let mut out_buf = vec![0u8; row_bytes * tile.height as usize];
                let mut src0_px = vec![0f64; channels];
                let mut src1_px = vec![0f64; channels];
                let mut out_px = vec![0f64; channels];
                for row in 0..tile.height as usize {
                    for col in 0..tile.width as usize {
                        let src0_off =
                            (tile.y as usize + row) * src0_stride + (tile.x as usize + col) * bpp;
                        decode_pixel(&src0_data, format, src0_off, &mut src0_px);
                        let src1_ref = if let (Some(data), Some(stride)) = (&src1_data, src1_stride) {
                            let off = (tile.y as usize + row) * stride + (tile.x as usize + col) * bpp;
                            decode_pixel(data, format, off, &mut src1_px);
                            Some(&src1_px[..])
                        } else {
                            None
                        };
                        kernel.eval(format, &src0_px, src1_ref, &mut out_px);
                        let out_off = row * row_bytes + col * bpp;
                        encode_pixel(format, &out_px, &mut out_buf, out_off);
                    }
                }
                (*tile, out_buf)
            })
            .collect();

        for (tile, buf) in computed {
            let row_bytes = tile.width as usize * bpp;
            for row in 0..tile.height as usize {
                let dst_off = (tile.y as usize + row) * dst_stride + tile.x as usize * bpp;
                let src_off = row * row_bytes;
                dst_data[dst_off..dst_off + row_bytes].copy_from_slice(&buf[src_off..src_off + row_bytes]);
            }
        }
        Ok(())
    }

    fn histogram(&self, src: &dyn BackendImage, rect: Rect, bins: usize) -> Result<Vec<Vec<u32>>> {
        let src = downcast_cpu(src)?;
        error::invariant(rect.fits_within(src.width, src.height), "histogram rect out of bounds")?;
        let format = src.format;
        let channels = format.channel_count() as usize;
        let bpp = format.bytes_per_pixel();
        let stride = src.stride();
        let domain_max = format.max_value();
        let data = src.data.lock();

        let partials: Vec<Vec<Vec<u32>>> = rect
            .tiles(256)
            .par_iter()
            .map(|tile| {
                let mut counts = vec![vec![0u32; bins]; channels];
                let mut px = vec![0f64; channels];
                for row in 0..tile.height as usize {
                    for col in 0..tile.width as usize {
                        let off = (tile.y as usize + row) * stride + (tile.x as usize + col) * bpp;
                        decode_pixel(&data, format, off, &mut px);
                        for c in 0..channels {
                            let bin = histogram_bin(px[c], domain_max, bins);
                            counts[c][bin] += 1;
                        }
                    }
                }
                counts
            })
            .collect();

        let mut totals = vec![vec![0u32; bins]; channels];
        for partial in partials {
            for (c, bin_counts) in partial.into_iter().enumerate() {
                for (b, count) in bin_counts.into_iter().enumerate() {
                    totals[c][b] += count;
                }
            }
        }
        Ok(totals)
    }

    fn query_memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            bytes_in_use: self.bytes_in_use.load(Ordering::Relaxed),
            bytes_reserved: self.bytes_reserved.load(Ordering::Relaxed),
            object_count: self.object_count.load(Ordering::Relaxed),
        }
    }

    fn reserve_pool(&self, n: usize, bytes_each: usize) {
        let mut slabs = self.slabs.lock();
        for _ in 0..n {
            slabs.push(vec![0u8; bytes_each]);
        }
        self.bytes_reserved.fetch_add(n * bytes_each, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{ChannelOperatorKernel, Operator};

    #[test]
    fn upload_download_roundtrips() {
        let backend = CpuBackend::new();
        let image = backend.allocate(PixelFormat::RGBA8, 4, 4).unwrap();
        let src: Vec<u8> = (0..4 * 4 * 4).map(|i| i as u8).collect();
        backend.upload(image.as_ref(), &src, Rect::full(4, 4)).unwrap();
        let mut out = vec![0u8; src.len()];
        backend.download(image.as_ref(), &mut out, Rect::full(4, 4)).unwrap();
        assert_eq!(src, out);
    }

    #[test]
    fn dispatch_negate_is_involutive() {
        let backend = CpuBackend::new();
        let src = backend.allocate(PixelFormat::Mono8, 8, 8).unwrap();
        let tmp = backend.allocate(PixelFormat::Mono8, 8, 8).unwrap();
        let dst = backend.allocate(PixelFormat::Mono8, 8, 8).unwrap();
        let bytes: Vec<u8> = (0..64).map(|i| (i * 3) as u8).collect();
        backend.upload(src.as_ref(), &bytes, Rect::full(8, 8)).unwrap();

        let negate = ChannelOperatorKernel { operator: Operator::Negate, scalar: None };
        backend
            .dispatch(&negate, tmp.as_ref(), src.as_ref(), None, Rect::full(8, 8), 4)
            .unwrap();
        backend
            .dispatch(&negate, dst.as_ref(), tmp.as_ref(), None, Rect::full(8, 8), 4)
            .unwrap();

        let mut out = vec![0u8; bytes.len()];
        backend.download(dst.as_ref(), &mut out, Rect::full(8, 8)).unwrap();
        assert_eq!(bytes, out);
    }

    #[test]
    fn release_unused_drops_pooled_slabs() {
        let backend = CpuBackend::new();
        backend.reserve_pool(4, 1024);
        assert_eq!(backend.query_memory_usage().bytes_reserved, 4096);
        backend.release_unused();
        assert_eq!(backend.query_memory_usage().bytes_reserved, 0);
    }
}
