//! GPU backend: a fixed-capacity tile texture pool with LRU eviction (§4.2).
//!
//! GPU device/context creation is out of scope for this engine (§1) — `GpuBackend` is built
//! against a [`GpuDeviceHandle`] the host application already initialized. What this module owns
//! is the tile pool bookkeeping: allocation, LRU eviction among tiles not in the active render
//! graph, and reservation pinning. Actual pixel math for a dispatched kernel is evaluated on the
//! host side of that handle (the handle is responsible for shader compilation/execution); here we
//! model it with the same per-pixel kernel evaluation the CPU backend uses, since no concrete GPU
//! API is in scope.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::backend::{Backend, BackendId, FillValue, MemoryUsage};
use crate::error::{self, Error, Result};
use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::kernel::{decode_pixel, encode_pixel, histogram_bin, PixelKernel};
use crate::traits::BackendImage;

/// An already-initialized GPU context the backend issues tile uploads/downloads and kernel
/// dispatches through. Creating one (device selection, surface/context setup) is outside this
/// engine's scope; the host application owns it.
pub trait GpuDeviceHandle: Send + Sync + fmt::Debug {
    /// Human-readable adapter name, surfaced in logs only.
    fn adapter_name(&self) -> &str;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
struct TileId(u64);

struct Tile {
    pixels: Vec<u8>,
    last_used: u64,
    reserved: bool,
    owner: Option<u64>,
}

/// The GPU backend's concrete image: an ordered list of tile ids covering the logical rectangle.
#[derive(Debug)]
pub struct GpuImage {
    id: u64,
    format: PixelFormat,
    width: u32,
    height: u32,
    tile_side: u32,
}

impl BackendImage for GpuImage {
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

fn downcast_gpu(image: &dyn BackendImage) -> Result<&GpuImage> {
    image.downcast_ref::<GpuImage>().ok_or(Error::FormatMismatch)
}

struct Pool {
    capacity: usize,
    tile_bytes: usize,
    tiles: HashMap<TileId, Tile>,
    images: HashMap<u64, Vec<TileId>>,
    clock: u64,
    next_tile_id: u64,
}

impl Pool {
    fn new(capacity: usize) -> Pool {
        Pool {
            capacity,
            tile_bytes: 0,
            tiles: HashMap::new(),
            images: HashMap::new(),
            clock: 0,
            next_tile_id: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_one(&mut self) -> Option<TileId> {
        let victim = self
            .tiles
            .iter()
            .filter(|(_, t)| !t.reserved)
            .min_by_key(|(_, t)| t.last_used)
            .map(|(id, _)| *id)?;
        self.tiles.remove(&victim);
        for owners in self.images.values_mut() {
            owners.retain(|id| *id != victim);
        }
        Some(victim)
    }

    fn allocate_tile(&mut self, bytes: usize, owner: u64) -> Result<TileId> {
        while self.tiles.len() >= self.capacity {
            if self.evict_one().is_none() {
                return Err(Error::BackendOutOfMemory);
            }
        }
        let id = TileId(self.next_tile_id);
        self.next_tile_id += 1;
        let last_used = self.tick();
        self.tiles.insert(id, Tile { pixels: vec![0u8; bytes], last_used, reserved: false, owner: Some(owner) });
        Ok(id)
    }

    fn touch(&mut self, id: TileId) {
        let t = self.tick();
        if let Some(tile) = self.tiles.get_mut(&id) {
            tile.last_used = t;
        }
    }
}

/// The GPU backend: a tile texture pool plus the (externally owned) device handle.
pub struct GpuBackend {
    #[allow(dead_code)]
    device: Box<dyn GpuDeviceHandle>,
    pool: Mutex<Pool>,
    next_image_id: AtomicU64,
}

impl fmt::Debug for GpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("GpuBackend").field("device", &self.device).finish()
    }
}

impl GpuBackend {
    pub fn new(device: Box<dyn GpuDeviceHandle>, tile_pool_capacity: usize) -> GpuBackend {
        GpuBackend { device, pool: Mutex::new(Pool::new(tile_pool_capacity)), next_image_id: AtomicU64::new(0) }
    }

    fn image_tiles<'a>(pool: &'a Pool, image: &GpuImage) -> Vec<TileId> {
        pool.images.get(&image.id).cloned().unwrap_or_default()
    }

    fn tile_grid(image: &GpuImage) -> Vec<Rect> {
        Rect::full(image.width, image.height).tiles(image.tile_side)
    }
}

impl Backend for GpuBackend {
    fn id(&self) -> BackendId {
        BackendId::Gpu
    }

    fn allocate(&self, format: PixelFormat, width: u32, height: u32) -> Result<Box<dyn BackendImage>> {
        error::invariant(width > 0 && height > 0, "image dimensions must be non-zero")?;
        let tile_side = 256u32.min(width.max(height));
        let image_id = self.next_image_id.fetch_add(1, Ordering::Relaxed);
        let image = GpuImage { id: image_id, format, width, height, tile_side };
        let tile_rects = Self::tile_grid(&image);

        let mut pool = self.pool.lock();
        let mut ids = Vec::with_capacity(tile_rects.len());
        for rect in &tile_rects {
            let bytes = format.stride_for_width(rect.width) * rect.height as usize;
            match pool.allocate_tile(bytes, image_id) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        pool.tiles.remove(&id);
                    }
                    return Err(e);
                }
            }
        }
        pool.images.insert(image_id, ids);
        Ok(Box::new(image))
    }

    fn deallocate(&self, image: Box<dyn BackendImage>) {
        if let Ok(gpu) = image.downcast::<GpuImage>() {
            let mut pool = self.pool.lock();
            if let Some(ids) = pool.images.remove(&gpu.id) {
                for id in ids {
                    pool.tiles.remove(&id);
                }
            }
        }
    }

    fn upload(&self, dst: &dyn BackendImage, src_bytes: &[u8], rect: Rect) -> Result<()> {
        let dst = downcast_gpu(dst)?;
        error::invariant(rect.fits_within(dst.width, dst.height), "upload rect out of bounds")?;
        let bpp = dst.format.bytes_per_pixel();
        let row_bytes = rect.width as usize * bpp;
        let mut pool = self.pool.lock();
        let tile_rects = Self::tile_grid(dst);
        let tile_ids = Self::image_tiles(&pool, dst);
        for (tile_rect, tile_id) in tile_rects.iter().zip(tile_ids.iter()) {
            let overlap = intersect(tile_rect, &rect);
            if overlap.is_empty() {
                continue;
            }
            pool.touch(*tile_id);
            let tile_stride = tile_rect.width as usize * bpp;
            if let Some(tile) = pool.tiles.get_mut(tile_id) {
                for row in 0..overlap.height as usize {
                    let global_row = overlap.y as usize + row;
                    let src_off = (global_row - rect.y as usize) * row_bytes
                        + (overlap.x as usize - rect.x as usize) * bpp;
                    let tile_off = (global_row - tile_rect.y as usize) * tile_stride
                        + (overlap.x as usize - tile_rect.x as usize) * bpp;
                    let len = overlap.width as usize * bpp;
                    tile.pixels[tile_off..tile_off + len].copy_from_slice(&src_bytes[src_off..src_off + len]);
                }
            }
        }
        Ok(())
    }

    fn download(&self, src: &dyn BackendImage, dst_bytes: &mut [u8], rect: Rect) -> Result<()> {
        let src = downcast_gpu(src)?;
        error::invariant(rect.fits_within(src.width, src.height), "download rect out of bounds")?;
        let bpp = src.format.bytes_per_pixel();
        let row_bytes = rect.width as usize * bpp;
        let mut pool = self.pool.lock();
        let tile_rects = Self::tile_grid(src);
        let tile_ids = Self::image_tiles(&pool, src);
        for (tile_rect, tile_id) in tile_rects.iter().zip(tile_ids.iter()) {
            let overlap = intersect(tile_rect, &rect);
            if overlap.is_empty() {
                continue;
            }
            pool.touch(*tile_id);
            let tile_stride = tile_rect.width as usize * bpp;
            if let Some(tile) = pool.tiles.get(tile_id) {
                for row in 0..overlap.height as usize {
                    let global_row = overlap.y as usize + row;
                    let dst_off = (global_row - rect.y as usize) * row_bytes
                        + (overlap.x as usize - rect.x as usize) * bpp;
                    let tile_off = (global_row - tile_rect.y as usize) * tile_stride
                        + (overlap.x as usize - tile_rect.x as usize) * bpp;
                    let len = overlap.width as usize * bpp;
                    dst_bytes[dst_off..dst_off + len].copy_from_slice(&tile.pixels[tile_off..tile_off + len]);
                }
            }
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
        let src_img = downcast_gpu(src)?;
        let dst_img = downcast_gpu(dst)?;
        error::invariant(src_img.format == dst_img.format, "copy requires matching formats")?;
        let mut staging = vec![0u8; src_img.format.stride_for_width(src_rect.width) * src_rect.height as usize];
        self.download(src, &mut staging, src_rect)?;
        self.upload(dst, &staging, src_rect.at_origin(dst_origin))
    }

    fn fill(&self, dst: &dyn BackendImage, rect: Rect, value: FillValue) -> Result<()> {
        let dst_img = downcast_gpu(dst)?;
        error::invariant(rect.fits_within(dst_img.width, dst_img.height), "fill rect out of bounds")?;
        let native = match value {
            FillValue::Unorm8(v) => v as f64,
            FillValue::Unorm16(v) => v as f64,
            FillValue::Snorm16(v) => v as f64 / 32767.0,
            FillValue::Float32(v) => v as f64,
        };
        let channels = dst_img.format.channel_count() as usize;
        let bpp = dst_img.format.bytes_per_pixel();
        let row_bytes = rect.width as usize * bpp;
        let values = vec![native; channels];
        let mut row_buf = vec![0u8; row_bytes];
        for col in 0..rect.width as usize {
            encode_pixel(dst_img.format, &values, &mut row_buf, col * bpp);
        }
        let mut plane = vec![0u8; row_bytes * rect.height as usize];
        for row in 0..rect.height as usize {
            plane[row * row_bytes..(row + 1) * row_bytes].copy_from_slice(&row_buf);
        }
        self.upload(dst, &plane, rect)
    }

    fn dispatch(
        &self,
        kernel: &dyn PixelKernel,
        dst: &dyn BackendImage,
        src0: &dyn BackendImage,
        src1: Option<&dyn BackendImage>,
        rect: Rect,
        _tile_side: u32,
    ) -> Result<()> {
        let format = downcast_gpu(dst)?.format;
        let mut src0_buf = vec![0u8; format.stride_for_width(rect.width) * rect.height as usize];
        self.download(src0, &mut src0_buf, rect)?;
        let src1_buf = if let Some(src1) = src1 {
            let mut buf = vec![0u8; format.stride_for_width(rect.width) * rect.height as usize];
            self.download(src1, &mut buf, rect)?;
            Some(buf)
        } else {
            None
        };

        let bpp = format.bytes_per_pixel();
        let channels = format.channel_count() as usize;
        let row_bytes = rect.width as usize * bpp;
        let mut out_buf = vec![0u8; row_bytes * rect.height as usize];
        let mut src0_px = vec![0f64; channels];
        let mut src1_px = vec![0f64; channels];
        let mut out_px = vec![0f64; channels];
        for row in 0..rect.height as usize {
            for col in 0..rect.width as usize {
                let off = row * row_bytes + col * bpp;
                decode_pixel(&src0_buf, format, off, &mut src0_px);
                let src1_ref = if let Some(buf) = &src1_buf {
                    decode_pixel(buf, format, off, &mut src1_px);
                    Some(&src1_px[..])
                } else {
                    None
                };
                kernel.eval(format, &src0_px, src1_ref, &mut out_px);
                encode_pixel(format, &out_px, &mut out_buf, off);
            }
        }
        self.upload(dst, &out_buf, rect)
    }

    fn histogram(&self, src: &dyn BackendImage, rect: Rect, bins: usize) -> Result<Vec<Vec<u32>>> {
        let format = downcast_gpu(src)?.format;
        let channels = format.channel_count() as usize;
        let bpp = format.bytes_per_pixel();
        let row_bytes = rect.width as usize * bpp;
        let mut buf = vec![0u8; row_bytes * rect.height as usize];
        self.download(src, &mut buf, rect)?;
        let domain_max = format.max_value();
        let mut totals = vec![vec![0u32; bins]; channels];
        let mut px = vec![0f64; channels];
        for row in 0..rect.height as usize {
            for col in 0..rect.width as usize {
                let off = row * row_bytes + col * bpp;
                decode_pixel(&buf, format, off, &mut px);
                for c in 0..channels {
                    totals[c][histogram_bin(px[c], domain_max, bins)] += 1;
                }
            }
        }
        Ok(totals)
    }

    fn query_memory_usage(&self) -> MemoryUsage {
        let pool = self.pool.lock();
        let bytes_in_use: usize = pool.tiles.values().map(|t| t.pixels.len()).sum();
        MemoryUsage {
            bytes_in_use,
            bytes_reserved: pool.tile_bytes * pool.capacity,
            object_count: pool.images.len(),
        }
    }

    fn reserve_pool(&self, n: usize, bytes_each: usize) {
        let mut pool = self.pool.lock();
        pool.tile_bytes = bytes_each;
        for _ in 0..n {
            if pool.tiles.len() >= pool.capacity {
                break;
            }
            let id = TileId(pool.next_tile_id);
            pool.next_tile_id += 1;
            let last_used = pool.tick();
            pool.tiles.insert(id, Tile { pixels: vec![0u8; bytes_each], last_used, reserved: true, owner: None });
        }
    }
}

fn intersect(a: &Rect, b: &Rect) -> Rect {
    let x0 = a.x.max(b.x);
    let y0 = a.y.max(b.y);
    let x1 = a.right().min(b.right());
    let y1 = a.bottom().min(b.bottom());
    if x1 <= x0 || y1 <= y0 {
        Rect::new(x0, y0, 0, 0)
    } else {
        Rect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FakeDevice;
    impl GpuDeviceHandle for FakeDevice {
        fn adapter_name(&self) -> &str {
            "fake"
        }
    }

    #[test]
    fn upload_download_roundtrips_across_tiles() {
        let backend = GpuBackend::new(Box::new(FakeDevice), 64);
        let image = backend.allocate(PixelFormat::RGBA8, 300, 130).unwrap();
        let src: Vec<u8> = (0..300 * 130 * 4).map(|i| (i % 251) as u8).collect();
        backend.upload(image.as_ref(), &src, Rect::full(300, 130)).unwrap();
        let mut out = vec![0u8; src.len()];
        backend.download(image.as_ref(), &mut out, Rect::full(300, 130)).unwrap();
        assert_eq!(src, out);
    }

    #[test]
    fn pool_exhaustion_reports_out_of_memory_when_nothing_is_evictable() {
        let backend = GpuBackend::new(Box::new(FakeDevice), 1);
        // Pin the pool's only slot with a reserved tile, leaving nothing LRU can evict.
        backend.reserve_pool(1, 256 * 256 * 4);
        let result = backend.allocate(PixelFormat::RGBA8, 256, 256);
        assert!(matches!(result, Err(Error::BackendOutOfMemory)));
    }

    #[test]
    fn lru_eviction_makes_room_for_new_tiles() {
        let backend = GpuBackend::new(Box::new(FakeDevice), 1);
        let a = backend.allocate(PixelFormat::RGBA8, 256, 256).unwrap();
        // Capacity is 1 and `a`'s tile is not reserved, so allocating `b` evicts it.
        let b = backend.allocate(PixelFormat::RGBA8, 256, 256);
        assert!(b.is_ok());
        drop(a);
    }
}
