//! Backend device abstraction (§4.2): the capability trait two concrete devices implement.
//!
//! A backend owns image storage and executes kernels over it; the layer/image model above this
//! module never touches pixels directly, only `BackendImage` handles.

pub mod cpu;
pub mod gpu;

use std::fmt;

use crate::error::Result;
use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::kernel::PixelKernel;
use crate::traits::BackendImage;

/// Identifies one of the (at most two, per §1) concrete backends a layer can be realized on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BackendId {
    Cpu,
    Gpu,
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BackendId::Cpu => write!(f, "cpu"),
            BackendId::Gpu => write!(f, "gpu"),
        }
    }
}

/// A single channel's fill value, tagged so `fill` works uniformly across the four storage
/// widths without the caller needing to know the destination format ahead of time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FillValue {
    Unorm8(u8),
    Unorm16(u16),
    Snorm16(i16),
    Float32(f32),
}

/// A snapshot of a backend's allocator state, returned by `query_memory_usage`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub bytes_in_use: usize,
    pub bytes_reserved: usize,
    pub object_count: usize,
}

/// The capability set both the CPU and GPU backends implement (§4.2).
///
/// Every method is expressed in terms of opaque `BackendImage` handles; the backend downcasts
/// them back to its own concrete image type internally (see [`crate::traits::BackendImage`]).
pub trait Backend: Send + Sync {
    fn id(&self) -> BackendId;

    /// Allocates a new, uninitialized image of the given format and dimensions.
    fn allocate(&self, format: PixelFormat, width: u32, height: u32) -> Result<Box<dyn BackendImage>>;

    /// Releases an image previously returned by `allocate`.
    fn deallocate(&self, image: Box<dyn BackendImage>);

    /// Uploads `src_bytes` (tightly packed, `format.stride_for_width(rect.width)` per row) into
    /// `rect` of `dst`.
    fn upload(&self, dst: &dyn BackendImage, src_bytes: &[u8], rect: Rect) -> Result<()>;

    /// Downloads `rect` of `src` into `dst_bytes`, tightly packed.
    fn download(&self, src: &dyn BackendImage, dst_bytes: &mut [u8], rect: Rect) -> Result<()>;

    /// Copies `src_rect` of `src` to `dst`, placing its top-left corner at `dst_origin`. Both
    /// images must live on this backend; cross-backend copies go through CPU staging in the
    /// layer mirror table, not here.
    fn copy(
        &self,
        src: &dyn BackendImage,
        src_rect: Rect,
        dst: &dyn BackendImage,
        dst_origin: (i32, i32),
    ) -> Result<()>;

    /// Fills `rect` of `dst` with a constant value, replicated across every channel.
    fn fill(&self, dst: &dyn BackendImage, rect: Rect, value: FillValue) -> Result<()>;

    /// Evaluates `kernel` over `rect`, tile by tile (§4.1). `src1` is present for binary kernels.
    fn dispatch(
        &self,
        kernel: &dyn PixelKernel,
        dst: &dyn BackendImage,
        src0: &dyn BackendImage,
        src1: Option<&dyn BackendImage>,
        rect: Rect,
        tile_side: u32,
    ) -> Result<()>;

    /// Computes a per-channel histogram of `src` over `rect`.
    fn histogram(&self, src: &dyn BackendImage, rect: Rect, bins: usize) -> Result<Vec<Vec<u32>>>;

    fn query_memory_usage(&self) -> MemoryUsage;

    /// Hints the allocator to pre-reserve `n` buffers/tiles of `bytes_each`, avoiding per-render
    /// allocation churn (§4.6's "pool sizing is a scheduler hint").
    fn reserve_pool(&self, n: usize, bytes_each: usize);
}

/// The backends a session has selected (§3 "Session... currently-selected backend set").
///
/// The CPU backend is always present — it is the fallback every `DeviceLost` recovery and every
/// cross-backend mirror synchronization stages through. The GPU backend is optional, since GPU
/// device/context creation is outside this engine's scope (§1): a host application that never
/// attaches one runs CPU-only.
pub struct BackendSet {
    pub cpu: cpu::CpuBackend,
    pub gpu: Option<gpu::GpuBackend>,
}

impl BackendSet {
    pub fn cpu_only() -> BackendSet {
        BackendSet { cpu: cpu::CpuBackend::new(), gpu: None }
    }

    pub fn with_gpu(gpu: gpu::GpuBackend) -> BackendSet {
        BackendSet { cpu: cpu::CpuBackend::new(), gpu: Some(gpu) }
    }

    pub fn get(&self, id: BackendId) -> Option<&dyn Backend> {
        match id {
            BackendId::Cpu => Some(&self.cpu),
            BackendId::Gpu => self.gpu.as_ref().map(|g| g as &dyn Backend),
        }
    }

    /// Drops the GPU backend, simulating `DeviceLost` (§4.7): subsequent `synchronize` calls fall
    /// back to CPU until a new one is attached via `attach_gpu`.
    pub fn detach_gpu(&mut self) -> Option<gpu::GpuBackend> {
        self.gpu.take()
    }

    pub fn attach_gpu(&mut self, gpu: gpu::GpuBackend) {
        self.gpu = Some(gpu);
    }
}
