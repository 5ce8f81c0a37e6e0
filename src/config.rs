//! Engine-wide tunables.
//!
//! The core never reads environment variables or configuration files itself — it is a pure
//! library (see the purpose & scope notes). `EngineConfig` simply groups the defaults the render
//! scheduler and backends are specified against, so a host application (or the `bs-cli` wrapper)
//! can override them in one place.

/// Tunables for the render scheduler and the tile dispatch engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    /// Side length, in pixels, of a dispatch tile. The spec calls out 128 or 256 as typical.
    pub tile_side: u32,
    /// `max(width, height)` a preview render is downscaled to before the filter graph runs.
    pub preview_budget: u32,
    /// Preview render quality factor in `[0.1, 1.0]`; multiplies the downscale target.
    pub preview_quality: f32,
    /// Advisory frame budget for preview renders, in frames per second.
    pub max_fps: f32,
    /// Number of CPU slab buffers the CPU backend pre-reserves per working-layer footprint.
    pub cpu_slab_count: usize,
    /// Capacity, in tiles, of the GPU tile texture pool.
    pub gpu_tile_pool_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tile_side: 256,
            preview_budget: 2560,
            preview_quality: 1.0,
            max_fps: 30.0,
            cpu_slab_count: 3,
            gpu_tile_pool_capacity: 512,
        }
    }
}

impl EngineConfig {
    /// Clamps `preview_quality` into `[0.1, 1.0]`, leaving the rest of the config untouched.
    pub fn with_preview_quality(mut self, quality: f32) -> Self {
        self.preview_quality = quality.max(0.1).min(1.0);
        self
    }

    /// The advisory frame budget for preview renders, in seconds.
    pub fn frame_budget_secs(&self) -> f32 {
        1.0 / self.max_fps.max(1.0)
    }
}
