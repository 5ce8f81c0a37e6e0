//! Render scheduler (§4.6): preview downscaling, ping-pong scratch allocation, filter-graph
//! dispatch, and the one-active-render-per-session backpressure policy.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};

use crate::backend::{BackendId, BackendSet};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::filters::FilterGraph;
use crate::geometry::Rect;
use crate::layer::Layer;

/// Whether a render targets the interactive preview or a full-resolution final output.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RenderTarget {
    Preview,
    Final,
}

/// Identifies one render request, monotonically increasing per scheduler.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RenderJobId(pub u64);

/// What a completed (or aborted) render produced.
#[derive(Debug)]
pub struct RenderOutcome {
    pub job: RenderJobId,
    /// Set if the advisory frame budget (preview only) was exceeded; the caller already has the
    /// (possibly late) output, this is purely informational.
    pub stale: bool,
}

/// Token a scheduler hands back for the in-flight job; dropping or cancelling it sets the flag a
/// render checks at each filter boundary (§5 "suspension points").
struct CancelToken {
    cancelled: AtomicBool,
}

/// Caches the downscaled source layer used for preview renders, invalidated whenever the source
/// layer identity or the downscale factor changes.
struct PreviewCache {
    source_name: String,
    width: u32,
    height: u32,
    quality: f32,
    layer: Layer,
}

/// Drives one session's filter graph against its source image (§4.6).
///
/// Owns the ping-pong scratch layers and the preview downscale cache; a new `request_render` call
/// cancels any render still in flight for this scheduler (backpressure: at most one active render
/// per session).
pub struct RenderScheduler {
    config: EngineConfig,
    next_job: AtomicU64,
    in_flight: parking_lot::Mutex<Option<Arc<CancelToken>>>,
    preview_cache: parking_lot::Mutex<Option<PreviewCache>>,
    scratch_a: parking_lot::Mutex<Option<Layer>>,
    scratch_b: parking_lot::Mutex<Option<Layer>>,
}

impl RenderScheduler {
    pub fn new(config: EngineConfig) -> RenderScheduler {
        RenderScheduler {
            config,
            next_job: AtomicU64::new(0),
            in_flight: parking_lot::Mutex::new(None),
            preview_cache: parking_lot::Mutex::new(None),
            scratch_a: parking_lot::Mutex::new(None),
            scratch_b: parking_lot::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// `max(w, h) <= preview_budget * quality`, preserving aspect ratio; never upscales.
    fn preview_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let budget = (self.config.preview_budget as f32 * self.config.preview_quality).max(1.0);
        let longest = width.max(height) as f32;
        if longest <= budget {
            return (width, height);
        }
        let scale = budget / longest;
        let scaled_w = ((width as f32 * scale).round() as u32).max(1);
        let scaled_h = ((height as f32 * scale).round() as u32).max(1);
        (scaled_w, scaled_h)
    }

    /// Returns the layer a preview render should use as its source: the full-resolution source
    /// itself if it already fits the budget, otherwise a cached downscaled copy rebuilt only when
    /// the source or the quality factor has changed.
    fn preview_source<'a>(&self, backends: &BackendSet, backend_id: BackendId, source: &'a Layer) -> Result<Layer> {
        let (width, height) = self.preview_dimensions(source.width(), source.height());
        if (width, height) == (source.width(), source.height()) {
            return source.duplicate(backends, backend_id, "preview-source-passthrough");
        }

        let mut cache = self.preview_cache.lock();
        let needs_rebuild = match cache.as_ref() {
            Some(c) => {
                c.source_name != source.name
                    || c.width != width
                    || c.height != height
                    || c.quality != self.config.preview_quality
            }
            None => true,
        };

        if needs_rebuild {
            debug!("scheduler: rebuilding preview cache ({}x{} -> {}x{})", source.width(), source.height(), width, height);
            let downscaled = Layer::new("preview-source", source.format(), width, height);
            crate::filters::blur::downscale_layer(backends, backend_id, &downscaled, source)?;
            *cache = Some(PreviewCache {
                source_name: source.name.clone(),
                width,
                height,
                quality: self.config.preview_quality,
                layer: downscaled,
            });
        }

        cache.as_ref().unwrap().layer.duplicate(backends, backend_id, "preview-source-copy")
    }

    fn ensure_scratch(&self, format: crate::format::PixelFormat, width: u32, height: u32) {
        let mut a = self.scratch_a.lock();
        let mut b = self.scratch_b.lock();
        let stale = |l: &Option<Layer>| match l {
            Some(layer) => layer.format() != format || layer.width() != width || layer.height() != height,
            None => true,
        };
        if stale(&a) {
            *a = Some(Layer::new("scratch-a", format, width, height));
        }
        if stale(&b) {
            *b = Some(Layer::new("scratch-b", format, width, height));
        }
    }

    /// Runs `graph` against `source`, writing the result into `output`. Cancels any render still
    /// in flight on this scheduler before starting. `rect` selects the region to render; ignored
    /// (full image) for preview targets, which always render their (possibly downscaled) whole
    /// source.
    pub fn request_render(
        &self,
        backends: &BackendSet,
        backend_id: BackendId,
        graph: &mut FilterGraph,
        source: &Layer,
        output: &Layer,
        rect: Rect,
        target: RenderTarget,
    ) -> Result<RenderOutcome> {
        let token = Arc::new(CancelToken { cancelled: AtomicBool::new(false) });
        {
            let mut in_flight = self.in_flight.lock();
            if let Some(previous) = in_flight.take() {
                previous.cancelled.store(true, Ordering::SeqCst);
            }
            *in_flight = Some(token.clone());
        }

        let job = RenderJobId(self.next_job.fetch_add(1, Ordering::SeqCst));
        let started = Instant::now();

        let working_source = match target {
            RenderTarget::Preview => self.preview_source(backends, backend_id, source)?,
            RenderTarget::Final => source.duplicate(backends, backend_id, "final-source-copy")?,
        };
        let working_rect = match target {
            RenderTarget::Preview => Rect::full(working_source.width(), working_source.height()),
            RenderTarget::Final => rect,
        };

        self.ensure_scratch(working_source.format(), working_source.width(), working_source.height());
        let scratch_a = self.scratch_a.lock();
        let scratch_b = self.scratch_b.lock();
        let scratch_a = scratch_a.as_ref().unwrap();
        let scratch_b = scratch_b.as_ref().unwrap();

        working_source.copy(backends, backend_id, Rect::full(working_source.width(), working_source.height()), scratch_a, (0, 0))?;

        if token.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        let result = self.run_graph_with_cancellation(backends, backend_id, graph, scratch_a, scratch_b, working_rect, &token)?;
        result.copy(backends, backend_id, working_rect, output, (0, 0))?;

        {
            let mut in_flight = self.in_flight.lock();
            if matches!(in_flight.as_ref(), Some(t) if Arc::ptr_eq(t, &token)) {
                *in_flight = None;
            }
        }

        let stale = match target {
            RenderTarget::Preview => started.elapsed().as_secs_f32() > self.config.frame_budget_secs(),
            RenderTarget::Final => false,
        };
        if stale {
            warn!("scheduler: preview render exceeded its advisory frame budget");
        }

        Ok(RenderOutcome { job, stale })
    }

    /// Cancellation is checked between filter passes (§5 "suspension points"), never inside one:
    /// `FilterGraph::execute_with` calls back before each filter runs.
    fn run_graph_with_cancellation<'a>(
        &self,
        backends: &BackendSet,
        backend_id: BackendId,
        graph: &mut FilterGraph,
        scratch_a: &'a Layer,
        scratch_b: &'a Layer,
        rect: Rect,
        token: &CancelToken,
    ) -> Result<&'a Layer> {
        graph.execute_with(backends, backend_id, scratch_a, scratch_b, rect, || {
            !token.cancelled.load(Ordering::SeqCst)
        })
    }

    /// Explicitly cancels whatever render is currently in flight, if any. A no-op if none is.
    pub fn cancel(&self) {
        if let Some(token) = self.in_flight.lock().as_ref() {
            token.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendSet;
    use crate::format::PixelFormat;

    #[test]
    fn preview_dimensions_downscale_preserving_aspect() {
        let scheduler = RenderScheduler::new(EngineConfig::default());
        let (w, h) = scheduler.preview_dimensions(5120, 2560);
        assert_eq!(w, 2560);
        assert_eq!(h, 1280);
    }

    #[test]
    fn preview_dimensions_never_upscale() {
        let scheduler = RenderScheduler::new(EngineConfig::default());
        let (w, h) = scheduler.preview_dimensions(800, 600);
        assert_eq!((w, h), (800, 600));
    }

    #[test]
    fn disabled_graph_is_identity_end_to_end() {
        let backends = BackendSet::cpu_only();
        let scheduler = RenderScheduler::new(EngineConfig::default());
        let mut graph = FilterGraph::new();

        let source = Layer::new("source", PixelFormat::Mono8, 4, 4);
        let data: Vec<u8> = (0..16).map(|i| (i * 16) as u8).collect();
        source.update_data_for_backend(&backends.cpu, &data, Rect::full(4, 4)).unwrap();
        let output = Layer::new("output", PixelFormat::Mono8, 4, 4);

        scheduler
            .request_render(&backends, BackendId::Cpu, &mut graph, &source, &output, Rect::full(4, 4), RenderTarget::Final)
            .unwrap();

        let mut out = vec![0u8; 16];
        output.retrieve(&backends, &mut out, Rect::full(4, 4)).unwrap();
        assert_eq!(out, data);
    }
}
