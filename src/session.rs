//! Session-level API (§6): the one entry point a host application drives — load an image, edit
//! its filter graph, request renders, read back output.

use std::sync::atomic::{AtomicU64, Ordering};

use log::info;

use crate::backend::{BackendId, BackendSet};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::filters::bwmixer::BwMixer;
use crate::filters::curves::Curves;
use crate::filters::grain::FilmGrain;
use crate::filters::sharpen::CascadedSharpen;
use crate::filters::splittone::SplitTone;
use crate::filters::vignette::Vignette;
use crate::filters::{Filter, FilterGraph, FilterKind};
use crate::geometry::Rect;
use crate::image::Image;
use crate::layer::Layer;
use crate::preset::{FilterPreset, FilterPresetCollection};
use crate::preset_dsl;
use crate::scheduler::{RenderJobId, RenderOutcome, RenderScheduler, RenderTarget};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(0);

/// Opaque session identifier handed back by [`Session::create`] (§6 `SessionHandle`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SessionHandle(pub u64);

/// Builds the default filter graph: one instance of each [`FilterKind`], in the order §4.4 lists
/// them, all disabled until the host enables them.
fn default_graph() -> FilterGraph {
    let mut graph = FilterGraph::new();
    graph.push(Box::new(BwMixer::new()), false);
    graph.push(Box::new(Curves::new()), false);
    graph.push(Box::new(CascadedSharpen::new()), false);
    graph.push(Box::new(FilmGrain::new()), false);
    graph.push(Box::new(SplitTone::new()), false);
    graph.push(Box::new(Vignette::new()), false);
    graph
}

/// One open edit session: a source image, its filter graph, and the preview/final output layers
/// the scheduler renders into.
pub struct Session {
    handle: SessionHandle,
    backends: BackendSet,
    image: Image,
    graph: FilterGraph,
    scheduler: RenderScheduler,
    preview_output: Layer,
    final_output: Layer,
}

impl Session {
    /// Creates a session over `source`'s first layer (§3 "Image" — the first layer is the
    /// decoded source). `source` becomes owned by the session.
    pub fn create(source: Image, backends: BackendSet, config: EngineConfig) -> Result<Session> {
        let base = source.layer(0).ok_or(Error::InvariantViolation("source image has no layers"))?;
        let preview_output = Layer::new("preview-output", base.format(), base.width(), base.height());
        let final_output = Layer::new("final-output", base.format(), base.width(), base.height());
        let handle = SessionHandle(NEXT_SESSION.fetch_add(1, Ordering::SeqCst));
        info!("session {}: created ({}x{})", handle.0, base.width(), base.height());
        Ok(Session {
            handle,
            backends,
            image: source,
            graph: default_graph(),
            scheduler: RenderScheduler::new(config),
            preview_output,
            final_output,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    fn source_layer(&self) -> Result<&Layer> {
        self.image.layer(0).ok_or(Error::InvariantViolation("source image has no layers"))
    }

    /// Adopts `preset`'s parameters onto the graph entry of the matching [`FilterKind`]. A preset
    /// naming a filter not in the graph, or containing an out-of-range value, is rejected and the
    /// graph is left unchanged (§4.7 "preset errors never mutate the engine state").
    pub fn set_filter_parameters(&mut self, kind: FilterKind, preset: &FilterPreset) -> Result<()> {
        let entry = self.graph.entry_mut(kind).ok_or(Error::InvariantViolation("filter kind not in graph"))?;
        if !entry.filter.from_preset(preset) {
            return Err(Error::ParseError { offset: 0, expected: "preset matching this filter's kind and ranges" });
        }
        Ok(())
    }

    /// Independently toggles a filter's enabled bit, leaving its parameters untouched (§3
    /// "enabled... independently of its parameters"). Returns `false` if `kind` isn't in the graph.
    pub fn enable_filter(&mut self, kind: FilterKind, enabled: bool) -> bool {
        self.graph.set_enabled(kind, enabled)
    }

    /// Requests a render of `rect` (ignored for preview targets, which always render the whole,
    /// possibly downscaled, source) and returns once it completes or is cancelled.
    pub fn request_render(&mut self, rect: Rect, target: RenderTarget) -> Result<RenderOutcome> {
        let source = self.source_layer()?.duplicate(&self.backends, BackendId::Cpu, "render-source-borrow")?;
        let output = match target {
            RenderTarget::Preview => &self.preview_output,
            RenderTarget::Final => &self.final_output,
        };
        self.scheduler.request_render(&self.backends, BackendId::Cpu, &mut self.graph, &source, output, rect, target)
    }

    /// Cancels the render currently in flight for this session, if any.
    pub fn cancel(&self, _job: RenderJobId) {
        self.scheduler.cancel();
    }

    pub fn output(&self, target: RenderTarget) -> &Layer {
        match target {
            RenderTarget::Preview => &self.preview_output,
            RenderTarget::Final => &self.final_output,
        }
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut Image {
        &mut self.image
    }
}

/// Parses a preset DSL document (§4.5) against the built-in preset library.
pub fn presets_load(text: &str) -> Result<FilterPresetCollection> {
    preset_dsl::parse(text, &FilterPresetCollection::default_library())
}

/// Prints a preset collection back to its canonical DSL form.
pub fn presets_save(collection: &FilterPresetCollection) -> String {
    preset_dsl::print_collection(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PixelFormat;

    fn test_session() -> Session {
        let backends = BackendSet::cpu_only();
        let layer = Layer::new("source", PixelFormat::Mono8, 4, 4);
        let data: Vec<u8> = (0..16).map(|i| (i * 16) as u8).collect();
        layer.update_data_for_backend(&backends.cpu, &data, Rect::full(4, 4)).unwrap();
        let image = Image::from_source_layer(layer);
        Session::create(image, backends, EngineConfig::default()).unwrap()
    }

    #[test]
    fn disabled_graph_renders_an_identity_output() {
        let mut session = test_session();
        session.request_render(Rect::full(4, 4), RenderTarget::Final).unwrap();

        let mut out = vec![0u8; 16];
        session.output(RenderTarget::Final).retrieve(&session.backends, &mut out, Rect::full(4, 4)).unwrap();
        let mut expected = vec![0u8; 16];
        session.source_layer().unwrap().retrieve(&session.backends, &mut expected, Rect::full(4, 4)).unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn enabling_an_unknown_filter_kind_is_impossible_by_construction() {
        let mut session = test_session();
        assert!(session.enable_filter(FilterKind::BWMixer, true));
    }

    #[test]
    fn set_filter_parameters_rejects_mismatched_preset() {
        let mut session = test_session();
        let wrong = FilterPreset::new("curves");
        let err = session.set_filter_parameters(FilterKind::BWMixer, &wrong).unwrap_err();
        assert!(matches!(err, Error::ParseError { .. }));
    }

    #[test]
    fn preset_round_trip_through_session_api() {
        let doc = r#"bwmixer=name("Neutral"),highlights(128,128,128),shadows(64,64,64),weight(60)"#;
        let collection = presets_load(doc).unwrap();
        let printed = presets_save(&collection);
        let reparsed = presets_load(&printed).unwrap();
        assert_eq!(collection.len(), reparsed.len());
    }
}
