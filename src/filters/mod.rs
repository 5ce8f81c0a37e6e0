//! The filter framework (§4.4): the `Filter` trait, the closed `FilterKind` set, and the ordered,
//! ping-ponging `FilterGraph`.

pub mod blur;
pub mod bwmixer;
pub mod curves;
pub mod grain;
pub mod sharpen;
pub mod splittone;
pub mod vignette;

use log::debug;

use crate::backend::{BackendId, BackendSet};
use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::kernel::PixelKernel;
use crate::layer::Layer;
use crate::preset::FilterPreset;

/// Synchronizes `src`/`dst` onto `backend_id` and dispatches a single-source kernel over `rect` —
/// the common path for the filters that are a pure pixel kernel (mixer, curves, split tone,
/// vignette).
pub(crate) fn dispatch_kernel(
    backends: &BackendSet,
    backend_id: BackendId,
    dst: &Layer,
    src: &Layer,
    kernel: &dyn PixelKernel,
    rect: Rect,
    tile_side: u32,
) -> Result<()> {
    src.synchronize(backends, backend_id)?;
    dst.synchronize(backends, backend_id)?;
    let backend = backends.get(backend_id).ok_or(Error::DeviceLost)?;
    dst.update_with_dispatch(backend, src, kernel, rect, tile_side)
}

/// The closed set of filter kinds this engine implements (§3 "Filter").
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FilterKind {
    BWMixer,
    Curves,
    CascadedSharpen,
    FilmGrain,
    SplitTone,
    Vignette,
}

impl FilterKind {
    /// The preset DSL's filter-name keyword for this kind (§4.5).
    pub fn dsl_name(self) -> &'static str {
        match self {
            FilterKind::BWMixer => "bwmixer",
            FilterKind::Curves => "curves",
            FilterKind::CascadedSharpen => "sharpen",
            FilterKind::FilmGrain => "filmgrain",
            FilterKind::SplitTone => "splittone",
            FilterKind::Vignette => "vignette",
        }
    }

    pub fn from_dsl_name(name: &str) -> Option<FilterKind> {
        match name {
            "bwmixer" => Some(FilterKind::BWMixer),
            "curves" => Some(FilterKind::Curves),
            "sharpen" => Some(FilterKind::CascadedSharpen),
            "filmgrain" => Some(FilterKind::FilmGrain),
            "splittone" => Some(FilterKind::SplitTone),
            "vignette" => Some(FilterKind::Vignette),
            _ => None,
        }
    }
}

/// A filter instance in the graph.
///
/// `render` reads `source` and writes a same-format, same-size image into `destination` over
/// `rect`; precompute hooks (`update_curve`, `update_cascades`, `reset_grain`) live on the
/// concrete filter types since they're specific to each filter's cached auxiliary state.
pub trait Filter: Send + Sync {
    fn kind(&self) -> FilterKind;
    fn name(&self) -> &str;
    fn to_preset(&self) -> FilterPreset;
    /// Adopts every parameter present in `preset`; returns `false` (and leaves state unchanged)
    /// if the preset doesn't name this filter or a value is out of range.
    fn from_preset(&mut self, preset: &FilterPreset) -> bool;
    fn render(
        &mut self,
        backends: &BackendSet,
        backend_id: BackendId,
        destination: &Layer,
        source: &Layer,
        rect: Rect,
    ) -> Result<()>;
    /// Drops any backend-side auxiliary layers (blur/grain caches) cached on this instance.
    fn release_caches(&mut self);
}

/// One entry in the graph: a filter plus its independent enable bit (§3 "enabled... independently
/// of its parameters").
pub struct GraphEntry {
    pub filter: Box<dyn Filter>,
    pub enabled: bool,
}

/// The ordered filter graph (§4.4/§4.6): execution ping-pongs between two scratch layers:
/// a disabled filter passes its scratch through unchanged.
pub struct FilterGraph {
    entries: Vec<GraphEntry>,
}

impl FilterGraph {
    pub fn new() -> FilterGraph {
        FilterGraph { entries: Vec::new() }
    }

    pub fn push(&mut self, filter: Box<dyn Filter>, enabled: bool) {
        self.entries.push(GraphEntry { filter, enabled });
    }

    pub fn entries(&self) -> &[GraphEntry] {
        &self.entries
    }

    pub fn entry_mut(&mut self, kind: FilterKind) -> Option<&mut GraphEntry> {
        self.entries.iter_mut().find(|e| e.filter.kind() == kind)
    }

    pub fn set_enabled(&mut self, kind: FilterKind, enabled: bool) -> bool {
        match self.entry_mut(kind) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Runs every enabled filter in order, ping-ponging between `scratch_a` and `scratch_b`.
    /// Returns which of the two scratch layers holds the final result.
    pub fn execute<'a>(
        &mut self,
        backends: &BackendSet,
        backend_id: BackendId,
        scratch_a: &'a Layer,
        scratch_b: &'a Layer,
        rect: Rect,
    ) -> Result<&'a Layer> {
        self.execute_with(backends, backend_id, scratch_a, scratch_b, rect, || true)
    }

    /// Like [`FilterGraph::execute`], but calls `should_continue` before each filter pass and
    /// aborts with [`Error::Cancelled`] the moment it returns `false` (§5 "suspension points" —
    /// cancellation is checked at filter-pass boundaries, never mid-kernel).
    pub fn execute_with<'a>(
        &mut self,
        backends: &BackendSet,
        backend_id: BackendId,
        scratch_a: &'a Layer,
        scratch_b: &'a Layer,
        rect: Rect,
        mut should_continue: impl FnMut() -> bool,
    ) -> Result<&'a Layer> {
        let mut src = scratch_a;
        let mut dst = scratch_b;
        for entry in self.entries.iter_mut() {
            if !should_continue() {
                return Err(Error::Cancelled);
            }
            if !entry.enabled {
                continue;
            }
            debug!("filter graph: running {}", entry.filter.name());
            entry.filter.render(backends, backend_id, dst, src, rect)?;
            std::mem::swap(&mut src, &mut dst);
        }
        Ok(src)
    }
}

impl Default for FilterGraph {
    fn default() -> Self {
        FilterGraph::new()
    }
}
