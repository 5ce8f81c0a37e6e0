//! Logical images: the mirror table discipline that keeps a layer's CPU and GPU realizations
//! coherent (§3 "Layer", §4.3).

use std::collections::HashMap;

use log::debug;
use parking_lot::Mutex;

use crate::backend::{Backend, BackendId, BackendSet};
use crate::error::{Error, Result};
use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::traits::BackendImage;

/// How a layer's optional mask modulates the layer it is attached to.
///
/// A closed enum plus a function table, per the design note on replacing virtual mask dispatch;
/// new modes are added here, and `apply` below is exhaustive over them.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MaskMode {
    Multiply,
    Add,
    Subtract,
    Replace,
}

impl MaskMode {
    /// Combines a layer value `v` with a mask value `m`, both in `[0, domain_max]`.
    pub fn apply(self, v: f64, m: f64, domain_max: f64) -> f64 {
        match self {
            MaskMode::Multiply => (v * m / domain_max.max(1.0)).min(domain_max).max(0.0),
            MaskMode::Add => (v + m).min(domain_max).max(0.0),
            MaskMode::Subtract => (v - m).min(domain_max).max(0.0),
            MaskMode::Replace => m,
        }
    }
}

struct Realization {
    image: Box<dyn BackendImage>,
    dirty: bool,
}

/// A logical image: a name, a fixed `(format, width, height)`, and a mirror table of per-backend
/// realizations.
///
/// All mutation goes through `update_data_for_backend`/`fill`/`copy`/`retrieve`; the mutex
/// guarantees the mirror-table invariants hold even when a render thread and the scheduler thread
/// touch the same layer (§5's per-layer mutex).
pub struct Layer {
    pub name: String,
    format: PixelFormat,
    width: u32,
    height: u32,
    mirrors: Mutex<HashMap<BackendId, Realization>>,
    mask: Option<Box<Layer>>,
    mask_mode: MaskMode,
}

impl Layer {
    pub fn new(name: impl Into<String>, format: PixelFormat, width: u32, height: u32) -> Layer {
        Layer {
            name: name.into(),
            format,
            width,
            height,
            mirrors: Mutex::new(HashMap::new()),
            mask: None,
            mask_mode: MaskMode::Multiply,
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }
    pub fn width(&self) -> u32 {
        self.width
    }
    pub fn height(&self) -> u32 {
        self.height
    }
    pub fn mask(&self) -> Option<&Layer> {
        self.mask.as_deref()
    }
    pub fn mask_mode(&self) -> MaskMode {
        self.mask_mode
    }
    pub fn set_mask(&mut self, mask: Option<Layer>, mode: MaskMode) {
        self.mask = mask.map(Box::new);
        self.mask_mode = mode;
    }

    fn full_rect(&self) -> Rect {
        Rect::full(self.width, self.height)
    }

    /// `true` if no backend holds a realization yet.
    pub fn is_empty(&self) -> bool {
        self.mirrors.lock().is_empty()
    }

    fn clean_backend(mirrors: &HashMap<BackendId, Realization>) -> Option<BackendId> {
        mirrors.iter().find(|(_, r)| !r.dirty).map(|(id, _)| *id)
    }

    /// Marks every realization other than `source` dirty — the "mutation through one backend"
    /// invariant.
    fn mark_others_dirty(mirrors: &mut HashMap<BackendId, Realization>, source: BackendId) {
        for (id, r) in mirrors.iter_mut() {
            if *id != source {
                r.dirty = true;
            }
        }
    }

    /// Ensures `target` has a clean realization, copying from any clean backend if needed via
    /// CPU staging. Idempotent: a call with `target` already clean does nothing.
    pub fn synchronize(&self, backends: &BackendSet, target_id: BackendId) -> Result<()> {
        let target = backends.get(target_id).ok_or(Error::DeviceLost)?;
        let mut mirrors = self.mirrors.lock();

        if let Some(r) = mirrors.get(&target_id) {
            if !r.dirty {
                return Ok(());
            }
        }

        let source_id = Self::clean_backend(&mirrors);
        if !mirrors.contains_key(&target_id) {
            let image = target.allocate(self.format, self.width, self.height)?;
            mirrors.insert(target_id, Realization { image, dirty: true });
        }

        match source_id {
            None => {
                // Nothing clean anywhere yet: the target realization becomes authoritative as-is
                // (freshly allocated, zeroed).
                mirrors.get_mut(&target_id).unwrap().dirty = false;
            }
            Some(source_id) if source_id == target_id => {}
            Some(source_id) => {
                debug!("layer '{}': synchronizing {} <- {}", self.name, target_id, source_id);
                let source = backends.get(source_id).ok_or(Error::DeviceLost)?;
                let rect = self.full_rect();
                let mut staging = vec![0u8; self.format.stride_for_width(self.width) * self.height as usize];
                source.download(mirrors.get(&source_id).unwrap().image.as_ref(), &mut staging, rect)?;
                target.upload(mirrors.get(&target_id).unwrap().image.as_ref(), &staging, rect)?;
                mirrors.get_mut(&target_id).unwrap().dirty = false;
            }
        }
        Ok(())
    }

    /// Reads `rect` of the layer into `buf`, preferring the CPU realization; synchronizes CPU
    /// first if absent.
    pub fn retrieve(&self, backends: &BackendSet, buf: &mut [u8], rect: Rect) -> Result<()> {
        self.synchronize(backends, BackendId::Cpu)?;
        let mirrors = self.mirrors.lock();
        let realization = mirrors.get(&BackendId::Cpu).ok_or(Error::InvariantViolation("no CPU realization"))?;
        backends.cpu.download(realization.image.as_ref(), buf, rect)
    }

    /// Writes `rect` of `buf` into the layer's realization on `backend`, marking every other
    /// backend dirty.
    pub fn update_data_for_backend(&self, backend: &dyn Backend, buf: &[u8], rect: Rect) -> Result<()> {
        let mut mirrors = self.mirrors.lock();
        let id = backend.id();
        if !mirrors.contains_key(&id) {
            let image = backend.allocate(self.format, self.width, self.height)?;
            mirrors.insert(id, Realization { image, dirty: true });
        }
        {
            let realization = mirrors.get(&id).unwrap();
            backend.upload(realization.image.as_ref(), buf, rect)?;
        }
        mirrors.get_mut(&id).unwrap().dirty = false;
        Self::mark_others_dirty(&mut mirrors, id);
        Ok(())
    }

    /// Fills `rect` with a constant value on `backend`'s realization, marking other backends
    /// dirty.
    pub fn fill(&self, backend: &dyn Backend, rect: Rect, value: crate::backend::FillValue) -> Result<()> {
        let mut mirrors = self.mirrors.lock();
        let id = backend.id();
        if !mirrors.contains_key(&id) {
            let image = backend.allocate(self.format, self.width, self.height)?;
            mirrors.insert(id, Realization { image, dirty: true });
        }
        {
            let realization = mirrors.get(&id).unwrap();
            backend.fill(realization.image.as_ref(), rect, value)?;
        }
        mirrors.get_mut(&id).unwrap().dirty = false;
        Self::mark_others_dirty(&mut mirrors, id);
        Ok(())
    }

    /// Copies `src_rect` of `self` into `dst` at `dst_origin`, on `backend_id`. Both layers must
    /// have (or be able to allocate) a realization on that backend; this synchronizes both first.
    pub fn copy(&self, backends: &BackendSet, backend_id: BackendId, src_rect: Rect, dst: &Layer, dst_origin: (i32, i32)) -> Result<()> {
        self.synchronize(backends, backend_id)?;
        dst.synchronize(backends, backend_id)?;
        let backend = backends.get(backend_id).ok_or(Error::DeviceLost)?;
        let src_mirrors = self.mirrors.lock();
        let mut dst_mirrors = dst.mirrors.lock();
        let src_image = src_mirrors.get(&backend_id).ok_or(Error::InvariantViolation("missing source realization"))?;
        let dst_image = dst_mirrors.get(&backend_id).ok_or(Error::InvariantViolation("missing destination realization"))?;
        backend.copy(src_image.image.as_ref(), src_rect, dst_image.image.as_ref(), dst_origin)?;
        dst_mirrors.get_mut(&backend_id).unwrap().dirty = false;
        Self::mark_others_dirty(&mut dst_mirrors, backend_id);
        Ok(())
    }

    /// Produces a new layer with the same format/size and content, realized on `backend_id` only.
    pub fn duplicate(&self, backends: &BackendSet, backend_id: BackendId, name: impl Into<String>) -> Result<Layer> {
        let dup = Layer::new(name, self.format, self.width, self.height);
        self.copy(backends, backend_id, self.full_rect(), &dup, (0, 0))?;
        Ok(dup)
    }

    /// Dispatches `kernel` reading from `src` (already synchronized onto `backend`) and writing
    /// into `self`'s realization on `backend`. Used by the filter framework, which deals in
    /// `Layer`s rather than raw `BackendImage` handles.
    pub fn update_with_dispatch(
        &self,
        backend: &dyn Backend,
        src: &Layer,
        kernel: &dyn crate::kernel::PixelKernel,
        rect: Rect,
        tile_side: u32,
    ) -> Result<()> {
        let id = backend.id();
        let mut mirrors = self.mirrors.lock();
        if !mirrors.contains_key(&id) {
            let image = backend.allocate(self.format, self.width, self.height)?;
            mirrors.insert(id, Realization { image, dirty: true });
        }
        let src_mirrors = src.mirrors.lock();
        let src_image = src_mirrors.get(&id).ok_or(Error::InvariantViolation("dispatch source not synchronized"))?;
        {
            let dst_image = mirrors.get(&id).unwrap();
            backend.dispatch(kernel, dst_image.image.as_ref(), src_image.image.as_ref(), None, rect, tile_side)?;
        }
        mirrors.get_mut(&id).unwrap().dirty = false;
        Self::mark_others_dirty(&mut mirrors, id);
        Ok(())
    }

    /// Drops one backend's realization. The layer remains observable as long as another
    /// realization is clean.
    pub fn delete_data_for_backend(&self, backend: &dyn Backend) {
        let mut mirrors = self.mirrors.lock();
        if let Some(realization) = mirrors.remove(&backend.id()) {
            backend.deallocate(realization.image);
        }
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("name", &self.name)
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_then_retrieve_roundtrips() {
        let backends = BackendSet::cpu_only();
        let layer = Layer::new("test", PixelFormat::Mono8, 2, 2);
        let data = vec![10u8, 20, 30, 40];
        layer.update_data_for_backend(&backends.cpu, &data, Rect::full(2, 2)).unwrap();
        let mut out = vec![0u8; 4];
        layer.retrieve(&backends, &mut out, Rect::full(2, 2)).unwrap();
        assert_eq!(data, out);
    }

    #[test]
    fn duplicate_is_independent() {
        let backends = BackendSet::cpu_only();
        let layer = Layer::new("a", PixelFormat::Mono8, 2, 2);
        layer.update_data_for_backend(&backends.cpu, &[1, 2, 3, 4], Rect::full(2, 2)).unwrap();
        let dup = layer.duplicate(&backends, BackendId::Cpu, "b").unwrap();
        layer.update_data_for_backend(&backends.cpu, &[9, 9, 9, 9], Rect::full(2, 2)).unwrap();
        let mut out = vec![0u8; 4];
        dup.retrieve(&backends, &mut out, Rect::full(2, 2)).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }
}
