//! Film grain (§4.4.4): a deterministic noise tile, blurred, scaled by a luma-domain response
//! curve, and composited back via the grain-add operator.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::backend::{BackendId, BackendSet};
use crate::error::Result;
use crate::filters::blur::{blur_layer, layer_to_planes, noise_tile, planes_to_layer};
use crate::filters::curves::build_lut;
use crate::filters::{Filter, FilterKind};
use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::kernel::Operator;
use crate::layer::Layer;
use crate::preset::{FilterPreset, PresetValue};

type CacheKey = (BackendId, u32, u32, PixelFormat, bool, u64, u32);

pub struct FilmGrain {
    pub name: String,
    pub seed: u64,
    pub radius: f32,
    pub mono: bool,
    /// Response curve mapping source luma (`x`) to grain visibility (`y`), §4.4.4 step 3.
    pub response_points: Vec<(f64, f64)>,
    response_lut: Vec<f64>,
    grain_cache: Mutex<HashMap<CacheKey, Layer>>,
}

impl FilmGrain {
    pub fn new() -> FilmGrain {
        let mut grain = FilmGrain {
            name: "Film Grain".into(),
            seed: 0x5EED,
            radius: 1.0,
            mono: true,
            response_points: vec![(0.0, 1.0), (1.0, 1.0)],
            response_lut: Vec::new(),
            grain_cache: Mutex::new(HashMap::new()),
        };
        grain.reset_grain();
        grain
    }

    /// Rebuilds the response LUT and drops cached grain tiles, so a later render regenerates them
    /// against the current seed/radius/mono settings. Idempotent.
    pub fn reset_grain(&mut self) {
        self.response_lut = build_lut(&self.response_points, 256);
        self.grain_cache.lock().clear();
    }

    fn response(&self, luma: f64) -> f64 {
        let last = self.response_lut.len() - 1;
        let idx = (luma.max(0.0).min(1.0) * last as f64).round() as usize;
        self.response_lut[idx.min(last)]
    }

    fn grain_planes(&self, backends: &BackendSet, backend_id: BackendId, format: PixelFormat, width: u32, height: u32) -> Result<Vec<Vec<f64>>> {
        let key = (backend_id, width, height, format, self.mono, self.seed, self.radius.to_bits());
        {
            let mut cache = self.grain_cache.lock();
            if !cache.contains_key(&key) {
                let raw = noise_tile(format, width, height, self.mono, self.seed);
                let tile = Layer::new("grain-noise", format, width, height);
                let backend = backends.get(backend_id).ok_or(crate::error::Error::DeviceLost)?;
                tile.update_data_for_backend(backend, &raw, Rect::full(width, height))?;
                let blurred = Layer::new("grain-blurred", format, width, height);
                blur_layer(backends, backend_id, &blurred, &tile, self.radius)?;
                cache.insert(key, blurred);
            }
        }
        let cache = self.grain_cache.lock();
        layer_to_planes(backends, cache.get(&key).unwrap())
    }
}

impl Default for FilmGrain {
    fn default() -> Self {
        FilmGrain::new()
    }
}

impl Filter for FilmGrain {
    fn kind(&self) -> FilterKind {
        FilterKind::FilmGrain
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn to_preset(&self) -> FilterPreset {
        FilterPreset::new(FilterKind::FilmGrain.dsl_name())
            .with("name", PresetValue::String(self.name.clone()))
            .with("radius", PresetValue::Float(self.radius as f64))
            .with("mono", PresetValue::Bool(self.mono))
            .with("seed", PresetValue::Int(self.seed as i64))
            .with("points", PresetValue::Points(self.response_points.clone()))
    }

    fn from_preset(&mut self, preset: &FilterPreset) -> bool {
        if preset.filter_name != FilterKind::FilmGrain.dsl_name() {
            return false;
        }
        let radius = match preset.get("radius") {
            Some(PresetValue::Float(r)) if *r >= 0.0 => *r as f32,
            Some(PresetValue::Int(r)) if *r >= 0 => *r as f32,
            _ => return false,
        };
        let mono = match preset.get("mono") {
            Some(PresetValue::Bool(b)) => *b,
            None => self.mono,
            _ => return false,
        };
        let points = match preset.get("points") {
            Some(PresetValue::Points(p)) if !p.is_empty() => p.clone(),
            _ => return false,
        };
        if let Some(PresetValue::Int(seed)) = preset.get("seed") {
            self.seed = *seed as u64;
        }
        self.radius = radius;
        self.mono = mono;
        self.response_points = points;
        self.reset_grain();
        if let Some(PresetValue::String(name)) = preset.get("name") {
            self.name = name.clone();
        }
        true
    }

    fn render(
        &mut self,
        backends: &BackendSet,
        backend_id: BackendId,
        destination: &Layer,
        source: &Layer,
        _rect: Rect,
    ) -> Result<()> {
        let format = source.format();
        let domain_max = format.max_value();
        let channels = format.channel_count() as usize;
        let has_alpha = format.has_alpha();

        let src_planes = layer_to_planes(backends, source)?;
        let grain = self.grain_planes(backends, backend_id, format, source.width(), source.height())?;

        let pixel_count = src_planes[0].len();
        let mut out = src_planes.clone();
        for i in 0..pixel_count {
            let luma = if format.is_mono() {
                src_planes[0][i] / domain_max
            } else {
                (src_planes[0][i] + src_planes[1][i] + src_planes[2][i]) / (3.0 * domain_max)
            };
            let response = self.response(luma);
            for c in 0..channels {
                if has_alpha && c == channels - 1 {
                    continue;
                }
                let midpoint = domain_max / 2.0;
                let scaled_grain = midpoint + response * (grain[c][i] - midpoint);
                out[c][i] = Operator::ApplyGrainAdd.apply_binary(src_planes[c][i], scaled_grain, domain_max);
            }
        }

        planes_to_layer(backends, backend_id, destination, &out)
    }

    fn release_caches(&mut self) {
        self.grain_cache.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendSet;

    #[test]
    fn zero_response_is_identity() {
        let backends = BackendSet::cpu_only();
        let src = Layer::new("src", PixelFormat::Mono8, 4, 4);
        let data: Vec<u8> = (0..16).map(|i| (i * 16) as u8).collect();
        src.update_data_for_backend(&backends.cpu, &data, Rect::full(4, 4)).unwrap();
        let dst = Layer::new("dst", PixelFormat::Mono8, 4, 4);

        let mut grain = FilmGrain::new();
        grain.response_points = vec![(0.0, 0.0), (1.0, 0.0)];
        grain.reset_grain();

        grain.render(&backends, BackendId::Cpu, &dst, &src, Rect::full(4, 4)).unwrap();
        let mut out = vec![0u8; 16];
        dst.retrieve(&backends, &mut out, Rect::full(4, 4)).unwrap();
        for (a, b) in data.iter().zip(out.iter()) {
            assert!((*a as i32 - *b as i32).abs() <= 1);
        }
    }
}
