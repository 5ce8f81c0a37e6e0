//! Vignette (§4.4.6): radial darken/lighten falloff from a configurable center.
//!
//! The falloff needs each pixel's position, which the per-pixel [`crate::kernel::PixelKernel`]
//! abstraction doesn't carry, so like [`crate::filters::blur`] this runs as an explicit buffer
//! pass rather than through `Backend::dispatch`.

use crate::backend::{BackendId, BackendSet};
use crate::error::Result;
use crate::filters::blur::{layer_to_planes, planes_to_layer};
use crate::filters::{Filter, FilterKind};
use crate::geometry::{smoothstep, Rect};
use crate::layer::Layer;
use crate::preset::{FilterPreset, PresetValue};

pub struct Vignette {
    pub name: String,
    /// Center in normalised `[0, 1]²` image coordinates.
    pub center: (f32, f32),
    /// Falloff radius, a fraction of the image diagonal, in `[0, 2]`.
    pub radius: f32,
    /// Signed strength in `[-1, 1]`: positive darkens, negative lightens.
    pub strength: f32,
}

impl Vignette {
    pub fn new() -> Vignette {
        Vignette {
            name: "Vignette".into(),
            center: (0.5, 0.5),
            radius: 0.5,
            strength: 0.0,
        }
    }
}

impl Default for Vignette {
    fn default() -> Self {
        Vignette::new()
    }
}

impl Filter for Vignette {
    fn kind(&self) -> FilterKind {
        FilterKind::Vignette
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn to_preset(&self) -> FilterPreset {
        FilterPreset::new(FilterKind::Vignette.dsl_name())
            .with("name", PresetValue::String(self.name.clone()))
            .with("x", PresetValue::Int((self.center.0 * 100.0).round() as i64))
            .with("y", PresetValue::Int((self.center.1 * 100.0).round() as i64))
            .with("strength", PresetValue::Int((self.strength * 100.0).round() as i64))
            .with("radius", PresetValue::Int((self.radius * 100.0).round() as i64))
    }

    fn from_preset(&mut self, preset: &FilterPreset) -> bool {
        if preset.filter_name != FilterKind::Vignette.dsl_name() {
            return false;
        }
        let x = match preset.get("x") {
            Some(PresetValue::Int(n)) if (0..=100).contains(n) => *n as f32 / 100.0,
            _ => return false,
        };
        let y = match preset.get("y") {
            Some(PresetValue::Int(n)) if (0..=100).contains(n) => *n as f32 / 100.0,
            _ => return false,
        };
        let strength = match preset.get("strength") {
            Some(PresetValue::Int(n)) if (-100..=100).contains(n) => *n as f32 / 100.0,
            _ => return false,
        };
        let radius = match preset.get("radius") {
            Some(PresetValue::Int(n)) if (0..=200).contains(n) => *n as f32 / 100.0,
            _ => return false,
        };
        self.center = (x, y);
        self.strength = strength;
        self.radius = radius;
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
        let width = source.width();
        let height = source.height();

        let mut planes = layer_to_planes(backends, source)?;
        let radius = self.radius.max(1e-3);

        for y in 0..height {
            for x in 0..width {
                let px = (x as f32 + 0.5) / width as f32;
                let py = (y as f32 + 0.5) / height as f32;
                let dx = px - self.center.0;
                let dy = py - self.center.1;
                let d = (dx * dx + dy * dy).sqrt() / radius;
                let falloff = smoothstep(0.0, 1.0, d);
                let attenuation = (falloff * falloff * self.strength) as f64;
                if attenuation == 0.0 {
                    continue;
                }
                let idx = (y * width + x) as usize;
                for c in 0..channels {
                    if has_alpha && c == channels - 1 {
                        continue;
                    }
                    let v = planes[c][idx] / domain_max;
                    let result = if self.strength >= 0.0 {
                        v * (1.0 - attenuation)
                    } else {
                        v * (1.0 - attenuation) + attenuation
                    };
                    planes[c][idx] = result.max(0.0).min(1.0) * domain_max;
                }
            }
        }

        planes_to_layer(backends, backend_id, destination, &planes)
    }

    fn release_caches(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendSet;
    use crate::format::PixelFormat;

    #[test]
    fn center_is_untouched_and_corner_darkens() {
        let backends = BackendSet::cpu_only();
        let width = 512;
        let height = 512;
        let src = Layer::new("src", PixelFormat::RGBA8, width, height);
        let mut data = vec![0u8; (width * height * 4) as usize];
        for px in data.chunks_mut(4) {
            px.copy_from_slice(&[128, 128, 128, 255]);
        }
        src.update_data_for_backend(&backends.cpu, &data, Rect::full(width, height)).unwrap();
        let dst = Layer::new("dst", PixelFormat::RGBA8, width, height);

        let mut vignette = Vignette::new();
        vignette.radius = 0.25;
        vignette.strength = 0.5;
        vignette.render(&backends, BackendId::Cpu, &dst, &src, Rect::full(width, height)).unwrap();

        let mut out = vec![0u8; data.len()];
        dst.retrieve(&backends, &mut out, Rect::full(width, height)).unwrap();

        let center_idx = (256 * width as usize + 256) * 4;
        assert!((out[center_idx] as i32 - 128).abs() <= 1);

        let corner_idx = 0;
        assert!((out[corner_idx] as f32) <= 128.0 * 0.8);
    }

    #[test]
    fn zero_strength_is_identity() {
        let backends = BackendSet::cpu_only();
        let src = Layer::new("src", PixelFormat::Mono8, 4, 4);
        let data: Vec<u8> = (0..16).map(|i| (i * 16) as u8).collect();
        src.update_data_for_backend(&backends.cpu, &data, Rect::full(4, 4)).unwrap();
        let dst = Layer::new("dst", PixelFormat::Mono8, 4, 4);

        let mut vignette = Vignette::new();
        vignette.render(&backends, BackendId::Cpu, &dst, &src, Rect::full(4, 4)).unwrap();

        let mut out = vec![0u8; 16];
        dst.retrieve(&backends, &mut out, Rect::full(4, 4)).unwrap();
        assert_eq!(data, out);
    }
}
