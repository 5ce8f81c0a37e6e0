//! Black-and-white adaptive mixer (§4.4.1).

use crate::backend::{BackendId, BackendSet};
use crate::error::Result;
use crate::filters::{dispatch_kernel, Filter, FilterKind};
use crate::format::PixelFormat;
use crate::geometry::{clamp, lerp, Rect};
use crate::kernel::PixelKernel;
use crate::layer::Layer;
use crate::preset::{FilterPreset, PresetValue};

/// A single pixel kernel implementing the luma/balance blend of §4.4.1. No auxiliary layers.
pub struct BwMixerKernel {
    pub highlight_weights: [f32; 3],
    pub shadow_weights: [f32; 3],
    pub balance: f32,
}

impl PixelKernel for BwMixerKernel {
    fn eval(&self, format: PixelFormat, src0: &[f64], _src1: Option<&[f64]>, out: &mut [f64]) {
        let domain_max = format.max_value();
        let r = src0[0] / domain_max;
        let g = src0[1] / domain_max;
        let b = src0[2] / domain_max;
        let luma = (r + g + b) / 3.0;
        let t = clamp((luma + self.balance as f64) as f32, 0.0, 1.0) as f64;
        let weight = |highlight: f32, shadow: f32| lerp(shadow, highlight, t as f32) as f64;
        let wr = weight(self.highlight_weights[0], self.shadow_weights[0]);
        let wg = weight(self.highlight_weights[1], self.shadow_weights[1]);
        let wb = weight(self.highlight_weights[2], self.shadow_weights[2]);
        let value = (wr * r + wg * g + wb * b).max(0.0).min(1.0) * domain_max;
        for (c, slot) in out.iter_mut().enumerate() {
            *slot = if c < 3 { value } else { src0[c] };
        }
    }
}

pub struct BwMixer {
    pub name: String,
    pub highlight_weights: [f32; 3],
    pub shadow_weights: [f32; 3],
    pub balance: f32,
}

impl BwMixer {
    pub fn new() -> BwMixer {
        BwMixer {
            name: "BWMixer".into(),
            highlight_weights: [1.0, 1.0, 1.0],
            shadow_weights: [1.0, 1.0, 1.0],
            balance: 0.0,
        }
    }
}

impl Default for BwMixer {
    fn default() -> Self {
        BwMixer::new()
    }
}

impl Filter for BwMixer {
    fn kind(&self) -> FilterKind {
        FilterKind::BWMixer
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn to_preset(&self) -> FilterPreset {
        let weight_pct = ((self.balance as f64 + 0.5) * 100.0).round() as i64;
        FilterPreset::new(FilterKind::BWMixer.dsl_name())
            .with("name", PresetValue::String(self.name.clone()))
            .with("highlights", PresetValue::Color(self.highlight_weights.map(|v| v as f64)))
            .with("shadows", PresetValue::Color(self.shadow_weights.map(|v| v as f64)))
            .with("weight", PresetValue::Int(weight_pct))
    }

    fn from_preset(&mut self, preset: &FilterPreset) -> bool {
        if preset.filter_name != FilterKind::BWMixer.dsl_name() {
            return false;
        }
        let highlights = match preset.get("highlights") {
            Some(PresetValue::Color(c)) => *c,
            _ => return false,
        };
        let shadows = match preset.get("shadows") {
            Some(PresetValue::Color(c)) => *c,
            _ => return false,
        };
        let weight = match preset.get("weight") {
            Some(PresetValue::Int(n)) if (0..=100).contains(n) => *n,
            _ => return false,
        };
        self.highlight_weights = highlights.map(|v| v as f32);
        self.shadow_weights = shadows.map(|v| v as f32);
        self.balance = (weight as f32 / 100.0) - 0.5;
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
        rect: Rect,
    ) -> Result<()> {
        let kernel = BwMixerKernel {
            highlight_weights: self.highlight_weights,
            shadow_weights: self.shadow_weights,
            balance: self.balance,
        };
        dispatch_kernel(backends, backend_id, destination, source, &kernel, rect, 256)
    }

    fn release_caches(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grey_mixer_identity_matches_scenario_one() {
        let kernel = BwMixerKernel {
            highlight_weights: [0.333, 0.333, 0.333],
            shadow_weights: [0.333, 0.333, 0.333],
            balance: 0.0,
        };
        let src = [120.0, 60.0, 30.0, 255.0];
        let mut out = [0.0; 4];
        kernel.eval(PixelFormat::RGBA8, &src, None, &mut out);
        assert!((out[0] - 70.0).abs() < 1.0);
        assert!((out[1] - 70.0).abs() < 1.0);
        assert!((out[2] - 70.0).abs() < 1.0);
    }
}
