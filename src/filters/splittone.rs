//! Split tone (§4.4.5): independently tints shadows and highlights, blended in by luma.

use crate::backend::{BackendId, BackendSet};
use crate::error::Result;
use crate::filters::{dispatch_kernel, Filter, FilterKind};
use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::kernel::PixelKernel;
use crate::layer::Layer;
use crate::preset::{FilterPreset, PresetValue};

/// `t = clamp(L * balance, 0, 1)`; output is `lerp(shadows · source, highlights · source, t)`.
pub struct SplitToneKernel {
    pub highlights: [f32; 3],
    pub shadows: [f32; 3],
    pub balance: f32,
}

impl PixelKernel for SplitToneKernel {
    fn eval(&self, format: PixelFormat, src0: &[f64], _src1: Option<&[f64]>, out: &mut [f64]) {
        let domain_max = format.max_value();
        let luma = (src0[0] + src0[1] + src0[2]) / (3.0 * domain_max);
        let t = (luma * self.balance as f64).max(0.0).min(1.0);
        for (c, slot) in out.iter_mut().enumerate() {
            if c >= 3 {
                *slot = src0[c];
                continue;
            }
            let shadow = self.shadows[c] as f64 * src0[c];
            let highlight = self.highlights[c] as f64 * src0[c];
            let tinted = shadow + (highlight - shadow) * t;
            *slot = tinted.max(0.0).min(domain_max);
        }
    }
}

pub struct SplitTone {
    pub name: String,
    pub highlight_tint: [f32; 3],
    pub shadow_tint: [f32; 3],
    pub balance: f32,
}

impl SplitTone {
    pub fn new() -> SplitTone {
        SplitTone {
            name: "Split Tone".into(),
            highlight_tint: [1.0, 1.0, 1.0],
            shadow_tint: [1.0, 1.0, 1.0],
            balance: 0.875,
        }
    }
}

impl Default for SplitTone {
    fn default() -> Self {
        SplitTone::new()
    }
}

impl Filter for SplitTone {
    fn kind(&self) -> FilterKind {
        FilterKind::SplitTone
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn to_preset(&self) -> FilterPreset {
        // inverse of weight(n) -> balance = 0.75 + (n+25)/200
        let weight = ((self.balance as f64 - 0.75) * 200.0 - 25.0).round() as i64;
        FilterPreset::new(FilterKind::SplitTone.dsl_name())
            .with("name", PresetValue::String(self.name.clone()))
            .with("highlights", PresetValue::Color(self.highlight_tint.map(|v| v as f64)))
            .with("shadows", PresetValue::Color(self.shadow_tint.map(|v| v as f64)))
            .with("weight", PresetValue::Int(weight))
    }

    fn from_preset(&mut self, preset: &FilterPreset) -> bool {
        if preset.filter_name != FilterKind::SplitTone.dsl_name() {
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
            Some(PresetValue::Int(n)) if (-25..=25).contains(n) => *n,
            _ => return false,
        };
        self.highlight_tint = highlights.map(|v| v as f32);
        self.shadow_tint = shadows.map(|v| v as f32);
        self.balance = 0.75 + (weight as f32 + 25.0) / 200.0;
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
        let kernel = SplitToneKernel {
            highlights: self.highlight_tint,
            shadows: self.shadow_tint,
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
    fn neutral_tint_is_identity_regardless_of_balance() {
        let kernel = SplitToneKernel {
            highlights: [1.0, 1.0, 1.0],
            shadows: [1.0, 1.0, 1.0],
            balance: 1.1,
        };
        let src = [100.0, 150.0, 200.0, 255.0];
        let mut out = [0.0; 4];
        kernel.eval(PixelFormat::RGBA8, &src, None, &mut out);
        assert_eq!(out, src);
    }
}
