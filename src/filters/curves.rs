//! Tone curves (§4.4.2): a monotone cubic LUT substituted per channel.

use crate::backend::{BackendId, BackendSet};
use crate::error::Result;
use crate::filters::{dispatch_kernel, Filter, FilterKind};
use crate::format::PixelFormat;
use crate::geometry::Rect;
use crate::kernel::PixelKernel;
use crate::layer::Layer;
use crate::preset::{FilterPreset, PresetValue};

/// Fritsch-Carlson monotone cubic Hermite tangents for a set of `(x, y)` control points sorted by
/// `x`.
fn monotone_tangents(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = xs.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut deltas = vec![0.0; n - 1];
    for i in 0..n - 1 {
        deltas[i] = (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i]);
    }
    let mut m = vec![0.0; n];
    m[0] = deltas[0];
    m[n - 1] = deltas[n - 2];
    for i in 1..n - 1 {
        m[i] = if deltas[i - 1] * deltas[i] <= 0.0 { 0.0 } else { (deltas[i - 1] + deltas[i]) / 2.0 };
    }
    for i in 0..deltas.len() {
        if deltas[i] == 0.0 {
            m[i] = 0.0;
            m[i + 1] = 0.0;
            continue;
        }
        let a = m[i] / deltas[i];
        let b = m[i + 1] / deltas[i];
        let s = a * a + b * b;
        if s > 9.0 {
            let t = 3.0 / s.sqrt();
            m[i] = t * a * deltas[i];
            m[i + 1] = t * b * deltas[i];
        }
    }
    m
}

fn hermite(x0: f64, x1: f64, y0: f64, y1: f64, m0: f64, m1: f64, x: f64) -> f64 {
    let h = x1 - x0;
    let t = (x - x0) / h;
    let t2 = t * t;
    let t3 = t2 * t;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    h00 * y0 + h10 * h * m0 + h01 * y1 + h11 * h * m1
}

/// Builds a `lut_length`-entry LUT from `points` (endpoints clamped into `[0, 1]` if absent).
pub fn build_lut(points: &[(f64, f64)], lut_length: usize) -> Vec<f64> {
    let mut pts: Vec<(f64, f64)> = points.to_vec();
    pts.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    if pts.is_empty() {
        pts.push((0.0, 0.0));
        pts.push((1.0, 1.0));
    }
    if pts[0].0 > 0.0 {
        let y = pts[0].1;
        pts.insert(0, (0.0, y));
    }
    if pts.last().unwrap().0 < 1.0 {
        let y = pts.last().unwrap().1;
        pts.push((1.0, y));
    }
    let xs: Vec<f64> = pts.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = pts.iter().map(|p| p.1).collect();
    let tangents = monotone_tangents(&xs, &ys);

    let mut lut = Vec::with_capacity(lut_length);
    for i in 0..lut_length {
        let x = i as f64 / (lut_length - 1).max(1) as f64;
        let mut segment = xs.len() - 2;
        for s in 0..xs.len() - 1 {
            if x >= xs[s] && x <= xs[s + 1] {
                segment = s;
                break;
            }
        }
        let y = hermite(xs[segment], xs[segment + 1], ys[segment], ys[segment + 1], tangents[segment], tangents[segment + 1], x);
        lut.push(y.max(0.0).min(1.0));
    }
    lut
}

/// Default LUT resolution: the full integer range for integer formats, 4096 for float (§4.4.2).
pub fn default_lut_length(format: PixelFormat) -> usize {
    match format.channel_kind() {
        crate::format::ChannelKind::Float => 4096,
        _ => format.max_value() as usize + 1,
    }
}

pub struct CurvesKernel {
    pub lut: Vec<f64>,
}

impl PixelKernel for CurvesKernel {
    fn eval(&self, format: PixelFormat, src0: &[f64], _src1: Option<&[f64]>, out: &mut [f64]) {
        let domain_max = format.max_value();
        let last = self.lut.len() - 1;
        for (c, slot) in out.iter_mut().enumerate() {
            if c == 3 && format.has_alpha() {
                *slot = src0[c];
                continue;
            }
            let t = (src0[c] / domain_max).max(0.0).min(1.0);
            let idx = (t * last as f64).round() as usize;
            *slot = self.lut[idx.min(last)] * domain_max;
        }
    }
}

pub struct Curves {
    pub name: String,
    pub control_points: Vec<(f64, f64)>,
    lut: Vec<f64>,
    cached_format: Option<PixelFormat>,
}

impl Curves {
    pub fn new() -> Curves {
        let mut curve = Curves {
            name: "Curves".into(),
            control_points: vec![(0.0, 0.0), (1.0, 1.0)],
            lut: Vec::new(),
            cached_format: None,
        };
        curve.update_curve(PixelFormat::Mono32F);
        curve
    }

    /// Recomputes the LUT for `format`. Idempotent: calling twice in a row with unchanged control
    /// points and format is a no-op beyond rebuilding the (identical) LUT.
    pub fn update_curve(&mut self, format: PixelFormat) {
        self.lut = build_lut(&self.control_points, default_lut_length(format));
        self.cached_format = Some(format);
    }
}

impl Default for Curves {
    fn default() -> Self {
        Curves::new()
    }
}

impl Filter for Curves {
    fn kind(&self) -> FilterKind {
        FilterKind::Curves
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn to_preset(&self) -> FilterPreset {
        FilterPreset::new(FilterKind::Curves.dsl_name())
            .with("name", PresetValue::String(self.name.clone()))
            .with("points", PresetValue::Points(self.control_points.clone()))
    }

    fn from_preset(&mut self, preset: &FilterPreset) -> bool {
        if preset.filter_name != FilterKind::Curves.dsl_name() {
            return false;
        }
        let points = match preset.get("points") {
            Some(PresetValue::Points(p)) if !p.is_empty() => p.clone(),
            _ => return false,
        };
        self.control_points = points;
        if let Some(format) = self.cached_format {
            self.update_curve(format);
        }
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
        if self.cached_format != Some(source.format()) {
            self.update_curve(source.format());
        }
        let kernel = CurvesKernel { lut: self.lut.clone() };
        dispatch_kernel(backends, backend_id, destination, source, &kernel, rect, 256)
    }

    fn release_caches(&mut self) {
        self.cached_format = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_curve_is_byte_equal() {
        let lut = build_lut(&[(0.0, 0.0), (1.0, 1.0)], 256);
        let kernel = CurvesKernel { lut };
        let mut out = [0.0];
        kernel.eval(PixelFormat::Mono8, &[128.0], None, &mut out);
        assert!((out[0] - 128.0).abs() <= 1.0);
    }

    #[test]
    fn negate_curve_matches_scenario_three() {
        let lut = build_lut(&[(0.0, 1.0), (1.0, 0.0)], 256);
        let kernel = CurvesKernel { lut };
        for (input, expected) in [(0.0, 255.0), (64.0, 191.0), (128.0, 127.0), (192.0, 63.0), (255.0, 0.0)] {
            let mut out = [0.0];
            kernel.eval(PixelFormat::Mono8, &[input], None, &mut out);
            assert!((out[0] - expected).abs() <= 1.0, "input {} -> {} (expected {})", input, out[0], expected);
        }
    }
}
