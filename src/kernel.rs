//! Pixel kernel dispatch: the per-pixel/small-stencil operator library (§4.1) and the generic
//! numeric bridge between a backend's raw storage and the "native domain" the operators compute
//! in.
//!
//! The reference implementation this engine is modeled on specialises every operator once per
//! storage type (`unsigned char`, `signed short`, `unsigned short`, `float`) via C++ templates,
//! then dispatches through a large format switch. That switch is where a real bug lived: the
//! 16-bit RGB `grain_merge` entry reused the 8-bit specialization. Here there is exactly one
//! generic implementation per operator, parameterised by the format's `domain_max` — there is no
//! separate code path per format for the bug to hide in.

use crate::format::{ChannelKind, PixelFormat};

/// Bridges a backend's raw channel storage type to the `f64` "native domain" the operators in
/// this module compute in.
///
/// For `Unorm` formats the native domain is `[0, max_value]` (the same as the original C++
/// templates instantiated for integer types). For `Snorm` and `Float` formats it is `[0, 1]`-ish
/// (signed formats keep their negative half), matching the `float` specialisations in the
/// original.
pub trait Numeric: Copy + Send + Sync + 'static {
    fn to_native(self, format: PixelFormat) -> f64;
    fn from_native(value: f64, format: PixelFormat) -> Self;
}

impl Numeric for u8 {
    fn to_native(self, _format: PixelFormat) -> f64 {
        self as f64
    }
    fn from_native(value: f64, _format: PixelFormat) -> Self {
        value.round().clamp(0.0, 255.0) as u8
    }
}

impl Numeric for u16 {
    fn to_native(self, _format: PixelFormat) -> f64 {
        self as f64
    }
    fn from_native(value: f64, _format: PixelFormat) -> Self {
        value.round().clamp(0.0, 65535.0) as u16
    }
}

impl Numeric for i16 {
    fn to_native(self, _format: PixelFormat) -> f64 {
        self as f64 / 32767.0
    }
    fn from_native(value: f64, _format: PixelFormat) -> Self {
        (value.clamp(-1.0, 1.0) * 32767.0).round() as i16
    }
}

impl Numeric for f32 {
    fn to_native(self, _format: PixelFormat) -> f64 {
        self as f64
    }
    fn from_native(value: f64, _format: PixelFormat) -> Self {
        value as f32
    }
}

/// The operator library of §4.1, defined once over the native `f64` domain.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    MinThreshold,
    MaxThreshold,
    Negate,
    Screen,
    Overlay,
    Dodge,
    Burn,
    HardLight,
    GrainMultiply,
    GrainMerge,
    GrainExtract,
    ApplyGrainAdd,
    ApplyGrainSubtract,
    Difference,
}

impl Operator {
    /// Applies a unary operator (only [`Operator::Negate`] is unary).
    pub fn apply_unary(self, first: f64, domain_max: f64) -> f64 {
        match self {
            Operator::Negate => domain_max - first,
            _ => panic!("{:?} is not a unary operator", self),
        }
    }

    /// Applies a binary operator over two values already expressed in the format's native domain.
    ///
    /// `domain_max` is `format.max_value()`: `255`/`65535` for `Unorm` storage, `1.0` for `Snorm`
    /// and `Float` storage. The "centred at `max/2`" grain operators use `domain_max / 2.0` as
    /// their midpoint regardless of storage width, reproducing the original's
    /// midpoint-as-zero convention.
    pub fn apply_binary(self, first: f64, second: f64, domain_max: f64) -> f64 {
        let clamp = |v: f64| v.max(0.0).min(domain_max);
        match self {
            Operator::Add => clamp(first + second),
            Operator::Sub => clamp(first - second),
            Operator::Mul => {
                if domain_max == 1.0 {
                    clamp(first * second)
                } else {
                    clamp((first * second / domain_max).ceil())
                }
            }
            Operator::Div => {
                if second == 0.0 {
                    first
                } else {
                    clamp(first / second)
                }
            }
            Operator::Min => first.min(second),
            Operator::Max => first.max(second),
            Operator::MinThreshold => {
                if first < second {
                    0.0
                } else {
                    first
                }
            }
            Operator::MaxThreshold => {
                if first > second {
                    0.0
                } else {
                    first
                }
            }
            Operator::Negate => domain_max - first,
            Operator::Screen => {
                if domain_max == 1.0 {
                    1.0 - (1.0 - first) * (1.0 - second)
                } else {
                    clamp(domain_max - (domain_max - first) * (domain_max - second) / domain_max)
                }
            }
            Operator::Overlay => {
                if domain_max == 1.0 {
                    clamp(first * (first + 2.0 * second * (1.0 - first)))
                } else {
                    let value = ((first / domain_max)
                        * (first + (2.0 * second / domain_max) * (domain_max - first)))
                        .ceil();
                    clamp(value)
                }
            }
            Operator::Dodge => {
                if domain_max == 1.0 {
                    clamp(first / (1.0 - second).max(1e-6))
                } else {
                    clamp(((domain_max + 1.0) * first) / (domain_max - second + 1.0))
                }
            }
            Operator::Burn => {
                if domain_max == 1.0 {
                    clamp(1.0 - (1.0 - first) / second.max(1e-6))
                } else {
                    clamp(
                        domain_max
                            - ((domain_max + 1.0) * (domain_max - first)) / (second + 1.0),
                    )
                }
            }
            Operator::HardLight => {
                if domain_max == 1.0 {
                    if first <= 0.5 {
                        2.0 * first * second
                    } else {
                        1.0 - (1.0 - 2.0 * (second - 0.5)) * (1.0 - first)
                    }
                } else if first <= domain_max / 2.0 {
                    clamp((2.0 * first * second) / (domain_max + 1.0))
                } else {
                    clamp(
                        domain_max
                            - ((domain_max - 2.0 * (second - domain_max / 2.0))
                                * (domain_max - first))
                                / (domain_max + 1.0),
                    )
                }
            }
            Operator::GrainMultiply => clamp(first * second / domain_max.max(1.0)),
            Operator::GrainMerge => clamp(first + second - domain_max / 2.0),
            Operator::GrainExtract => clamp(first - second + domain_max / 2.0),
            Operator::ApplyGrainAdd => clamp(first + (second - domain_max / 2.0)),
            Operator::ApplyGrainSubtract => clamp(first - (second - domain_max / 2.0)),
            Operator::Difference => (first - second).abs(),
        }
    }

    /// Applies a binary operator where `factor` is a normalised `[0, 1]` scalar rather than a
    /// second channel value — the "scalar form" column of §4.1's operator table.
    pub fn apply_scalar(self, first: f64, factor: f64, domain_max: f64) -> f64 {
        let second = if domain_max == 1.0 {
            factor
        } else {
            (domain_max * factor).ceil()
        };
        self.apply_binary(first, second, domain_max)
    }
}

/// Per-pixel vector magnitude, used by [`Operator`]'s `normalise` reduction (not expressible as a
/// per-channel binary/unary operator since it mixes channels).
pub fn normalise_magnitude(channels: &[f64]) -> f64 {
    channels.iter().map(|c| c * c).sum::<f64>().sqrt()
}

/// A pure per-pixel (or small-stencil) function evaluated tile-wise by the dispatch engine.
///
/// `src0`/`src1` and `out` are all in the destination format's native domain (see [`Numeric`]).
/// Kernels that only need one channel at a time (most of the operator table) loop over
/// `out.len()` internally; kernels that mix channels (the mixer, split tone, vignette) read the
/// whole pixel before writing any channel.
pub trait PixelKernel: Send + Sync {
    fn eval(&self, format: PixelFormat, src0: &[f64], src1: Option<&[f64]>, out: &mut [f64]);
}

/// Applies a single [`Operator`] independently to every channel — the common case for the
/// general-purpose arithmetic table.
pub struct ChannelOperatorKernel {
    pub operator: Operator,
    pub scalar: Option<f64>,
}

impl PixelKernel for ChannelOperatorKernel {
    fn eval(&self, format: PixelFormat, src0: &[f64], src1: Option<&[f64]>, out: &mut [f64]) {
        let domain_max = format.max_value();
        for i in 0..out.len() {
            out[i] = match (self.scalar, src1) {
                (Some(factor), _) => self.operator.apply_scalar(src0[i], factor, domain_max),
                (None, Some(src1)) => self.operator.apply_binary(src0[i], src1[i], domain_max),
                (None, None) => self.operator.apply_unary(src0[i], domain_max),
            };
        }
    }
}

/// Reads one channel's raw bytes and converts it to the native domain, dispatching on the
/// format's storage width/kind. `bytes` must be exactly `format.channel_width()` bytes long.
pub fn read_channel_native(bytes: &[u8], format: PixelFormat) -> f64 {
    use ChannelKind::*;
    match (format.channel_width(), format.channel_kind()) {
        (1, Unorm) => bytes[0].to_native(format),
        (2, Unorm) => u16::from_le_bytes([bytes[0], bytes[1]]).to_native(format),
        (2, Snorm) => i16::from_le_bytes([bytes[0], bytes[1]]).to_native(format),
        (4, Float) => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).to_native(format),
        (width, kind) => unreachable!("no channel storage for width={} kind={:?}", width, kind),
    }
}

/// Writes one channel's native-domain value back into `bytes` (exactly `channel_width()` long),
/// the inverse of [`read_channel_native`].
pub fn write_channel_native(value: f64, format: PixelFormat, bytes: &mut [u8]) {
    use ChannelKind::*;
    match (format.channel_width(), format.channel_kind()) {
        (1, Unorm) => bytes[0] = u8::from_native(value, format),
        (2, Unorm) => bytes[0..2].copy_from_slice(&u16::from_native(value, format).to_le_bytes()),
        (2, Snorm) => bytes[0..2].copy_from_slice(&i16::from_native(value, format).to_le_bytes()),
        (4, Float) => bytes[0..4].copy_from_slice(&f32::from_native(value, format).to_le_bytes()),
        (width, kind) => unreachable!("no channel storage for width={} kind={:?}", width, kind),
    }
}

/// Decodes one whole pixel at byte `offset` into `out` (length `format.channel_count()`).
pub fn decode_pixel(bytes: &[u8], format: PixelFormat, offset: usize, out: &mut [f64]) {
    let w = format.channel_width() as usize;
    for (c, slot) in out.iter_mut().enumerate() {
        *slot = read_channel_native(&bytes[offset + c * w..offset + (c + 1) * w], format);
    }
}

/// Encodes one whole pixel from `values` into `bytes` at byte `offset`.
pub fn encode_pixel(format: PixelFormat, values: &[f64], bytes: &mut [u8], offset: usize) {
    let w = format.channel_width() as usize;
    for (c, value) in values.iter().enumerate() {
        write_channel_native(*value, format, &mut bytes[offset + c * w..offset + (c + 1) * w]);
    }
}

/// Counts pixel values per bin. Partial per-tile histograms are summed by the caller — this
/// function itself processes one contiguous run of already-decoded native-domain values, which is
/// what a tile boundary naturally produces (§4.1: "expressed as a separate reduce pass").
pub fn histogram_bin(value: f64, domain_max: f64, bins: usize) -> usize {
    let t = (value / domain_max.max(1e-9)).max(0.0).min(1.0);
    ((t * bins as f64) as usize).min(bins - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn div_by_zero_passes_through_for_integers() {
        let domain_max = 255.0;
        assert_eq!(Operator::Div.apply_binary(120.0, 0.0, domain_max), 120.0);
    }

    #[test]
    fn negate_matches_max_minus_x() {
        assert_eq!(Operator::Negate.apply_unary(64.0, 255.0), 191.0);
        assert_eq!(Operator::Negate.apply_unary(0.25, 1.0), 0.75);
    }

    #[test]
    fn threshold_operators_zero_out_of_range() {
        assert_eq!(Operator::MinThreshold.apply_binary(10.0, 50.0, 255.0), 0.0);
        assert_eq!(Operator::MinThreshold.apply_binary(60.0, 50.0, 255.0), 60.0);
        assert_eq!(Operator::MaxThreshold.apply_binary(200.0, 128.0, 255.0), 0.0);
        assert_eq!(Operator::MaxThreshold.apply_binary(60.0, 128.0, 255.0), 60.0);
    }

    #[test]
    fn grain_roundtrip_centres_on_domain_midpoint() {
        let domain_max = 255.0;
        let merged = Operator::GrainMerge.apply_binary(100.0, 200.0, domain_max);
        let extracted = Operator::GrainExtract.apply_binary(merged, 100.0, domain_max);
        assert!((extracted - 200.0).abs() < 1e-9);
    }

    #[test]
    fn saturation_stays_within_domain() {
        let domain_max = 255.0;
        for op in [Operator::Add, Operator::Screen, Operator::Overlay, Operator::Dodge] {
            let v = op.apply_binary(250.0, 250.0, domain_max);
            assert!(v >= 0.0 && v <= domain_max, "{:?} produced {}", op, v);
        }
    }
}
