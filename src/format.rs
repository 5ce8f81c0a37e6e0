//! Pixel format registry.
//!
//! Applicable to every image the engine touches: layer realizations, kernel operands, and the
//! bytes crossing the codec boundary (§6) all carry one of the [`PixelFormat`] variants below.

/// The closed set of pixel formats the engine understands.
///
/// Mono formats have one channel, RGB formats three, RGBA formats four. The suffix encodes the
/// channel's storage width and numeric interpretation: `8`/`16` are unsigned normalized integers,
/// `16S` is signed normalized, `32F` is an IEEE float in `[0, 1]`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PixelFormat {
    Mono8,
    Mono16,
    Mono16S,
    Mono32F,
    RGB8,
    RGB16,
    RGB16S,
    RGB32F,
    RGBA8,
    RGBA16,
    RGBA16S,
    RGBA32F,
}

/// How a channel's stored bit pattern maps onto a numeric value.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ChannelKind {
    /// Unsigned integer storage, `[0, max_value]`.
    Unorm,
    /// Signed integer storage, symmetric around zero.
    Snorm,
    /// IEEE float storage, `[0, 1]` by convention (operators may exceed this transiently).
    Float,
}

impl PixelFormat {
    /// Number of channels: 1 for mono, 3 for RGB, 4 for RGBA.
    pub fn channel_count(self) -> u8 {
        use PixelFormat::*;
        match self {
            Mono8 | Mono16 | Mono16S | Mono32F => 1,
            RGB8 | RGB16 | RGB16S | RGB32F => 3,
            RGBA8 | RGBA16 | RGBA16S | RGBA32F => 4,
        }
    }

    /// Storage width of one channel, in bytes: 1, 2 or 4.
    pub fn channel_width(self) -> u8 {
        use PixelFormat::*;
        match self {
            Mono8 | RGB8 | RGBA8 => 1,
            Mono16 | Mono16S | RGB16 | RGB16S | RGBA16 | RGBA16S => 2,
            Mono32F | RGB32F | RGBA32F => 4,
        }
    }

    /// Numeric interpretation of the channel's stored bits.
    pub fn channel_kind(self) -> ChannelKind {
        use PixelFormat::*;
        match self {
            Mono8 | Mono16 | RGB8 | RGB16 | RGBA8 | RGBA16 => ChannelKind::Unorm,
            Mono16S | RGB16S | RGBA16S => ChannelKind::Snorm,
            Mono32F | RGB32F | RGBA32F => ChannelKind::Float,
        }
    }

    /// The saturation point of one channel.
    ///
    /// For unsigned integer formats this is the literal top of the storage range (`255` /
    /// `65535`). For signed and float formats the engine treats the channel's semantic range as
    /// `[0, 1]` (signed formats use their positive half), so `max_value` is `1.0`.
    pub fn max_value(self) -> f64 {
        match self.channel_kind() {
            ChannelKind::Unorm => match self.channel_width() {
                1 => 255.0,
                2 => 65535.0,
                _ => unreachable!("unorm formats are only ever 1 or 2 bytes wide"),
            },
            ChannelKind::Snorm | ChannelKind::Float => 1.0,
            // the `_` arm below is unreachable but keeps this match resilient to future variants
        }
    }

    /// Bytes occupied by one pixel of this format.
    pub fn bytes_per_pixel(self) -> usize {
        self.channel_count() as usize * self.channel_width() as usize
    }

    /// Bytes occupied by one scanline of `width` pixels.
    pub fn stride_for_width(self, width: u32) -> usize {
        self.bytes_per_pixel() * width as usize
    }

    /// `true` for the four mono formats.
    pub fn is_mono(self) -> bool {
        self.channel_count() == 1
    }

    /// `true` for the four formats carrying an alpha channel.
    pub fn has_alpha(self) -> bool {
        self.channel_count() == 4
    }

    /// The mono counterpart of this format, used when a filter needs a single-channel auxiliary
    /// layer (grain tiles in `mono` mode, luma-domain caches) matching the working layer's numeric
    /// precision.
    pub fn mono_equivalent(self) -> PixelFormat {
        use PixelFormat::*;
        match self {
            Mono8 | RGB8 | RGBA8 => Mono8,
            Mono16 | RGB16 | RGBA16 => Mono16,
            Mono16S | RGB16S | RGBA16S => Mono16S,
            Mono32F | RGB32F | RGBA32F => Mono32F,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_layout_is_consistent() {
        assert_eq!(PixelFormat::RGBA16.channel_count(), 4);
        assert_eq!(PixelFormat::RGBA16.channel_width(), 2);
        assert_eq!(PixelFormat::RGBA16.bytes_per_pixel(), 8);
        assert_eq!(PixelFormat::Mono8.max_value(), 255.0);
        assert_eq!(PixelFormat::RGB32F.max_value(), 1.0);
    }

    #[test]
    fn mono_equivalent_preserves_precision() {
        assert_eq!(PixelFormat::RGBA16S.mono_equivalent(), PixelFormat::Mono16S);
        assert_eq!(PixelFormat::RGB32F.mono_equivalent(), PixelFormat::Mono32F);
    }
}
