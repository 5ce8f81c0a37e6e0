use downcast_rs::impl_downcast;
pub use downcast_rs::Downcast;
use std::fmt::Debug;

/// Trait implemented by a backend's concrete realization of a [`crate::layer::Layer`].
///
/// A `BackendImage` is opaque to everything above the [`crate::backend::Backend`] boundary: the
/// layer mirror table stores these as trait objects and only ever hands them back to the backend
/// that produced them. `Downcast` lets a backend recover its own concrete type from the trait
/// object it handed out; the mirror table guarantees the downcast target is always correct.
pub trait BackendImage: Downcast + Debug + Send + Sync {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn format(&self) -> crate::format::PixelFormat;
}

impl_downcast!(BackendImage);
