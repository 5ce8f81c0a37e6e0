//! Error type.
//!
//! This is the shared error type for the whole crate.

use std::{error, fmt};

/// The engine's error taxonomy (see the error handling design for the recovery policy attached to
/// each kind).
#[derive(Clone, Debug)]
pub enum Error {
    /// A kernel dispatch, copy or fill was asked to operate across images with mismatched pixel
    /// formats.
    FormatMismatch,
    /// A requested rectangle falls outside the bounds of one of the images involved.
    OutOfBounds,
    /// The CPU slab allocator or the GPU tile pool could not satisfy an allocation.
    BackendOutOfMemory,
    /// The GPU backend's device handle was lost (context invalidated).
    DeviceLost,
    /// A preset DSL document failed to parse.
    ParseError {
        offset: usize,
        expected: &'static str,
    },
    /// An internal contract was violated (format/bounds checks that should have been caught by
    /// the caller). In debug builds these are asserted instead of constructed.
    InvariantViolation(&'static str),
    /// The render job was cancelled before completion.
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::FormatMismatch => write!(f, "pixel format mismatch between images"),
            Error::OutOfBounds => write!(f, "rectangle out of bounds"),
            Error::BackendOutOfMemory => write!(f, "backend allocator exhausted"),
            Error::DeviceLost => write!(f, "GPU device lost"),
            Error::ParseError { offset, expected } => {
                write!(f, "preset parse error at offset {}: expected {}", offset, expected)
            }
            Error::InvariantViolation(what) => write!(f, "invariant violation: {}", what),
            Error::Cancelled => write!(f, "render cancelled"),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = ::std::result::Result<T, Error>;

/// Panics in debug builds, returns an `InvariantViolation` in release builds.
///
/// Used at the handful of call sites the spec calls out as "programmer errors": format mismatch
/// and out-of-bounds rectangles are supposed to be caught by the caller before they reach the
/// dispatch engine.
#[track_caller]
pub(crate) fn invariant(condition: bool, what: &'static str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        debug_assert!(condition, "{}", what);
        Err(Error::InvariantViolation(what))
    }
}
