//! Silverhalide: a non-destructive black-and-white imaging engine.
//!
//! A source image is held as an ordered stack of [`layer::Layer`]s; a [`filters::FilterGraph`] of
//! independently enabled/parameterised [`filters::Filter`]s renders it, through a
//! [`scheduler::RenderScheduler`], onto a CPU or GPU [`backend::Backend`]. [`session::Session`] is
//! the entry point a host application drives; presets travel in and out as text through
//! [`preset_dsl`].
//!
//! This crate is a pure library: it performs no file or network I/O and never reads the process
//! environment. A host (or the `bs-cli` binary alongside it) owns all of that.

pub mod backend;
pub mod color;
pub mod config;
pub mod error;
pub mod filters;
pub mod format;
pub mod geometry;
pub mod image;
pub mod kernel;
pub mod layer;
pub mod preset;
pub mod preset_dsl;
pub mod scheduler;
pub mod session;
pub mod traits;

pub use error::{Error, Result};
pub use session::{presets_load, presets_save, Session, SessionHandle};
