//! The preset DSL (§4.5): a small textual format for recording and exchanging filter presets.
//!
//! ```text
//! bwmixer=name("Neutral"), highlights(128,128,128), shadows(64,64,64), weight(60)
//! ```
//!
//! [`parse`]/[`parse_one`] turn text into [`crate::preset::FilterPresetCollection`]/
//! [`crate::preset::FilterPreset`] values; [`print_preset`]/[`print_collection`] go the other way.
//! The two are inverse up to the canonical form the printer emits: `parse(print(p)) == p`.

mod lexer;
mod parser;
mod printer;

pub use parser::{parse, parse_one};
pub use printer::{print_collection, print_preset};
