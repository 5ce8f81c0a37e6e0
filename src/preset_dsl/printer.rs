//! Printer for the preset DSL (§4.5): the canonical textual form presets round-trip through.
//!
//! One parameter per line, one space after each comma, lowercase identifiers, double-quoted
//! strings. `parse(print(p)) == p` for every preset `p` the parser can produce.

use std::fmt::Write as _;

use crate::preset::{FilterPreset, FilterPresetCollection, PresetValue};

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let mut s = format!("{}", n);
        if !s.contains('.') {
            s.push_str(".0");
        }
        s
    }
}

fn print_value(out: &mut String, value: &PresetValue) {
    match value {
        PresetValue::Bool(b) => {
            out.push_str(if *b { "true" } else { "false" });
        }
        PresetValue::Int(n) => {
            let _ = write!(out, "{}", n);
        }
        PresetValue::Float(n) => {
            out.push_str(&format_number(*n));
        }
        PresetValue::Color(c) => {
            let _ = write!(
                out,
                "{}, {}, {}",
                (c[0] * 255.0).round() as i64,
                (c[1] * 255.0).round() as i64,
                (c[2] * 255.0).round() as i64
            );
        }
        PresetValue::Point(x, y) => {
            let _ = write!(out, "{}:{}", format_number(*x), format_number(*y));
        }
        PresetValue::Points(points) => {
            for (i, (x, y)) in points.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{}:{}", format_number(*x), format_number(*y));
            }
        }
        PresetValue::String(s) => {
            let _ = write!(out, "\"{}\"", s);
        }
    }
}

/// Prints a single parameter as `filter_name=element(value), element(value), ...`.
pub fn print_preset(preset: &FilterPreset) -> String {
    let mut out = String::new();
    out.push_str(&preset.filter_name);
    out.push('=');
    for (i, (key, value)) in preset.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(key);
        out.push('(');
        print_value(&mut out, value);
        out.push(')');
    }
    out
}

/// Prints a whole collection, one preset per line.
pub fn print_collection(collection: &FilterPresetCollection) -> String {
    let mut out = String::new();
    for preset in collection.iter() {
        out.push_str(&print_preset(preset));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset_dsl::parser::{parse_one, parse};

    #[test]
    fn round_trips_a_single_preset() {
        let library = FilterPresetCollection::new();
        let original = r#"bwmixer=name("Neutral"),highlights(128,128,128),shadows(64,64,64),weight(60)"#;
        let parsed = parse_one(original, &library).unwrap();
        let printed = print_preset(&parsed);
        let reparsed = parse_one(&printed, &library).unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn round_trips_a_collection() {
        let library = FilterPresetCollection::new();
        let doc = "bwmixer=weight(50)\ncurves=points(0:0, 1:1)\n";
        let parsed = parse(doc, &library).unwrap();
        let printed = print_collection(&parsed);
        let reparsed = parse(&printed, &library).unwrap();
        assert_eq!(parsed.len(), reparsed.len());
        for (a, b) in parsed.iter().zip(reparsed.iter()) {
            assert_eq!(a, b);
        }
    }
}
