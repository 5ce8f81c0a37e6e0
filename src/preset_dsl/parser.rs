//! Parser for the preset DSL (§4.5): turns a token stream into a [`FilterPresetCollection`].

use crate::error::{Error, Result};
use crate::filters::FilterKind;
use crate::preset::{FilterPreset, FilterPresetCollection, PresetValue};
use crate::preset_dsl::lexer::{lex, Token, TokenKind};

/// Whether `key` looks like `radius3`/`strength0`: the literal per-cascade keys
/// [`crate::filters::sharpen::CascadedSharpen::to_preset`] emits and `from_preset` reads, as
/// opposed to the DSL's own `cascade(...)` shorthand for writing them.
fn is_indexed_cascade_key(key: &str) -> bool {
    match key.strip_prefix("radius").or_else(|| key.strip_prefix("strength")) {
        Some(digits) => !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Whether `key` is a keyword this filter's `from_preset` actually reads (§4.5 error semantics:
/// an unknown keyword is a parse error, not a silently-ignored element). `name`/`category` are
/// accepted on every filter.
fn known_keyword(kind: FilterKind, key: &str) -> bool {
    if matches!(key, "name" | "category") {
        return true;
    }
    match kind {
        FilterKind::BWMixer | FilterKind::SplitTone => matches!(key, "highlights" | "shadows" | "weight"),
        FilterKind::Curves => matches!(key, "points"),
        FilterKind::CascadedSharpen => matches!(key, "threshold" | "cascade") || is_indexed_cascade_key(key),
        FilterKind::FilmGrain => matches!(key, "points" | "radius" | "mono" | "seed"),
        FilterKind::Vignette => matches!(key, "x" | "y" | "strength" | "radius"),
    }
}

/// Bridges the DSL's `cascade(radius:strength[, radius:strength ...])` element (§4.5) onto the
/// `radius{i}`/`strength{i}` keys [`crate::filters::sharpen::CascadedSharpen::from_preset`] reads,
/// appending after whatever cascades are already present.
fn insert_cascade(preset: FilterPreset, value: PresetValue, offset: usize) -> Result<FilterPreset> {
    let points = match value {
        PresetValue::Points(points) => points,
        PresetValue::Point(x, y) => vec![(x, y)],
        _ => return Err(Error::ParseError { offset, expected: "cascade radius:strength pairs" }),
    };
    let mut next = 0usize;
    while preset.get(&format!("radius{}", next)).is_some() {
        next += 1;
    }
    let mut preset = preset;
    for (i, (radius, strength)) in points.into_iter().enumerate() {
        preset = preset
            .with(format!("radius{}", next + i), PresetValue::Float(radius))
            .with(format!("strength{}", next + i), PresetValue::Float(strength));
    }
    Ok(preset)
}

fn named_color(name: &str) -> Option<[f64; 3]> {
    let rgb8 = match name {
        "red" => [255.0, 0.0, 0.0],
        "green" => [0.0, 255.0, 0.0],
        "blue" => [0.0, 0.0, 255.0],
        "yellow" => [255.0, 255.0, 0.0],
        "white" => [255.0, 255.0, 255.0],
        "grey" => [128.0, 128.0, 128.0],
        "black" => [0.0, 0.0, 0.0],
        _ => return None,
    };
    Some(rgb8.map(|c| c / 255.0))
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    library: &'a FilterPresetCollection,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek2(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos + 1)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|t| t.offset).unwrap_or_else(|| {
            self.tokens.last().map(|t| t.offset + 1).unwrap_or(0)
        })
    }

    fn bump(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect_ident(&mut self, expected: &'static str) -> Result<String> {
        match self.bump() {
            Some(Token { kind: TokenKind::Ident(s), .. }) => Ok(s.clone()),
            _ => Err(Error::ParseError { offset: self.offset(), expected }),
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> Result<()> {
        match self.bump() {
            Some(t) if t.kind == kind => Ok(()),
            _ => Err(Error::ParseError { offset: self.offset(), expected }),
        }
    }

    /// `value = number | tuple_list | factor_list | identifier | string .`
    fn parse_value(&mut self) -> Result<PresetValue> {
        match self.peek() {
            Some(Token { kind: TokenKind::Str(_), .. }) => {
                if let Some(Token { kind: TokenKind::Str(s), .. }) = self.bump() {
                    Ok(PresetValue::String(s.clone()))
                } else {
                    unreachable!()
                }
            }
            Some(Token { kind: TokenKind::Ident(name), .. }) => {
                let name = name.clone();
                self.bump();
                if let Some(rgb) = named_color(&name) {
                    Ok(PresetValue::Color(rgb))
                } else if name == "true" || name == "false" {
                    Ok(PresetValue::Bool(name == "true"))
                } else {
                    Ok(PresetValue::String(name))
                }
            }
            Some(Token { kind: TokenKind::Number(_), .. }) => self.parse_number_led_value(),
            _ => Err(Error::ParseError { offset: self.offset(), expected: "value" }),
        }
    }

    /// Dispatches between a bare number, a `factor_list`, and a `tuple_list`, all of which start
    /// with a number.
    fn parse_number_led_value(&mut self) -> Result<PresetValue> {
        let first = self.parse_number()?;
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Colon)) {
            self.bump();
            let second = self.parse_number()?;
            let mut points = vec![(first, second)];
            while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Comma))
                && matches!(self.peek2().map(|t| &t.kind), Some(TokenKind::Number(_)))
            {
                self.bump();
                let x = self.parse_number()?;
                self.expect(TokenKind::Colon, "':'")?;
                let y = self.parse_number()?;
                points.push((x, y));
            }
            return Ok(PresetValue::Points(points));
        }
        let mut factors = vec![first];
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Comma))
            && matches!(self.peek2().map(|t| &t.kind), Some(TokenKind::Number(_)))
        {
            self.bump();
            factors.push(self.parse_number()?);
        }
        if factors.len() == 1 {
            let n = factors[0];
            if n.fract() == 0.0 {
                Ok(PresetValue::Int(n as i64))
            } else {
                Ok(PresetValue::Float(n))
            }
        } else if factors.len() == 3 {
            // `highlights(r,g,b)`/`shadows(r,g,b)` are raw 0-255 triples; `Color` stores `[0,1]`
            // fractions, matching what named colours and the filters' `from_preset` expect.
            Ok(PresetValue::Color([factors[0] / 255.0, factors[1] / 255.0, factors[2] / 255.0]))
        } else {
            Ok(PresetValue::Points(factors.iter().enumerate().map(|(i, v)| (i as f64, *v)).collect()))
        }
    }

    fn parse_number(&mut self) -> Result<f64> {
        match self.bump() {
            Some(Token { kind: TokenKind::Number(n), .. }) => Ok(*n),
            _ => Err(Error::ParseError { offset: self.offset(), expected: "number" }),
        }
    }

    /// `element = identifier "(" value ")" | identifier "(" identifier ")" .`
    fn parse_element(&mut self, preset: FilterPreset) -> Result<FilterPreset> {
        let key_offset = self.offset();
        let key = self.expect_ident("element name")?;
        // `preset.filter_name` was already validated against `FilterKind` in `parse_parameter`.
        let kind = FilterKind::from_dsl_name(&preset.filter_name).expect("filter name validated by caller");
        if !known_keyword(kind, &key) {
            return Err(Error::ParseError { offset: key_offset, expected: "known parameter name for this filter" });
        }
        self.expect(TokenKind::LParen, "'('")?;
        let value = self.parse_value()?;
        self.expect(TokenKind::RParen, "')'")?;
        if key == "cascade" {
            return insert_cascade(preset, value, key_offset);
        }
        Ok(preset.with(key, value))
    }

    /// `parameter = filter_name "=" element { "," element } .`
    fn parse_parameter(&mut self) -> Result<FilterPreset> {
        let filter_name_offset = self.offset();
        let filter_name = self.expect_ident("filter name")?;
        if FilterKind::from_dsl_name(&filter_name).is_none() {
            return Err(Error::ParseError { offset: filter_name_offset, expected: "known filter name" });
        }
        self.expect(TokenKind::Equals, "'='")?;

        // A bare identifier body resolves against the preset library (§4.5): `bwmixer=NeutralGrey`.
        if let Some(Token { kind: TokenKind::Ident(bare), .. }) = self.peek() {
            if !matches!(self.peek2().map(|t| &t.kind), Some(TokenKind::LParen)) {
                let bare = bare.clone();
                self.bump();
                return self
                    .library
                    .find(&filter_name, &bare)
                    .cloned()
                    .ok_or_else(|| Error::ParseError { offset: self.offset(), expected: "known preset name" });
            }
        }

        let mut preset = self.parse_element(FilterPreset::new(filter_name))?;
        loop {
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Comma) => {
                    // Lookahead distinguishes "more elements of this parameter" from "the next
                    // top-level parameter": `ident(` continues, `ident=` starts anew.
                    let continues = matches!(
                        (self.tokens.get(self.pos + 1).map(|t| &t.kind), self.tokens.get(self.pos + 2).map(|t| &t.kind)),
                        (Some(TokenKind::Ident(_)), Some(TokenKind::LParen))
                    );
                    if !continues {
                        break;
                    }
                    self.bump();
                    preset = self.parse_element(preset)?;
                }
                _ => break,
            }
        }
        Ok(preset)
    }

    /// `root = { parameter { "," parameter } } .`
    fn parse_root(&mut self) -> Result<FilterPresetCollection> {
        let mut collection = FilterPresetCollection::new();
        while self.peek().is_some() {
            let preset = self.parse_parameter()?;
            collection.push(preset);
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Comma) => {
                    self.bump();
                }
                Some(TokenKind::Ident(_)) => {}
                None => break,
                _ => return Err(Error::ParseError { offset: self.offset(), expected: "parameter" }),
            }
        }
        Ok(collection)
    }
}

/// Parses a full preset document, returning a fresh collection. On any parse failure no partial
/// state escapes: the caller's own collection is left untouched.
pub fn parse(input: &str, library: &FilterPresetCollection) -> Result<FilterPresetCollection> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens: &tokens, pos: 0, library };
    parser.parse_root()
}

/// Parses a single `filter=element,...` parameter, for callers that already have one line in hand.
pub fn parse_one(input: &str, library: &FilterPresetCollection) -> Result<FilterPreset> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens: &tokens, pos: 0, library };
    let preset = parser.parse_parameter()?;
    if parser.peek().is_some() {
        return Err(Error::ParseError { offset: parser.offset(), expected: "end of input" });
    }
    Ok(preset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_parameter() {
        let library = FilterPresetCollection::new();
        let preset = parse_one(r#"bwmixer=name("Neutral"),highlights(128,128,128),shadows(64,64,64),weight(60)"#, &library).unwrap();
        assert_eq!(preset.filter_name, "bwmixer");
        assert_eq!(preset.get("weight"), Some(&PresetValue::Int(60)));
        match preset.get("highlights") {
            Some(PresetValue::Color(c)) => {
                for (got, want) in c.iter().zip([128.0 / 255.0; 3].iter()) {
                    assert!((got - want).abs() < 1e-9);
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_multiple_top_level_parameters_separated_by_newlines() {
        let library = FilterPresetCollection::new();
        let doc = "bwmixer=weight(50)\ncurves=points(0:0,1:1)\n";
        let collection = parse(doc, &library).unwrap();
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn resolves_named_colors() {
        let library = FilterPresetCollection::new();
        let preset = parse_one("bwmixer=highlights(red),shadows(black),weight(0)", &library).unwrap();
        match preset.get("highlights") {
            Some(PresetValue::Color(c)) => assert_eq!(*c, [1.0, 0.0, 0.0]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cascade_tuple_parses_radius_and_strength() {
        let library = FilterPresetCollection::new();
        let preset = parse_one("sharpen=cascade(0.7:0.25),threshold(10)", &library).unwrap();
        assert_eq!(preset.get("radius0"), Some(&PresetValue::Float(0.7)));
        assert_eq!(preset.get("strength0"), Some(&PresetValue::Float(0.25)));
    }

    #[test]
    fn multiple_cascade_pairs_index_in_order() {
        let library = FilterPresetCollection::new();
        let preset = parse_one("sharpen=cascade(0.7:0.25,1.4:0.1),threshold(0)", &library).unwrap();
        assert_eq!(preset.get("radius0"), Some(&PresetValue::Float(0.7)));
        assert_eq!(preset.get("strength0"), Some(&PresetValue::Float(0.25)));
        assert_eq!(preset.get("radius1"), Some(&PresetValue::Float(1.4)));
        assert_eq!(preset.get("strength1"), Some(&PresetValue::Float(0.1)));
    }

    #[test]
    fn reports_parse_error_with_offset() {
        let library = FilterPresetCollection::new();
        let err = parse_one("bwmixer=weight(", &library).unwrap_err();
        match err {
            Error::ParseError { .. } => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bare_identifier_resolves_against_library() {
        let mut library = FilterPresetCollection::new();
        library.push(FilterPreset::new("bwmixer").with("name", PresetValue::String("NeutralGrey".into())));
        let preset = parse_one("bwmixer=NeutralGrey", &library).unwrap();
        assert_eq!(preset.get("name"), Some(&PresetValue::String("NeutralGrey".into())));
    }

    #[test]
    fn unknown_filter_name_is_a_parse_error() {
        let library = FilterPresetCollection::new();
        let err = parse_one("bogus=whatever(1)", &library).unwrap_err();
        assert!(matches!(err, Error::ParseError { .. }));
    }

    #[test]
    fn unknown_keyword_is_a_parse_error() {
        let library = FilterPresetCollection::new();
        let err = parse_one("bwmixer=whatever(1)", &library).unwrap_err();
        assert!(matches!(err, Error::ParseError { .. }));
    }
}
