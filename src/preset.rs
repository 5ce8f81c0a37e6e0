//! Filter presets: a typed, serialisable snapshot of a filter's parameter record (§3
//! "FilterPreset"/"FilterPresetCollection").

use std::collections::BTreeMap;

use crate::filters::FilterKind;

/// A single parameter value. Two presets compare equal iff every parameter compares equal under
/// this type-aware equality — there is no cross-variant coercion (an `Int(3)` never equals a
/// `Float(3.0)`).
#[derive(Clone, Debug, PartialEq)]
pub enum PresetValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    /// An RGB(A) colour, either a named colour or an explicit triple (§4.5).
    Color([f64; 3]),
    Point(f64, f64),
    Points(Vec<(f64, f64)>),
    String(String),
}

/// A serialisable snapshot of a filter's parameter record.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterPreset {
    pub filter_name: String,
    pub name: String,
    pub category: String,
    parameters: BTreeMap<String, PresetValue>,
}

impl FilterPreset {
    pub fn new(filter_name: impl Into<String>) -> FilterPreset {
        FilterPreset {
            filter_name: filter_name.into(),
            name: String::new(),
            category: String::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: PresetValue) -> FilterPreset {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&PresetValue> {
        self.parameters.get(key)
    }

    /// Iterates parameters in a stable (lexicographic key) order — what the printer relies on for
    /// a canonical form.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PresetValue)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// An ordered, category-grouped sequence of presets.
#[derive(Clone, Debug, Default)]
pub struct FilterPresetCollection {
    presets: Vec<FilterPreset>,
}

impl FilterPresetCollection {
    pub fn new() -> FilterPresetCollection {
        FilterPresetCollection { presets: Vec::new() }
    }

    pub fn push(&mut self, preset: FilterPreset) {
        self.presets.push(preset);
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterPreset> {
        self.presets.iter()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn find(&self, filter_name: &str, name: &str) -> Option<&FilterPreset> {
        self.presets.iter().find(|p| {
            p.filter_name == filter_name
                && matches!(p.get("name"), Some(PresetValue::String(n)) if n == name)
        })
    }

    pub fn by_category(&self, category: &str) -> impl Iterator<Item = &FilterPreset> {
        self.presets.iter().filter(move |p| p.category == category)
    }

    /// A small built-in library seeded with one representative preset per filter kind (§9b):
    /// supplements the distilled spec, which specifies the DSL's bare-identifier resolution
    /// mechanism but not concrete shipped presets.
    pub fn default_library() -> FilterPresetCollection {
        let mut collection = FilterPresetCollection::new();
        collection.push(
            FilterPreset::new(FilterKind::BWMixer.dsl_name())
                .with("name", PresetValue::String("Neutral".into()))
                .with("category", PresetValue::String("Built-in".into()))
                .with("highlights", PresetValue::Color([1.0, 1.0, 1.0]))
                .with("shadows", PresetValue::Color([1.0, 1.0, 1.0]))
                .with("weight", PresetValue::Int(50)),
        );
        collection.push(
            FilterPreset::new(FilterKind::Curves.dsl_name())
                .with("name", PresetValue::String("Linear".into()))
                .with("category", PresetValue::String("Built-in".into()))
                .with("points", PresetValue::Points(vec![(0.0, 0.0), (1.0, 1.0)])),
        );
        collection.push(
            FilterPreset::new(FilterKind::CascadedSharpen.dsl_name())
                .with("name", PresetValue::String("Off".into()))
                .with("category", PresetValue::String("Built-in".into()))
                .with("threshold", PresetValue::Int(0))
                .with("radius0", PresetValue::Float(0.7))
                .with("strength0", PresetValue::Float(0.0))
                .with("radius1", PresetValue::Float(1.4))
                .with("strength1", PresetValue::Float(0.0))
                .with("radius2", PresetValue::Float(2.8))
                .with("strength2", PresetValue::Float(0.0))
                .with("radius3", PresetValue::Float(5.6))
                .with("strength3", PresetValue::Float(0.0)),
        );
        collection.push(
            FilterPreset::new(FilterKind::FilmGrain.dsl_name())
                .with("name", PresetValue::String("Fine".into()))
                .with("category", PresetValue::String("Built-in".into()))
                .with("points", PresetValue::Points(vec![(0.0, 0.0), (1.0, 1.0)]))
                .with("radius", PresetValue::Int(1)),
        );
        collection.push(
            FilterPreset::new(FilterKind::SplitTone.dsl_name())
                .with("name", PresetValue::String("Neutral".into()))
                .with("category", PresetValue::String("Built-in".into()))
                .with("highlights", PresetValue::Color([1.0, 1.0, 1.0]))
                .with("shadows", PresetValue::Color([1.0, 1.0, 1.0]))
                .with("weight", PresetValue::Int(0)),
        );
        collection.push(
            FilterPreset::new(FilterKind::Vignette.dsl_name())
                .with("name", PresetValue::String("Off".into()))
                .with("category", PresetValue::String("Built-in".into()))
                .with("x", PresetValue::Int(50))
                .with("y", PresetValue::Int(50))
                .with("strength", PresetValue::Int(0))
                .with("radius", PresetValue::Int(50)),
        );
        collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_type_aware() {
        let a = FilterPreset::new("curves").with("n", PresetValue::Int(3));
        let b = FilterPreset::new("curves").with("n", PresetValue::Float(3.0));
        assert_ne!(a, b);
    }

    #[test]
    fn default_library_has_one_entry_per_filter() {
        let lib = FilterPresetCollection::default_library();
        assert_eq!(lib.len(), 6);
    }

    #[test]
    fn default_sharpen_preset_has_non_empty_cascades() {
        let lib = FilterPresetCollection::default_library();
        let off = lib.find("sharpen", "Off").expect("built-in \"Off\" sharpen preset");
        assert_eq!(off.get("radius0"), Some(&PresetValue::Float(0.7)));
        assert_eq!(off.get("strength0"), Some(&PresetValue::Float(0.0)));
    }
}
