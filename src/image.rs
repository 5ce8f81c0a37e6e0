//! `Image`: an ordered, mutable sequence of layers plus optional metadata (§3 "Image").

use std::collections::HashMap;

use crate::error::{self, Result};
use crate::layer::Layer;

/// Free-form metadata tree: directory -> tag -> bytes.
pub type MetadataTree = HashMap<String, HashMap<String, Vec<u8>>>;

/// An ordered sequence of layers. The first layer is conventionally the decoded source; later
/// entries are editable derivatives (scratch layers, masks promoted to layers, etc). An `Image`
/// is owned by exactly one session and owns its layers outright.
pub struct Image {
    layers: Vec<Layer>,
    metadata: MetadataTree,
}

impl Image {
    pub fn new() -> Image {
        Image { layers: Vec::new(), metadata: HashMap::new() }
    }

    pub fn from_source_layer(layer: Layer) -> Image {
        Image { layers: vec![layer], metadata: HashMap::new() }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn append_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    pub fn remove_layer(&mut self, index: usize) -> Result<Layer> {
        error::invariant(index < self.layers.len(), "layer index out of bounds")?;
        Ok(self.layers.remove(index))
    }

    /// Moves the layer at `index` by `steps` positions (negative moves it earlier).
    pub fn move_layer(&mut self, index: usize, steps: i32) -> Result<()> {
        error::invariant(index < self.layers.len(), "layer index out of bounds")?;
        let new_index = (index as i64 + steps as i64).clamp(0, self.layers.len() as i64 - 1) as usize;
        let layer = self.layers.remove(index);
        self.layers.insert(new_index, layer);
        Ok(())
    }

    pub fn swap_layers(&mut self, a: usize, b: usize) -> Result<()> {
        error::invariant(a < self.layers.len() && b < self.layers.len(), "layer index out of bounds")?;
        self.layers.swap(a, b);
        Ok(())
    }

    /// Duplicates the top layer and appends the duplicate (caller supplies the backend-realized
    /// copy, since duplication requires backend access — see [`Layer::duplicate`]).
    pub fn clone_top_with(&mut self, duplicate_top: impl FnOnce(&Layer) -> Result<Layer>) -> Result<()> {
        let top = self.layers.last().ok_or(crate::error::Error::InvariantViolation("image has no layers"))?;
        let clone = duplicate_top(top)?;
        self.layers.push(clone);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.layers.clear();
    }

    pub fn metadata(&self) -> &MetadataTree {
        &self.metadata
    }

    pub fn set_metadata(&mut self, directory: impl Into<String>, tag: impl Into<String>, bytes: Vec<u8>) {
        self.metadata.entry(directory.into()).or_insert_with(HashMap::new).insert(tag.into(), bytes);
    }
}

impl Default for Image {
    fn default() -> Self {
        Image::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PixelFormat;

    fn layer(name: &str) -> Layer {
        Layer::new(name, PixelFormat::RGBA8, 4, 4)
    }

    #[test]
    fn move_layer_clamps_to_bounds() {
        let mut image = Image::new();
        image.append_layer(layer("a"));
        image.append_layer(layer("b"));
        image.append_layer(layer("c"));
        image.move_layer(0, 100).unwrap();
        assert_eq!(image.layer(2).unwrap().name, "a");
    }

    #[test]
    fn swap_and_remove() {
        let mut image = Image::new();
        image.append_layer(layer("a"));
        image.append_layer(layer("b"));
        image.swap_layers(0, 1).unwrap();
        assert_eq!(image.layer(0).unwrap().name, "b");
        let removed = image.remove_layer(0).unwrap();
        assert_eq!(removed.name, "b");
        assert_eq!(image.len(), 1);
    }
}
