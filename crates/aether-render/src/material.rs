//! String-keyed material property bag.

use rustc_hash::FxHashMap;

/// A single material property value.
#[derive(Clone, Debug, PartialEq)]
pub enum MaterialProperty {
    Float(f32),
    Vec3(glam::Vec3),
    Vec4(glam::Vec4),
    Text(String),
}

/// Named properties attached to a mesh, e.g. `"$Diffuse"` or `"$AlbedoMap"`.
#[derive(Clone, Debug, Default)]
pub struct Material {
    properties: FxHashMap<String, MaterialProperty>,
}

impl Material {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a property.
    pub fn set(&mut self, name: impl Into<String>, value: MaterialProperty) {
        self.properties.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&MaterialProperty> {
        self.properties.get(name)
    }

    pub fn get_float(&self, name: &str) -> Option<f32> {
        match self.properties.get(name)? {
            MaterialProperty::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.properties.get(name)? {
            MaterialProperty::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
