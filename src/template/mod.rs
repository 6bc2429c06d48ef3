//! Prompt template storage and rendering.

pub mod builtin;
pub mod manager;

use std::collections::HashMap;

use crate::models::template::Template;

/// An immutable set of templates. Reload builds a new set and swaps it in
/// atomically; running renders keep the old one.
#[derive(Debug, Default)]
pub struct TemplateSet {
    map: HashMap<String, Template>,
}

impl TemplateSet {
    pub fn from_templates(templates: Vec<Template>) -> Self {
        let map = templates.into_iter().map(|t| (t.name.clone(), t)).collect();
        Self { map }
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

pub use manager::{TemplateInfo, TemplateManager};
