use crate::engine::Archiver;
use crate::error::{Error, Result};
use crate::vdf::VDF_ARCHIVER;
use log::debug;
use std::collections::HashMap;

/// `Registry` maps format tags to the archivers that read them.
/// Tags are matched case-insensitively.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    archivers: HashMap<String, &'static Archiver>,
}

impl Registry {
    /// `new` creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// `with_builtin` creates a registry holding every archiver shipped with this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(VDF_ARCHIVER.info.extension, &VDF_ARCHIVER);
        registry
    }

    /// `register` adds or replaces the archiver for `tag`.
    pub fn register(&mut self, tag: &str, archiver: &'static Archiver) -> &mut Self {
        debug!(r#"Registry::register(tag: "{tag}", archiver: "{}")"#, archiver.info.description);
        self.archivers.insert(tag.to_ascii_lowercase(), archiver);
        self
    }

    /// `get` looks up the archiver for `tag`.
    pub fn get(&self, tag: &str) -> Result<&'static Archiver> {
        self.archivers
            .get(&tag.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| Error::UnknownFormat(tag.to_string()))
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.archivers.keys().map(String::as_str)
    }
}
