//! An explicit, host-owned collection of loaded languages.

use std::collections::BTreeMap;
use tracing::debug;

use crate::blob::LoadError;
use crate::language::{load, Language};

/// Maps grammar names to loaded [`Language`] handles.
///
/// The registry is an ordinary value: hosts create as many as they need and
/// decide when languages are loaded and dropped.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    languages: BTreeMap<String, Language>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `bytes` and registers the language under its grammar name,
    /// replacing any language of the same name.
    ///
    /// # Errors
    ///
    /// Returns the [`LoadError`] from [`load`]; the registry is unchanged then.
    pub fn load(&mut self, bytes: &[u8]) -> Result<Language, LoadError> {
        let language = load(bytes)?;
        self.insert(language.clone());
        Ok(language)
    }

    /// Registers `language` under its name, returning the one it replaces.
    pub fn insert(&mut self, language: Language) -> Option<Language> {
        let previous = self
            .languages
            .insert(language.name().to_string(), language);
        if let Some(previous) = &previous {
            debug!(language = previous.name(), "replaced registered language");
        }
        previous
    }

    /// The language registered as `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Language> {
        self.languages.get(name)
    }

    /// Removes and returns the language registered as `name`.
    ///
    /// Parsers and trees holding the handle keep it alive.
    pub fn unload(&mut self, name: &str) -> Option<Language> {
        self.languages.remove(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.languages.keys().map(String::as_str)
    }

    /// Number of registered languages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.languages.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }
}
