//! Named post-process hooks applied to definitions after a merge.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::definition::IndexDefinition;
use crate::error::{ValidationError, ValidationResult};

pub type Hook = Arc<dyn Fn(&mut IndexDefinition) -> Result<(), String> + Send + Sync>;

/// Hooks referenced by `post_process: <name>` in definition documents.
///
/// Built once at startup and passed by reference to construction/override.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: BTreeMap<String, Hook>,
}

impl HookRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register<F>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: Fn(&mut IndexDefinition) -> Result<(), String> + Send + Sync + 'static,
    {
        self.hooks.insert(name.into(), Arc::new(hook));
        self
    }

    /// Run the named hook against `def`. Field changes land before validation.
    pub fn run(&self, name: &str, def: &mut IndexDefinition) -> ValidationResult<()> {
        let hook = self
            .hooks
            .get(name)
            .ok_or_else(|| ValidationError::for_index(def.name.clone(), format!("unknown post_process hook '{}'", name)))?;
        hook(def).map_err(|msg| ValidationError::for_index(def.name.clone(), format!("post_process '{}' failed: {}", name, msg)))
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry").field("hooks", &self.hooks.keys().collect::<Vec<_>>()).finish()
    }
}
