//! Per-build table of module deployment contexts.
//!
//! Safe to share between worker tasks; each module's context is handed out to
//! exactly one owner at a time.

use dashmap::DashMap;
use tracing::debug;

use crate::{
    error::{Error, Result},
    model::ModuleContext,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Idle,
    Populating,
    Validating,
    Generating,
    Written,
    Failed,
}

#[derive(Debug)]
struct Slot {
    state: GenerationState,
    /// `None` while checked out, or after the context has been consumed.
    context: Option<ModuleContext>,
    checked_out: bool,
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    modules: DashMap<String, Slot>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive ownership of a module's context, creating it on first use.
    ///
    /// Fails if the context is already checked out. Hand it back with
    /// [`ModelRegistry::checkin`].
    pub fn checkout(
        &self,
        module: &str,
        init: impl FnOnce() -> ModuleContext,
    ) -> Result<ModuleContext> {
        let mut slot = self.modules.entry(module.to_string()).or_insert_with(|| {
            debug!(module, "creating deployment context");
            Slot {
                state: GenerationState::Idle,
                context: None,
                checked_out: false,
            }
        });
        if slot.checked_out {
            return Err(Error::ContextInUse(module.to_string()));
        }
        slot.checked_out = true;
        Ok(slot.context.take().unwrap_or_else(init))
    }

    pub fn checkin(&self, context: ModuleContext) {
        let mut slot = self
            .modules
            .entry(context.module.clone())
            .or_insert_with(|| Slot {
                state: GenerationState::Idle,
                context: None,
                checked_out: true,
            });
        slot.checked_out = false;
        slot.context = Some(context);
    }

    /// Remove a module's context for good, leaving its state behind.
    pub fn take(&self, module: &str) -> Result<Option<ModuleContext>> {
        match self.modules.get_mut(module) {
            Some(mut slot) => {
                if slot.checked_out {
                    return Err(Error::ContextInUse(module.to_string()));
                }
                Ok(slot.context.take())
            }
            None => Ok(None),
        }
    }

    pub fn state(&self, module: &str) -> GenerationState {
        self.modules
            .get(module)
            .map(|slot| slot.state)
            .unwrap_or(GenerationState::Idle)
    }

    pub fn set_state(&self, module: &str, state: GenerationState) {
        debug!(module, ?state, "generation state");
        self.modules
            .entry(module.to_string())
            .or_insert_with(|| Slot {
                state,
                context: None,
                checked_out: false,
            })
            .state = state;
    }

    pub fn contains(&self, module: &str) -> bool {
        self.modules
            .get(module)
            .map(|slot| slot.context.is_some() || slot.checked_out)
            .unwrap_or(false)
    }

    /// Known module names, sorted.
    pub fn modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
