//! Explicit registries of action and trigger types.
//!
//! [`TypeCatalog`] only knows names and is what rule definitions are
//! validated against. [`CollectionRuleRegistry`] additionally holds the
//! factories a pipeline needs to run them.

use crate::action::ActionFactory;
use crate::error::{Result, RuleError};
use crate::settings::action_types;
use crate::trigger::{trigger_types, TriggerFactory};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// TypeCatalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeCatalog {
    actions: BTreeSet<String>,
    triggers: BTreeSet<String>,
    startup_triggers: BTreeSet<String>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every built-in action kind, the well-known trigger
    /// types and the `Startup` marker.
    pub fn well_known() -> Self {
        let mut catalog = Self::new();
        for name in action_types::ALL {
            catalog.add_action(*name);
        }
        for name in trigger_types::EVENT_DRIVEN {
            catalog.add_trigger(*name);
        }
        catalog.add_startup_trigger(trigger_types::STARTUP);
        catalog
    }

    pub fn add_action(&mut self, name: impl Into<String>) -> &mut Self {
        self.actions.insert(name.into());
        self
    }

    pub fn add_trigger(&mut self, name: impl Into<String>) -> &mut Self {
        self.triggers.insert(name.into());
        self
    }

    pub fn add_startup_trigger(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.triggers.insert(name.clone());
        self.startup_triggers.insert(name);
        self
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains(name)
    }

    pub fn has_trigger(&self, name: &str) -> bool {
        self.triggers.contains(name)
    }

    pub fn is_startup_trigger(&self, name: &str) -> bool {
        self.startup_triggers.contains(name)
    }

    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(String::as_str)
    }

    pub fn trigger_names(&self) -> impl Iterator<Item = &str> {
        self.triggers.iter().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// CollectionRuleRegistry
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum TriggerRegistration {
    /// Not backed by a trigger object; see `trigger_types::STARTUP`.
    Startup,
    Factory(Arc<dyn TriggerFactory>),
}

/// Factories for every action and trigger type a pipeline may run.
///
/// `new()` registers the `Startup` marker; everything else is added by the
/// host.
#[derive(Clone)]
pub struct CollectionRuleRegistry {
    actions: HashMap<String, Arc<dyn ActionFactory>>,
    triggers: HashMap<String, TriggerRegistration>,
}

impl CollectionRuleRegistry {
    pub fn new() -> Self {
        let mut triggers = HashMap::new();
        triggers.insert(
            trigger_types::STARTUP.to_string(),
            TriggerRegistration::Startup,
        );
        Self {
            actions: HashMap::new(),
            triggers,
        }
    }

    pub fn with_action(
        mut self,
        name: impl Into<String>,
        factory: impl ActionFactory + 'static,
    ) -> Self {
        self.register_action(name, Arc::new(factory));
        self
    }

    pub fn with_trigger(
        mut self,
        name: impl Into<String>,
        factory: impl TriggerFactory + 'static,
    ) -> Self {
        self.register_trigger(name, Arc::new(factory));
        self
    }

    pub fn register_action(&mut self, name: impl Into<String>, factory: Arc<dyn ActionFactory>) {
        self.actions.insert(name.into(), factory);
    }

    pub fn register_trigger(&mut self, name: impl Into<String>, factory: Arc<dyn TriggerFactory>) {
        self.triggers
            .insert(name.into(), TriggerRegistration::Factory(factory));
    }

    pub fn register_startup_trigger(&mut self, name: impl Into<String>) {
        self.triggers
            .insert(name.into(), TriggerRegistration::Startup);
    }

    pub fn action_factory(&self, name: &str) -> Result<Arc<dyn ActionFactory>> {
        self.actions
            .get(name)
            .cloned()
            .ok_or_else(|| RuleError::UnknownActionType(name.to_string()))
    }

    pub fn trigger(&self, name: &str) -> Result<TriggerRegistration> {
        self.triggers
            .get(name)
            .cloned()
            .ok_or_else(|| RuleError::UnknownTriggerType(name.to_string()))
    }

    /// Names-only view for validating rule definitions.
    pub fn catalog(&self) -> TypeCatalog {
        let mut catalog = TypeCatalog::new();
        for name in self.actions.keys() {
            catalog.add_action(name.clone());
        }
        for (name, registration) in &self.triggers {
            match registration {
                TriggerRegistration::Startup => catalog.add_startup_trigger(name.clone()),
                TriggerRegistration::Factory(_) => catalog.add_trigger(name.clone()),
            };
        }
        catalog
    }
}

impl Default for CollectionRuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CollectionRuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut actions: Vec<_> = self.actions.keys().collect();
        actions.sort();
        let mut triggers: Vec<_> = self.triggers.keys().collect();
        triggers.sort();
        f.debug_struct("CollectionRuleRegistry")
            .field("actions", &actions)
            .field("triggers", &triggers)
            .finish()
    }
}
