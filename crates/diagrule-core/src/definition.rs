//! Validated, immutable rule definitions.

use crate::error::{Result, RuleError};
use crate::filter::ProcessFilter;
use crate::registry::TypeCatalog;
use crate::settings::ActionSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerDescriptor {
    pub type_name: String,
    /// Opaque to the engine; interpreted by the trigger factory.
    pub settings: serde_json::Value,
}

impl TriggerDescriptor {
    pub fn new(type_name: impl Into<String>, settings: serde_json::Value) -> Self {
        Self {
            type_name: type_name.into(),
            settings,
        }
    }

    pub fn startup() -> Self {
        Self::new(crate::trigger::trigger_types::STARTUP, serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionDescriptor {
    /// Empty for anonymous actions, which cannot be referenced by tokens.
    pub name: String,
    pub type_name: String,
    pub settings: ActionSettings,
    /// Overrides the factory's waited/deferred policy when set.
    pub wait_for_completion: Option<bool>,
}

impl ActionDescriptor {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        settings: ActionSettings,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            settings,
            wait_for_completion: None,
        }
    }

    /// Descriptor for a built-in kind; the type name comes from the settings.
    pub fn builtin(name: impl Into<String>, settings: ActionSettings) -> Self {
        let type_name = settings.kind();
        Self::new(name, type_name, settings)
    }

    pub fn wait_for_completion(mut self, wait: bool) -> Self {
        self.wait_for_completion = Some(wait);
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RuleLimits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleLimits {
    /// Maximum action-list executions; a lifetime cap unless a sliding
    /// window is configured.
    #[serde(default)]
    pub action_count: Option<u32>,
    #[serde(default, with = "crate::serde_duration::option")]
    pub action_count_sliding_window_duration: Option<Duration>,
    /// Total time the rule stays active.
    #[serde(default, with = "crate::serde_duration::option")]
    pub rule_duration: Option<Duration>,
}

impl RuleLimits {
    fn validate(&self, rule: &str) -> Result<()> {
        let invalid = |reason: &str| RuleError::InvalidLimits {
            rule: rule.to_string(),
            reason: reason.to_string(),
        };
        if self.action_count == Some(0) {
            return Err(invalid("action_count must be at least 1"));
        }
        if self.action_count_sliding_window_duration == Some(Duration::ZERO) {
            return Err(invalid("action_count_sliding_window_duration must be positive"));
        }
        if self.rule_duration == Some(Duration::ZERO) {
            return Err(invalid("rule_duration must be positive"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RuleDefinition
// ---------------------------------------------------------------------------

/// One trigger, an ordered action list and limits, executed as a unit.
///
/// Construction rejects duplicate action names and invalid limits, so a
/// `RuleDefinition` that exists is always well formed. Type names are checked
/// separately against a [`TypeCatalog`].
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDefinition {
    name: String,
    filters: Vec<ProcessFilter>,
    trigger: TriggerDescriptor,
    actions: Vec<ActionDescriptor>,
    limits: RuleLimits,
}

impl RuleDefinition {
    pub fn new(
        name: impl Into<String>,
        trigger: TriggerDescriptor,
        actions: Vec<ActionDescriptor>,
        limits: RuleLimits,
    ) -> Result<Self> {
        let name = name.into();

        let mut seen = HashSet::new();
        for action in actions.iter().filter(|a| !a.is_anonymous()) {
            if !seen.insert(action.name.as_str()) {
                return Err(RuleError::DuplicateActionName {
                    rule: name,
                    name: action.name.clone(),
                });
            }
        }
        limits.validate(&name)?;

        Ok(Self {
            name,
            filters: Vec::new(),
            trigger,
            actions,
            limits,
        })
    }

    pub fn with_filters(mut self, filters: Vec<ProcessFilter>) -> Self {
        self.filters = filters;
        self
    }

    /// Reject trigger or action types the catalog does not know.
    pub fn validate_types(&self, catalog: &TypeCatalog) -> Result<()> {
        if !catalog.has_trigger(&self.trigger.type_name) {
            return Err(RuleError::UnknownTriggerType(self.trigger.type_name.clone()));
        }
        if let Some(unknown) = self
            .actions
            .iter()
            .find(|a| !catalog.has_action(&a.type_name))
        {
            return Err(RuleError::UnknownActionType(unknown.type_name.clone()));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filters(&self) -> &[ProcessFilter] {
        &self.filters
    }

    pub fn trigger(&self) -> &TriggerDescriptor {
        &self.trigger
    }

    pub fn actions(&self) -> &[ActionDescriptor] {
        &self.actions
    }

    pub fn limits(&self) -> &RuleLimits {
        &self.limits
    }

    /// Index of the named action, if any. Anonymous actions are never found.
    pub fn action_index(&self, name: &str) -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        self.actions.iter().position(|a| a.name == name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::passthrough;

    #[test]
    fn duplicate_action_names_are_rejected() {
        let err = RuleDefinition::new(
            "dup",
            TriggerDescriptor::startup(),
            vec![passthrough("a1", &[]), passthrough("a1", &[])],
            RuleLimits::default(),
        )
        .unwrap_err();
        match err {
            RuleError::DuplicateActionName { rule, name } => {
                assert_eq!(rule, "dup");
                assert_eq!(name, "a1");
            }
            other => panic!("expected DuplicateActionName, got {other:?}"),
        }
    }

    #[test]
    fn anonymous_actions_may_repeat() {
        let rule = RuleDefinition::new(
            "anon",
            TriggerDescriptor::startup(),
            vec![passthrough("", &[]), passthrough("", &[])],
            RuleLimits::default(),
        )
        .unwrap();
        assert_eq!(rule.actions().len(), 2);
        assert_eq!(rule.action_index(""), None);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let limits = RuleLimits {
            action_count: Some(0),
            ..Default::default()
        };
        let err =
            RuleDefinition::new("r", TriggerDescriptor::startup(), vec![], limits).unwrap_err();
        assert!(matches!(err, RuleError::InvalidLimits { .. }));

        let limits = RuleLimits {
            rule_duration: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(RuleDefinition::new("r", TriggerDescriptor::startup(), vec![], limits).is_err());
    }

    #[test]
    fn unknown_types_are_rejected_by_catalog() {
        let mut catalog = TypeCatalog::well_known();
        let rule = RuleDefinition::new(
            "r",
            TriggerDescriptor::startup(),
            vec![passthrough("a1", &[])],
            RuleLimits::default(),
        )
        .unwrap();
        assert!(matches!(
            rule.validate_types(&catalog),
            Err(RuleError::UnknownActionType(t)) if t == "PassThrough"
        ));

        catalog.add_action("PassThrough");
        assert!(rule.validate_types(&catalog).is_ok());

        let rule = RuleDefinition::new(
            "r",
            TriggerDescriptor::new("Nope", serde_json::Value::Null),
            vec![],
            RuleLimits::default(),
        )
        .unwrap();
        assert!(matches!(
            rule.validate_types(&catalog),
            Err(RuleError::UnknownTriggerType(_))
        ));
    }

    #[test]
    fn action_index_finds_named_actions() {
        let rule = RuleDefinition::new(
            "r",
            TriggerDescriptor::startup(),
            vec![passthrough("a1", &[]), passthrough("a2", &[])],
            RuleLimits::default(),
        )
        .unwrap();
        assert_eq!(rule.action_index("a2"), Some(1));
        assert_eq!(rule.action_index("a3"), None);
    }
}
