use crate::definition::{ActionDescriptor, RuleDefinition, RuleLimits, TriggerDescriptor};
use crate::error::{Result, RuleError};
use crate::filter::ProcessFilter;
use crate::registry::TypeCatalog;
use crate::settings::ActionSettings;
use crate::tokens;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    /// Rule the warning belongs to; `None` for document-level warnings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Rule file model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub settings: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub settings: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_completion: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<ProcessFilter>,
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
    #[serde(default)]
    pub limits: RuleLimits,
}

impl RuleConfig {
    /// Build a validated definition. Type names must be in `catalog`.
    pub fn to_definition(&self, name: &str, catalog: &TypeCatalog) -> Result<RuleDefinition> {
        if !catalog.has_trigger(&self.trigger.type_name) {
            return Err(RuleError::UnknownTriggerType(self.trigger.type_name.clone()));
        }

        let mut actions = Vec::with_capacity(self.actions.len());
        for action in &self.actions {
            if !catalog.has_action(&action.type_name) {
                return Err(RuleError::UnknownActionType(action.type_name.clone()));
            }
            let settings = ActionSettings::from_value(&action.type_name, action.settings.clone())?;
            let mut descriptor = ActionDescriptor::new(&action.name, &action.type_name, settings);
            descriptor.wait_for_completion = action.wait_for_completion;
            actions.push(descriptor);
        }

        let trigger = TriggerDescriptor::new(&self.trigger.type_name, self.trigger.settings.clone());
        Ok(RuleDefinition::new(name, trigger, actions, self.limits)?
            .with_filters(self.filters.clone()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesConfig {
    #[serde(default)]
    pub collection_rules: BTreeMap<String, RuleConfig>,
}

impl RulesConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: RulesConfig = serde_yaml::from_str(data)?;
        Ok(cfg)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Convert every rule, failing on the first invalid one.
    pub fn into_definitions(&self, catalog: &TypeCatalog) -> Result<Vec<RuleDefinition>> {
        self.collection_rules
            .iter()
            .map(|(name, rule)| rule.to_definition(name, catalog))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Report every problem in the document. Errors make the rule unusable;
    /// warnings flag settings that are accepted but probably unintended.
    pub fn validate(&self, catalog: &TypeCatalog) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.collection_rules.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                rule: None,
                message: "no collection rules defined".to_string(),
            });
        }

        for (name, rule) in &self.collection_rules {
            let warn = |level: WarnLevel, message: String| ConfigWarning {
                level,
                rule: Some(name.clone()),
                message,
            };

            let definition = match rule.to_definition(name, catalog) {
                Ok(definition) => definition,
                Err(e) => {
                    warnings.push(warn(WarnLevel::Error, e.to_string()));
                    continue;
                }
            };

            if rule.actions.is_empty() {
                warnings.push(warn(WarnLevel::Warning, "rule has no actions".to_string()));
            }

            let limits = definition.limits();
            if limits.action_count_sliding_window_duration.is_some() && limits.action_count.is_none()
            {
                warnings.push(warn(
                    WarnLevel::Warning,
                    "action_count_sliding_window_duration has no effect without action_count"
                        .to_string(),
                ));
            }
            if catalog.is_startup_trigger(&rule.trigger.type_name)
                && (limits.action_count.is_some()
                    || limits.action_count_sliding_window_duration.is_some())
            {
                warnings.push(warn(
                    WarnLevel::Warning,
                    "action count limits have no effect on a startup rule, which runs once"
                        .to_string(),
                ));
            }

            for (index, action) in definition.actions().iter().enumerate() {
                for unresolved in tokens::dependencies(&definition, index).unresolved {
                    warnings.push(warn(
                        WarnLevel::Warning,
                        format!(
                            "action {index} ('{}'): {} {} will be left unsubstituted",
                            action.name, unresolved.kind, unresolved.token
                        ),
                    ));
                }
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
