//! Typed settings for the known action kinds.
//!
//! `ActionSettings` is a closed sum type. Rules never hold type-erased
//! settings objects: every built-in kind has its own struct, and anything
//! else registered in the catalog is carried as a `Custom` property map.
//! Token substitution reaches string properties through
//! [`ActionSettings::for_each_string_mut`].

use crate::error::{Result, RuleError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Type names and output keys
// ---------------------------------------------------------------------------

pub mod action_types {
    pub const COLLECT_DUMP: &str = "CollectDump";
    pub const COLLECT_GCDUMP: &str = "CollectGCDump";
    pub const COLLECT_TRACE: &str = "CollectTrace";
    pub const COLLECT_LOGS: &str = "CollectLogs";
    pub const COLLECT_STACKS: &str = "CollectStacks";
    pub const EXECUTE: &str = "Execute";
    pub const LOAD_PROFILER: &str = "LoadProfiler";
    pub const SET_ENVIRONMENT_VARIABLE: &str = "SetEnvironmentVariable";
    pub const GET_ENVIRONMENT_VARIABLE: &str = "GetEnvironmentVariable";

    pub const ALL: &[&str] = &[
        COLLECT_DUMP,
        COLLECT_GCDUMP,
        COLLECT_TRACE,
        COLLECT_LOGS,
        COLLECT_STACKS,
        EXECUTE,
        LOAD_PROFILER,
        SET_ENVIRONMENT_VARIABLE,
        GET_ENVIRONMENT_VARIABLE,
    ];
}

// ---------------------------------------------------------------------------
// Per-kind settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DumpType {
    Full,
    Mini,
    #[default]
    WithHeap,
    Triage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectDumpSettings {
    #[serde(default)]
    pub dump_type: DumpType,
    pub egress: String,
    #[serde(default)]
    pub artifact_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectGcDumpSettings {
    pub egress: String,
    #[serde(default)]
    pub artifact_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceProfile {
    Cpu,
    Http,
    Logs,
    Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectTraceSettings {
    #[serde(default)]
    pub profile: Option<TraceProfile>,
    /// Event provider names; used instead of `profile` when non-empty.
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default = "default_collection_duration", with = "crate::serde_duration")]
    pub duration: Duration,
    pub egress: String,
    #[serde(default)]
    pub artifact_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectLogsSettings {
    #[serde(default)]
    pub default_level: Option<String>,
    #[serde(default = "default_true")]
    pub use_app_filters: bool,
    #[serde(default = "default_collection_duration", with = "crate::serde_duration")]
    pub duration: Duration,
    #[serde(default)]
    pub format: Option<String>,
    pub egress: String,
    #[serde(default)]
    pub artifact_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackFormat {
    #[default]
    Json,
    Speedscope,
    PlainText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectStacksSettings {
    #[serde(default)]
    pub format: StackFormat,
    pub egress: String,
    #[serde(default)]
    pub artifact_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecuteSettings {
    pub path: String,
    #[serde(default)]
    pub arguments: Option<String>,
    #[serde(default)]
    pub ignore_exit_code: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadProfilerSettings {
    pub path: String,
    pub clsid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetEnvironmentVariableSettings {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetEnvironmentVariableSettings {
    pub name: String,
}

fn default_collection_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// ActionSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "values")]
pub enum ActionSettings {
    CollectDump(CollectDumpSettings),
    CollectGcDump(CollectGcDumpSettings),
    CollectTrace(CollectTraceSettings),
    CollectLogs(CollectLogsSettings),
    CollectStacks(CollectStacksSettings),
    Execute(ExecuteSettings),
    LoadProfiler(LoadProfilerSettings),
    SetEnvironmentVariable(SetEnvironmentVariableSettings),
    GetEnvironmentVariable(GetEnvironmentVariableSettings),
    /// Settings of an action kind that is not built in. String values may
    /// sit at any depth.
    Custom(BTreeMap<String, serde_json::Value>),
}

impl ActionSettings {
    /// Build typed settings for `type_name` from an untyped settings value.
    ///
    /// Built-in kinds are deserialized strictly. Any other type name yields
    /// `Custom`; the caller is responsible for checking that the name is
    /// registered.
    pub fn from_value(type_name: &str, value: serde_json::Value) -> Result<Self> {
        use action_types::*;

        let invalid = |e: serde_json::Error| RuleError::InvalidSettings {
            type_name: type_name.to_string(),
            reason: e.to_string(),
        };

        let settings = match type_name {
            COLLECT_DUMP => Self::CollectDump(serde_json::from_value(value).map_err(invalid)?),
            COLLECT_GCDUMP => Self::CollectGcDump(serde_json::from_value(value).map_err(invalid)?),
            COLLECT_TRACE => Self::CollectTrace(serde_json::from_value(value).map_err(invalid)?),
            COLLECT_LOGS => Self::CollectLogs(serde_json::from_value(value).map_err(invalid)?),
            COLLECT_STACKS => Self::CollectStacks(serde_json::from_value(value).map_err(invalid)?),
            EXECUTE => Self::Execute(serde_json::from_value(value).map_err(invalid)?),
            LOAD_PROFILER => Self::LoadProfiler(serde_json::from_value(value).map_err(invalid)?),
            SET_ENVIRONMENT_VARIABLE => {
                Self::SetEnvironmentVariable(serde_json::from_value(value).map_err(invalid)?)
            }
            GET_ENVIRONMENT_VARIABLE => {
                Self::GetEnvironmentVariable(serde_json::from_value(value).map_err(invalid)?)
            }
            _ => match value {
                serde_json::Value::Null => Self::Custom(BTreeMap::new()),
                serde_json::Value::Object(map) => Self::Custom(map.into_iter().collect()),
                other => {
                    return Err(RuleError::InvalidSettings {
                        type_name: type_name.to_string(),
                        reason: format!("expected a map of settings, found {other}"),
                    })
                }
            },
        };
        Ok(settings)
    }

    /// Short label for the settings variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CollectDump(_) => action_types::COLLECT_DUMP,
            Self::CollectGcDump(_) => action_types::COLLECT_GCDUMP,
            Self::CollectTrace(_) => action_types::COLLECT_TRACE,
            Self::CollectLogs(_) => action_types::COLLECT_LOGS,
            Self::CollectStacks(_) => action_types::COLLECT_STACKS,
            Self::Execute(_) => action_types::EXECUTE,
            Self::LoadProfiler(_) => action_types::LOAD_PROFILER,
            Self::SetEnvironmentVariable(_) => action_types::SET_ENVIRONMENT_VARIABLE,
            Self::GetEnvironmentVariable(_) => action_types::GET_ENVIRONMENT_VARIABLE,
            Self::Custom(_) => "Custom",
        }
    }

    /// Visit every string property. Built-in kinds are visited in field
    /// order, `Custom` settings in key order.
    pub fn for_each_string_mut(&mut self, f: &mut dyn FnMut(&mut String)) {
        fn opt(value: &mut Option<String>, f: &mut dyn FnMut(&mut String)) {
            if let Some(s) = value {
                f(s);
            }
        }

        match self {
            Self::CollectDump(s) => {
                f(&mut s.egress);
                opt(&mut s.artifact_name, f);
            }
            Self::CollectGcDump(s) => {
                f(&mut s.egress);
                opt(&mut s.artifact_name, f);
            }
            Self::CollectTrace(s) => {
                s.providers.iter_mut().for_each(|p| f(p));
                f(&mut s.egress);
                opt(&mut s.artifact_name, f);
            }
            Self::CollectLogs(s) => {
                opt(&mut s.default_level, f);
                opt(&mut s.format, f);
                f(&mut s.egress);
                opt(&mut s.artifact_name, f);
            }
            Self::CollectStacks(s) => {
                f(&mut s.egress);
                opt(&mut s.artifact_name, f);
            }
            Self::Execute(s) => {
                f(&mut s.path);
                opt(&mut s.arguments, f);
            }
            Self::LoadProfiler(s) => f(&mut s.path),
            Self::SetEnvironmentVariable(s) => {
                f(&mut s.name);
                opt(&mut s.value, f);
            }
            Self::GetEnvironmentVariable(s) => f(&mut s.name),
            Self::Custom(map) => map.values_mut().for_each(|v| visit_json(v, f)),
        }
    }

    /// Collect a copy of every string property, in visiting order.
    pub fn strings(&self) -> Vec<String> {
        let mut copy = self.clone();
        let mut out = Vec::new();
        copy.for_each_string_mut(&mut |s| out.push(s.clone()));
        out
    }
}

fn visit_json(value: &mut serde_json::Value, f: &mut dyn FnMut(&mut String)) {
    match value {
        serde_json::Value::String(s) => f(s),
        serde_json::Value::Array(items) => items.iter_mut().for_each(|v| visit_json(v, f)),
        serde_json::Value::Object(map) => map.values_mut().for_each(|v| visit_json(v, f)),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_kind_is_typed() {
        let settings = ActionSettings::from_value(
            action_types::COLLECT_DUMP,
            json!({"dump_type": "Full", "egress": "artifacts"}),
        )
        .unwrap();
        let ActionSettings::CollectDump(dump) = settings else {
            panic!("expected CollectDump")
        };
        assert_eq!(dump.dump_type, DumpType::Full);
        assert_eq!(dump.egress, "artifacts");
        assert!(dump.artifact_name.is_none());
    }

    #[test]
    fn builtin_kind_rejects_unknown_fields() {
        let err = ActionSettings::from_value(
            action_types::EXECUTE,
            json!({"path": "/bin/true", "bogus": 1}),
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::InvalidSettings { .. }));
    }

    #[test]
    fn builtin_kind_requires_mandatory_fields() {
        let err = ActionSettings::from_value(action_types::COLLECT_GCDUMP, json!({})).unwrap_err();
        assert!(err.to_string().contains("egress"));
    }

    #[test]
    fn other_type_names_become_custom() {
        let settings =
            ActionSettings::from_value("PassThrough", json!({"input1": "a", "input2": 2})).unwrap();
        let ActionSettings::Custom(map) = settings else {
            panic!("expected Custom")
        };
        assert_eq!(map["input1"], json!("a"));
        assert_eq!(map["input2"], json!(2));
    }

    #[test]
    fn custom_requires_a_map() {
        let err = ActionSettings::from_value("PassThrough", json!("text")).unwrap_err();
        assert!(matches!(err, RuleError::InvalidSettings { .. }));
    }

    #[test]
    fn string_visit_covers_nested_custom_values() {
        let settings = ActionSettings::from_value(
            "PassThrough",
            json!({"a": "one", "b": ["two", {"c": "three"}], "d": 4}),
        )
        .unwrap();
        assert_eq!(settings.strings(), vec!["one", "two", "three"]);
    }

    #[test]
    fn custom_strings_are_visited_in_key_order() {
        let settings = ActionSettings::from_value(
            "PassThrough",
            json!({"zeta": "last", "alpha": "first", "mid": "middle"}),
        )
        .unwrap();
        assert_eq!(settings.strings(), vec!["first", "middle", "last"]);
    }

    #[test]
    fn string_visit_covers_built_in_fields_in_order() {
        let settings = ActionSettings::Execute(ExecuteSettings {
            path: "/usr/bin/env".into(),
            arguments: Some("--verbose".into()),
            ignore_exit_code: false,
        });
        assert_eq!(settings.strings(), vec!["/usr/bin/env", "--verbose"]);
    }

    #[test]
    fn string_visit_skips_absent_options() {
        let settings = ActionSettings::Execute(ExecuteSettings {
            path: "/usr/bin/env".into(),
            arguments: None,
            ignore_exit_code: false,
        });
        assert_eq!(settings.strings(), vec!["/usr/bin/env"]);
    }
}
