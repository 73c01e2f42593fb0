use crate::output::{or_dash, print_json, print_table};
use anyhow::Context;
use diagrule_core::config::{RulesConfig, WarnLevel};
use diagrule_core::registry::TypeCatalog;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct RuleSummary<'a> {
    name: &'a str,
    trigger: &'a str,
    actions: usize,
    action_count: Option<u32>,
    sliding_window_secs: Option<u64>,
    rule_duration_secs: Option<u64>,
    valid: bool,
}

pub fn run(file: &Path, catalog: &TypeCatalog, json: bool) -> anyhow::Result<()> {
    let config = RulesConfig::load(file)
        .with_context(|| format!("failed to load rule file {}", file.display()))?;
    let warnings = config.validate(catalog);

    let invalid = |name: &str| {
        warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.rule.as_deref() == Some(name))
    };
    let rules: Vec<RuleSummary> = config
        .collection_rules
        .iter()
        .map(|(name, rule)| RuleSummary {
            name,
            trigger: &rule.trigger.type_name,
            actions: rule.actions.len(),
            action_count: rule.limits.action_count,
            sliding_window_secs: rule
                .limits
                .action_count_sliding_window_duration
                .map(|d| d.as_secs()),
            rule_duration_secs: rule.limits.rule_duration.map(|d| d.as_secs()),
            valid: !invalid(name),
        })
        .collect();

    if json {
        let value = serde_json::json!({
            "rules": rules,
            "warnings": warnings,
        });
        print_json(&value)?;
    } else {
        if !rules.is_empty() {
            let rows = rules
                .iter()
                .map(|r| {
                    vec![
                        r.name.to_string(),
                        r.trigger.to_string(),
                        r.actions.to_string(),
                        or_dash(r.action_count),
                        or_dash(r.sliding_window_secs),
                        or_dash(r.rule_duration_secs),
                        if r.valid { "ok" } else { "invalid" }.to_string(),
                    ]
                })
                .collect();
            print_table(
                &["RULE", "TRIGGER", "ACTIONS", "COUNT", "WINDOW(s)", "DURATION(s)", "STATUS"],
                rows,
            );
        }
        if warnings.is_empty() {
            println!("Rule file is valid. No warnings.");
        } else {
            for w in &warnings {
                let prefix = match w.level {
                    WarnLevel::Warning => "warning",
                    WarnLevel::Error => "error",
                };
                match &w.rule {
                    Some(rule) => println!("[{prefix}] {rule}: {}", w.message),
                    None => println!("[{prefix}] {}", w.message),
                }
            }
        }
    }

    let has_errors = warnings.iter().any(|w| w.level == WarnLevel::Error);
    if has_errors {
        anyhow::bail!("rule file validation found errors");
    }

    Ok(())
}
