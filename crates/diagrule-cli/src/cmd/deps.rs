use crate::output::{print_json, print_table};
use anyhow::Context;
use diagrule_core::config::RulesConfig;
use diagrule_core::definition::RuleDefinition;
use diagrule_core::registry::TypeCatalog;
use diagrule_core::tokens::{self, UnresolvedToken};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct ActionNode {
    index: usize,
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    wait_for_completion: Option<bool>,
    depends_on: Vec<String>,
    references_process: bool,
    unresolved: Vec<UnresolvedToken>,
}

#[derive(Serialize)]
struct RuleGraph {
    rule: String,
    actions: Vec<ActionNode>,
}

fn graph(definition: &RuleDefinition) -> RuleGraph {
    let actions = definition
        .actions()
        .iter()
        .enumerate()
        .map(|(index, action)| {
            let deps = tokens::dependencies(definition, index);
            ActionNode {
                index,
                name: action.name.clone(),
                type_name: action.type_name.clone(),
                wait_for_completion: action.wait_for_completion,
                depends_on: deps
                    .actions
                    .iter()
                    .map(|&i| definition.actions()[i].name.clone())
                    .collect(),
                references_process: deps.references_process,
                unresolved: deps.unresolved,
            }
        })
        .collect();
    RuleGraph {
        rule: definition.name().to_string(),
        actions,
    }
}

pub fn run(
    file: &Path,
    rule: Option<&str>,
    catalog: &TypeCatalog,
    json: bool,
) -> anyhow::Result<()> {
    let config = RulesConfig::load(file)
        .with_context(|| format!("failed to load rule file {}", file.display()))?;
    let definitions = config
        .into_definitions(catalog)
        .context("rule file is invalid; run `rulectl validate` for details")?;

    let selected: Vec<&RuleDefinition> = match rule {
        Some(name) => {
            let found = definitions.iter().find(|d| d.name() == name);
            vec![found.with_context(|| format!("rule '{name}' not found"))?]
        }
        None => definitions.iter().collect(),
    };
    let graphs: Vec<RuleGraph> = selected.into_iter().map(graph).collect();

    if json {
        return print_json(&graphs);
    }

    for (i, g) in graphs.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{}", g.rule);
        if g.actions.is_empty() {
            println!("  (no actions)");
            continue;
        }
        let rows = g
            .actions
            .iter()
            .map(|a| {
                vec![
                    a.index.to_string(),
                    if a.name.is_empty() { "-".to_string() } else { a.name.clone() },
                    a.type_name.clone(),
                    match a.wait_for_completion {
                        Some(true) => "wait".to_string(),
                        Some(false) => "defer".to_string(),
                        None => "default".to_string(),
                    },
                    if a.depends_on.is_empty() { "-".to_string() } else { a.depends_on.join(",") },
                    if a.references_process { "yes" } else { "no" }.to_string(),
                    a.unresolved
                        .iter()
                        .map(|u| format!("{} ({})", u.token, u.kind))
                        .collect::<Vec<_>>()
                        .join("; "),
                ]
            })
            .collect();
        print_table(
            &["#", "ACTION", "TYPE", "WAIT", "DEPENDS ON", "PROCESS", "UNRESOLVED"],
            rows,
        );
    }
    Ok(())
}
