//! Token references between actions.
//!
//! String settings may embed `$(Actions.<name>.<output>)` to consume an
//! earlier action's output, or `$(Process.<property>)` to consume a property
//! of the bound process. References that cannot be resolved are never fatal:
//! the literal text is kept and a warning with a stable identifier is logged.

use crate::action::ActionResults;
use crate::definition::RuleDefinition;
use crate::process::ProcessHandle;
use crate::settings::ActionSettings;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use tracing::warn;

const TOKEN_OPEN: &str = "$(";
const TOKEN_CLOSE: char = ')';
const ACTIONS_ROOT: &str = "Actions";
const PROCESS_ROOT: &str = "Process";

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenWarningKind {
    /// Unbalanced delimiters or a reference with the wrong shape.
    MalformedToken,
    /// The named action does not exist before the referencing action.
    UnknownActionReference,
    /// The action exists but produced no such output.
    UnknownResultReference,
}

impl TokenWarningKind {
    /// Stable identifier emitted in the `event` field of the log record.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::MalformedToken => "InvalidActionReferenceToken",
            Self::UnknownActionReference => "InvalidActionReference",
            Self::UnknownResultReference => "InvalidActionResultReference",
        }
    }
}

impl fmt::Display for TokenWarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenWarning {
    pub action_index: usize,
    pub kind: TokenWarningKind,
    /// The literal token text as it appears in the setting.
    pub token: String,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessProperty {
    RuntimeId,
    ProcessId,
    Name,
    CommandLine,
}

impl ProcessProperty {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "RuntimeId" => Some(Self::RuntimeId),
            "ProcessId" => Some(Self::ProcessId),
            "Name" => Some(Self::Name),
            "CommandLine" => Some(Self::CommandLine),
            _ => None,
        }
    }

    fn value(&self, process: &ProcessHandle) -> String {
        match self {
            Self::RuntimeId => process.runtime_id_string(),
            Self::ProcessId => process.process_id.to_string(),
            Self::Name => process.name.clone(),
            Self::CommandLine => process.command_line.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Reference {
    Action { name: String, output: String },
    Process(ProcessProperty),
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TokenSpan {
    range: Range<usize>,
    reference: Reference,
}

/// Whether a token body belongs to one of our roots.
fn is_ours(body: &str) -> bool {
    [ACTIONS_ROOT, PROCESS_ROOT].iter().any(|root| {
        body == *root
            || body
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

fn classify(body: &str) -> Option<Reference> {
    if !is_ours(body) {
        return None;
    }
    let well_formed = |s: &str| !s.is_empty() && !s.chars().any(char::is_whitespace);
    let parts: Vec<&str> = body.split('.').collect();
    let reference = match parts.as_slice() {
        [ACTIONS_ROOT, name, output] if well_formed(*name) && well_formed(*output) => {
            Reference::Action {
                name: (*name).to_string(),
                output: (*output).to_string(),
            }
        }
        [PROCESS_ROOT, property] => match ProcessProperty::parse(*property) {
            Some(p) => Reference::Process(p),
            None => Reference::Malformed,
        },
        _ => Reference::Malformed,
    };
    Some(reference)
}

/// Find every token of ours in `s`, left to right.
///
/// A `$(` that is not closed before the next `$(` (or the end of the string)
/// is malformed up to that point; scanning resumes at the next opener.
fn scan(s: &str) -> Vec<TokenSpan> {
    let mut spans = Vec::new();
    let mut pos = 0;
    while let Some(rel) = s[pos..].find(TOKEN_OPEN) {
        let start = pos + rel;
        let body_start = start + TOKEN_OPEN.len();
        let rest = &s[body_start..];
        let next_open = rest.find(TOKEN_OPEN);
        let close = rest.find(TOKEN_CLOSE);

        match close {
            Some(c) if next_open.map_or(true, |o| c < o) => {
                let end = body_start + c + 1;
                if let Some(reference) = classify(&rest[..c]) {
                    spans.push(TokenSpan {
                        range: start..end,
                        reference,
                    });
                }
                pos = end;
            }
            _ => {
                let end = next_open.map_or(s.len(), |o| body_start + o);
                if starts_with_root(&rest[..end - body_start]) {
                    spans.push(TokenSpan {
                        range: start..end,
                        reference: Reference::Malformed,
                    });
                }
                pos = end;
            }
        }
    }
    spans
}

/// Unclosed counterpart of [`is_ours`]: the root must end the text or be
/// followed by `.`.
fn starts_with_root(rest: &str) -> bool {
    [ACTIONS_ROOT, PROCESS_ROOT].iter().any(|root| {
        rest.strip_prefix(root)
            .is_some_and(|tail| tail.is_empty() || tail.starts_with('.'))
    })
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedToken {
    pub token: String,
    pub kind: TokenWarningKind,
}

/// What one action's settings reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionDependencies {
    /// Indices of earlier actions whose outputs are referenced.
    pub actions: BTreeSet<usize>,
    /// Whether any `$(Process.*)` token is present.
    pub references_process: bool,
    /// References that will be left as literal text.
    pub unresolved: Vec<UnresolvedToken>,
}

/// Output of [`TokenResolver::substitute`].
#[derive(Debug, Clone, PartialEq)]
pub struct Substitution {
    pub settings: ActionSettings,
    pub warnings: Vec<TokenWarning>,
}

/// Index of `name` if it is declared strictly before `action_index`.
fn earlier_action(definition: &RuleDefinition, name: &str, action_index: usize) -> Option<usize> {
    definition
        .action_index(name)
        .filter(|&index| index < action_index)
}

/// Scan the settings of the action at `action_index` for references.
///
/// Needs no process, so rule files can be checked before anything runs.
pub fn dependencies(definition: &RuleDefinition, action_index: usize) -> ActionDependencies {
    let mut deps = ActionDependencies::default();
    let Some(descriptor) = definition.actions().get(action_index) else {
        return deps;
    };

    for value in descriptor.settings.strings() {
        for span in scan(&value) {
            let token = value[span.range.clone()].to_string();
            match span.reference {
                Reference::Action { name, .. } => {
                    match earlier_action(definition, &name, action_index) {
                        Some(index) => {
                            deps.actions.insert(index);
                        }
                        None => deps.unresolved.push(UnresolvedToken {
                            token,
                            kind: TokenWarningKind::UnknownActionReference,
                        }),
                    }
                }
                Reference::Process(_) => deps.references_process = true,
                Reference::Malformed => deps.unresolved.push(UnresolvedToken {
                    token,
                    kind: TokenWarningKind::MalformedToken,
                }),
            }
        }
    }
    deps
}

// ---------------------------------------------------------------------------
// TokenResolver
// ---------------------------------------------------------------------------

/// Resolves token references for the actions of one rule bound to one
/// process.
pub struct TokenResolver<'a> {
    definition: &'a RuleDefinition,
    process: &'a ProcessHandle,
}

impl<'a> TokenResolver<'a> {
    pub fn new(definition: &'a RuleDefinition, process: &'a ProcessHandle) -> Self {
        Self {
            definition,
            process,
        }
    }

    fn resolve_action(&self, name: &str, action_index: usize) -> Option<usize> {
        earlier_action(self.definition, name, action_index)
    }

    /// Scan the settings of the action at `action_index` for references.
    ///
    /// Never fails; references that can not be resolved at this stage are
    /// listed in `unresolved`.
    pub fn dependencies(&self, action_index: usize) -> ActionDependencies {
        dependencies(self.definition, action_index)
    }

    /// Return a copy of `settings` with every resolvable token replaced.
    ///
    /// `settings` itself is never modified.
    pub fn substitute(
        &self,
        results: &ActionResults,
        action_index: usize,
        settings: &ActionSettings,
    ) -> Substitution {
        let mut substituted = settings.clone();
        let mut warnings = Vec::new();

        substituted.for_each_string_mut(&mut |value| {
            let spans = scan(value);
            if spans.is_empty() {
                return;
            }

            let mut out = String::with_capacity(value.len());
            let mut last = 0;
            for span in spans {
                let token = &value[span.range.clone()];
                out.push_str(&value[last..span.range.start]);
                match self.resolve_span(results, action_index, &span.reference) {
                    Ok(replacement) => out.push_str(&replacement),
                    Err(kind) => {
                        warnings.push(TokenWarning {
                            action_index,
                            kind,
                            token: token.to_string(),
                        });
                        out.push_str(token);
                    }
                }
                last = span.range.end;
            }
            out.push_str(&value[last..]);
            *value = out;
        });

        for warning in &warnings {
            warn!(
                event = warning.kind.event_name(),
                rule = self.definition.name(),
                action_index = warning.action_index,
                token = %warning.token,
                "unable to resolve token reference; leaving it unsubstituted"
            );
        }

        Substitution {
            settings: substituted,
            warnings,
        }
    }

    fn resolve_span(
        &self,
        results: &ActionResults,
        action_index: usize,
        reference: &Reference,
    ) -> std::result::Result<String, TokenWarningKind> {
        match reference {
            Reference::Malformed => Err(TokenWarningKind::MalformedToken),
            Reference::Process(property) => Ok(property.value(self.process)),
            Reference::Action { name, output } => {
                if self.resolve_action(name, action_index).is_none() {
                    return Err(TokenWarningKind::UnknownActionReference);
                }
                results
                    .get(name)
                    .and_then(|r| r.output(output))
                    .map(str::to_string)
                    .ok_or(TokenWarningKind::UnknownResultReference)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
