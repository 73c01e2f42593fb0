use crate::process::ProcessHandle;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessKey {
    ProcessId,
    ProcessName,
    CommandLine,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    #[default]
    Exact,
    Contains,
}

/// Restricts a rule to processes whose property matches `value`.
///
/// Name and command line comparisons ignore ASCII case; process ids must
/// match exactly regardless of `match_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessFilter {
    pub key: ProcessKey,
    pub value: String,
    #[serde(default)]
    pub match_type: MatchType,
}

impl ProcessFilter {
    pub fn matches(&self, process: &ProcessHandle) -> bool {
        match self.key {
            ProcessKey::ProcessId => self
                .value
                .trim()
                .parse::<u32>()
                .map(|pid| pid == process.process_id)
                .unwrap_or(false),
            ProcessKey::ProcessName => self.matches_text(&process.name),
            ProcessKey::CommandLine => self.matches_text(&process.command_line),
        }
    }

    fn matches_text(&self, candidate: &str) -> bool {
        match self.match_type {
            MatchType::Exact => candidate.eq_ignore_ascii_case(&self.value),
            MatchType::Contains => candidate
                .to_ascii_lowercase()
                .contains(&self.value.to_ascii_lowercase()),
        }
    }
}

/// All filters must match. An empty filter list matches every process.
pub fn matches_all(filters: &[ProcessFilter], process: &ProcessHandle) -> bool {
    filters.iter().all(|f| f.matches(process))
}
