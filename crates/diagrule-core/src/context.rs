use crate::clock::{Clock, SystemClock};
use crate::definition::RuleDefinition;
use crate::process::ProcessHandle;
use crate::registry::CollectionRuleRegistry;
use std::sync::Arc;

/// Everything one rule needs to execute against one process.
#[derive(Clone)]
pub struct RuleContext {
    pub definition: Arc<RuleDefinition>,
    pub process: ProcessHandle,
    pub registry: Arc<CollectionRuleRegistry>,
    pub clock: Arc<dyn Clock>,
}

impl RuleContext {
    pub fn new(
        definition: Arc<RuleDefinition>,
        process: ProcessHandle,
        registry: Arc<CollectionRuleRegistry>,
    ) -> Self {
        Self {
            definition,
            process,
            registry,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn rule_name(&self) -> &str {
        self.definition.name()
    }
}

impl std::fmt::Debug for RuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleContext")
            .field("rule", &self.definition.name())
            .field("process_id", &self.process.process_id)
            .finish()
    }
}
