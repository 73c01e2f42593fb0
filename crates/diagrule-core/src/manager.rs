//! Starts the matching rules for a process and keeps their pipelines.

use crate::clock::{Clock, SystemClock};
use crate::context::RuleContext;
use crate::definition::RuleDefinition;
use crate::description::CollectionRuleDescription;
use crate::error::{Result, RuleError};
use crate::filter::matches_all;
use crate::pipeline::CollectionRulePipeline;
use crate::process::ProcessHandle;
use crate::registry::CollectionRuleRegistry;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct CollectionRuleManager {
    registry: Arc<CollectionRuleRegistry>,
    clock: Arc<dyn Clock>,
    rules: Vec<Arc<RuleDefinition>>,
}

impl CollectionRuleManager {
    /// Every rule must only use types the registry provides.
    pub fn new(registry: Arc<CollectionRuleRegistry>, rules: Vec<RuleDefinition>) -> Result<Self> {
        let catalog = registry.catalog();
        for rule in &rules {
            rule.validate_types(&catalog)?;
        }
        Ok(Self {
            registry,
            clock: Arc::new(SystemClock),
            rules: rules.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn rules(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.rules.iter().map(|r| r.as_ref())
    }

    /// Spawn a pipeline task for every rule whose filters match `process`.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, process: ProcessHandle) -> Result<ProcessRules> {
        let cancel = CancellationToken::new();
        let mut pipelines = BTreeMap::new();
        let mut tasks = Vec::new();

        for rule in &self.rules {
            if !matches_all(rule.filters(), &process) {
                debug!(
                    rule = rule.name(),
                    process_id = process.process_id,
                    "rule filters do not match process"
                );
                continue;
            }
            let context = RuleContext::new(rule.clone(), process.clone(), self.registry.clone())
                .with_clock(self.clock.clone());
            let pipeline = Arc::new(CollectionRulePipeline::new(context)?);
            pipelines.insert(rule.name().to_string(), pipeline.clone());

            let token = cancel.child_token();
            tasks.push(tokio::spawn(async move {
                match pipeline.run(&token).await {
                    Ok(()) => debug!(rule = pipeline.name(), "pipeline exited"),
                    Err(e) if e.is_cancelled() => debug!(rule = pipeline.name(), "pipeline cancelled"),
                    Err(e) => warn!(rule = pipeline.name(), "pipeline failed: {e}"),
                }
            }));
        }

        info!(
            process_id = process.process_id,
            rules = pipelines.len(),
            "started collection rules"
        );
        Ok(ProcessRules {
            process,
            pipelines,
            tasks: Mutex::new(tasks),
            cancel,
        })
    }
}

impl std::fmt::Debug for CollectionRuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionRuleManager")
            .field("rules", &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ProcessRules
// ---------------------------------------------------------------------------

/// The running pipelines for one process. Dropping it cancels them.
pub struct ProcessRules {
    process: ProcessHandle,
    pipelines: BTreeMap<String, Arc<CollectionRulePipeline>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl ProcessRules {
    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    pub fn pipeline(&self, name: &str) -> Option<&Arc<CollectionRulePipeline>> {
        self.pipelines.get(name)
    }

    pub fn describe(&self, name: &str) -> Result<CollectionRuleDescription> {
        self.pipelines
            .get(name)
            .map(|p| p.describe())
            .ok_or_else(|| RuleError::RuleNotFound(name.to_string()))
    }

    pub fn describe_all(&self) -> BTreeMap<String, CollectionRuleDescription> {
        self.pipelines
            .iter()
            .map(|(name, p)| (name.clone(), p.describe()))
            .collect()
    }

    /// Stop every pipeline and wait for their tasks. If `cancel` fires first
    /// the pipelines are cancelled instead.
    pub async fn stop_all(&self, cancel: &CancellationToken) -> Result<()> {
        let stops = self.pipelines.values().map(|p| p.stop(cancel));
        let results = futures::future::join_all(stops).await;
        let first_error = results.into_iter().find_map(|r| r.err());
        if first_error.is_some() {
            self.cancel.cancel();
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for joined in futures::future::join_all(tasks).await {
            if let Err(e) = joined {
                warn!(process_id = self.process.process_id, "pipeline task panicked: {e}");
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for ProcessRules {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ProcessRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRules")
            .field("process_id", &self.process.process_id)
            .field("rules", &self.pipelines.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{RuleLimits, TriggerDescriptor};
    use crate::filter::{MatchType, ProcessFilter, ProcessKey};
    use crate::pipeline::PipelineEvent;
    use crate::state::{FinishReason, RuleState};
    use crate::testing::{
        labelled, test_process, Journal, ManualTriggerFactory, PassThroughFactory, MANUAL,
        PASS_THROUGH,
    };
    use std::time::Duration;

    fn rule(name: &str, trigger: &str, filters: Vec<ProcessFilter>) -> RuleDefinition {
        RuleDefinition::new(
            name,
            TriggerDescriptor::new(trigger, serde_json::Value::Null),
            vec![labelled(name, &[])],
            RuleLimits::default(),
        )
        .unwrap()
        .with_filters(filters)
    }

    fn name_filter(value: &str) -> ProcessFilter {
        ProcessFilter {
            key: ProcessKey::ProcessName,
            value: value.into(),
            match_type: MatchType::Exact,
        }
    }

    fn manager(journal: &Journal, rules: Vec<RuleDefinition>) -> CollectionRuleManager {
        let registry = CollectionRuleRegistry::new()
            .with_action(PASS_THROUGH, PassThroughFactory::new(journal.clone(), true))
            .with_trigger(MANUAL, ManualTriggerFactory::default());
        CollectionRuleManager::new(Arc::new(registry), rules).unwrap()
    }

    #[tokio::test]
    async fn starts_only_matching_rules() {
        let journal = Journal::default();
        let manager = manager(
            &journal,
            vec![
                rule("startup", "Startup", vec![name_filter("SAMPLE-APP")]),
                rule("watch", MANUAL, vec![]),
                rule("other", MANUAL, vec![name_filter("billing")]),
            ],
        );
        let rules = manager.start(test_process()).unwrap();
        assert_eq!(rules.rule_names().collect::<Vec<_>>(), vec!["startup", "watch"]);

        let mut events = rules.pipeline("startup").unwrap().subscribe();
        if rules.pipeline("startup").unwrap().state() != RuleState::Finished {
            tokio::time::timeout(Duration::from_secs(5), async {
                while let Ok(event) = events.recv().await {
                    if matches!(event, PipelineEvent::Finished(_)) {
                        break;
                    }
                }
            })
            .await
            .unwrap();
        }

        let all = rules.describe_all();
        assert_eq!(all["startup"].state, RuleState::Finished);
        assert!(matches!(
            rules.describe("other"),
            Err(RuleError::RuleNotFound(name)) if name == "other"
        ));

        rules.stop_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            rules.pipeline("watch").unwrap().finish_reason(),
            Some(FinishReason::Stopped)
        );
        assert_eq!(rules.describe("watch").unwrap().state, RuleState::Finished);
    }

    #[test]
    fn rejects_rules_with_unregistered_types() {
        let registry = CollectionRuleRegistry::new();
        let err = CollectionRuleManager::new(
            Arc::new(registry),
            vec![rule("r", "Startup", vec![])],
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::UnknownActionType(t) if t == PASS_THROUGH));
    }
}
