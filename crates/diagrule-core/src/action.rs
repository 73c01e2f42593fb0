//! The action seam: factories build actions for a target process from typed
//! settings, and the executor drives them through start → wait → dispose.

use crate::error::Result;
use crate::process::ProcessHandle;
use crate::settings::ActionSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;

/// Named output values produced by one completed action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub output_values: BTreeMap<String, String>,
}

impl ActionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.output_values.insert(key.into(), value.into());
        self
    }

    pub fn output(&self, key: &str) -> Option<&str> {
        self.output_values.get(key).map(String::as_str)
    }
}

/// Results of one action-list execution, keyed by action name.
pub type ActionResults = HashMap<String, ActionResult>;

/// A unit of work against a target process.
///
/// `start` returns once the action has begun; `wait_for_completion` returns
/// its outputs. `dispose` is always called exactly once by the executor,
/// whether or not the action completed.
#[async_trait]
pub trait CollectionRuleAction: Send {
    async fn start(&mut self, cancel: &CancellationToken) -> Result<()>;

    async fn wait_for_completion(&mut self, cancel: &CancellationToken) -> Result<ActionResult>;

    async fn dispose(&mut self) {}
}

/// Creates actions for one action type.
pub trait ActionFactory: Send + Sync {
    /// Build an action bound to `process`. Implementations reject settings
    /// variants they do not understand with `RuleError::UnsupportedSettings`.
    fn create(
        &self,
        process: &ProcessHandle,
        settings: &ActionSettings,
    ) -> Result<Box<dyn CollectionRuleAction>>;

    /// Whether the executor must wait for this action to complete before
    /// starting the next one. Descriptors may override this per action.
    fn wait_for_completion(&self) -> bool {
        true
    }
}
