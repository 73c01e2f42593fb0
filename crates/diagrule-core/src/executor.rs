//! Sequential execution of one rule's action list.
//!
//! Actions run in declaration order. Tokens can only reference earlier
//! actions, so declaration order is already a valid dependency order and no
//! separate sort is needed. A deferred action keeps running while the list
//! continues; it is awaited as soon as a later action references it, and in
//! any case before the executor returns.

use crate::action::{ActionResults, CollectionRuleAction};
use crate::context::RuleContext;
use crate::error::{Result, RuleError};
use crate::tokens::TokenResolver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ─── Internal state ───────────────────────────────────────────────────────

struct StartedAction {
    index: usize,
    name: String,
    action: Box<dyn CollectionRuleAction>,
    completed: bool,
}

/// Fires the wrapped callback at most once.
struct StartCallback<F: FnOnce()> {
    callback: Option<F>,
}

impl<F: FnOnce()> StartCallback<F> {
    fn new(callback: F) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    fn fire(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }
}

// ─── ActionListExecutor ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct ActionListExecutor;

impl ActionListExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run every action of `context.definition` against `context.process`.
    ///
    /// `on_first_action_reachable` is called exactly once per call: the first
    /// time the executor is about to wait on an action, or after the last
    /// action has started if nothing needed waiting, or on the way out when
    /// the list fails early. Hosts use it to resume a suspended process
    /// before long-running collection blocks.
    ///
    /// On failure no further actions are started, every started action is
    /// disposed, and a single `RuleError::ActionFailed` carrying the failing
    /// action's index is returned. Cancellation yields `RuleError::Cancelled`.
    pub async fn execute_actions<F>(
        &self,
        context: &RuleContext,
        on_first_action_reachable: F,
        cancel: &CancellationToken,
    ) -> Result<ActionResults>
    where
        F: FnOnce() + Send,
    {
        let mut callback = StartCallback::new(on_first_action_reachable);
        let mut started = Vec::new();
        let mut results = ActionResults::new();

        let outcome = run_actions(context, &mut callback, &mut started, &mut results, cancel).await;
        callback.fire();

        for entry in started.iter_mut() {
            entry.action.dispose().await;
        }

        match &outcome {
            Ok(()) => info!(
                rule = context.rule_name(),
                actions = started.len(),
                "action list completed"
            ),
            Err(RuleError::ActionFailed {
                action_index,
                message,
            }) => warn!(
                rule = context.rule_name(),
                action_index, "action list failed: {message}"
            ),
            Err(e) => info!(rule = context.rule_name(), "action list aborted: {e}"),
        }

        outcome.map(|()| results)
    }
}

async fn run_actions<F>(
    context: &RuleContext,
    callback: &mut StartCallback<F>,
    started: &mut Vec<StartedAction>,
    results: &mut ActionResults,
    cancel: &CancellationToken,
) -> Result<()>
where
    F: FnOnce() + Send,
{
    let definition = &context.definition;
    let resolver = TokenResolver::new(definition, &context.process);

    for (index, descriptor) in definition.actions().iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(RuleError::Cancelled);
        }

        let deps = resolver.dependencies(index);
        for dep in &deps.actions {
            if let Some(pending) = started
                .iter_mut()
                .find(|a| a.index == *dep && !a.completed)
            {
                callback.fire();
                complete(context, pending, results, cancel).await?;
            }
        }

        let substitution = resolver.substitute(results, index, &descriptor.settings);
        let factory = context
            .registry
            .action_factory(&descriptor.type_name)
            .map_err(|e| action_error(index, e))?;
        let action = factory
            .create(&context.process, &substitution.settings)
            .map_err(|e| action_error(index, e))?;
        let wait = descriptor
            .wait_for_completion
            .unwrap_or_else(|| factory.wait_for_completion());

        started.push(StartedAction {
            index,
            name: descriptor.name.clone(),
            action,
            completed: false,
        });
        let pos = started.len() - 1;
        let entry = &mut started[pos];

        debug!(
            rule = context.rule_name(),
            action_index = index,
            action_type = %descriptor.type_name,
            wait,
            "starting action"
        );
        let start = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RuleError::Cancelled),
            r = entry.action.start(cancel) => r,
        };
        start.map_err(|e| action_error(index, e))?;

        if wait {
            callback.fire();
            complete(context, entry, results, cancel).await?;
        }
    }

    callback.fire();
    for entry in started.iter_mut().filter(|a| !a.completed) {
        complete(context, entry, results, cancel).await?;
    }
    Ok(())
}

async fn complete(
    context: &RuleContext,
    entry: &mut StartedAction,
    results: &mut ActionResults,
    cancel: &CancellationToken,
) -> Result<()> {
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RuleError::Cancelled),
        r = entry.action.wait_for_completion(cancel) => r,
    };
    let result = outcome.map_err(|e| action_error(entry.index, e))?;
    entry.completed = true;

    debug!(
        rule = context.rule_name(),
        action_index = entry.index,
        outputs = result.output_values.len(),
        "action completed"
    );
    if !entry.name.is_empty() {
        results.insert(entry.name.clone(), result);
    }
    Ok(())
}

/// Attribute an error to the action at `index`. Cancellation stays distinct.
fn action_error(index: usize, error: RuleError) -> RuleError {
    match error {
        RuleError::Cancelled => RuleError::Cancelled,
        RuleError::ActionFailed { message, .. } => RuleError::ActionFailed {
            action_index: index,
            message,
        },
        other => RuleError::ActionFailed {
            action_index: index,
            message: other.to_string(),
        },
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
