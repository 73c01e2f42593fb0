//! The per-rule state machine.
//!
//! ```text
//! Initializing ──start──▶ Running ──fire──▶ ActionExecuting ──▶ Running
//!      │                     │  ▲                                  │
//!      │ (startup trigger)   │  └──────── Throttled ◀── fire ──────┘
//!      ▼                     ▼
//!   Finished{Startup}     Finished{RuleDuration | ActionCount | Stopped | Failed}
//! ```
//!
//! One pipeline owns one trigger lifecycle. Firings arrive over a bounded
//! channel and are handled one at a time on the task that called [`run`];
//! firings that arrive while an action list is executing are dropped.
//!
//! [`run`]: CollectionRulePipeline::run

use crate::context::RuleContext;
use crate::description::{self, CollectionRuleDescription};
use crate::error::{Result, RuleError};
use crate::executor::ActionListExecutor;
use crate::limits::{LimitDecision, RuleLimitsTracker};
use crate::registry::TriggerRegistration;
use crate::state::{FinishReason, PipelineStatus, RuleState};
use crate::trigger::{self, CollectionRuleTrigger, TriggerFactory};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Emitted once the trigger is armed, or for startup rules once the
    /// first action is reachable.
    Started,
    StateChanged(RuleState),
    ActionsThrottled,
    ActionsCompleted { lifetime_occurrences: u64 },
    ActionsFailed { action_index: Option<usize>, message: String },
    Finished(FinishReason),
}

pub struct CollectionRulePipeline {
    context: RuleContext,
    executor: ActionListExecutor,
    limits: RuleLimitsTracker,
    status: Mutex<PipelineStatus>,
    events: broadcast::Sender<PipelineEvent>,
    stop_requested: CancellationToken,
    run_started: AtomicBool,
    run_completed: CancellationToken,
}

impl CollectionRulePipeline {
    /// Build a pipeline for `context.definition`. Trigger and action types
    /// must all be registered. The rule duration is measured from here.
    pub fn new(context: RuleContext) -> Result<Self> {
        context
            .definition
            .validate_types(&context.registry.catalog())?;
        let limits = RuleLimitsTracker::new(*context.definition.limits(), context.clock.now());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            context,
            executor: ActionListExecutor::new(),
            limits,
            status: Mutex::new(PipelineStatus::new()),
            events,
            stop_requested: CancellationToken::new(),
            run_started: AtomicBool::new(false),
            run_completed: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        self.context.rule_name()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> RuleState {
        self.status().state()
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.status().finish_reason().cloned()
    }

    /// Current description. Never waits on action execution.
    pub fn describe(&self) -> CollectionRuleDescription {
        let now = self.context.clock.now();
        let status = self.status().clone();
        let snapshot = self.limits.snapshot(now);
        description::project(&status, self.limits.limits(), &snapshot, now)
    }

    /// Drive the rule until it finishes, is stopped, or `cancel` fires.
    ///
    /// A pipeline runs at most once. Cancellation returns
    /// `RuleError::Cancelled`; a trigger that cannot be created or started
    /// finishes the rule as failed and returns its error.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        if self.run_started.swap(true, Ordering::SeqCst) {
            return Err(RuleError::AlreadyRunning(self.name().to_string()));
        }
        let outcome = self.run_to_completion(cancel).await;
        self.run_completed.cancel();
        outcome
    }

    /// Request a cooperative stop and wait for `run` to exit.
    ///
    /// An action list already executing is allowed to finish. Safe to call
    /// repeatedly and before `run`.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        self.stop_requested.cancel();
        if !self.run_started.load(Ordering::SeqCst) {
            self.finish(FinishReason::Stopped);
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RuleError::Cancelled),
            _ = self.run_completed.cancelled() => Ok(()),
        }
    }

    // ─── Run paths ────────────────────────────────────────────────────────

    async fn run_to_completion(&self, cancel: &CancellationToken) -> Result<()> {
        if self.stop_requested.is_cancelled() {
            self.finish(FinishReason::Stopped);
            return Ok(());
        }
        let trigger_type = &self.context.definition.trigger().type_name;
        let registration = match self.context.registry.trigger(trigger_type) {
            Ok(registration) => registration,
            Err(e) => {
                self.finish(FinishReason::Failed(e.to_string()));
                return Err(e);
            }
        };
        match registration {
            TriggerRegistration::Startup => self.run_startup(cancel).await,
            TriggerRegistration::Factory(factory) => self.run_triggered(factory, cancel).await,
        }
    }

    async fn run_startup(&self, cancel: &CancellationToken) -> Result<()> {
        self.transition(RuleState::ActionExecuting);
        let events = self.events.clone();
        let result = self
            .executor
            .execute_actions(
                &self.context,
                move || {
                    let _ = events.send(PipelineEvent::Started);
                },
                cancel,
            )
            .await;
        if !matches!(result, Err(RuleError::Cancelled)) {
            self.limits.record_execution(self.context.clock.now());
        }

        match result {
            Ok(_) => self.emit(PipelineEvent::ActionsCompleted {
                lifetime_occurrences: self.limits.lifetime_occurrences(),
            }),
            Err(RuleError::Cancelled) => {
                self.finish(FinishReason::Stopped);
                return Err(RuleError::Cancelled);
            }
            Err(e) => self.emit(failed_event(&e)),
        }
        self.finish(FinishReason::Startup);
        Ok(())
    }

    async fn run_triggered(
        &self,
        factory: Arc<dyn TriggerFactory>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let definition = &self.context.definition;
        let (notifier, mut firings) = trigger::channel();
        let mut trigger =
            match factory.create(&self.context.process, &definition.trigger().settings, notifier) {
                Ok(trigger) => trigger,
                Err(e) => {
                    warn!(rule = self.name(), "failed to create trigger: {e}");
                    self.finish(FinishReason::Failed(e.to_string()));
                    return Err(e);
                }
            };

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RuleError::Cancelled),
            _ = self.stop_requested.cancelled() => {
                debug!(rule = self.name(), "stop requested while trigger was starting");
                self.finish(FinishReason::Stopped);
                self.stop_trigger(trigger.as_mut()).await;
                return Ok(());
            }
            r = trigger.start(cancel) => r,
        };
        if let Err(e) = started {
            if e.is_cancelled() {
                self.finish(FinishReason::Stopped);
            } else {
                warn!(rule = self.name(), "failed to start trigger: {e}");
                self.finish(FinishReason::Failed(e.to_string()));
            }
            self.stop_trigger(trigger.as_mut()).await;
            return Err(e);
        }

        self.transition(RuleState::Running);
        self.emit(PipelineEvent::Started);
        info!(
            rule = self.name(),
            trigger = %definition.trigger().type_name,
            "collection rule started"
        );

        let outcome = self.watch(&mut firings, cancel).await;
        firings.close();
        self.stop_trigger(trigger.as_mut()).await;
        outcome
    }

    async fn watch(
        &self,
        firings: &mut mpsc::Receiver<()>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut closed = false;
        loop {
            let deadline = self.limits.time_until_rule_duration(self.context.clock.now());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.finish(FinishReason::Stopped);
                    return Err(RuleError::Cancelled);
                }
                _ = self.stop_requested.cancelled() => {
                    self.finish(FinishReason::Stopped);
                    return Ok(());
                }
                _ = sleep_for(deadline) => {
                    if self.limits.rule_duration_elapsed(self.context.clock.now()) {
                        self.finish(FinishReason::RuleDuration);
                        return Ok(());
                    }
                }
                fired = firings.recv(), if !closed => match fired {
                    Some(()) => match self.handle_firing(firings, cancel).await {
                        Ok(true) => return Ok(()),
                        Ok(false) => {}
                        Err(e) => {
                            self.finish(FinishReason::Stopped);
                            return Err(e);
                        }
                    },
                    None => {
                        debug!(rule = self.name(), "trigger dropped its notifier");
                        closed = true;
                    }
                },
            }
        }
    }

    /// Returns whether the rule finished.
    async fn handle_firing(
        &self,
        firings: &mut mpsc::Receiver<()>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let now = self.context.clock.now();
        match self.limits.can_execute(now) {
            LimitDecision::Throttled => {
                debug!(rule = self.name(), "trigger fired while throttled");
                self.transition(RuleState::Throttled);
                self.emit(PipelineEvent::ActionsThrottled);
                return Ok(false);
            }
            LimitDecision::RuleDurationReached => {
                self.finish(FinishReason::RuleDuration);
                return Ok(true);
            }
            LimitDecision::ActionCountReached => {
                self.finish(FinishReason::ActionCount);
                return Ok(true);
            }
            LimitDecision::Allowed => {}
        }

        self.transition(RuleState::ActionExecuting);
        let result = self
            .executor
            .execute_actions(&self.context, || {}, cancel)
            .await;
        if matches!(result, Err(RuleError::Cancelled)) {
            return Err(RuleError::Cancelled);
        }
        self.limits.record_execution(now);

        let mut dropped = 0usize;
        while firings.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(
                rule = self.name(),
                dropped, "dropped trigger firings received during action execution"
            );
        }

        let event = match result {
            Ok(_) => PipelineEvent::ActionsCompleted {
                lifetime_occurrences: self.limits.lifetime_occurrences(),
            },
            Err(e) => failed_event(&e),
        };

        let finished = if self.limits.is_lifetime_count_exhausted() {
            Some(FinishReason::ActionCount)
        } else if self.limits.rule_duration_elapsed(self.context.clock.now()) {
            Some(FinishReason::RuleDuration)
        } else {
            self.transition(RuleState::Running);
            None
        };
        self.emit(event);

        match finished {
            Some(reason) => {
                self.finish(reason);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn stop_trigger(&self, trigger: &mut dyn CollectionRuleTrigger) {
        if let Err(e) = trigger.stop(&CancellationToken::new()).await {
            warn!(rule = self.name(), "failed to stop trigger: {e}");
        }
    }

    // ─── State helpers ────────────────────────────────────────────────────

    fn status(&self) -> MutexGuard<'_, PipelineStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, to: RuleState) {
        let changed = {
            let mut status = self.status();
            status.state() != to && status.transition(to)
        };
        if changed {
            self.emit(PipelineEvent::StateChanged(to));
        }
    }

    fn finish(&self, reason: FinishReason) {
        let changed = self.status().finish(reason.clone());
        if changed {
            info!(rule = self.name(), reason = %reason, "collection rule finished");
            self.emit(PipelineEvent::StateChanged(RuleState::Finished));
            self.emit(PipelineEvent::Finished(reason));
        }
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for CollectionRulePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionRulePipeline")
            .field("rule", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

fn failed_event(error: &RuleError) -> PipelineEvent {
    match error {
        RuleError::ActionFailed {
            action_index,
            message,
        } => PipelineEvent::ActionsFailed {
            action_index: Some(*action_index),
            message: message.clone(),
        },
        other => PipelineEvent::ActionsFailed {
            action_index: None,
            message: other.to_string(),
        },
    }
}

async fn sleep_for(duration: Option<Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
