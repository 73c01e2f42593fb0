//! Action-count and rule-duration bookkeeping for one pipeline.
//!
//! The tracker owns the execution timestamp window. Entries are purged lazily
//! on every query, never on a timer. A count limit without a sliding window
//! is a lifetime cap and exhausting it finishes the rule; with a window it
//! only throttles until enough entries age out.

use crate::definition::RuleLimits;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LimitDecision {
    Allowed,
    /// Transient: the sliding window is full.
    Throttled,
    /// Terminal: the rule has been active for its full duration.
    RuleDurationReached,
    /// Terminal: the lifetime action count is used up.
    ActionCountReached,
}

impl LimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RuleDurationReached | Self::ActionCountReached)
    }
}

/// Consistent view of the tracker taken under a single lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitsSnapshot {
    pub decision: LimitDecision,
    pub lifetime_occurrences: u64,
    /// Executions inside the current window; equals the lifetime count when
    /// no window is configured.
    pub sliding_window_occurrences: u64,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub rule_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ExecutionWindow {
    timestamps: VecDeque<DateTime<Utc>>,
    lifetime: u64,
}

impl ExecutionWindow {
    fn purge(&mut self, now: DateTime<Utc>, window: Duration) {
        while let Some(oldest) = self.timestamps.front() {
            if elapsed(*oldest, now) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}

fn add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug)]
pub struct RuleLimitsTracker {
    limits: RuleLimits,
    rule_start: DateTime<Utc>,
    window: Mutex<ExecutionWindow>,
}

impl RuleLimitsTracker {
    pub fn new(limits: RuleLimits, rule_start: DateTime<Utc>) -> Self {
        Self {
            limits,
            rule_start,
            window: Mutex::new(ExecutionWindow::default()),
        }
    }

    pub fn limits(&self) -> &RuleLimits {
        &self.limits
    }

    pub fn rule_start(&self) -> DateTime<Utc> {
        self.rule_start
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionWindow> {
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether an action list may run now.
    pub fn can_execute(&self, now: DateTime<Utc>) -> LimitDecision {
        let mut window = self.lock();
        self.decide(&mut window, now)
    }

    fn decide(&self, window: &mut ExecutionWindow, now: DateTime<Utc>) -> LimitDecision {
        if self.rule_duration_elapsed(now) {
            return LimitDecision::RuleDurationReached;
        }
        let Some(limit) = self.limits.action_count else {
            return LimitDecision::Allowed;
        };
        match self.limits.action_count_sliding_window_duration {
            Some(duration) => {
                window.purge(now, duration);
                if window.timestamps.len() as u64 >= u64::from(limit) {
                    LimitDecision::Throttled
                } else {
                    LimitDecision::Allowed
                }
            }
            None if window.lifetime >= u64::from(limit) => LimitDecision::ActionCountReached,
            None => LimitDecision::Allowed,
        }
    }

    /// Record one action-list execution. Recorded entries are never retracted.
    pub fn record_execution(&self, now: DateTime<Utc>) {
        let mut window = self.lock();
        window.lifetime += 1;
        if self.limits.action_count_sliding_window_duration.is_some() {
            window.timestamps.push_back(now);
        }
    }

    /// When throttled, the instant enough window entries will have aged out
    /// for the next execution to be allowed.
    pub fn next_eligible_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut window = self.lock();
        self.next_eligible(&mut window, now)
    }

    fn next_eligible(
        &self,
        window: &mut ExecutionWindow,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let limit = usize::try_from(self.limits.action_count?).ok()?;
        let duration = self.limits.action_count_sliding_window_duration?;
        window.purge(now, duration);
        let len = window.timestamps.len();
        if len < limit {
            return None;
        }
        window
            .timestamps
            .get(len - limit)
            .map(|oldest| add(*oldest, duration))
    }

    pub fn lifetime_occurrences(&self) -> u64 {
        self.lock().lifetime
    }

    pub fn sliding_window_occurrences(&self, now: DateTime<Utc>) -> u64 {
        let mut window = self.lock();
        self.window_count(&mut window, now)
    }

    fn window_count(&self, window: &mut ExecutionWindow, now: DateTime<Utc>) -> u64 {
        match self.limits.action_count_sliding_window_duration {
            Some(duration) => {
                window.purge(now, duration);
                window.timestamps.len() as u64
            }
            None => window.lifetime,
        }
    }

    /// True once a lifetime (non-windowed) count limit has been used up.
    pub fn is_lifetime_count_exhausted(&self) -> bool {
        match (
            self.limits.action_count,
            self.limits.action_count_sliding_window_duration,
        ) {
            (Some(limit), None) => self.lock().lifetime >= u64::from(limit),
            _ => false,
        }
    }

    pub fn rule_deadline(&self) -> Option<DateTime<Utc>> {
        self.limits.rule_duration.map(|d| add(self.rule_start, d))
    }

    pub fn rule_duration_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.rule_deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Time left before the rule duration finishes the rule.
    pub fn time_until_rule_duration(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.rule_deadline().map(|deadline| elapsed(now, deadline))
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> LimitsSnapshot {
        let mut window = self.lock();
        LimitsSnapshot {
            decision: self.decide(&mut window, now),
            lifetime_occurrences: window.lifetime,
            sliding_window_occurrences: self.window_count(&mut window, now),
            next_eligible_at: self.next_eligible(&mut window, now),
            rule_deadline: self.rule_deadline(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
