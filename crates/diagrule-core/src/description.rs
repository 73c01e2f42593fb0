//! Read-only projection of a pipeline into a [`CollectionRuleDescription`].

use crate::definition::RuleLimits;
use crate::limits::{LimitDecision, LimitsSnapshot};
use crate::state::{PipelineStatus, RuleState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionRuleDescription {
    pub state: RuleState,
    pub state_reason: String,
    pub lifetime_occurrences: u64,
    pub sliding_window_occurrences: u64,
    pub action_count_limit: Option<u32>,
    #[serde(with = "crate::serde_duration::option")]
    pub action_count_sliding_window_duration_limit: Option<Duration>,
    /// Whole seconds until the window admits another execution; only set
    /// while throttled.
    #[serde(with = "crate::serde_duration::option")]
    pub sliding_window_duration_countdown: Option<Duration>,
    /// Whole seconds until the rule duration finishes the rule.
    #[serde(with = "crate::serde_duration::option")]
    pub rule_finished_countdown: Option<Duration>,
}

/// Build a description from values captured under their own locks.
///
/// A recorded `Throttled` state whose window has drained since the last
/// firing reads as `Running`.
pub fn project(
    status: &PipelineStatus,
    limits: &RuleLimits,
    snapshot: &LimitsSnapshot,
    now: DateTime<Utc>,
) -> CollectionRuleDescription {
    let mut state = status.state();
    let mut state_reason = status.reason_text();
    if state == RuleState::Throttled && snapshot.decision != LimitDecision::Throttled {
        let mut drained = PipelineStatus::new();
        drained.transition(RuleState::Running);
        state = RuleState::Running;
        state_reason = drained.reason_text();
    }

    let sliding_window_duration_countdown = match state {
        RuleState::Throttled => snapshot
            .next_eligible_at
            .map(|at| round_to_seconds(until(now, at))),
        _ => None,
    };
    let rule_finished_countdown = match state {
        RuleState::Finished => None,
        _ => snapshot
            .rule_deadline
            .map(|at| round_to_seconds(until(now, at))),
    };

    CollectionRuleDescription {
        state,
        state_reason,
        lifetime_occurrences: snapshot.lifetime_occurrences,
        sliding_window_occurrences: snapshot.sliding_window_occurrences,
        action_count_limit: limits.action_count,
        action_count_sliding_window_duration_limit: limits.action_count_sliding_window_duration,
        sliding_window_duration_countdown,
        rule_finished_countdown,
    }
}

fn until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Nearest whole second, halves rounding up.
fn round_to_seconds(d: Duration) -> Duration {
    let secs = d.as_secs() + u64::from(d.subsec_millis() >= 500);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::RuleLimitsTracker;
    use crate::state::FinishReason;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::milliseconds(ms)
    }

    fn limits() -> RuleLimits {
        RuleLimits {
            action_count: Some(2),
            action_count_sliding_window_duration: Some(Duration::from_secs(10)),
            rule_duration: Some(Duration::from_secs(60)),
        }
    }

    fn status(state: RuleState) -> PipelineStatus {
        let mut status = PipelineStatus::new();
        status.transition(state);
        status
    }

    #[test]
    fn throttled_countdown_is_rounded() {
        let tracker = RuleLimitsTracker::new(limits(), t0());
        tracker.record_execution(at(0));
        tracker.record_execution(at(100));
        let now = at(2_400);

        let desc = project(
            &status(RuleState::Throttled),
            tracker.limits(),
            &tracker.snapshot(now),
            now,
        );
        assert_eq!(desc.state, RuleState::Throttled);
        // 10s window from t=0 leaves 7.6s, shown as 8.
        assert_eq!(desc.sliding_window_duration_countdown, Some(Duration::from_secs(8)));
        assert_eq!(desc.rule_finished_countdown, Some(Duration::from_secs(58)));
        assert_eq!(desc.lifetime_occurrences, 2);
        assert_eq!(desc.sliding_window_occurrences, 2);
        assert_eq!(desc.action_count_limit, Some(2));
    }

    #[test]
    fn drained_throttle_reads_as_running() {
        let tracker = RuleLimitsTracker::new(limits(), t0());
        tracker.record_execution(at(0));
        tracker.record_execution(at(100));
        let now = at(10_500);

        let desc = project(
            &status(RuleState::Throttled),
            tracker.limits(),
            &tracker.snapshot(now),
            now,
        );
        assert_eq!(desc.state, RuleState::Running);
        assert_eq!(desc.sliding_window_duration_countdown, None);
        assert_eq!(desc.sliding_window_occurrences, 1);
        assert!(desc.state_reason.contains("waiting"));
    }

    #[test]
    fn finished_rules_have_no_countdowns() {
        let tracker = RuleLimitsTracker::new(limits(), t0());
        let mut finished = PipelineStatus::new();
        finished.finish(FinishReason::RuleDuration);
        let now = at(60_000);

        let desc = project(&finished, tracker.limits(), &tracker.snapshot(now), now);
        assert_eq!(desc.state, RuleState::Finished);
        assert_eq!(desc.rule_finished_countdown, None);
        assert_eq!(desc.state_reason, "The rule duration limit was reached.");
    }

    #[test]
    fn serializes_durations_as_seconds() {
        let tracker = RuleLimitsTracker::new(limits(), t0());
        let desc = project(
            &status(RuleState::Running),
            tracker.limits(),
            &tracker.snapshot(t0()),
            t0(),
        );
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["state"], "Running");
        assert_eq!(json["action_count_sliding_window_duration_limit"], 10);
        assert_eq!(json["rule_finished_countdown"], 60);
        assert!(json["sliding_window_duration_countdown"].is_null());
    }

    #[test]
    fn rounding_goes_to_nearest_second() {
        assert_eq!(round_to_seconds(Duration::from_millis(1_499)), Duration::from_secs(1));
        assert_eq!(round_to_seconds(Duration::from_millis(1_500)), Duration::from_secs(2));
        assert_eq!(round_to_seconds(Duration::ZERO), Duration::ZERO);
    }
}
