//! `FailSafeController` — tracks consecutive failures per session and
//! trips a cooldown before escalating to human intervention.
//!
//! Grounded on `escalation::state::EscalationState` (bounded history,
//! budget tracking, `record_*`/`remaining_*` accessor pattern) and
//! `feedback::correction_loop::TieredCorrectionLoop` (`should_escalate`/
//! `escalate` state machine). `FailSafeController` collapses their
//! multi-tier budget model into the single cooldown rule spec §4.11
//! asks for, keeping the same bounded-history/event-emission shape.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::events::{EnsembleEvent, SharedEventBus};

const MAX_REASON_HISTORY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailSafeVerdict {
    /// The caller may proceed with the attempt.
    Proceed,
    /// Cooldown is active; the caller must not attempt again until it
    /// expires.
    CooldownActive,
    /// This call tripped the cooldown (consecutive failures reached the
    /// configured maximum).
    Tripped,
}

/// Bounded queue of the most recent failure reasons for a session,
/// mirroring `EscalationState::recent_error_categories`'s sliding window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureHistory {
    pub consecutive_failures: u32,
    pub reasons: Vec<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl FailureHistory {
    fn push_reason(&mut self, reason: String) {
        self.reasons.push(reason);
        if self.reasons.len() > MAX_REASON_HISTORY {
            self.reasons.remove(0);
        }
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map(|until| now < until).unwrap_or(false)
    }
}

pub struct FailSafeConfig {
    pub max_consecutive_failures: u32,
    pub cooldown_minutes: i64,
}

impl Default for FailSafeConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            cooldown_minutes: 30,
        }
    }
}

/// Per-session consecutive-failure tracker with a cooldown that, once
/// tripped, blocks further attempts for `cooldown_minutes` and emits a
/// `FailSafeTripped` event for human-intervention visibility.
pub struct FailSafeController {
    config: FailSafeConfig,
    sessions: Mutex<HashMap<String, FailureHistory>>,
    event_bus: Option<SharedEventBus>,
}

impl FailSafeController {
    pub fn new(config: FailSafeConfig, event_bus: Option<SharedEventBus>) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            event_bus,
        }
    }

    /// Checks whether a session may proceed. Callers must call this
    /// before each attempt; a `CooldownActive` result means "do not
    /// attempt, surface to the caller (and, at the CLI layer, exit 30)".
    pub async fn check(&self, session_id: &str) -> FailSafeVerdict {
        let sessions = self.sessions.lock().await;
        let now = Utc::now();
        match sessions.get(session_id) {
            Some(history) if history.in_cooldown(now) => FailSafeVerdict::CooldownActive,
            _ => FailSafeVerdict::Proceed,
        }
    }

    /// Records a successful attempt, resetting the consecutive-failure
    /// counter (mirrors `TieredCorrectionLoop::record_attempt`'s reset on
    /// progress).
    pub async fn record_success(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(FailureHistory::default)
            .consecutive_failures = 0;
    }

    /// Records a failure. Returns `Tripped` the call that pushes
    /// `consecutive_failures` to `max_consecutive_failures`, which also
    /// opens the cooldown window and emits `FailSafeTripped`.
    pub async fn record_failure(&self, session_id: &str, reason: impl Into<String>) -> FailSafeVerdict {
        let reason = reason.into();
        let mut sessions = self.sessions.lock().await;
        let now = Utc::now();
        let history = sessions
            .entry(session_id.to_string())
            .or_insert_with(FailureHistory::default);

        history.consecutive_failures += 1;
        history.last_failure_at = Some(now);
        history.push_reason(reason.clone());

        if history.consecutive_failures >= self.config.max_consecutive_failures {
            let cooldown_until = now + ChronoDuration::minutes(self.config.cooldown_minutes);
            history.cooldown_until = Some(cooldown_until);
            warn!(
                session_id,
                consecutive_failures = history.consecutive_failures,
                cooldown_until = %cooldown_until,
                "fail-safe tripped, entering cooldown"
            );

            if let Some(bus) = &self.event_bus {
                let _ = bus.publish(EnsembleEvent::FailSafeTripped {
                    session_id: session_id.to_string(),
                    consecutive_failures: history.consecutive_failures,
                    reason: reason.clone(),
                    timestamp: now,
                });
            }
            return FailSafeVerdict::Tripped;
        }

        info!(
            session_id,
            consecutive_failures = history.consecutive_failures,
            "fail-safe recorded failure"
        );
        FailSafeVerdict::Proceed
    }

    pub async fn history(&self, session_id: &str) -> Option<FailureHistory> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// Runs `attempt` only if the session is not in cooldown, recording
    /// the outcome. Returns `Err` with no attempt run when cooldown is
    /// active, letting the Orchestrator map it to exit code 30 without
    /// ever invoking the wrapped closure.
    pub async fn wrap<F, Fut, T, E>(
        self: &Arc<Self>,
        session_id: &str,
        attempt: F,
    ) -> Result<T, FailSafeOutcome<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if self.check(session_id).await == FailSafeVerdict::CooldownActive {
            return Err(FailSafeOutcome::CooldownActive);
        }

        match attempt().await {
            Ok(value) => {
                self.record_success(session_id).await;
                Ok(value)
            }
            Err(e) => {
                let verdict = self.record_failure(session_id, e.to_string()).await;
                Err(FailSafeOutcome::AttemptFailed { error: e, tripped: verdict == FailSafeVerdict::Tripped })
            }
        }
    }
}

#[derive(Debug)]
pub enum FailSafeOutcome<E> {
    CooldownActive,
    AttemptFailed { error: E, tripped: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trips_after_max_consecutive_failures() {
        let controller = FailSafeController::new(FailSafeConfig::default(), None);
        assert_eq!(controller.record_failure("s1", "r1").await, FailSafeVerdict::Proceed);
        assert_eq!(controller.record_failure("s1", "r2").await, FailSafeVerdict::Proceed);
        assert_eq!(controller.record_failure("s1", "r3").await, FailSafeVerdict::Tripped);
        assert_eq!(controller.check("s1").await, FailSafeVerdict::CooldownActive);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let controller = FailSafeController::new(FailSafeConfig::default(), None);
        controller.record_failure("s1", "r1").await;
        controller.record_failure("s1", "r2").await;
        controller.record_success("s1").await;
        let history = controller.history("s1").await.unwrap();
        assert_eq!(history.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_reason_history_is_bounded() {
        let controller = FailSafeController::new(
            FailSafeConfig { max_consecutive_failures: 100, cooldown_minutes: 30 },
            None,
        );
        for i in 0..15 {
            controller.record_failure("s1", format!("reason-{i}")).await;
        }
        let history = controller.history("s1").await.unwrap();
        assert_eq!(history.reasons.len(), MAX_REASON_HISTORY);
        assert_eq!(history.reasons.last().unwrap(), "reason-14");
    }

    #[tokio::test]
    async fn test_wrap_skips_attempt_during_cooldown() {
        let controller = Arc::new(FailSafeController::new(FailSafeConfig::default(), None));
        for _ in 0..3 {
            let _ = controller
                .wrap::<_, _, (), &str>("s1", || async { Err("boom") })
                .await;
        }
        let result = controller
            .wrap::<_, _, (), &str>("s1", || async { Ok(()) })
            .await;
        assert!(matches!(result, Err(FailSafeOutcome::CooldownActive)));
    }

    #[tokio::test]
    async fn test_wrap_runs_attempt_when_not_in_cooldown() {
        let controller = Arc::new(FailSafeController::new(FailSafeConfig::default(), None));
        let result = controller.wrap::<_, _, u32, &str>("s1", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
