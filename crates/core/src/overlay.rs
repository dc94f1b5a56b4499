//! Cancellable, clock-driven overlay timers.
//!
//! Overlays (streak banner, success celebration, ad interstitial) end after a
//! delay. Rather than holding runtime timer handles, the session keeps a list
//! of scheduled expiries and fires the due ones when it is ticked with the
//! current time. Cancelling drops the entry, so a closed session never sees a
//! stray transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    Streak,
    SuccessCelebration,
    AdInterstitial,
}

/// Handle used to cancel one scheduled overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledOverlay {
    pub token: TimerToken,
    pub kind: OverlayKind,
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct OverlayTimers {
    next_token: u64,
    scheduled: Vec<ScheduledOverlay>,
}

impl OverlayTimers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, kind: OverlayKind, due_at: DateTime<Utc>) -> TimerToken {
        let token = TimerToken(self.next_token);
        self.next_token += 1;
        self.scheduled.push(ScheduledOverlay {
            token,
            kind,
            due_at,
        });
        token
    }

    /// Returns false if the token already fired or was cancelled.
    pub fn cancel(&mut self, token: TimerToken) -> bool {
        let before = self.scheduled.len();
        self.scheduled.retain(|s| s.token != token);
        self.scheduled.len() != before
    }

    pub fn cancel_kind(&mut self, kind: OverlayKind) -> usize {
        let before = self.scheduled.len();
        self.scheduled.retain(|s| s.kind != kind);
        before - self.scheduled.len()
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.scheduled.len();
        self.scheduled.clear();
        count
    }

    /// Removes and returns every overlay due at or before `now`, oldest first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<ScheduledOverlay> {
        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.scheduled.drain(..).partition(|s| s.due_at <= now);
        self.scheduled = pending;
        due.sort_by_key(|s| (s.due_at, s.token));
        due
    }

    #[must_use]
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.scheduled.iter().map(|s| s.due_at).min()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    #[test]
    fn due_overlays_fire_in_order_and_only_once() {
        let now = fixed_now();
        let mut timers = OverlayTimers::new();
        let late = timers.schedule(OverlayKind::AdInterstitial, now + Duration::seconds(5));
        let early = timers.schedule(OverlayKind::Streak, now + Duration::seconds(2));

        assert!(timers.take_due(now).is_empty());
        assert_eq!(timers.next_due(), Some(now + Duration::seconds(2)));

        let due = timers.take_due(now + Duration::seconds(10));
        let tokens: Vec<_> = due.iter().map(|s| s.token).collect();
        assert_eq!(tokens, vec![early, late]);
        assert!(timers.take_due(now + Duration::seconds(10)).is_empty());
        assert!(!timers.cancel(early));
    }

    #[test]
    fn cancelled_overlays_never_fire() {
        let now = fixed_now();
        let mut timers = OverlayTimers::new();
        let token = timers.schedule(OverlayKind::Streak, now);
        timers.schedule(OverlayKind::SuccessCelebration, now);
        timers.schedule(OverlayKind::SuccessCelebration, now);

        assert!(timers.cancel(token));
        assert_eq!(timers.cancel_kind(OverlayKind::SuccessCelebration), 2);
        assert!(timers.is_empty());

        timers.schedule(OverlayKind::AdInterstitial, now);
        assert_eq!(timers.cancel_all(), 1);
        assert!(timers.take_due(now).is_empty());
    }
}
