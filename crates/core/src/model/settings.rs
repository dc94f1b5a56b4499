use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Passing threshold for ordinary path-unit tests.
pub const DEFAULT_UNIT_PASSING_SCORE: u8 = 70;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("streak threshold must be > 0")]
    InvalidStreakThreshold,

    #[error("unit passing score must be between 1 and 100, got {0}")]
    InvalidPassingScore(u8),

    #[error("overlay duration must be between 1 and 60 seconds")]
    InvalidOverlayDuration,
}

//
// ─── AD POLICY ─────────────────────────────────────────────────────────────────
//

/// Interstitial shown between the results screen and closing a passed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdPolicy {
    pub duration_secs: u32,
}

//
// ─── SESSION SETTINGS ──────────────────────────────────────────────────────────
//

/// Tunables for the test-session state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SessionSettingsDraft")]
pub struct SessionSettings {
    streak_threshold: u32,
    mistake_threshold: u32,
    unit_passing_score: u8,
    unit_xp_reward: u32,
    streak_overlay_secs: u32,
    success_overlay_secs: u32,
    ad_interstitial: Option<AdPolicy>,
}

/// Unvalidated settings as read from configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettingsDraft {
    pub streak_threshold: u32,
    pub mistake_threshold: u32,
    pub unit_passing_score: u8,
    pub unit_xp_reward: u32,
    pub streak_overlay_secs: u32,
    pub success_overlay_secs: u32,
    pub ad_interstitial: Option<AdPolicy>,
}

impl Default for SessionSettingsDraft {
    fn default() -> Self {
        Self {
            streak_threshold: 5,
            mistake_threshold: 3,
            unit_passing_score: DEFAULT_UNIT_PASSING_SCORE,
            unit_xp_reward: 10,
            streak_overlay_secs: 2,
            success_overlay_secs: 3,
            ad_interstitial: None,
        }
    }
}

impl SessionSettingsDraft {
    /// Validate the draft.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` for a zero streak threshold, an out-of-range
    /// passing score, or an overlay duration outside `1..=60` seconds.
    pub fn validate(self) -> Result<SessionSettings, SettingsError> {
        if self.streak_threshold == 0 {
            return Err(SettingsError::InvalidStreakThreshold);
        }
        if !(1..=100).contains(&self.unit_passing_score) {
            return Err(SettingsError::InvalidPassingScore(self.unit_passing_score));
        }
        let overlays = [
            Some(self.streak_overlay_secs),
            Some(self.success_overlay_secs),
            self.ad_interstitial.map(|ad| ad.duration_secs),
        ];
        if overlays.into_iter().flatten().any(|secs| !(1..=60).contains(&secs)) {
            return Err(SettingsError::InvalidOverlayDuration);
        }

        Ok(SessionSettings {
            streak_threshold: self.streak_threshold,
            mistake_threshold: self.mistake_threshold,
            unit_passing_score: self.unit_passing_score,
            unit_xp_reward: self.unit_xp_reward,
            streak_overlay_secs: self.streak_overlay_secs,
            success_overlay_secs: self.success_overlay_secs,
            ad_interstitial: self.ad_interstitial,
        })
    }
}

impl TryFrom<SessionSettingsDraft> for SessionSettings {
    type Error = SettingsError;

    fn try_from(draft: SessionSettingsDraft) -> Result<Self, Self::Error> {
        draft.validate()
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        let draft = SessionSettingsDraft::default();
        Self {
            streak_threshold: draft.streak_threshold,
            mistake_threshold: draft.mistake_threshold,
            unit_passing_score: draft.unit_passing_score,
            unit_xp_reward: draft.unit_xp_reward,
            streak_overlay_secs: draft.streak_overlay_secs,
            success_overlay_secs: draft.success_overlay_secs,
            ad_interstitial: draft.ad_interstitial,
        }
    }
}

impl SessionSettings {
    /// Consecutive correct answers that trigger a streak celebration.
    #[must_use]
    pub fn streak_threshold(&self) -> u32 {
        self.streak_threshold
    }

    /// Mistake review fires once unique wrong questions exceed this.
    #[must_use]
    pub fn mistake_threshold(&self) -> u32 {
        self.mistake_threshold
    }

    #[must_use]
    pub fn unit_passing_score(&self) -> u8 {
        self.unit_passing_score
    }

    #[must_use]
    pub fn unit_xp_reward(&self) -> u32 {
        self.unit_xp_reward
    }

    #[must_use]
    pub fn streak_overlay(&self) -> Duration {
        Duration::seconds(i64::from(self.streak_overlay_secs))
    }

    #[must_use]
    pub fn success_overlay(&self) -> Duration {
        Duration::seconds(i64::from(self.success_overlay_secs))
    }

    #[must_use]
    pub fn ad_interstitial(&self) -> Option<AdPolicy> {
        self.ad_interstitial
    }

    #[must_use]
    pub fn with_ad_interstitial(mut self, policy: Option<AdPolicy>) -> Self {
        self.ad_interstitial = policy;
        self
    }

    #[must_use]
    pub fn with_streak_threshold(mut self, threshold: u32) -> Self {
        self.streak_threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn with_mistake_threshold(mut self, threshold: u32) -> Self {
        self.mistake_threshold = threshold;
        self
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
