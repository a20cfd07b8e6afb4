//! Session lifecycle monitor.
//!
//! Tracks staleness across foreground/background transitions and decides
//! whether an interruption needs a reattachment, or whether the session has
//! needed so many that it should be reset. The monitor owns `stage` and
//! `last_active_at` but never touches history or connections itself: it
//! returns a [`LifecycleAction`] and the engine carries it out.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Gap after which a returning view counts as stale.
pub const DEFAULT_STALE_AFTER_SECS: u64 = 30;

/// Reattachments allowed before the session is reset.
pub const DEFAULT_MAX_STAGE: u32 = 10;

/// Staleness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Staleness {
    /// Not mounted yet.
    Fresh,
    /// Recently observed.
    Active,
    /// Came back after a long gap; a reattachment is pending.
    Stale,
}

/// Page/view visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Hidden,
    Visible,
}

/// What the engine must do after a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Nothing to do.
    None,
    /// Reattach to the incomplete tail item.
    Resume,
    /// Clear history, stage and activity; drop any connection.
    Reset,
}

/// Monitor thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub stale_after: Duration,
    pub max_stage: u32,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::seconds(DEFAULT_STALE_AFTER_SECS as i64),
            max_stage: DEFAULT_MAX_STAGE,
        }
    }
}

/// Staleness state machine: `Fresh → Active ⇄ Stale`.
#[derive(Debug, Clone)]
pub struct LifecycleMonitor {
    policy: LifecyclePolicy,
    state: Staleness,
    stage: u32,
    last_active_at: Option<DateTime<Utc>>,
}

impl LifecycleMonitor {
    /// Create a monitor seeded with persisted values.
    pub fn new(policy: LifecyclePolicy, stage: u32, last_active_at: Option<DateTime<Utc>>) -> Self {
        Self {
            policy,
            state: Staleness::Fresh,
            stage,
            last_active_at,
        }
    }

    pub fn state(&self) -> Staleness {
        self.state
    }

    pub fn stage(&self) -> u32 {
        self.stage
    }

    pub fn last_active_at(&self) -> Option<DateTime<Utc>> {
        self.last_active_at
    }

    pub fn policy(&self) -> LifecyclePolicy {
        self.policy
    }

    /// Initial mount. A previous activity time beyond the threshold makes
    /// the mount stale.
    pub fn on_mount(&mut self, now: DateTime<Utc>, has_incomplete_tail: bool) -> LifecycleAction {
        let action = if self.is_stale_at(now) {
            self.enter_stale(has_incomplete_tail)
        } else {
            LifecycleAction::None
        };
        self.refresh(now, action);
        action
    }

    /// Visibility change of the view.
    pub fn on_visibility(
        &mut self,
        visibility: Visibility,
        now: DateTime<Utc>,
        has_incomplete_tail: bool,
    ) -> LifecycleAction {
        match visibility {
            Visibility::Hidden => {
                self.last_active_at = Some(now);
                debug!("View hidden, activity recorded");
                LifecycleAction::None
            }
            Visibility::Visible => {
                let action = if self.is_stale_at(now) {
                    self.enter_stale(has_incomplete_tail)
                } else {
                    LifecycleAction::None
                };
                self.refresh(now, action);
                action
            }
        }
    }

    /// User-initiated send.
    pub fn on_user_send(&mut self, now: DateTime<Utc>) {
        self.last_active_at = Some(now);
        self.state = Staleness::Active;
    }

    /// A pending reattachment finished, failed, or was skipped.
    pub fn settle(&mut self, now: DateTime<Utc>) {
        if self.state == Staleness::Stale {
            self.state = Staleness::Active;
            self.last_active_at = Some(now);
        }
    }

    fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.last_active_at
            .is_some_and(|last| now.signed_duration_since(last) > self.policy.stale_after)
    }

    fn enter_stale(&mut self, has_incomplete_tail: bool) -> LifecycleAction {
        self.stage = self.stage.saturating_add(1);
        if self.stage > self.policy.max_stage {
            warn!(
                "Session needed {} reattachments (max {}), resetting",
                self.stage, self.policy.max_stage
            );
            self.stage = 0;
            self.last_active_at = None;
            return LifecycleAction::Reset;
        }
        info!("Session is stale, stage now {}", self.stage);
        if has_incomplete_tail {
            LifecycleAction::Resume
        } else {
            LifecycleAction::None
        }
    }

    fn refresh(&mut self, now: DateTime<Utc>, action: LifecycleAction) {
        self.last_active_at = Some(now);
        self.state = if action == LifecycleAction::Resume {
            Staleness::Stale
        } else {
            Staleness::Active
        };
    }
}
