//! Closure confirmation dialogs.
//!
//! One pending confirmation per user. The prompt starts in `Prompted` and
//! resolves exactly once into a terminal outcome: a confirm press, a cancel
//! press, or expiry. There is no sweeper task; expiry is checked lazily when
//! a press arrives, and an unexpired replacement prompt simply overwrites the
//! previous one. Unauthorized presses never reach the registry — the owner
//! gate in the handler rejects them first.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use crate::domain::UserId;

/// Button pressed on the dialog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Confirm,
    Cancel,
}

/// Terminal outcome of a button press against a pending confirmation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Proceed with closure.
    Confirmed,
    /// Leave the relay untouched.
    Cancelled,
    /// The press arrived after the timeout; the dialog is inert.
    Expired,
    /// No confirmation was pending for this user.
    NotPending,
}

#[derive(Clone, Copy, Debug)]
struct Pending {
    opened_at: Instant,
}

/// Registry of in-flight closure confirmations.
pub struct ConfirmRegistry {
    timeout: Duration,
    pending: Mutex<HashMap<UserId, Pending>>,
}

impl ConfirmRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Open (or replace) the pending confirmation for `user_id`.
    pub async fn open(&self, user_id: UserId) {
        self.open_at(user_id, Instant::now()).await;
    }

    pub async fn open_at(&self, user_id: UserId, now: Instant) {
        self.pending
            .lock()
            .await
            .insert(user_id, Pending { opened_at: now });
    }

    /// Resolve a button press. Terminal either way: the entry is removed.
    pub async fn resolve(&self, user_id: UserId, decision: Decision) -> ConfirmOutcome {
        self.resolve_at(user_id, decision, Instant::now()).await
    }

    pub async fn resolve_at(
        &self,
        user_id: UserId,
        decision: Decision,
        now: Instant,
    ) -> ConfirmOutcome {
        let mut pending = self.pending.lock().await;
        let Some(entry) = pending.remove(&user_id) else {
            return ConfirmOutcome::NotPending;
        };

        if now.duration_since(entry.opened_at) > self.timeout {
            return ConfirmOutcome::Expired;
        }

        match decision {
            Decision::Confirm => ConfirmOutcome::Confirmed,
            Decision::Cancel => ConfirmOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConfirmRegistry {
        ConfirmRegistry::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn confirm_and_cancel_resolve_once() {
        let reg = registry();

        reg.open(UserId(1)).await;
        assert_eq!(
            reg.resolve(UserId(1), Decision::Confirm).await,
            ConfirmOutcome::Confirmed
        );
        // Terminal: a second press finds nothing.
        assert_eq!(
            reg.resolve(UserId(1), Decision::Confirm).await,
            ConfirmOutcome::NotPending
        );

        reg.open(UserId(2)).await;
        assert_eq!(
            reg.resolve(UserId(2), Decision::Cancel).await,
            ConfirmOutcome::Cancelled
        );
    }

    #[tokio::test]
    async fn press_after_timeout_is_expired() {
        let reg = registry();
        let opened = Instant::now();
        reg.open_at(UserId(1), opened).await;

        let late = opened + Duration::from_secs(61);
        assert_eq!(
            reg.resolve_at(UserId(1), Decision::Confirm, late).await,
            ConfirmOutcome::Expired
        );
        // Expiry consumed the entry too.
        assert_eq!(
            reg.resolve_at(UserId(1), Decision::Cancel, late).await,
            ConfirmOutcome::NotPending
        );
    }

    #[tokio::test]
    async fn press_at_the_boundary_still_counts() {
        let reg = registry();
        let opened = Instant::now();
        reg.open_at(UserId(1), opened).await;

        let boundary = opened + Duration::from_secs(60);
        assert_eq!(
            reg.resolve_at(UserId(1), Decision::Cancel, boundary).await,
            ConfirmOutcome::Cancelled
        );
    }

    #[tokio::test]
    async fn reprompt_replaces_the_previous_dialog() {
        let reg = registry();
        let first = Instant::now();
        reg.open_at(UserId(1), first).await;
        // A fresh prompt much later resets the clock.
        let second = first + Duration::from_secs(300);
        reg.open_at(UserId(1), second).await;

        assert_eq!(
            reg.resolve_at(UserId(1), Decision::Confirm, second + Duration::from_secs(10))
                .await,
            ConfirmOutcome::Confirmed
        );
    }

    #[tokio::test]
    async fn press_without_prompt_is_not_pending() {
        let reg = registry();
        assert_eq!(
            reg.resolve(UserId(9), Decision::Cancel).await,
            ConfirmOutcome::NotPending
        );
    }
}
