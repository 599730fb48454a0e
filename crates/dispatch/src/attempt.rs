//! The single "current dispatch attempt" slot
//!
//! Every attempt gets a generation number and a cancellation token. Beginning
//! a new attempt cancels the previous one and waits until it has released its
//! lease, so the old attempt's subscriptions and timers are gone before the
//! new attempt creates anything.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A running dispatch attempt. Dropping it releases the slot.
#[derive(Debug)]
pub struct Attempt {
    pub generation: u64,
    pub token: CancellationToken,
    _lease: OwnedMutexGuard<()>,
}

#[derive(Debug, Default)]
struct SlotState {
    generation: u64,
    token: Option<CancellationToken>,
}

/// Owner of the current attempt's generation and token
#[derive(Debug, Default)]
pub struct AttemptSlot {
    state: Mutex<SlotState>,
    lease: Arc<tokio::sync::Mutex<()>>,
}

impl AttemptSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Supersede the current attempt (if any) and start a new generation.
    ///
    /// Resolves once the previous attempt has been disposed.
    pub async fn begin(&self) -> Attempt {
        let (generation, token) = {
            let mut state = self.state();
            if let Some(previous) = state.token.take() {
                if !previous.is_cancelled() {
                    debug!(generation = state.generation, "Superseding in-flight dispatch attempt");
                }
                previous.cancel();
            }
            state.generation += 1;
            let token = CancellationToken::new();
            state.token = Some(token.clone());
            (state.generation, token)
        };

        let lease = self.lease.clone().lock_owned().await;

        Attempt {
            generation,
            token,
            _lease: lease,
        }
    }

    /// Replace `attempt` with a fresh generation that keeps its lease.
    ///
    /// Returns `None` when `attempt` was superseded or aborted, so a follow-up
    /// can never cancel a newer submit.
    pub fn renew(&self, attempt: Attempt) -> Option<Attempt> {
        let mut state = self.state();
        if state.generation != attempt.generation || attempt.token.is_cancelled() {
            return None;
        }

        attempt.token.cancel();
        state.generation += 1;
        let token = CancellationToken::new();
        state.token = Some(token.clone());

        Some(Attempt {
            generation: state.generation,
            token,
            _lease: attempt._lease,
        })
    }

    /// Cancel the current attempt. Returns false when nothing was running.
    pub fn abort(&self) -> bool {
        let state = self.state();
        match &state.token {
            Some(token) if !token.is_cancelled() => {
                debug!(generation = state.generation, "Aborting dispatch attempt");
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// True while `generation` is the newest attempt and has not been cancelled
    pub fn is_current(&self, generation: u64) -> bool {
        let state = self.state();
        state.generation == generation
            && state
                .token
                .as_ref()
                .is_some_and(|token| !token.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_begin_cancels_previous_attempt() {
        let slot = AttemptSlot::new();

        let first = slot.begin().await;
        assert_eq!(first.generation, 1);
        assert!(slot.is_current(1));
        let first_token = first.token.clone();
        drop(first);

        let second = slot.begin().await;
        assert_eq!(second.generation, 2);
        assert!(first_token.is_cancelled());
        assert!(!slot.is_current(1));
        assert!(slot.is_current(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_waits_for_previous_lease() {
        let slot = Arc::new(AttemptSlot::new());
        let first = slot.begin().await;

        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.begin().await.generation })
        };

        // The old attempt observes cancellation and is still disposing
        first.token.cancelled().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert_eq!(waiter.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_renew_keeps_lease_and_bumps_generation() {
        let slot = Arc::new(AttemptSlot::new());
        let first = slot.begin().await;
        let first_token = first.token.clone();

        let retry = slot.renew(first).unwrap();
        assert_eq!(retry.generation, 2);
        assert!(first_token.is_cancelled());
        assert!(slot.is_current(2));

        // The lease moved to the renewed attempt
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.begin().await.generation })
        };
        retry.token.cancelled().await;
        assert!(!waiter.is_finished());
        drop(retry);
        assert_eq!(waiter.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_renew_refuses_superseded_attempt() {
        let slot = Arc::new(AttemptSlot::new());
        let first = slot.begin().await;

        let newer = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.begin().await.generation })
        };
        first.token.cancelled().await;

        assert!(slot.renew(first).is_none());
        assert_eq!(newer.await.unwrap(), 2);
        assert!(slot.is_current(2));
    }

    #[tokio::test]
    async fn test_abort() {
        let slot = AttemptSlot::new();
        assert!(!slot.abort());

        let attempt = slot.begin().await;
        assert!(slot.abort());
        assert!(attempt.token.is_cancelled());
        assert!(!slot.is_current(attempt.generation));
        assert!(!slot.abort());
    }
}
