//! One-shot "opened" signal shared by every audio sender of a session.

use std::time::Duration;
use tokio::sync::watch;

/// Outcome of waiting on the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Pending,
    /// `opened` arrived; audio may flow
    Released,
    /// The session ended before it ever opened
    Abandoned,
}

/// A single-assignment cell that many tasks can await.
///
/// The first call to [`release`](OpenGate::release) or
/// [`abandon`](OpenGate::abandon) decides the outcome; later calls are
/// ignored. Waiting after the outcome is known returns immediately.
#[derive(Debug)]
pub struct OpenGate {
    tx: watch::Sender<GateState>,
}

impl Default for OpenGate {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState::Pending);
        Self { tx }
    }

    /// Returns `true` if this call decided the outcome.
    pub fn release(&self) -> bool {
        self.settle(GateState::Released)
    }

    pub fn abandon(&self) -> bool {
        self.settle(GateState::Abandoned)
    }

    fn settle(&self, outcome: GateState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == GateState::Pending {
                *state = outcome;
                true
            } else {
                false
            }
        })
    }

    pub fn state(&self) -> GateState {
        *self.tx.borrow()
    }

    /// Wait until the gate is settled and report how.
    pub async fn wait(&self) -> GateState {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let outcome = match rx.wait_for(|state| *state != GateState::Pending).await {
            Ok(state) => *state,
            Err(_) => GateState::Abandoned,
        };
        outcome
    }

    /// Like [`wait`](OpenGate::wait) but gives up after `timeout`,
    /// returning `Pending`.
    pub async fn wait_timeout(&self, timeout: Option<Duration>) -> GateState {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait())
                .await
                .unwrap_or(GateState::Pending),
            None => self.wait().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_release_wakes_waiters() {
        let gate = Arc::new(OpenGate::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.wait().await })
            })
            .collect();

        tokio::task::yield_now().await;
        assert!(gate.release());

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), GateState::Released);
        }
    }

    #[tokio::test]
    async fn test_settles_once() {
        let gate = OpenGate::new();
        assert!(gate.release());
        assert!(!gate.release());
        assert!(!gate.abandon());
        assert_eq!(gate.state(), GateState::Released);
        // Already settled: returns without blocking
        assert_eq!(gate.wait().await, GateState::Released);
        assert_eq!(gate.wait().await, GateState::Released);
    }

    #[tokio::test]
    async fn test_abandon() {
        let gate = OpenGate::new();
        assert!(gate.abandon());
        assert!(!gate.release());
        assert_eq!(gate.wait().await, GateState::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout() {
        let gate = OpenGate::new();
        let state = gate.wait_timeout(Some(Duration::from_millis(50))).await;
        assert_eq!(state, GateState::Pending);
    }
}
