//! `PendingOperation`: a cancellable one-shot future representing an
//! in-flight subscribe/unsubscribe.
//!
//! Implemented as a small state machine broadcast over a
//! `tokio::sync::watch` channel, generalizing a `Notify`-based wakeup
//! (`notify: Notify` / `.notified()`) to a value that also carries the
//! outcome.

use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingState {
    Pending,
    Succeeded,
    Failed(String),
    Canceled,
}

impl PendingState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PendingState::Pending)
    }
}

/// One side of a `PendingOperation`: held by whoever issued the
/// subscribe/unsubscribe call, used to resolve or cancel it.
#[derive(Clone)]
pub struct PendingHandle {
    tx: watch::Sender<PendingState>,
}

impl PendingHandle {
    pub fn resolve(&self, outcome: PendingState) {
        // Ignore send errors: if every `PendingOperation` clone has been
        // dropped, nobody is waiting and there's nothing to do.
        let _ = self.tx.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = outcome.clone();
                true
            }
        });
    }
}

/// The awaitable side. Cheap to clone, every clone observes the same
/// underlying state transition.
#[derive(Clone)]
pub struct PendingOperation {
    rx: watch::Receiver<PendingState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Succeeded,
    Failed(String),
    Canceled,
    TimedOut,
}

impl PendingOperation {
    pub fn new() -> (PendingHandle, PendingOperation) {
        let (tx, rx) = watch::channel(PendingState::Pending);
        (PendingHandle { tx }, PendingOperation { rx })
    }

    pub fn is_pending(&self) -> bool {
        !self.rx.borrow().is_terminal()
    }

    /// Race the operation's resolution against `timeout`.
    pub async fn wait(&mut self, timeout: Duration) -> WaitOutcome {
        if self.rx.borrow().is_terminal() {
            return Self::outcome_of(&self.rx.borrow());
        }
        let changed = tokio::time::timeout(timeout, self.rx.changed()).await;
        match changed {
            Err(_) => WaitOutcome::TimedOut,
            Ok(Err(_)) => WaitOutcome::Canceled, // sender dropped without resolving
            Ok(Ok(())) => Self::outcome_of(&self.rx.borrow()),
        }
    }

    fn outcome_of(state: &PendingState) -> WaitOutcome {
        match state {
            PendingState::Pending => WaitOutcome::TimedOut, // unreachable in practice
            PendingState::Succeeded => WaitOutcome::Succeeded,
            PendingState::Failed(msg) => WaitOutcome::Failed(msg.clone()),
            PendingState::Canceled => WaitOutcome::Canceled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_observes_a_later_resolution() {
        let (handle, mut op) = PendingOperation::new();
        assert!(op.is_pending());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            handle.resolve(PendingState::Succeeded);
        });
        let outcome = op.wait(Duration::from_secs(1)).await;
        assert_eq!(outcome, WaitOutcome::Succeeded);
    }

    #[tokio::test]
    async fn wait_times_out_when_nobody_resolves() {
        let (_handle, mut op) = PendingOperation::new();
        let outcome = op.wait(Duration::from_millis(5)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn cancel_is_observed_by_a_waiting_clone() {
        let (handle, mut op) = PendingOperation::new();
        let mut op2 = op.clone();
        handle.resolve(PendingState::Canceled);
        assert_eq!(op.wait(Duration::from_secs(1)).await, WaitOutcome::Canceled);
        assert_eq!(op2.wait(Duration::from_secs(1)).await, WaitOutcome::Canceled);
    }

    #[test]
    fn resolution_is_terminal_and_first_write_wins() {
        let (handle, op) = PendingOperation::new();
        handle.resolve(PendingState::Succeeded);
        handle.resolve(PendingState::Failed("too late".into()));
        assert_eq!(*op.rx.borrow(), PendingState::Succeeded);
    }
}
