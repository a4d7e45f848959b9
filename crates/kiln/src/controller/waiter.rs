use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use futures::FutureExt;
use tokio::sync::{oneshot, Mutex};

/// Asynchronous phases observers can wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The isolated context has been set up
    Init,
    /// A model load finished
    Load,
    /// A paused run was resumed
    Pause,
    /// A run finished, by completing or by being cancelled
    Run,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Load => "load",
            Phase::Pause => "pause",
            Phase::Run => "run",
        };
        f.write_str(name)
    }
}

/// # WaiterRegistry
///
/// Named one-shot broadcast points. A phase becomes active with
/// [`begin`](WaiterRegistry::begin); every [`wait`](WaiterRegistry::wait) while it
/// is active joins its group, and [`notify`](WaiterRegistry::notify) hands the same
/// outcome to the whole group and retires it. Waiting on a phase that is not
/// active succeeds immediately.
#[derive(Default)]
pub struct WaiterRegistry {
    groups: Mutex<HashMap<Phase, Vec<oneshot::Sender<bool>>>>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with `phases` already active.
    pub fn with_active(phases: &[Phase]) -> Self {
        let groups = phases.iter().map(|phase| (*phase, Vec::new())).collect();
        Self { groups: Mutex::new(groups) }
    }

    /// Starts a fresh group for `phase`. Waiters of a group this replaces are
    /// released with `false`.
    pub async fn begin(&self, phase: Phase) {
        let superseded = self.groups.lock().await.insert(phase, Vec::new());
        if let Some(waiters) = superseded {
            if !waiters.is_empty() {
                tracing::debug!(phase = %phase, waiters = waiters.len(), "superseded waiter group released");
            }
            for waiter in waiters {
                let _ = waiter.send(false);
            }
        }
    }

    pub async fn wait(&self, phase: Phase) -> Waiter {
        let mut groups = self.groups.lock().await;
        match groups.get_mut(&phase) {
            Some(group) => {
                let (sender, receiver) = oneshot::channel();
                group.push(sender);
                Waiter::pending(receiver)
            }
            None => Waiter::ready(true),
        }
    }

    /// Resolves every waiter of `phase` with `outcome` and retires the group.
    ///
    /// Returns the number of waiters released.
    pub async fn notify(&self, phase: Phase, outcome: bool) -> usize {
        let group = self.groups.lock().await.remove(&phase);
        let waiters = group.unwrap_or_default();
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(outcome);
        }
        count
    }

    pub async fn is_active(&self, phase: Phase) -> bool {
        self.groups.lock().await.contains_key(&phase)
    }
}

/// # Waiter
///
/// Resolves to the outcome a phase was notified with. A waiter whose group
/// disappears without a notification resolves to `false`.
pub struct Waiter {
    state: WaiterState,
}

enum WaiterState {
    Ready(bool),
    Pending(oneshot::Receiver<bool>),
}

impl Waiter {
    fn ready(outcome: bool) -> Self {
        Self { state: WaiterState::Ready(outcome) }
    }

    fn pending(receiver: oneshot::Receiver<bool>) -> Self {
        Self { state: WaiterState::Pending(receiver) }
    }
}

impl Future for Waiter {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            WaiterState::Ready(outcome) => Poll::Ready(*outcome),
            WaiterState::Pending(receiver) => receiver
                .poll_unpin(cx)
                .map(|outcome| outcome.unwrap_or(false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use futures::future::join_all;

    #[tokio::test]
    async fn test_inactive_phase_is_vacuously_satisfied() {
        let waiters = WaiterRegistry::new();
        assert!(waiters.wait(Phase::Load).await.await);
    }

    #[tokio::test]
    async fn test_notify_resolves_whole_group() {
        let waiters = WaiterRegistry::new();
        waiters.begin(Phase::Load).await;

        let mut group = Vec::new();
        for _ in 0..3 {
            group.push(waiters.wait(Phase::Load).await);
        }

        assert_eq!(waiters.notify(Phase::Load, false).await, 3);
        assert_eq!(join_all(group).await, vec![false, false, false]);
        assert!(!waiters.is_active(Phase::Load).await);
    }

    #[tokio::test]
    async fn test_waiter_blocks_until_notified() {
        let waiters = std::sync::Arc::new(WaiterRegistry::new());
        waiters.begin(Phase::Run).await;
        let waiter = waiters.wait(Phase::Run).await;

        let notifier = {
            let waiters = waiters.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                waiters.notify(Phase::Run, true).await
            })
        };

        assert!(waiter.await);
        assert_eq!(notifier.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wait_after_notify_is_immediate() {
        let waiters = WaiterRegistry::new();
        waiters.begin(Phase::Init).await;
        waiters.notify(Phase::Init, false).await;

        assert!(waiters.wait(Phase::Init).await.await);
    }

    #[tokio::test]
    async fn test_begin_supersedes_active_group() {
        let waiters = WaiterRegistry::new();
        waiters.begin(Phase::Load).await;
        let stale = waiters.wait(Phase::Load).await;

        waiters.begin(Phase::Load).await;
        let fresh = waiters.wait(Phase::Load).await;
        waiters.notify(Phase::Load, true).await;

        assert!(!stale.await);
        assert!(fresh.await);
    }

    #[tokio::test]
    async fn test_phases_are_independent() {
        let waiters = WaiterRegistry::new();
        waiters.begin(Phase::Pause).await;
        waiters.begin(Phase::Run).await;
        let pause = waiters.wait(Phase::Pause).await;

        waiters.notify(Phase::Run, true).await;
        assert!(waiters.is_active(Phase::Pause).await);

        waiters.notify(Phase::Pause, true).await;
        assert!(pause.await);
    }
}
