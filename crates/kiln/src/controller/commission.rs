use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use futures::FutureExt;
use tokio::sync::{oneshot, Mutex};

use crate::communication::{Action, CorrelationId, Response};
use crate::error::CommissionError;

/// What a commission settles with.
pub type Settlement = Result<Response, CommissionError>;

/// One outstanding request across the boundary.
struct Commission {
    action: Action,
    resolver: oneshot::Sender<Settlement>,
}

/// # CommissionRegistry
///
/// Tracks every command sent across the boundary until its response arrives.
///
/// Each registration draws a fresh [`CorrelationId`] and parks the resolving half
/// of a oneshot channel under it. Settling removes the entry, so a commission
/// settles at most once: a second response carrying the same id finds nothing
/// and is dropped.
///
/// The registry never sends anything itself. The caller registers first, then
/// puts the tagged command on the wire, which keeps the registry free of any
/// reference to the boundary.
#[derive(Default)]
pub struct CommissionRegistry {
    pending: Mutex<HashMap<CorrelationId, Commission>>,
}

impl CommissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a commission for `action` and returns its id and the future it
    /// settles.
    pub async fn register(&self, action: Action) -> (CorrelationId, Pending) {
        let (resolver, receiver) = oneshot::channel();
        let mut pending = self.pending.lock().await;

        let mut correlation_id = CorrelationId::new();
        while pending.contains_key(&correlation_id) {
            correlation_id = CorrelationId::new();
        }
        pending.insert(correlation_id, Commission { action, resolver });

        (correlation_id, Pending { action, receiver })
    }

    /// Resolves or rejects the commission a response answers, depending on
    /// its `success` flag.
    ///
    /// Returns `false` when no live commission carries the response's id.
    pub async fn settle(&self, response: Response) -> bool {
        if response.success {
            let correlation_id = response.correlation_id;
            self.resolve(correlation_id, response).await
        } else {
            let correlation_id = response.correlation_id;
            let reason = response.error.unwrap_or_else(|| "no reason given".to_string());
            self.reject_with(correlation_id, |action| CommissionError::Rejected { action, reason }).await
        }
    }

    pub async fn resolve(&self, correlation_id: CorrelationId, response: Response) -> bool {
        match self.take(correlation_id).await {
            Some(commission) => {
                tracing::debug!(correlation_id = %correlation_id, action = %commission.action, "commission resolved");
                // the caller may have stopped waiting
                let _ = commission.resolver.send(Ok(response));
                true
            }
            None => {
                tracing::warn!(correlation_id = %correlation_id, "response for unknown commission ignored");
                false
            }
        }
    }

    pub async fn reject(&self, correlation_id: CorrelationId, error: CommissionError) -> bool {
        self.reject_with(correlation_id, |_| error).await
    }

    async fn reject_with<F>(&self, correlation_id: CorrelationId, error: F) -> bool
    where
        F: FnOnce(Action) -> CommissionError,
    {
        match self.take(correlation_id).await {
            Some(commission) => {
                let error = error(commission.action);
                tracing::debug!(correlation_id = %correlation_id, error = %error, "commission rejected");
                let _ = commission.resolver.send(Err(error));
                true
            }
            None => {
                tracing::warn!(correlation_id = %correlation_id, "rejection for unknown commission ignored");
                false
            }
        }
    }

    /// Drops a commission without settling it, so a late response is ignored.
    pub async fn forget(&self, correlation_id: CorrelationId) -> bool {
        self.take(correlation_id).await.is_some()
    }

    /// Rejects every outstanding commission with [`CommissionError::Disconnected`].
    pub async fn reject_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        let count = drained.len();
        for (_, commission) in drained {
            let _ = commission.resolver.send(Err(CommissionError::Disconnected));
        }
        count
    }

    /// Number of commissions still waiting for a response.
    pub async fn outstanding(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn take(&self, correlation_id: CorrelationId) -> Option<Commission> {
        self.pending.lock().await.remove(&correlation_id)
    }
}

/// # Pending
///
/// Future side of a commission. Resolves once with the matching response,
/// or with [`CommissionError::Disconnected`] if the registry lets go of the
/// commission without settling it.
pub struct Pending {
    action: Action,
    receiver: oneshot::Receiver<Settlement>,
}

impl Pending {
    pub fn action(&self) -> Action {
        self.action
    }
}

impl Future for Pending {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.receiver.poll_unpin(cx) {
            Poll::Ready(Ok(settlement)) => Poll::Ready(settlement),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CommissionError::Disconnected)),
            Poll::Pending => Poll::Pending,
        }
    }
}
