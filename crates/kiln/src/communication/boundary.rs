use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc::error::TryRecvError;

use crate::backend::InferenceEngine;
use crate::config::ExecutorConfig;
use crate::core::worker::WorkerHandle;
use crate::executor::RunExecutor;

/// # Boundary
///
/// The controller's side of the link to an isolated context.
///
/// Nothing but JSON text frames crosses a boundary: the two sides never share
/// state. When the boundary is backed by a spawned worker, the [`WorkerHandle`]
/// travels with it so the worker lives exactly as long as the controller holding
/// the boundary.
pub struct Boundary {
    /// Frames towards the isolated context
    outbound: UnboundedSender<String>,

    /// Frames from the isolated context
    inbound: UnboundedReceiver<String>,

    /// Background task hosting the isolated context, if this boundary owns one
    worker: Option<WorkerHandle>,
}

impl Boundary {
    /// Creates a connected pair: the controller's `Boundary` and the isolated
    /// context's [`Endpoint`].
    pub fn channel() -> (Boundary, Endpoint) {
        let (to_worker, from_controller) = mpsc::unbounded_channel();
        let (to_controller, from_worker) = mpsc::unbounded_channel();

        let boundary = Boundary {
            outbound: to_worker,
            inbound: from_worker,
            worker: None,
        };
        let endpoint = Endpoint {
            inbound: from_controller,
            outbound: to_controller,
        };
        (boundary, endpoint)
    }

    /// Ties the lifetime of a background worker to this boundary.
    pub fn with_worker(mut self, worker: WorkerHandle) -> Self {
        self.worker = Some(worker);
        self
    }

    pub(crate) fn into_parts(self) -> (UnboundedSender<String>, UnboundedReceiver<String>, Option<WorkerHandle>) {
        (self.outbound, self.inbound, self.worker)
    }
}

/// The isolated context's side of a [`Boundary`].
pub struct Endpoint {
    inbound: UnboundedReceiver<String>,
    outbound: UnboundedSender<String>,
}

impl Endpoint {
    /// Waits for the next frame. Returns `None` once the controller is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Takes the next frame if one is already queued.
    pub fn try_recv(&mut self) -> Result<String, TryRecvError> {
        self.inbound.try_recv()
    }

    /// Posts a frame to the controller. Returns `false` if the controller is gone.
    pub fn send(&self, frame: String) -> bool {
        self.outbound.send(frame).is_ok()
    }
}

/// Creates the isolated context a [`Controller`](crate::controller::Controller)
/// talks to.
///
/// Any `FnOnce() -> Boundary` is a factory, which lets callers attach the
/// controller to a context they built themselves.
pub trait ContextFactory {
    fn create(self) -> Boundary;
}

impl<F> ContextFactory for F
where
    F: FnOnce() -> Boundary,
{
    fn create(self) -> Boundary {
        self()
    }
}

/// The default factory: hosts a [`RunExecutor`] on a background tokio task.
pub struct SpawnedExecutor<E> {
    engine: E,
    config: ExecutorConfig,
}

impl<E: InferenceEngine> SpawnedExecutor<E> {
    pub fn new(engine: E, config: ExecutorConfig) -> Self {
        Self { engine, config }
    }
}

impl<E: InferenceEngine> ContextFactory for SpawnedExecutor<E> {
    fn create(self) -> Boundary {
        let (boundary, endpoint) = Boundary::channel();
        let executor = RunExecutor::new(self.engine, self.config);

        let worker = WorkerHandle::new(move |running, notifier| {
            tokio::spawn(executor.serve(endpoint, running, notifier))
        });
        boundary.with_worker(worker)
    }
}
