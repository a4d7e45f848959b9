//! Module for owning the background task that hosts the isolated context.

use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use tokio::{task::JoinHandle, sync::Notify};

/// A handle for managing the background task that runs a [`RunExecutor`].
///
/// The task is handed a running flag and a wake notifier when it is spawned.
/// It is expected to check the flag whenever it wakes and return once the flag
/// is cleared.
///
/// # Example
///
/// ```ignore
/// use kiln::core::worker::WorkerHandle;
/// use std::sync::atomic::Ordering;
///
/// async fn example() {
///     let worker = WorkerHandle::new(|running, notifier| {
///         tokio::spawn(async move {
///             while running.load(Ordering::SeqCst) {
///                 notifier.notified().await;
///             }
///         })
///     });
///
///     // Worker will be automatically shut down when dropped
/// }
/// ```
///
/// [`RunExecutor`]: crate::executor::RunExecutor
pub struct WorkerHandle {
    /// Flag indicating whether the background task should continue running
    running: Arc<AtomicBool>,

    /// Handle to the spawned background task, becomes `None` after shutdown is initiated
    handle: Option<JoinHandle<()>>,

    /// Notification mechanism to wake up the background task
    notifier: Arc<Notify>,
}

impl WorkerHandle {
    /// Creates a new `WorkerHandle` by spawning a background task.
    ///
    /// # Parameters
    ///
    /// * `task` - A function that takes a running flag and a notifier, and returns a `JoinHandle`.
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>, Arc<Notify>) -> JoinHandle<()>,
    {
        let running = Arc::new(AtomicBool::new(true));
        let notifier = Arc::new(Notify::new());
        let handle = task(running.clone(), notifier.clone());

        Self {
            running,
            handle: Some(handle),
            notifier,
        }
    }

    /// Returns whether the background task has been asked to keep running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Initiates a graceful shutdown of the background task.
    ///
    /// This method:
    /// 1. Sets the running flag to `false`
    /// 2. Notifies the task to wake up (so it can observe that it should stop)
    /// 3. Takes ownership of the task handle and, if a runtime is available,
    ///    spawns a separate task to await its completion
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.notifier.notify_one();

        if let Some(handle) = self.handle.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        if let Err(e) = handle.await {
                            tracing::warn!(error = %e, "isolated context task ended abnormally");
                        }
                    });
                }
                Err(_) => handle.abort(),
            }
        }
    }
}

impl Drop for WorkerHandle {
    /// Ensures the background task is properly terminated when the handle is dropped.
    fn drop(&mut self) {
        self.shutdown();
    }
}
