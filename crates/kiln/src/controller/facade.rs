use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Mutex};

use super::commission::{CommissionRegistry, Pending, Settlement};
use super::progress::RunProgress;
use super::waiter::{Phase, Waiter, WaiterRegistry};
use crate::backend::{InferenceEngine, OutputMap};
use crate::communication::{
    decode,
    encode,
    Action,
    Command,
    ContextFactory,
    CorrelationId,
    Envelope,
    Inbound,
    ProgressReport,
    Sample,
    SampleResult,
    SpawnedExecutor,
    WorkerMessage,
};
use crate::config::{ControllerConfig, KilnConfig, SetupConfig};
use crate::core::worker::WorkerHandle;
use crate::error::{CommissionError, ControlError};

/// Lifecycle of the model inside the isolated context.
///
/// Once a load has been requested the state never returns to `NotLoaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    NotLoaded,
    Loading,
    Loaded,
    Error,
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelState::NotLoaded => "not_loaded",
            ModelState::Loading => "loading",
            ModelState::Loaded => "loaded",
            ModelState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Run-control state as the controller sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
}

struct ControlState {
    model: ModelState,
    run: RunState,
    /// Correlation id of the `run` commission the state belongs to
    run_id: Option<CorrelationId>,
    /// Bumped by every pause, so a timed resume can tell if it is stale
    pause_epoch: u64,
}

/// State shared between the controller handles and the inbound router.
///
/// The router never holds the outbound half of the boundary, so dropping the
/// last [`Controller`] closes the boundary even while the router is alive.
struct Shared {
    commissions: CommissionRegistry,
    waiters: WaiterRegistry,
    state: Mutex<ControlState>,
    progress: watch::Sender<RunProgress>,
}

struct Link {
    outbound: UnboundedSender<String>,
    _worker: Option<WorkerHandle>,
}

/// # Controller
///
/// Caller-facing handle that drives a [`RunExecutor`] living on the other side
/// of a [`Boundary`].
///
/// Every command becomes a commission: it is tagged with a fresh correlation id,
/// sent as a frame, and settled by the response carrying the same id. Progress
/// frames are routed by kind and update [`RunProgress`] without settling
/// anything.
///
/// Each fallible command comes in two flavours. The `try_*` methods return a
/// [`ControlError`]; the plain methods log the error and return a falsy value
/// instead, so a refused command never surfaces as a failure to the caller.
///
/// Handles are cheap to clone and all clones drive the same isolated context.
/// It is shut down once the last clone is dropped.
///
/// [`RunExecutor`]: crate::executor::RunExecutor
/// [`Boundary`]: crate::communication::Boundary
#[derive(Clone)]
pub struct Controller {
    config: Arc<ControllerConfig>,
    shared: Arc<Shared>,
    link: Arc<Link>,
}

impl Controller {
    /// Creates the isolated context through `factory` and starts routing its
    /// messages. Must be called from within a tokio runtime.
    pub fn new(config: ControllerConfig, factory: impl ContextFactory) -> Self {
        let (outbound, inbound, worker) = factory.create().into_parts();
        let (progress, _) = watch::channel(RunProgress::default());

        let shared = Arc::new(Shared {
            commissions: CommissionRegistry::new(),
            waiters: WaiterRegistry::with_active(&[Phase::Init]),
            state: Mutex::new(ControlState {
                model: ModelState::NotLoaded,
                run: RunState::Idle,
                run_id: None,
                pause_epoch: 0,
            }),
            progress,
        });
        tokio::spawn(route_inbound(shared.clone(), inbound));

        Self {
            config: Arc::new(config),
            shared,
            link: Arc::new(Link {
                outbound,
                _worker: worker,
            }),
        }
    }

    /// Hosts a [`RunExecutor`](crate::executor::RunExecutor) for `engine` on a
    /// background task and attaches a controller to it.
    pub fn spawn<E: InferenceEngine>(config: &KilnConfig, engine: E) -> Self {
        Self::new(
            config.controller.clone(),
            SpawnedExecutor::new(engine, config.executor.clone()),
        )
    }

    pub async fn model_state(&self) -> ModelState {
        self.shared.state.lock().await.model
    }

    pub async fn run_state(&self) -> RunState {
        self.shared.state.lock().await.run
    }

    pub async fn is_run_in_progress(&self) -> bool {
        self.run_state().await != RunState::Idle
    }

    /// Fraction of the current run completed, between `0.0` and `1.0`.
    pub fn run_progress(&self) -> f64 {
        self.shared.progress.borrow().fraction()
    }

    pub fn progress(&self) -> RunProgress {
        *self.shared.progress.borrow()
    }

    /// Observes every progress change, including resets.
    pub fn subscribe_progress(&self) -> watch::Receiver<RunProgress> {
        self.shared.progress.subscribe()
    }

    /// Resolves once `phase` completes, immediately if it is not underway.
    pub async fn wait_for(&self, phase: Phase) -> Waiter {
        self.shared.waiters.wait(phase).await
    }

    /// Resolves once the first [`setup_worker`](Self::setup_worker) finishes.
    pub async fn initial_setup(&self) -> Waiter {
        self.wait_for(Phase::Init).await
    }

    pub async fn setup_worker(&self, setup: SetupConfig) -> bool {
        report("setup_worker", self.try_setup_worker(setup).await).is_some()
    }

    pub async fn try_setup_worker(&self, setup: SetupConfig) -> Result<(), ControlError> {
        let root_path = self.config.resolve_root(setup.root_path.as_deref());
        tracing::info!(root = %root_path.display(), "setting up isolated context");

        let outcome = self.command(Command::SetupWorker { root_path }).await;
        self.shared.waiters.notify(Phase::Init, outcome.is_ok()).await;
        outcome?;
        Ok(())
    }

    /// Loads the model at `path`, relative paths resolving against the asset
    /// root. A successful load carries no payload beyond its acknowledgement,
    /// so `true` is the whole of the engine's answer.
    pub async fn load_model(&self, path: impl AsRef<Path>) -> bool {
        report("load_model", self.try_load_model(path).await).is_some()
    }

    pub async fn try_load_model(&self, path: impl AsRef<Path>) -> Result<(), ControlError> {
        let path = path.as_ref().to_path_buf();
        {
            let mut state = self.shared.state.lock().await;
            if state.model == ModelState::Loading {
                return Err(ControlError::LoadInProgress);
            }
            if state.run != RunState::Idle {
                return Err(ControlError::RunInProgress);
            }
            state.model = ModelState::Loading;
            self.shared.waiters.begin(Phase::Load).await;
        }
        tracing::info!(path = %path.display(), "loading model");

        let dimensions = self.config.input_shape.clone();
        let outcome = self.command(Command::LoadModel { path: path.clone(), dimensions }).await;

        let mut state = self.shared.state.lock().await;
        let loaded = outcome.is_ok();
        state.model = if loaded { ModelState::Loaded } else { ModelState::Error };
        self.shared.waiters.notify(Phase::Load, loaded).await;
        drop(state);

        outcome?;
        tracing::info!(path = %path.display(), "model loaded");
        Ok(())
    }

    /// Runs inference over `samples`, returning one entry per sample in order:
    /// the output, or `None` where inference failed. Returns an empty vector if
    /// the run could not start or was cancelled.
    pub async fn run(&self, samples: Vec<Sample>) -> Vec<Option<OutputMap>> {
        report("run", self.try_run(samples).await).unwrap_or_default()
    }

    pub async fn try_run(&self, samples: Vec<Sample>) -> Result<Vec<Option<OutputMap>>, ControlError> {
        if samples.is_empty() {
            return Err(ControlError::EmptyBatch);
        }
        let target = samples.len();

        let (run_id, pending) = loop {
            {
                let mut state = self.shared.state.lock().await;
                if state.run != RunState::Idle {
                    return Err(ControlError::RunInProgress);
                }
                match state.model {
                    ModelState::Loaded => {
                        let (run_id, pending) = self.shared.commissions.register(Action::Run).await;
                        // sent under the lock so no cancel can overtake the run frame
                        if let Err(e) = self.send(run_id, Command::Run { samples }).await {
                            return Err(e.into());
                        }
                        state.run = RunState::Running;
                        state.run_id = Some(run_id);
                        self.shared.progress.send_replace(RunProgress::starting(target));
                        self.shared.waiters.begin(Phase::Run).await;
                        break (run_id, pending);
                    }
                    ModelState::Loading => {}
                    other => return Err(ControlError::ModelNotReady(other)),
                }
            }
            // a failed load leaves the model in `Error`, which the next pass rejects
            self.wait_for(Phase::Load).await.await;
        };

        tracing::info!(run_id = %run_id, samples = target, "run started");

        match pending.await {
            Ok(response) if response.cancelled => {
                tracing::info!(run_id = %run_id, "run cancelled");
                Ok(Vec::new())
            }
            Ok(response) => {
                let mut results = response.results.unwrap_or_default();
                results.resize(target, SampleResult::default());
                self.finish_run(run_id, true).await;

                let failed = results.iter().filter(|r| r.success != Some(true)).count();
                tracing::info!(run_id = %run_id, samples = target, failed, "run finished");
                Ok(results.into_iter().map(|result| result.value).collect())
            }
            Err(e) => {
                self.finish_run(run_id, false).await;
                Err(e.into())
            }
        }
    }

    /// Pauses the current run at its next checkpoint. With `duration`, the run
    /// resumes by itself afterwards unless it was resumed or paused again in
    /// the meantime.
    pub async fn pause_run(&self, duration: Option<Duration>) -> bool {
        report("pause_run", self.try_pause_run(duration).await).is_some()
    }

    pub async fn try_pause_run(&self, duration: Option<Duration>) -> Result<(), ControlError> {
        let (run_id, epoch) = {
            let mut state = self.shared.state.lock().await;
            if state.run != RunState::Running {
                return Err(ControlError::NotRunning);
            }
            state.run = RunState::Paused;
            state.pause_epoch += 1;
            self.shared.waiters.begin(Phase::Pause).await;
            (state.run_id, state.pause_epoch)
        };

        let response = match self.command(Command::Pause).await {
            Ok(response) => response,
            Err(e) => {
                let mut state = self.shared.state.lock().await;
                if state.run == RunState::Paused && state.pause_epoch == epoch {
                    state.run = RunState::Running;
                    self.shared.waiters.notify(Phase::Pause, false).await;
                }
                return Err(e.into());
            }
        };

        if let (Some(run_id), Some(complete)) = (run_id, response.complete) {
            self.shared.record_progress(run_id, complete).await;
        }
        tracing::info!(complete = ?response.complete, "run paused");

        if let Some(after) = duration {
            let controller = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if let Err(e) = controller.resume(Some(epoch)).await {
                    tracing::debug!(error = %e, "timed resume skipped");
                }
            });
        }
        Ok(())
    }

    pub async fn resume_run(&self) -> bool {
        report("resume_run", self.try_resume_run().await).is_some()
    }

    pub async fn try_resume_run(&self) -> Result<(), ControlError> {
        self.resume(None).await
    }

    async fn resume(&self, expected_epoch: Option<u64>) -> Result<(), ControlError> {
        {
            let mut state = self.shared.state.lock().await;
            if state.run != RunState::Paused {
                return Err(ControlError::NotPaused);
            }
            if expected_epoch.is_some_and(|epoch| epoch != state.pause_epoch) {
                return Err(ControlError::NotPaused);
            }
            state.run = RunState::Running;
            self.shared.waiters.notify(Phase::Pause, true).await;
        }

        self.command(Command::Resume).await?;
        tracing::info!("run resumed");
        Ok(())
    }

    /// Cancels the current run, discarding its partial results.
    pub async fn cancel_run(&self) -> bool {
        report("cancel_run", self.try_cancel_run().await).is_some()
    }

    pub async fn try_cancel_run(&self) -> Result<(), ControlError> {
        {
            let mut state = self.shared.state.lock().await;
            if state.run == RunState::Idle {
                return Err(ControlError::Idle);
            }
            let was_paused = state.run == RunState::Paused;
            state.run = RunState::Idle;
            state.run_id = None;
            self.shared.waiters.notify(Phase::Run, false).await;
            if was_paused {
                self.shared.waiters.notify(Phase::Pause, false).await;
            }
        }

        let outcome = self.command(Command::Cancel).await;
        self.shared.progress.send_replace(RunProgress::default());
        outcome?;
        tracing::info!("run cancelled");
        Ok(())
    }

    /// Zeroes progress, cancelling the current run first if there is one.
    pub async fn reset_progress(&self) {
        if self.is_run_in_progress().await {
            report("reset_progress", self.try_cancel_run().await);
        }
        self.shared.progress.send_replace(RunProgress::default());
    }

    /// Returns the run to idle unless a cancel or a newer run already took over.
    async fn finish_run(&self, run_id: CorrelationId, outcome: bool) {
        let mut state = self.shared.state.lock().await;
        if state.run_id != Some(run_id) {
            return;
        }
        let was_paused = state.run == RunState::Paused;
        state.run = RunState::Idle;
        state.run_id = None;
        if was_paused {
            self.shared.waiters.notify(Phase::Pause, false).await;
        }
        self.shared.waiters.notify(Phase::Run, outcome).await;
    }

    /// Issues a control command, bounded by its deadline.
    async fn command(&self, command: Command) -> Settlement {
        let action = command.action();
        let (correlation_id, pending) = self.shared.commissions.register(action).await;
        self.send(correlation_id, command).await?;
        self.settle(correlation_id, pending, self.deadline(action)).await
    }

    /// Pause and cancel only land at the executor's next checkpoint, after the
    /// sample in flight, so they wait without a deadline like the run itself.
    /// A dead executor still settles them through the disconnect path.
    fn deadline(&self, action: Action) -> Option<Duration> {
        match action {
            Action::Run | Action::Pause | Action::Cancel => None,
            Action::SetupWorker | Action::LoadModel | Action::Resume => self.config.command_timeout(),
        }
    }

    async fn send(&self, correlation_id: CorrelationId, command: Command) -> Result<(), CommissionError> {
        let action = command.action();
        let frame = match encode(&Envelope { correlation_id, command }) {
            Ok(frame) => frame,
            Err(e) => {
                self.shared.commissions.forget(correlation_id).await;
                return Err(e.into());
            }
        };
        if self.link.outbound.send(frame).is_err() {
            self.shared.commissions.forget(correlation_id).await;
            return Err(CommissionError::Disconnected);
        }
        tracing::debug!(correlation_id = %correlation_id, action = %action, "command sent");
        Ok(())
    }

    async fn settle(&self, correlation_id: CorrelationId, pending: Pending, timeout: Option<Duration>) -> Settlement {
        let Some(after) = timeout else {
            return pending.await;
        };
        let action = pending.action();
        match tokio::time::timeout(after, pending).await {
            Ok(settlement) => settlement,
            Err(_) => {
                // a response arriving later finds nothing to settle
                self.shared.commissions.forget(correlation_id).await;
                Err(CommissionError::TimedOut { action, after })
            }
        }
    }
}

impl Shared {
    async fn record_progress(&self, run_id: CorrelationId, complete: usize) {
        let state = self.state.lock().await;
        if state.run_id != Some(run_id) {
            tracing::debug!(run_id = %run_id, complete, "progress for inactive run ignored");
            return;
        }
        self.progress.send_if_modified(|progress| progress.advance(complete));
    }
}

/// Routes frames from the isolated context until it disconnects: responses by
/// correlation id, progress by kind.
async fn route_inbound(shared: Arc<Shared>, mut inbound: UnboundedReceiver<String>) {
    while let Some(frame) = inbound.recv().await {
        match decode::<WorkerMessage>(&frame) {
            Ok(Inbound::Message(WorkerMessage::Response(response))) => {
                shared.commissions.settle(response).await;
            }
            Ok(Inbound::Message(WorkerMessage::Progress(ProgressReport { run_id, complete, .. }))) => {
                shared.record_progress(run_id, complete).await;
            }
            Ok(Inbound::Unrecognized { action, correlation_id }) => {
                tracing::warn!(action = %action, correlation_id = ?correlation_id, "unrecognized message ignored");
            }
            Err(e) => {
                tracing::warn!(error = %e, "undecodable message ignored");
            }
        }
    }

    let orphaned = shared.commissions.reject_all().await;
    tracing::warn!(orphaned, "isolated context disconnected");
}

/// Logs a refused or failed command and converts it to `None`.
fn report<T>(operation: &'static str, result: Result<T, ControlError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(ControlError::Commission(e)) => {
            tracing::error!(operation, error = %e, "command failed");
            None
        }
        Err(e) => {
            tracing::warn!(operation, error = %e, "command refused");
            None
        }
    }
}
