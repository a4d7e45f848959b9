use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio::sync::mpsc::error::TryRecvError;

use super::run::ActiveRun;
use crate::backend::{InferenceEngine, InferenceSession, InputTensor};
use crate::communication::{
    decode,
    encode,
    Command,
    CorrelationId,
    Endpoint,
    Envelope,
    Inbound,
    ProgressReport,
    Response,
    Sample,
    WorkerMessage,
};
use crate::config::ExecutorConfig;
use crate::error::EngineError;

/// # RunExecutor
///
/// The isolated side of the boundary. It owns the inference session and the
/// buffer of the active run, and it only ever talks to the controller through
/// frames on its [`Endpoint`].
///
/// While a run is stepping, the executor handles one sample at a time and then
/// reaches a checkpoint: it yields for the configured interval and drains every
/// queued control frame before touching the next sample. A pause or cancel
/// therefore lands between two samples and never interrupts inference on one.
///
/// Every command is answered exactly once, tagged with the correlation id it
/// arrived with. The `run` command is the exception to answering promptly: it
/// is answered when the run finishes or is cancelled.
pub struct RunExecutor<E: InferenceEngine> {
    engine: E,
    config: ExecutorConfig,

    /// Directory relative model paths are resolved against
    asset_root: Option<PathBuf>,

    session: Option<E::Session>,

    /// Sample shape declared by the last successful load
    dimensions: Vec<usize>,

    active: Option<ActiveRun>,
}

impl<E: InferenceEngine> RunExecutor<E> {
    pub fn new(engine: E, config: ExecutorConfig) -> Self {
        Self {
            engine,
            config,
            asset_root: None,
            session: None,
            dimensions: Vec::new(),
            active: None,
        }
    }

    /// Serves the controller until it disconnects or `running` is cleared.
    pub async fn serve(mut self, mut endpoint: Endpoint, running: Arc<AtomicBool>, notifier: Arc<Notify>) {
        tracing::debug!("run executor started");

        while running.load(Ordering::SeqCst) {
            if self.is_stepping() {
                if !self.drain(&mut endpoint).await {
                    break;
                }
                if self.is_stepping() {
                    self.step(&endpoint).await;
                    self.checkpoint().await;
                }
                continue;
            }

            tokio::select! {
                frame = endpoint.recv() => match frame {
                    Some(frame) => self.handle_frame(&frame, &endpoint).await,
                    None => break,
                },
                _ = notifier.notified() => {}
            }
        }

        tracing::debug!("run executor stopped");
    }

    fn is_stepping(&self) -> bool {
        self.active.as_ref().is_some_and(ActiveRun::should_step)
    }

    /// Handles every frame already queued. Returns `false` once the controller
    /// is gone.
    async fn drain(&mut self, endpoint: &mut Endpoint) -> bool {
        loop {
            match endpoint.try_recv() {
                Ok(frame) => self.handle_frame(&frame, endpoint).await,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    async fn checkpoint(&self) {
        let interval = self.config.yield_interval();
        if interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(interval).await;
        }
    }

    async fn handle_frame(&mut self, frame: &str, endpoint: &Endpoint) {
        match decode::<Envelope>(frame) {
            Ok(Inbound::Message(Envelope { correlation_id, command })) => {
                tracing::debug!(correlation_id = %correlation_id, action = %command.action(), "command received");
                if let Some(response) = self.handle_command(correlation_id, command, endpoint).await {
                    post(endpoint, WorkerMessage::Response(response));
                }
            }
            Ok(Inbound::Unrecognized { action, correlation_id: Some(correlation_id) }) => {
                tracing::warn!(action = %action, correlation_id = %correlation_id, "unrecognized command refused");
                let response = Response::failed(correlation_id, format!("unrecognized action `{action}`"));
                post(endpoint, WorkerMessage::Response(response));
            }
            Ok(Inbound::Unrecognized { action, correlation_id: None }) => {
                tracing::warn!(action = %action, "unrecognized command without correlation id dropped");
            }
            Err(e) => {
                tracing::warn!(error = %e, "undecodable command dropped");
            }
        }
    }

    /// Returns the answer to send right away, if any.
    async fn handle_command(&mut self, id: CorrelationId, command: Command, endpoint: &Endpoint) -> Option<Response> {
        match command {
            Command::SetupWorker { root_path } => {
                tracing::info!(root = %root_path.display(), "asset root set");
                self.asset_root = Some(root_path);
                Some(Response::ok(id))
            }
            Command::LoadModel { path, dimensions } => Some(self.load_model(id, path, dimensions).await),
            Command::Run { samples } => self.start_run(id, samples),
            Command::Pause => Some(match self.active.as_mut() {
                Some(run) if run.is_paused() => Response::failed(id, "run already paused"),
                Some(run) => {
                    run.pause();
                    tracing::info!(run_id = %run.id(), complete = run.complete(), "run paused");
                    Response::ok(id).with_complete(run.complete())
                }
                None => Response::failed(id, "no run in progress"),
            }),
            Command::Resume => Some(match self.active.as_mut() {
                Some(run) if run.is_paused() => {
                    run.resume();
                    tracing::info!(run_id = %run.id(), complete = run.complete(), "run resumed");
                    Response::ok(id)
                }
                Some(_) => Response::failed(id, "run is not paused"),
                None => Response::failed(id, "no run in progress"),
            }),
            Command::Cancel => match self.active.take() {
                Some(run) => {
                    tracing::info!(run_id = %run.id(), complete = run.complete(), "run cancelled");
                    let answer = Response::ok(run.id()).with_results(Vec::new()).cancelled();
                    post(endpoint, WorkerMessage::Response(answer));
                    Some(Response::ok(id))
                }
                None => Some(Response::failed(id, "no run in progress")),
            },
        }
    }

    async fn load_model(&mut self, id: CorrelationId, path: PathBuf, dimensions: Vec<usize>) -> Response {
        if self.active.is_some() {
            return Response::failed(id, "cannot load a model while a run is in progress");
        }
        self.session = None;

        let path = match &self.asset_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        };
        match self.engine.create_session(&path).await {
            Ok(session) => {
                tracing::info!(path = %path.display(), ?dimensions, "model loaded");
                self.session = Some(session);
                self.dimensions = dimensions;
                Response::ok(id)
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "model load failed");
                Response::failed(id, e.to_string())
            }
        }
    }

    fn start_run(&mut self, id: CorrelationId, samples: Vec<Sample>) -> Option<Response> {
        if self.session.is_none() {
            return Some(Response::failed(id, "no model loaded"));
        }
        if self.active.is_some() {
            return Some(Response::failed(id, "a run is already in progress"));
        }
        if samples.is_empty() {
            return Some(Response::ok(id).with_results(Vec::new()));
        }

        tracing::info!(run_id = %id, samples = samples.len(), "run started");
        self.active = Some(ActiveRun::new(id, samples));
        None
    }

    /// Runs inference on the next sample of the active run, reports progress,
    /// and answers the run commission once the last sample is done.
    async fn step(&mut self, endpoint: &Endpoint) {
        let Some(run) = self.active.as_mut() else {
            return;
        };
        let Some((index, sample)) = run.next_sample() else {
            return;
        };

        let outcome = match (&self.session, InputTensor::from_sample(sample, &self.dimensions)) {
            (Some(session), Ok(input)) => session.run(&input).await,
            (None, _) => Err(EngineError::Inference("no model loaded".to_string())),
            (_, Err(e)) => Err(e),
        };
        if let Err(e) = &outcome {
            tracing::error!(run_id = %run.id(), index, error = %e, "sample failed");
        }
        run.record(outcome);

        post(endpoint, WorkerMessage::Progress(ProgressReport {
            run_id: run.id(),
            complete: run.complete(),
            success: run.success_flags(),
        }));

        if !run.is_finished() {
            return;
        }
        if let Some(run) = self.active.take() {
            let id = run.id();
            tracing::info!(run_id = %id, samples = run.len(), "run finished");
            post(endpoint, WorkerMessage::Response(Response::ok(id).with_results(run.into_results())));
        }
    }
}

fn post(endpoint: &Endpoint, message: WorkerMessage) {
    match encode(&message) {
        Ok(frame) => {
            if !endpoint.send(frame) {
                tracing::debug!("controller gone, message dropped");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to encode message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

    use crate::backend::mock::{expected_output, MockEngine};
    use crate::communication::{ContextFactory, SampleResult, SpawnedExecutor};
    use crate::core::worker::WorkerHandle;

    /// Plays the controller side of the boundary frame by frame.
    struct Script {
        outbound: UnboundedSender<String>,
        inbound: UnboundedReceiver<String>,
        _worker: Option<WorkerHandle>,
    }

    impl Script {
        fn start(engine: MockEngine, yield_interval_ms: u64) -> Self {
            let config = ExecutorConfig { yield_interval_ms };
            let (outbound, inbound, worker) = SpawnedExecutor::new(engine, config).create().into_parts();
            Self { outbound, inbound, _worker: worker }
        }

        fn send(&self, command: Command) -> CorrelationId {
            let correlation_id = CorrelationId::new();
            let frame = encode(&Envelope { correlation_id, command }).unwrap();
            self.outbound.send(frame).unwrap();
            correlation_id
        }

        async fn next(&mut self) -> WorkerMessage {
            let frame = self.inbound.recv().await.expect("executor hung up");
            match decode::<WorkerMessage>(&frame).unwrap() {
                Inbound::Message(message) => message,
                other => panic!("unexpected frame: {:?}", other),
            }
        }

        async fn response(&mut self) -> Response {
            loop {
                if let WorkerMessage::Response(response) = self.next().await {
                    return response;
                }
            }
        }

        async fn progress(&mut self) -> ProgressReport {
            match self.next().await {
                WorkerMessage::Progress(report) => report,
                other => panic!("expected progress, got {:?}", other),
            }
        }

        async fn ready(engine: MockEngine, yield_interval_ms: u64) -> Self {
            let mut script = Self::start(engine, yield_interval_ms);
            let setup = script.send(Command::SetupWorker { root_path: PathBuf::from("/models") });
            assert_eq!(script.response().await, Response::ok(setup));
            let load = script.send(Command::LoadModel { path: PathBuf::from("model.onnx"), dimensions: vec![] });
            assert_eq!(script.response().await, Response::ok(load));
            script
        }
    }

    #[tokio::test]
    async fn test_run_processes_every_sample_in_order() {
        let engine = MockEngine::new();
        let mut script = Script::ready(engine.clone(), 0).await;
        let samples = vec![vec![1.0, 2.0], vec![-1.0], vec![4.0]];

        let run = script.send(Command::Run { samples: samples.clone() });

        let mut completes = Vec::new();
        for _ in 0..samples.len() {
            let report = script.progress().await;
            assert_eq!(report.run_id, run);
            completes.push(report.complete);
        }
        assert_eq!(completes, vec![1, 2, 3]);

        let response = script.response().await;
        assert_eq!(response.correlation_id, run);
        assert!(response.success);
        assert_eq!(response.results, Some(vec![
            SampleResult::succeeded(expected_output(&samples[0])),
            SampleResult::failed(),
            SampleResult::succeeded(expected_output(&samples[2])),
        ]));
        assert_eq!(engine.seen(), samples);
    }

    #[tokio::test]
    async fn test_progress_carries_success_flags() {
        let mut script = Script::ready(MockEngine::new(), 0).await;
        script.send(Command::Run { samples: vec![vec![-1.0], vec![2.0]] });

        assert_eq!(script.progress().await.success, vec![Some(false), None]);
        assert_eq!(script.progress().await.success, vec![Some(false), Some(true)]);
    }

    #[tokio::test]
    async fn test_run_without_model_is_refused() {
        let mut script = Script::start(MockEngine::new(), 0);
        let run = script.send(Command::Run { samples: vec![vec![1.0]] });

        let response = script.response().await;
        assert_eq!(response.correlation_id, run);
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("no model loaded"));
    }

    #[tokio::test]
    async fn test_failed_load_leaves_no_session() {
        let mut script = Script::ready(MockEngine::new(), 0).await;

        let load = script.send(Command::LoadModel { path: PathBuf::from("missing.onnx"), dimensions: vec![] });
        let response = script.response().await;
        assert_eq!(response.correlation_id, load);
        assert!(!response.success);

        script.send(Command::Run { samples: vec![vec![1.0]] });
        assert!(!script.response().await.success);
    }

    #[tokio::test]
    async fn test_shape_mismatch_fails_the_sample_only() {
        let mut script = Script::start(MockEngine::new(), 0);
        script.send(Command::LoadModel { path: PathBuf::from("model.onnx"), dimensions: vec![2] });
        assert!(script.response().await.success);

        let run = script.send(Command::Run { samples: vec![vec![1.0], vec![1.0, 2.0]] });
        let response = script.response().await;
        assert_eq!(response.correlation_id, run);
        assert_eq!(response.results, Some(vec![
            SampleResult::failed(),
            SampleResult::succeeded(expected_output(&[1.0, 2.0])),
        ]));
    }

    #[tokio::test]
    async fn test_empty_run_answers_immediately() {
        let mut script = Script::ready(MockEngine::new(), 0).await;
        let run = script.send(Command::Run { samples: vec![] });

        assert_eq!(script.response().await, Response::ok(run).with_results(vec![]));
    }

    #[tokio::test]
    async fn test_queued_pause_lands_before_first_sample() {
        let engine = MockEngine::new();
        let mut script = Script::ready(engine.clone(), 0).await;

        script.send(Command::Run { samples: vec![vec![1.0], vec![2.0]] });
        let pause = script.send(Command::Pause);

        assert_eq!(script.response().await, Response::ok(pause).with_complete(0));
        assert!(engine.seen().is_empty());

        let again = script.send(Command::Pause);
        assert!(!script.response().await.success, "second pause {again} should fail");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_continue_where_they_stopped() {
        let engine = MockEngine::new();
        let mut script = Script::ready(engine.clone(), 100).await;
        let samples = vec![vec![1.0], vec![2.0], vec![3.0]];

        let run = script.send(Command::Run { samples: samples.clone() });
        assert_eq!(script.progress().await.complete, 1);

        let pause = script.send(Command::Pause);
        assert_eq!(script.response().await, Response::ok(pause).with_complete(1));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(script.inbound.try_recv().is_err());
        assert_eq!(engine.seen().len(), 1);

        let resume = script.send(Command::Resume);
        assert_eq!(script.response().await, Response::ok(resume));

        assert_eq!(script.progress().await.complete, 2);
        assert_eq!(script.progress().await.complete, 3);
        let response = script.response().await;
        assert_eq!(response.correlation_id, run);
        assert_eq!(response.results.map(|r| r.len()), Some(3));
        assert_eq!(engine.seen(), samples);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_during_inference_waits_for_the_sample() {
        let engine = MockEngine::with_delay(Duration::from_millis(200));
        let mut script = Script::ready(engine.clone(), 1).await;
        let samples = vec![vec![1.0], vec![2.0], vec![3.0]];

        let run = script.send(Command::Run { samples: samples.clone() });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.seen().len(), 1);
        let pause = script.send(Command::Pause);

        let report = script.progress().await;
        assert_eq!(report.complete, 1);
        assert_eq!(report.success, vec![Some(true), None, None]);
        assert_eq!(script.response().await, Response::ok(pause).with_complete(1));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(engine.seen().len(), 1);

        let resume = script.send(Command::Resume);
        assert_eq!(script.response().await, Response::ok(resume));
        let response = script.response().await;
        assert_eq!(response.correlation_id, run);
        assert_eq!(response.results, Some(samples.iter().map(|s| SampleResult::succeeded(expected_output(s))).collect()));
        assert_eq!(engine.seen(), samples);
    }

    #[tokio::test]
    async fn test_cancel_answers_the_run_and_discards_it() {
        let mut script = Script::ready(MockEngine::new(), 0).await;

        let run = script.send(Command::Run { samples: vec![vec![1.0], vec![2.0]] });
        script.send(Command::Pause);
        assert!(script.response().await.success);

        let cancel = script.send(Command::Cancel);
        let cancelled = script.response().await;
        assert_eq!(cancelled, Response::ok(run).with_results(vec![]).cancelled());
        assert_eq!(script.response().await, Response::ok(cancel));

        let resume = script.send(Command::Resume);
        assert_eq!(script.response().await, Response::failed(resume, "no run in progress"));
    }

    #[tokio::test]
    async fn test_load_is_refused_during_a_run() {
        let mut script = Script::ready(MockEngine::new(), 0).await;
        script.send(Command::Run { samples: vec![vec![1.0]] });
        script.send(Command::Pause);
        assert!(script.response().await.success);

        let load = script.send(Command::LoadModel { path: PathBuf::from("other.onnx"), dimensions: vec![] });
        let response = script.response().await;
        assert_eq!(response.correlation_id, load);
        assert!(!response.success);
    }

    #[tokio::test]
    async fn test_unrecognized_command_is_answered_with_failure() {
        let mut script = Script::start(MockEngine::new(), 0);
        let id = CorrelationId::new();

        script.outbound.send(r#"{"action":"frobnicate"}"#.to_string()).unwrap();
        script.outbound.send(format!(r#"{{"action":"frobnicate","correlationId":"{id}"}}"#)).unwrap();

        let response = script.response().await;
        assert_eq!(response.correlation_id, id);
        assert_eq!(response.error.as_deref(), Some("unrecognized action `frobnicate`"));
    }

    #[tokio::test]
    async fn test_executor_stops_when_controller_leaves() {
        let script = Script::start(MockEngine::new(), 0);
        let Script { outbound, inbound, _worker } = script;
        let worker = _worker.unwrap();
        drop(outbound);
        drop(inbound);

        for _ in 0..100 {
            if worker.is_finished() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("executor kept running without a controller");
    }
}
