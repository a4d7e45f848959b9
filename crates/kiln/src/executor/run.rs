use crate::backend::OutputMap;
use crate::communication::{CorrelationId, Sample, SampleResult};
use crate::error::EngineError;

/// # ActiveRun
///
/// The buffer owned by one activation of the sample loop.
///
/// A fresh `ActiveRun` is created for every `run` command and is identified by
/// that command's correlation id, so the results of a cancelled run can never
/// leak into the next one. The buffer survives pauses: resuming simply keeps
/// stepping from `next`.
#[derive(Debug)]
pub struct ActiveRun {
    /// Correlation id of the `run` commission awaiting this buffer
    id: CorrelationId,

    samples: Vec<Sample>,

    /// One entry per sample, in sample order
    results: Vec<SampleResult>,

    /// Index of the next sample to process
    next: usize,

    /// Cleared by a pause, observed at the next checkpoint
    continue_flag: bool,
}

impl ActiveRun {
    pub fn new(id: CorrelationId, samples: Vec<Sample>) -> Self {
        let results = vec![SampleResult::default(); samples.len()];
        Self {
            id,
            samples,
            results,
            next: 0,
            continue_flag: true,
        }
    }

    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub fn is_paused(&self) -> bool {
        !self.continue_flag
    }

    /// Returns `false` if the run was already paused.
    pub fn pause(&mut self) -> bool {
        std::mem::replace(&mut self.continue_flag, false)
    }

    /// Returns `false` if the run was not paused.
    pub fn resume(&mut self) -> bool {
        !std::mem::replace(&mut self.continue_flag, true)
    }

    /// Whether the loop should process another sample right now.
    pub fn should_step(&self) -> bool {
        self.continue_flag && !self.is_finished()
    }

    pub fn next_sample(&self) -> Option<(usize, &Sample)> {
        self.samples.get(self.next).map(|sample| (self.next, sample))
    }

    /// Stores the outcome for the current sample and moves past it.
    pub fn record(&mut self, outcome: Result<OutputMap, EngineError>) {
        let Some(slot) = self.results.get_mut(self.next) else {
            return;
        };
        *slot = match outcome {
            Ok(value) => SampleResult::succeeded(value),
            Err(_) => SampleResult::failed(),
        };
        self.next += 1;
    }

    pub fn complete(&self) -> usize {
        self.next
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.next >= self.samples.len()
    }

    pub fn success_flags(&self) -> Vec<Option<bool>> {
        self.results.iter().map(|result| result.success).collect()
    }

    pub fn into_results(self) -> Vec<SampleResult> {
        self.results
    }
}
