/// Completion of the current run.
///
/// `target` is fixed when a run starts; `complete` only grows within that run
/// and never passes `target`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunProgress {
    pub complete: usize,
    pub target: usize,
}

impl RunProgress {
    pub fn starting(target: usize) -> Self {
        Self { complete: 0, target }
    }

    /// `complete / target`, or `0.0` when there is no target.
    pub fn fraction(&self) -> f64 {
        if self.target == 0 {
            return 0.0;
        }
        (self.complete.min(self.target) as f64) / (self.target as f64)
    }

    /// Records a reported completion count. Stale (lower) counts are ignored.
    pub fn advance(&mut self, complete: usize) -> bool {
        let complete = complete.min(self.target);
        if complete <= self.complete {
            return false;
        }
        self.complete = complete;
        true
    }

    pub fn is_finished(&self) -> bool {
        self.target > 0 && self.complete >= self.target
    }
}
