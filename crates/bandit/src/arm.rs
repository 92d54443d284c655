use std::sync::Arc;

use serde::Serialize;

/// Running reward statistics of one arm (Welford updates).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArmStatistics {
    count: usize,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    objective_mean: f64,
    objective_best: Option<f64>,
}

impl ArmStatistics {
    pub fn push(&mut self, reward: f64, objective: f64, objective_best: f64) {
        self.count += 1;
        let n = self.count as f64;
        let delta = reward - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (reward - self.mean);
        if self.count == 1 {
            self.min = reward;
            self.max = reward;
        } else {
            self.min = self.min.min(reward);
            self.max = self.max.max(reward);
        }
        self.objective_mean += (objective - self.objective_mean) / n;
        self.objective_best = Some(objective_best);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn objective_mean(&self) -> f64 {
        self.objective_mean
    }

    pub fn objective_best(&self) -> Option<f64> {
        self.objective_best
    }
}

/// A candidate and its evaluation history.
#[derive(Debug)]
pub struct Arm<T> {
    pub(crate) parameter: Arc<T>,
    pub(crate) stats: ArmStatistics,
    /// Evaluations issued so far; the next one uses this instance index.
    pub(crate) issued: usize,
    pub(crate) in_flight: usize,
    pub(crate) killed: bool,
    pub(crate) removed: bool,
}

impl<T> Arm<T> {
    pub(crate) fn new(parameter: T) -> Self {
        Self {
            parameter: Arc::new(parameter),
            stats: ArmStatistics::default(),
            issued: 0,
            in_flight: 0,
            killed: false,
            removed: false,
        }
    }

    pub fn parameter(&self) -> &Arc<T> {
        &self.parameter
    }

    pub fn stats(&self) -> &ArmStatistics {
        &self.stats
    }

    pub fn played(&self) -> usize {
        self.stats.count()
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Still eligible for selection once its evaluations return.
    pub fn is_live(&self) -> bool {
        !self.killed && !self.removed
    }
}
