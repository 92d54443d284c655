use taskgrid_execution::ExecutionContext;

/// A stochastic objective the pool evaluates candidates against.
///
/// Each evaluation of an arm uses the next instance index, starting at 0.
pub trait BanditObjective<T>: Send + Sync {
    /// Number of distinct instances; an arm played this many times is
    /// retired. 0 means unbounded.
    fn num_instances(&self) -> usize;

    /// `(worst, best)` objective values. `best` may be lower than `worst`
    /// for objectives that are minimized.
    fn objective_range(&self) -> (f64, f64);

    fn compute_objective(&self, context: &mut dyn ExecutionContext, candidate: &T, instance_index: usize) -> f64;
}

/// Objective range and the derived reward mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveRange {
    pub worst: f64,
    pub best: f64,
}

impl ObjectiveRange {
    pub fn new(worst: f64, best: f64) -> Self {
        Self { worst, best }
    }

    pub fn maximizes(&self) -> bool {
        self.best > self.worst
    }

    /// Value reported for an arm that must not be scored again: non-finite,
    /// or at the representable extreme on the worst side.
    pub fn is_sentinel(&self, value: f64) -> bool {
        if !value.is_finite() {
            return true;
        }
        if self.maximizes() {
            value <= f64::MIN
        } else {
            value >= f64::MAX
        }
    }

    /// Objective value mapped to `[0, 1]`, 1 being `best`.
    pub fn reward(&self, value: f64) -> f64 {
        let span = self.best - self.worst;
        if span == 0.0 {
            return 0.0;
        }
        ((value - self.worst) / span).clamp(0.0, 1.0)
    }

    /// The better of two objective values.
    pub fn better(&self, a: f64, b: f64) -> f64 {
        if self.maximizes() {
            a.max(b)
        } else {
            a.min(b)
        }
    }
}
