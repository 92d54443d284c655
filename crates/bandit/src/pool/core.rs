use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use taskgrid_core::BanditConfig;
use taskgrid_execution::TaskOutcome;
use tracing::{debug, warn};

use crate::arm::Arm;
use crate::index::ArmIndex;
use crate::objective::{BanditObjective, ObjectiveRange};
use crate::report::ArmSummary;

/// Default cap on evaluations in flight under a multi-threaded context.
pub const MAX_IN_FLIGHT: usize = 10;

pub(super) const DEFAULT_REPORT_SIZE: usize = 5;

/// Parameters of the index score.
#[derive(Debug, Clone, Copy)]
pub(super) struct Scoring {
    pub(super) range: ObjectiveRange,
    pub(super) exploration: f64,
    pub(super) optimize_max: bool,
    pub(super) num_instances: usize,
}

impl Scoring {
    /// `+inf` for unplayed arms, `-inf` for exhausted ones, otherwise the
    /// mean (or best) reward plus `exploration / played`.
    pub(super) fn score<T>(&self, arm: &Arm<T>) -> f64 {
        let played = arm.played();
        if played == 0 {
            return f64::INFINITY;
        }
        if self.num_instances > 0 && played >= self.num_instances {
            return f64::NEG_INFINITY;
        }
        self.ranking_key(arm) + self.exploration / played as f64
    }

    pub(super) fn ranking_key<T>(&self, arm: &Arm<T>) -> f64 {
        if self.optimize_max {
            arm.stats.max()
        } else {
            arm.stats.mean()
        }
    }
}

/// One arm taken out of the index for evaluation.
pub(super) struct Selection<T> {
    pub(super) arm: usize,
    pub(super) instance: usize,
    pub(super) parameter: Arc<T>,
}

pub(super) struct PoolState<T> {
    pub(super) arms: Vec<Arm<T>>,
    pub(super) index: ArmIndex,
    pub(super) scoring: Scoring,
}

impl<T> PoolState<T> {
    pub(super) fn select(&mut self) -> Option<Selection<T>> {
        let (id, score) = self.index.pop_selectable()?;
        let arm = &mut self.arms[id];
        let instance = arm.issued;
        arm.issued += 1;
        arm.in_flight += 1;
        debug!(arm = id, instance, score, "arm selected");
        Some(Selection {
            arm: id,
            instance,
            parameter: Arc::clone(&arm.parameter),
        })
    }

    pub(super) fn in_flight(&self) -> usize {
        self.arms.iter().map(|a| a.in_flight).sum()
    }

    /// Apply the outcome of one evaluation of `id` and put the arm back in
    /// the index unless it was killed or removed.
    pub(super) fn observe(&mut self, id: usize, outcome: TaskOutcome) {
        let scoring = self.scoring;
        let Some(arm) = self.arms.get_mut(id) else {
            return;
        };
        arm.in_flight = arm.in_flight.saturating_sub(1);
        if !arm.is_live() {
            return;
        }

        let value = match outcome {
            Ok(value) => value.as_f64(),
            Err(e) => {
                warn!(arm = id, error = %e, "evaluation failed");
                None
            }
        };
        match value {
            Some(value) if !scoring.range.is_sentinel(value) => {
                let best = arm
                    .stats
                    .objective_best()
                    .map_or(value, |b| scoring.range.better(b, value));
                arm.stats.push(scoring.range.reward(value), value, best);
                let score = scoring.score(arm);
                self.index.insert(id, score);
            }
            _ => {
                warn!(arm = id, played = arm.played(), "arm killed");
                arm.killed = true;
                self.index.remove(id);
            }
        }
    }

    pub(super) fn summary(&self, id: usize) -> Option<ArmSummary>
    where
        T: fmt::Debug,
    {
        let arm = self.arms.get(id)?;
        let stats = arm.stats();
        Some(ArmSummary {
            index: id,
            label: format!("{:?}", arm.parameter),
            played: arm.played(),
            in_flight: arm.in_flight,
            mean_reward: stats.mean(),
            std_dev: stats.std_dev(),
            min_reward: stats.min(),
            max_reward: stats.max(),
            objective_mean: stats.objective_mean(),
            objective_best: stats.objective_best(),
            score: self.index.score(id),
            killed: arm.killed,
        })
    }

    /// Live arms with at least one observation, best first.
    pub(super) fn ranked(&self) -> Vec<usize> {
        let mut ranked: Vec<(usize, f64)> = self
            .arms
            .iter()
            .enumerate()
            .filter(|(_, arm)| arm.is_live() && arm.played() > 0)
            .map(|(id, arm)| (id, self.scoring.ranking_key(arm)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().map(|(id, _)| id).collect()
    }
}

/// Chooses which candidate to evaluate next among a growing set of arms.
pub struct BanditPool<T> {
    pub(super) objective: Arc<dyn BanditObjective<T>>,
    pub(super) state: Arc<Mutex<PoolState<T>>>,
    pub(super) max_in_flight: usize,
    pub(super) report_size: usize,
    pub(super) iterations: usize,
}

impl<T> BanditPool<T>
where
    T: fmt::Debug + Send + Sync + 'static,
{
    /// `optimize_max` ranks arms by the best reward seen instead of the mean.
    pub fn new(objective: Arc<dyn BanditObjective<T>>, exploration_coefficient: f64, optimize_max: bool) -> Self {
        let (worst, best) = objective.objective_range();
        let scoring = Scoring {
            range: ObjectiveRange::new(worst, best),
            exploration: exploration_coefficient,
            optimize_max,
            num_instances: objective.num_instances(),
        };
        Self {
            objective,
            state: Arc::new(Mutex::new(PoolState {
                arms: Vec::new(),
                index: ArmIndex::new(),
                scoring,
            })),
            max_in_flight: MAX_IN_FLIGHT,
            report_size: DEFAULT_REPORT_SIZE,
            iterations: 0,
        }
    }

    pub fn from_config(objective: Arc<dyn BanditObjective<T>>, config: &BanditConfig, optimize_max: bool) -> Self {
        Self::new(objective, config.exploration_coefficient, optimize_max)
            .with_max_in_flight(config.max_in_flight)
            .with_report_size(config.report_size)
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Number of arms listed at each end of an iteration report.
    pub fn with_report_size(mut self, report_size: usize) -> Self {
        self.report_size = report_size;
        self
    }

    pub(super) fn state(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn objective(&self) -> &Arc<dyn BanditObjective<T>> {
        &self.objective
    }

    pub fn exploration_coefficient(&self) -> f64 {
        self.state().scoring.exploration
    }

    pub fn reserve_arms(&mut self, additional: usize) {
        self.state().arms.reserve(additional);
    }

    /// Add a candidate. It is selected before every played arm.
    pub fn create_arm(&mut self, parameter: T) -> usize {
        let mut state = self.state();
        let id = state.arms.len();
        state.arms.push(Arm::new(parameter));
        state.index.insert(id, f64::INFINITY);
        id
    }

    /// Arms ever created, removed ones included.
    pub fn num_arms(&self) -> usize {
        self.state().arms.len()
    }

    pub fn arm(&self, id: usize) -> Option<ArmSummary> {
        self.state().summary(id)
    }

    pub fn arm_parameter(&self, id: usize) -> Option<Arc<T>> {
        self.state().arms.get(id).map(|arm| Arc::clone(&arm.parameter))
    }

    /// Score the arm would be ranked with now. `None` for unknown, killed
    /// or removed arms.
    pub fn index_score(&self, id: usize) -> Option<f64> {
        let state = self.state();
        let arm = state.arms.get(id).filter(|arm| arm.is_live())?;
        Some(state.scoring.score(arm))
    }

    /// Take an arm out of selection for good. Its slot is kept so arm
    /// indices stay stable; an evaluation in flight is ignored on return.
    pub fn remove_arm(&mut self, id: usize) -> bool {
        let mut state = self.state();
        let Some(arm) = state.arms.get_mut(id) else {
            return false;
        };
        if arm.removed {
            return false;
        }
        arm.removed = true;
        state.index.remove(id);
        debug!(arm = id, "arm removed");
        true
    }

    /// Evaluations issued and not yet observed.
    pub fn num_in_flight(&self) -> usize {
        self.state().in_flight()
    }

    pub fn ranked_arms(&self) -> Vec<usize> {
        self.state().ranked()
    }

    pub fn arm_with_highest_reward(&self) -> Option<usize> {
        self.ranked_arms().first().copied()
    }
}
