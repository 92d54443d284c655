use serde::Serialize;

/// Snapshot of one arm for reports and inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArmSummary {
    pub index: usize,
    pub label: String,
    pub played: usize,
    pub in_flight: usize,
    pub mean_reward: f64,
    pub std_dev: f64,
    pub min_reward: f64,
    pub max_reward: f64,
    pub objective_mean: f64,
    pub objective_best: Option<f64>,
    /// Current index score, `None` while the arm is not in the index.
    pub score: Option<f64>,
    pub killed: bool,
}

/// State of the pool after one iteration of `play_iterations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationReport {
    pub iteration: usize,
    pub num_arms: usize,
    pub live_arms: usize,
    pub total_plays: usize,
    /// Best ranked arms, best first.
    pub top: Vec<ArmSummary>,
    /// Worst ranked arms, in ranking order.
    pub bottom: Vec<ArmSummary>,
    pub best: Option<ArmSummary>,
}

impl IterationReport {
    /// One line per listed arm, for information messages.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "iteration {}: {} arms ({} live), {} plays",
            self.iteration, self.num_arms, self.live_arms, self.total_plays
        )];
        for (tag, arms) in [("top", &self.top), ("bottom", &self.bottom)] {
            for arm in arms {
                lines.push(format!(
                    "{tag} #{} {} reward {:.4} +/- {:.4} over {} plays",
                    arm.index, arm.label, arm.mean_reward, arm.std_dev, arm.played
                ));
            }
        }
        lines
    }
}
