use std::fmt;
use std::sync::{Arc, PoisonError};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use taskgrid_execution::{ExecutionContext, Task, TaskOutcome};
use tracing::{debug, info};

use super::core::{BanditPool, Selection};
use crate::objective::BanditObjective;
use crate::report::IterationReport;

const BACKPRESSURE_SLEEP: Duration = Duration::from_millis(1);

/// One evaluation of an arm's candidate on one objective instance.
struct ArmEvaluation<T> {
    name: String,
    objective: Arc<dyn BanditObjective<T>>,
    parameter: Arc<T>,
    instance: usize,
}

impl<T: Send + Sync> Task for ArmEvaluation<T> {
    fn name(&self) -> &str {
        &self.name
    }

    /// Non-finite objective values become `null` and kill the arm.
    fn run(&self, context: &mut dyn ExecutionContext) -> TaskOutcome {
        let value = self
            .objective
            .compute_objective(context, &self.parameter, self.instance);
        Ok(Value::from(value))
    }
}

impl<T> BanditPool<T>
where
    T: fmt::Debug + Send + Sync + 'static,
{
    /// Pop the best arm and evaluate it once. Returns `false` when no arm
    /// can be selected.
    ///
    /// Under a multi-threaded context the evaluation is pushed as a work
    /// unit and observed when its callback is flushed; if every selectable
    /// arm is in flight this waits for one to come back.
    pub fn select_and_play_arm(&mut self, context: &mut dyn ExecutionContext) -> bool {
        let multi_thread = context.is_multi_thread();
        let Selection {
            arm,
            instance,
            parameter,
        } = loop {
            let (selected, in_flight) = {
                let mut state = self.state();
                (state.select(), state.in_flight())
            };
            match selected {
                Some(selection) => break selection,
                None if multi_thread && in_flight > 0 => {
                    context.flush_callbacks();
                    thread::sleep(BACKPRESSURE_SLEEP);
                }
                None => return false,
            }
        };

        let task: Arc<dyn Task> = Arc::new(ArmEvaluation {
            name: format!("Arm {} instance {}", arm, instance),
            objective: Arc::clone(&self.objective),
            parameter,
            instance,
        });

        if multi_thread {
            let state = Arc::clone(&self.state);
            context.push_work_unit(
                task,
                true,
                Box::new(move |outcome| {
                    state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .observe(arm, outcome);
                }),
            );
        } else {
            let outcome = context.run(task, true);
            self.state().observe(arm, outcome);
        }
        true
    }

    /// Play `num_time_steps` selections, then wait for every evaluation in
    /// flight. Returns how many selections were made.
    pub fn play(&mut self, context: &mut dyn ExecutionContext, num_time_steps: usize) -> usize {
        let mut played = 0;
        for _ in 0..num_time_steps {
            if !self.select_and_play_arm(context) {
                debug!(played, "no selectable arm left");
                break;
            }
            played += 1;
            while context.is_multi_thread() && self.num_in_flight() >= self.max_in_flight {
                context.flush_callbacks();
                thread::sleep(BACKPRESSURE_SLEEP);
            }
        }
        context.wait_until_all_work_units_are_done();
        played
    }

    /// Run `num_iterations` rounds of `steps_per_iteration` plays, each in
    /// its own scope, reporting the ranking after every round.
    pub fn play_iterations(
        &mut self,
        context: &mut dyn ExecutionContext,
        num_iterations: usize,
        steps_per_iteration: usize,
    ) -> Vec<IterationReport> {
        let mut reports = Vec::with_capacity(num_iterations);
        for _ in 0..num_iterations {
            self.iterations += 1;
            let iteration = self.iterations;
            context.enter_scope(&format!("Iteration {}", iteration), None);

            let played = self.play(context, steps_per_iteration);
            let report = self.iteration_report(iteration);
            for line in report.lines() {
                context.information("BanditPool", &line);
            }
            let value = serde_json::to_value(&report).unwrap_or(Value::Null);
            context.result("iteration", value.clone());
            context.leave_scope(&Ok(value));

            info!(
                iteration,
                played,
                live_arms = report.live_arms,
                best = ?report.best.as_ref().map(|b| b.index),
                "bandit iteration done"
            );
            reports.push(report);
        }
        reports
    }

    pub fn iteration_report(&self, iteration: usize) -> IterationReport {
        let state = self.state();
        let ranked = state.ranked();
        let k = self.report_size.min(ranked.len());
        let top = ranked[..k].iter().filter_map(|&id| state.summary(id)).collect();
        let bottom = ranked[ranked.len() - k..]
            .iter()
            .filter_map(|&id| state.summary(id))
            .collect();
        IterationReport {
            iteration,
            num_arms: state.arms.len(),
            live_arms: state.arms.iter().filter(|a| a.is_live()).count(),
            total_plays: state.arms.iter().map(|a| a.played()).sum(),
            top,
            bottom,
            best: ranked.first().and_then(|&id| state.summary(id)),
        }
    }
}
