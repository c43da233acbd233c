//! Batch builds on a bounded worker pool.
//!
//! Targets are claimed in dependency order: a scenario referenced by another
//! target is built first, and a dependent waits for its dependencies' reports.
//! A failed dependency fails the dependent without any oracle work.
use super::{Orchestrator, ScenarioOutcome, ScenarioReport};
use crate::error::BuildError;
use crate::scenario::{Scenario, ScenarioStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unseen,
    Visiting,
    Done,
}

/// Claim order over `targets` and, per target, the targets it waits for.
///
/// Reference cycles are broken at the back edge; such scenarios fail on
/// reference expansion anyway.
fn plan(targets: &[&Scenario], scenarios: &ScenarioStore) -> (Vec<usize>, Vec<Vec<usize>>) {
    let depends_on: Vec<Vec<usize>> = targets
        .iter()
        .map(|target| {
            scenarios
                .dependencies(target)
                .iter()
                .filter_map(|dependency| {
                    targets
                        .iter()
                        .position(|candidate| candidate.name == dependency.name)
                })
                .collect()
        })
        .collect();

    fn visit(index: usize, edges: &[Vec<usize>], state: &mut [Visit], order: &mut Vec<usize>) {
        if state[index] != Visit::Unseen {
            return;
        }
        state[index] = Visit::Visiting;
        for &dependency in &edges[index] {
            visit(dependency, edges, state, order);
        }
        state[index] = Visit::Done;
        order.push(index);
    }

    let mut state = vec![Visit::Unseen; targets.len()];
    let mut order = Vec::with_capacity(targets.len());
    for index in 0..targets.len() {
        visit(index, &depends_on, &mut state, &mut order);
    }

    let mut position = vec![0; targets.len()];
    for (claimed, &index) in order.iter().enumerate() {
        position[index] = claimed;
    }
    let waits_on = depends_on
        .into_iter()
        .enumerate()
        .map(|(index, dependencies)| {
            dependencies
                .into_iter()
                .filter(|&dependency| position[dependency] < position[index])
                .collect()
        })
        .collect();
    (order, waits_on)
}

impl Orchestrator<'_> {
    /// Build `targets` with at most `settings.workers` concurrent scenarios.
    ///
    /// Each scenario is built sequentially by one worker; a failure is
    /// recorded in that scenario's report and never stops unrelated
    /// siblings. Reports come back in `targets` order.
    pub fn build_all(
        &self,
        targets: &[&Scenario],
        scenarios: &ScenarioStore,
    ) -> Vec<ScenarioReport> {
        let workers = self.settings.workers.clamp(1, targets.len().max(1));
        let (order, waits_on) = plan(targets, scenarios);
        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<ScenarioReport>>> =
            Mutex::new((0..targets.len()).map(|_| None).collect());
        let reported = Condvar::new();

        std::thread::scope(|scope| {
            for worker in 0..workers {
                let (next, slots, reported) = (&next, &slots, &reported);
                let (order, waits_on) = (&order, &waits_on);
                scope.spawn(move || loop {
                    let Some(&index) = order.get(next.fetch_add(1, Ordering::SeqCst)) else {
                        break;
                    };
                    let scenario = targets[index];
                    let blocked = {
                        let mut slots = slots
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        while waits_on[index].iter().any(|&dependency| slots[dependency].is_none())
                        {
                            slots = reported
                                .wait(slots)
                                .unwrap_or_else(|poisoned| poisoned.into_inner());
                        }
                        dependency_outcome(scenario, &waits_on[index], &slots)
                    };

                    let report = match blocked {
                        Some(outcome) => ScenarioReport {
                            scenario: scenario.name.clone(),
                            outcome,
                            duration: Duration::ZERO,
                        },
                        None if self.cancelled() => ScenarioReport {
                            scenario: scenario.name.clone(),
                            outcome: ScenarioOutcome::Cancelled,
                            duration: Duration::ZERO,
                        },
                        None => {
                            tracing::debug!(worker, scenario = %scenario.name, "building");
                            self.build_scenario(scenario, scenarios)
                        }
                    };
                    let mut slots = slots
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    slots[index] = Some(report);
                    reported.notify_all();
                });
            }
        });

        slots
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .into_iter()
            .zip(targets)
            .map(|(slot, scenario)| {
                slot.unwrap_or_else(|| ScenarioReport {
                    scenario: scenario.name.clone(),
                    outcome: ScenarioOutcome::Failed {
                        step_index: None,
                        error: anyhow::anyhow!("worker exited without a report"),
                        last_observation: None,
                    },
                    duration: Duration::ZERO,
                })
            })
            .collect()
    }
}

/// The outcome forced on `scenario` by a dependency that did not build.
fn dependency_outcome(
    scenario: &Scenario,
    dependencies: &[usize],
    slots: &[Option<ScenarioReport>],
) -> Option<ScenarioOutcome> {
    for report in dependencies.iter().filter_map(|&index| slots[index].as_ref()) {
        match report.outcome {
            ScenarioOutcome::Failed { .. } => {
                tracing::warn!(
                    scenario = %scenario.name,
                    dependency = %report.scenario,
                    "dependency failed; skipping"
                );
                return Some(ScenarioOutcome::Failed {
                    step_index: None,
                    error: BuildError::DependencyFailed {
                        scenario: scenario.name.clone(),
                        dependency: report.scenario.clone(),
                    }
                    .into(),
                    last_observation: None,
                });
            }
            ScenarioOutcome::Cancelled => return Some(ScenarioOutcome::Cancelled),
            ScenarioOutcome::Skipped | ScenarioOutcome::Built { .. } => {}
        }
    }
    None
}
