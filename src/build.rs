//! Build orchestrator: drives one scenario from guide to finished artifact.
//!
//! Per scenario the loop is `Pending -> Stepping -> Completed | Failed`:
//!
//! 1. **Pending**: take the scenario lock, load progress, and drop it if the
//!    scenario hash moved. Complete progress with a current artifact is a
//!    cache hit and touches neither the oracle nor the sandbox.
//! 2. **Stepping**: execute the accepted fragments once for an observation,
//!    then for each remaining step ask for a fragment, execute it appended to
//!    the accepted code, and record it only if the execution is clean.
//! 3. **Completed**: assemble the accepted fragments into the artifact.
//!
//! Progress is durable per step and is never rolled back when a later step
//! fails, so the next invocation resumes where this one stopped.
use crate::assemble::{artifact_is_current, assemble, write_artifact};
use crate::error::{BuildError, ExecutionFailure, FailureKind};
use crate::guide::{ensure_guide, Guide, GuideGenerator};
use crate::oracle::Oracle;
use crate::paths::ProjectPaths;
use crate::progress::{Progress, ProgressStore};
use crate::sandbox::{Observation, Sandbox};
use crate::scenario::{Scenario, ScenarioStore};
use crate::step::{check_structure, RetryContext, StepGenerator, StepReply, StepRequest};
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

mod batch;

/// Limits and switches for a build invocation.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub base_url: String,
    /// Step Generator calls allowed per step description.
    pub max_step_attempts: usize,
    pub max_reference_depth: usize,
    pub workers: usize,
    /// Print each rejected attempt's diagnostic detail.
    pub verbose: bool,
}

#[derive(Debug)]
pub enum ScenarioOutcome {
    /// Complete progress and a current artifact; nothing ran.
    Skipped,
    Built {
        artifact: PathBuf,
        steps: usize,
    },
    Failed {
        /// None when the scenario failed before stepping (guide, references).
        step_index: Option<usize>,
        error: anyhow::Error,
        last_observation: Option<Observation>,
    },
    /// Stopped between steps; accepted progress is kept.
    Cancelled,
}

#[derive(Debug)]
pub struct ScenarioReport {
    pub scenario: String,
    pub outcome: ScenarioOutcome,
    pub duration: Duration,
}

impl ScenarioReport {
    pub fn failed(&self) -> bool {
        matches!(self.outcome, ScenarioOutcome::Failed { .. })
    }
}

/// Result of one attempt at a step description.
#[derive(Debug)]
enum Transition {
    /// Fragment accepted; carries the observation from its validating run.
    Continue {
        fragment: String,
        observation: Option<Observation>,
    },
    /// Candidate rejected; the failure feeds the next attempt's prompt.
    Retry {
        previous: String,
        failure: ExecutionFailure,
    },
    /// The oracle reports the scenario already satisfied.
    Done,
    Aborted(anyhow::Error),
}

pub struct Orchestrator<'a> {
    paths: &'a ProjectPaths,
    progress: &'a ProgressStore,
    oracle: &'a dyn Oracle,
    sandbox: &'a dyn Sandbox,
    settings: BuildSettings,
    cancel: &'a AtomicBool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        paths: &'a ProjectPaths,
        progress: &'a ProgressStore,
        oracle: &'a dyn Oracle,
        sandbox: &'a dyn Sandbox,
        settings: BuildSettings,
        cancel: &'a AtomicBool,
    ) -> Self {
        Self {
            paths,
            progress,
            oracle,
            sandbox,
            settings,
            cancel,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Ensure the guide, then build. Guide and reference failures are
    /// reported as a failed scenario rather than propagated.
    pub fn build_scenario(
        &self,
        scenario: &Scenario,
        scenarios: &ScenarioStore,
    ) -> ScenarioReport {
        let start = Instant::now();
        let generator = GuideGenerator::new(self.oracle, &self.settings.base_url);
        match ensure_guide(
            self.paths,
            &generator,
            scenario,
            scenarios,
            self.settings.max_reference_depth,
        ) {
            Ok((guide, _)) => self.build(scenario, &guide),
            Err(error) => ScenarioReport {
                scenario: scenario.name.clone(),
                outcome: ScenarioOutcome::Failed {
                    step_index: None,
                    error,
                    last_observation: None,
                },
                duration: start.elapsed(),
            },
        }
    }

    /// Drive `scenario` through its guide.
    pub fn build(&self, scenario: &Scenario, guide: &Guide) -> ScenarioReport {
        let start = Instant::now();
        let outcome = match self.run(scenario, guide) {
            Ok(outcome) => outcome,
            Err(error) => ScenarioOutcome::Failed {
                step_index: None,
                error,
                last_observation: None,
            },
        };
        ScenarioReport {
            scenario: scenario.name.clone(),
            outcome,
            duration: start.elapsed(),
        }
    }

    fn run(&self, scenario: &Scenario, guide: &Guide) -> Result<ScenarioOutcome> {
        let name = scenario.name.as_str();
        if guide.scenario_hash != scenario.hash {
            return Err(anyhow!(
                "guide for {name} was built from different scenario text"
            ));
        }
        let _lock = self.progress.lock(name)?;

        // Pending
        let progress = self.current_progress(scenario, guide)?;
        let accepted = progress.as_ref().map(Progress::len).unwrap_or(0);
        if let Some(progress) = progress.as_ref().filter(|p| p.len() == guide.len()) {
            if artifact_is_current(self.paths, name, &scenario.hash)? {
                tracing::info!(scenario = name, "cache hit");
                return Ok(ScenarioOutcome::Skipped);
            }
            tracing::info!(scenario = name, "artifact missing or stale; reassembling");
            return self.complete(scenario, progress);
        }

        // Stepping
        let mut fragments = progress.map(|p| p.fragments()).unwrap_or_default();
        if self.cancelled() {
            return Ok(ScenarioOutcome::Cancelled);
        }
        let baseline = self.sandbox.execute(&fragments)?;
        if let Some(failure) = baseline.failure {
            return Ok(ScenarioOutcome::Failed {
                step_index: Some(accepted),
                error: BuildError::Execution(failure).into(),
                last_observation: baseline.observation,
            });
        }
        let mut observation = baseline.observation;

        let mut latest: Option<Progress> = None;
        let mut index = accepted;
        let mut attempt = 0;
        let mut last: Option<(String, ExecutionFailure)> = None;
        while index < guide.len() {
            if self.cancelled() {
                return Ok(ScenarioOutcome::Cancelled);
            }
            attempt += 1;
            let transition = {
                let retry = last.as_ref().map(|(previous, failure)| RetryContext {
                    attempt,
                    max_attempts: self.settings.max_step_attempts,
                    previous,
                    failure,
                });
                self.attempt_step(&StepRequest {
                    guide,
                    accumulated: &fragments,
                    step_index: index,
                    observation: observation.as_ref(),
                    retry,
                })
            };
            if self.cancelled() {
                tracing::info!(
                    scenario = name,
                    step = index + 1,
                    "cancelled; discarding in-flight step"
                );
                return Ok(ScenarioOutcome::Cancelled);
            }
            match transition {
                Transition::Continue {
                    fragment,
                    observation: next,
                } => {
                    latest = Some(self.progress.append_step(
                        name,
                        &scenario.hash,
                        index,
                        &guide.steps[index],
                        &fragment,
                    )?);
                    tracing::info!(scenario = name, step = index + 1, attempt, "step accepted");
                    fragments.push(fragment);
                    observation = next;
                    index += 1;
                    attempt = 0;
                    last = None;
                }
                Transition::Retry { previous, failure } => {
                    self.report_rejection(guide, index, attempt, &failure);
                    if attempt >= self.settings.max_step_attempts {
                        return Ok(ScenarioOutcome::Failed {
                            step_index: Some(index),
                            error: BuildError::RetriesExhausted {
                                step_index: index,
                                attempts: attempt,
                                last_failure: failure,
                            }
                            .into(),
                            last_observation: observation,
                        });
                    }
                    last = Some((previous, failure));
                }
                Transition::Done => {
                    tracing::info!(
                        scenario = name,
                        step = index + 1,
                        remaining = guide.len() - index,
                        "scenario complete before the last step"
                    );
                    // The last clean execution ran exactly `fragments`.
                    for rest in index..guide.len() {
                        latest = Some(self.progress.append_step(
                            name,
                            &scenario.hash,
                            rest,
                            &guide.steps[rest],
                            "",
                        )?);
                    }
                    index = guide.len();
                }
                Transition::Aborted(error) => {
                    return Ok(ScenarioOutcome::Failed {
                        step_index: Some(index),
                        error,
                        last_observation: observation,
                    });
                }
            }
        }

        // Completed
        let progress = match latest {
            Some(progress) => progress,
            None => self
                .progress
                .load(name)?
                .ok_or_else(|| anyhow!("progress for {name} vanished while locked"))?,
        };
        self.complete(scenario, &progress)
    }

    /// Load progress for `scenario`, discarding it when the hash moved or it
    /// no longer lines up with the guide.
    fn current_progress(&self, scenario: &Scenario, guide: &Guide) -> Result<Option<Progress>> {
        let name = scenario.name.as_str();
        let Some(progress) = self.progress.load(name)? else {
            return Ok(None);
        };
        if progress.scenario_hash != scenario.hash {
            tracing::info!(scenario = name, "scenario changed; invalidating build progress");
            self.progress.invalidate(name)?;
            return Ok(None);
        }
        let aligned = progress.len() <= guide.len()
            && progress
                .steps
                .iter()
                .zip(&guide.steps)
                .all(|(step, description)| &step.description == description);
        if !aligned {
            tracing::warn!(
                scenario = name,
                "build progress does not match the guide; rebuilding"
            );
            self.progress.invalidate(name)?;
            return Ok(None);
        }
        Ok(Some(progress))
    }

    fn complete(&self, scenario: &Scenario, progress: &Progress) -> Result<ScenarioOutcome> {
        let source = assemble(&scenario.name, &progress.fragments())?;
        let artifact = write_artifact(
            self.paths,
            &scenario.name,
            &scenario.hash,
            &source,
            progress.len(),
        )?;
        Ok(ScenarioOutcome::Built {
            artifact,
            steps: progress.len(),
        })
    }

    fn report_rejection(
        &self,
        guide: &Guide,
        index: usize,
        attempt: usize,
        failure: &ExecutionFailure,
    ) {
        tracing::debug!(
            scenario = %guide.scenario,
            step = index + 1,
            attempt,
            kind = %failure.kind,
            "attempt rejected"
        );
        if self.settings.verbose {
            eprintln!(
                "  [{}] step {}/{} attempt {}/{} rejected: {}",
                guide.scenario,
                index + 1,
                guide.len(),
                attempt,
                self.settings.max_step_attempts,
                failure
            );
        }
    }

    /// One Step Generator call plus validation.
    fn attempt_step(&self, request: &StepRequest<'_>) -> Transition {
        let reply = match StepGenerator::new(self.oracle).generate(request) {
            Ok(reply) => reply,
            Err(error) => return Transition::Aborted(error),
        };
        let fragment = match reply {
            StepReply::Fragment(fragment) => fragment,
            StepReply::ScenarioComplete => {
                if request.accumulated.iter().all(|f| f.trim().is_empty()) {
                    return Transition::Retry {
                        previous: crate::step::SCENARIO_COMPLETE.to_string(),
                        failure: ExecutionFailure::new(
                            FailureKind::MalformedFragment,
                            "the scenario cannot be complete before any code was accepted",
                        ),
                    };
                }
                return Transition::Done;
            }
            StepReply::Impossible(detail) => {
                return Transition::Aborted(
                    BuildError::StepImpossible {
                        step_index: request.step_index,
                        detail,
                    }
                    .into(),
                );
            }
        };
        if let Err(failure) = check_structure(&fragment) {
            return Transition::Retry {
                previous: fragment,
                failure,
            };
        }

        let mut candidate = request.accumulated.to_vec();
        candidate.push(fragment.clone());
        let execution = match self.sandbox.execute(&candidate) {
            Ok(execution) => execution,
            Err(error) => return Transition::Aborted(error),
        };
        match execution.failure {
            None => Transition::Continue {
                fragment,
                observation: execution.observation,
            },
            Some(failure) => Transition::Retry {
                previous: fragment,
                failure,
            },
        }
    }
}
