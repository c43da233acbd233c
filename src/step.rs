//! Step generation: one oracle call per attempt at a step description.
use crate::error::ExecutionFailure;
use crate::guide::Guide;
use crate::oracle::{extract_code, Oracle, OracleRequest, PromptKind};
use crate::sandbox::Observation;
use crate::templates::{STEP_PROMPT_MD, STEP_RETRY_PROMPT_MD, STEP_SYSTEM_MD};
use anyhow::{Context, Result};

mod structure;

pub use structure::check_structure;

pub const SCENARIO_COMPLETE: &str = "SCENARIO_COMPLETE";
pub const STEP_IMPOSSIBLE: &str = "STEP_IMPOSSIBLE";

/// Failure context folded into a retry prompt.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext<'a> {
    /// One-based attempt number of the request being built.
    pub attempt: usize,
    pub max_attempts: usize,
    pub previous: &'a str,
    pub failure: &'a ExecutionFailure,
}

#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    pub guide: &'a Guide,
    pub accumulated: &'a [String],
    pub step_index: usize,
    pub observation: Option<&'a Observation>,
    pub retry: Option<RetryContext<'a>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepReply {
    Fragment(String),
    ScenarioComplete,
    Impossible(String),
}

pub struct StepGenerator<'a> {
    oracle: &'a dyn Oracle,
}

impl<'a> StepGenerator<'a> {
    pub fn new(oracle: &'a dyn Oracle) -> Self {
        Self { oracle }
    }

    pub fn generate(&self, request: &StepRequest<'_>) -> Result<StepReply> {
        let (kind, user) = build_prompt(request);
        let oracle_request = OracleRequest {
            kind,
            scenario: request.guide.scenario.clone(),
            system: STEP_SYSTEM_MD.to_string(),
            user,
        };
        let reply = self.oracle.complete(&oracle_request).with_context(|| {
            format!(
                "generate step {} for {}",
                request.step_index + 1,
                request.guide.scenario
            )
        })?;
        Ok(parse_step_reply(&reply))
    }
}

fn build_prompt(request: &StepRequest<'_>) -> (PromptKind, String) {
    let guide = request
        .guide
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let marker = if index == request.step_index { " <- current" } else { "" };
            format!("{}. {step}{marker}", index + 1)
        })
        .collect::<Vec<_>>()
        .join("\n");
    let accumulated = if request.accumulated.iter().all(|f| f.trim().is_empty()) {
        "// no code yet".to_string()
    } else {
        request
            .accumulated
            .iter()
            .filter(|fragment| !fragment.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    };
    let observation = request
        .observation
        .map(Observation::to_prompt)
        .unwrap_or_else(|| "No page state was captured.".to_string());
    let step = request
        .guide
        .steps
        .get(request.step_index)
        .map(String::as_str)
        .unwrap_or_default();

    let (kind, template) = match request.retry {
        Some(_) => (PromptKind::StepRetry, STEP_RETRY_PROMPT_MD),
        None => (PromptKind::Step, STEP_PROMPT_MD),
    };
    let mut prompt = template
        .replace("{guide}", &guide)
        .replace("{accumulated}", &accumulated)
        .replace("{observation}", &observation)
        .replace("{step_number}", &(request.step_index + 1).to_string())
        .replace("{step_count}", &request.guide.steps.len().to_string());
    if let Some(retry) = request.retry {
        prompt = prompt
            .replace("{attempt}", &retry.attempt.to_string())
            .replace("{max_attempts}", &retry.max_attempts.to_string())
            .replace("{previous}", retry.previous)
            .replace("{failure_kind}", &retry.failure.kind.to_string())
            .replace("{failure_detail}", &retry.failure.detail);
    }
    (kind, prompt.replace("{step}", step))
}

/// Interpret a step reply. Fenced code wins over sentinels; an unfenced reply
/// without a sentinel is taken as code.
pub fn parse_step_reply(reply: &str) -> StepReply {
    if let Some(code) = extract_code(reply) {
        return StepReply::Fragment(code.to_string());
    }
    for line in reply.lines() {
        let line = line.trim().trim_matches('`');
        if line == SCENARIO_COMPLETE {
            return StepReply::ScenarioComplete;
        }
        if let Some(reason) = line.strip_prefix(STEP_IMPOSSIBLE) {
            let reason = reason.trim_start_matches(':').trim();
            let reason = if reason.is_empty() {
                "no reason given"
            } else {
                reason
            };
            return StepReply::Impossible(reason.to_string());
        }
    }
    StepReply::Fragment(reply.trim().to_string())
}
