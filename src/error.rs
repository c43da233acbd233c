//! Build error kinds.
//!
//! Every kind is scoped to a single scenario; the batch runner reports it and
//! moves on to sibling scenarios.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Why a candidate execution was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RuntimeError,
    MalformedFragment,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RuntimeError => write!(f, "runtime_error"),
            Self::MalformedFragment => write!(f, "malformed_fragment"),
        }
    }
}

/// An execution failure with diagnostic detail, folded into retry prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl ExecutionFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("malformed guide for {scenario}: {detail}")]
    MalformedGuide { scenario: String, detail: String },

    #[error("execution failure: {0}")]
    Execution(ExecutionFailure),

    #[error("{scenario} references unknown scenario {reference:?}")]
    UnknownReference { scenario: String, reference: String },

    #[error("{scenario}: reference nesting exceeds depth {depth} (self or mutual reference?)")]
    ReferenceDepthExceeded { scenario: String, depth: usize },

    #[error("{scenario} depends on {dependency:?}, which failed to build")]
    DependencyFailed { scenario: String, dependency: String },

    #[error("cache record {} is unreadable: {detail}", path.display())]
    CacheCorruption { path: PathBuf, detail: String },

    #[error("step {} cannot be completed: {detail}", step_index + 1)]
    StepImpossible { step_index: usize, detail: String },

    #[error("step {} failed after {attempts} attempt(s): {last_failure}", step_index + 1)]
    RetriesExhausted {
        step_index: usize,
        attempts: usize,
        last_failure: ExecutionFailure,
    },
}
