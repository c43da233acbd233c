//! Generation oracle: prompt in, text out.
//!
//! The build never talks to a model directly. Everything goes through the
//! [`Oracle`] trait so tests can substitute deterministic stubs, and the
//! configured provider is wrapped in [`LoggedOracle`] to record each call.
use crate::config::{LlmConfig, LlmProvider};
use crate::paths::ProjectPaths;
use anyhow::{anyhow, Result};

mod command;
mod http;
mod call_log;

pub use command::CommandOracle;
pub use http::HttpOracle;
pub use call_log::LoggedOracle;

/// Which prompt family a request belongs to; recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Guide,
    Step,
    StepRetry,
}

impl std::fmt::Display for PromptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guide => write!(f, "guide"),
            Self::Step => write!(f, "step"),
            Self::StepRetry => write!(f, "step_retry"),
        }
    }
}

/// A single oracle call.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub kind: PromptKind,
    /// Scenario the call is made for (log attribution only).
    pub scenario: String,
    /// Standing instructions; sent as the system message when the provider has one.
    pub system: String,
    pub user: String,
}

impl OracleRequest {
    /// System and user text joined for providers that take a single prompt.
    pub fn combined_prompt(&self) -> String {
        if self.system.trim().is_empty() {
            return self.user.clone();
        }
        format!("{}\n\n{}", self.system.trim_end(), self.user)
    }
}

pub trait Oracle: Send + Sync {
    fn complete(&self, request: &OracleRequest) -> Result<String>;
}

/// Build the configured provider, wrapped with the JSONL call log.
pub fn oracle_from_config(config: &LlmConfig, paths: &ProjectPaths) -> Result<LoggedOracle> {
    let inner: Box<dyn Oracle> = match config.provider {
        LlmProvider::Command => {
            let command = config.command.clone().ok_or_else(|| {
                anyhow!(
                    "llm.command is not set (configure it in glyph.config.yml or set {})",
                    crate::config::LM_COMMAND_ENV
                )
            })?;
            Box::new(CommandOracle::new(command, config.timeout()))
        }
        LlmProvider::Openai => {
            let key = config
                .key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| anyhow!("llm.key is not set and OPENAI_API_KEY is empty"))?;
            Box::new(HttpOracle::new(
                config.endpoint.clone(),
                config.model.clone(),
                key,
                config.timeout(),
            ))
        }
    };
    Ok(LoggedOracle::new(inner, paths.lm_log_path()))
}

/// Extract the body of the first fenced code block, if any.
pub fn extract_code(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip the language tag line.
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim_matches('\n'))
}

/// Pull JSON out of a reply that may wrap it in markdown fences.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();
    if let Some(start) = text.find("```json") {
        let start = start + 7;
        if let Some(end) = text[start..].find("```") {
            return text[start..start + end].trim();
        }
    }
    extract_code(text).map(str::trim).unwrap_or(text)
}
