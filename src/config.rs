//! Project configuration.
//!
//! Loaded from `glyph.config.yml`; every key has a default so a minimal config
//! only needs the application URL.
use crate::paths::ProjectPaths;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment override for the LM command; forces the command provider.
pub const LM_COMMAND_ENV: &str = "GLYPH_LM_COMMAND";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_scenarios_dir")]
    pub scenarios_dir: String,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub build: BuildConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(default = "default_url")]
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Command,
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: LlmProvider,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_command")]
    pub command: String,
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_test_timeout")]
    pub test_timeout_seconds: u64,
    /// Parse-only check run on each probe before the runner; `null` disables it.
    #[serde(default = "default_syntax_check")]
    pub syntax_check: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    #[serde(default = "default_max_step_attempts")]
    pub max_step_attempts: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_reference_depth")]
    pub max_reference_depth: usize,
}

fn default_scenarios_dir() -> String {
    "scenarios".to_string()
}

fn default_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_provider() -> LlmProvider {
    LlmProvider::Command
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_sandbox_command() -> String {
    "npx playwright test".to_string()
}

fn default_sandbox_timeout() -> u64 {
    60
}

fn default_test_timeout() -> u64 {
    300
}

fn default_syntax_check() -> Option<String> {
    Some("node --check".to_string())
}

fn default_max_step_attempts() -> usize {
    3
}

fn default_workers() -> usize {
    2
}

fn default_max_reference_depth() -> usize {
    8
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scenarios_dir: default_scenarios_dir(),
            connection: ConnectionConfig::default(),
            llm: LlmConfig::default(),
            sandbox: SandboxConfig::default(),
            build: BuildConfig::default(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { url: default_url() }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            command: None,
            model: default_model(),
            endpoint: default_endpoint(),
            key: None,
            timeout_seconds: default_llm_timeout(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            command: default_sandbox_command(),
            timeout_seconds: default_sandbox_timeout(),
            test_timeout_seconds: default_test_timeout(),
            syntax_check: default_syntax_check(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_step_attempts: default_max_step_attempts(),
            workers: default_workers(),
            max_reference_depth: default_max_reference_depth(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_seconds)
    }

    /// The syntax check command, if one is configured and non-blank.
    pub fn syntax_check(&self) -> Option<String> {
        self.syntax_check
            .as_deref()
            .map(str::trim)
            .filter(|command| !command.is_empty())
            .map(str::to_string)
    }
}

/// Load `glyph.config.yml` from the project root and apply environment overrides.
pub fn load_config(paths: &ProjectPaths) -> Result<Config> {
    let path = paths.config_path();
    let mut config = read_config(&path)?;
    if let Ok(command) = env::var(LM_COMMAND_ENV) {
        if !command.trim().is_empty() {
            config.llm.provider = LlmProvider::Command;
            config.llm.command = Some(command);
        }
    }
    validate_config(&config)?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<Config> {
    if !path.is_file() {
        return Err(anyhow!(
            "config not found at {} (create it with at least `connection: {{url: ...}}`)",
            path.display()
        ));
    }
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if text.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(&text)
        .with_context(|| format!("parse YAML config {}", path.display()))?;
    Ok(config)
}

/// Validate limits and required values.
pub fn validate_config(config: &Config) -> Result<()> {
    if config.connection.url.trim().is_empty() {
        return Err(anyhow!("connection.url must be non-empty"));
    }
    if config.scenarios_dir.trim().is_empty() {
        return Err(anyhow!("scenarios_dir must be non-empty"));
    }
    if config.build.max_step_attempts == 0 {
        return Err(anyhow!("build.max_step_attempts must be at least 1"));
    }
    if config.build.workers == 0 {
        return Err(anyhow!("build.workers must be at least 1"));
    }
    if config.build.max_reference_depth == 0 {
        return Err(anyhow!("build.max_reference_depth must be at least 1"));
    }
    if config.sandbox.timeout_seconds == 0 || config.sandbox.test_timeout_seconds == 0 {
        return Err(anyhow!("sandbox timeouts must be at least 1 second"));
    }
    if config.llm.timeout_seconds == 0 {
        return Err(anyhow!("llm.timeout_seconds must be at least 1"));
    }
    if config.sandbox.command.trim().is_empty() {
        return Err(anyhow!("sandbox.command must be non-empty"));
    }
    Ok(())
}
