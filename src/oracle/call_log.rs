//! Oracle call logging.
//!
//! Every call is appended to `.glyph/lm_log.jsonl` as one JSON line:
//!
//! ```jsonl
//! {"schema_version":1,"ts":1707900000000,"scenario":"login","kind":"guide","duration_ms":4200,"outcome":"success",...}
//! ```
//!
//! Log writes are best-effort; a failure to append is a warning.
use super::{Oracle, OracleRequest, PromptKind};
use crate::util::{now_epoch_ms, truncate_string};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

/// Current schema version for lm_log.jsonl entries.
pub const LM_LOG_SCHEMA_VERSION: u32 = 1;

const PROMPT_PREVIEW_BYTES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LmOutcome {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmLogEntry {
    pub schema_version: u32,
    /// Unix timestamp in milliseconds when the call finished.
    pub ts: u128,
    pub scenario: String,
    pub kind: PromptKind,
    pub duration_ms: u64,
    pub outcome: LmOutcome,
    /// First ~500 bytes of the user prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Wraps a provider and appends an entry per call.
pub struct LoggedOracle {
    inner: Box<dyn Oracle>,
    log_path: PathBuf,
    // Concurrent scenario builds share one log file.
    write_lock: Mutex<()>,
}

impl LoggedOracle {
    pub fn new(inner: Box<dyn Oracle>, log_path: PathBuf) -> Self {
        Self {
            inner,
            log_path,
            write_lock: Mutex::new(()),
        }
    }

    fn record(&self, entry: &LmLogEntry) {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(err) = append_lm_log(&self.log_path, entry) {
            tracing::warn!(error = %err, path = %self.log_path.display(), "lm log append failed");
        }
    }
}

impl Oracle for LoggedOracle {
    fn complete(&self, request: &OracleRequest) -> Result<String> {
        let start = Instant::now();
        let result = self.inner.complete(request);
        let (outcome, error) = match &result {
            Ok(_) => (LmOutcome::Success, None),
            Err(err) => (LmOutcome::Failed, Some(format!("{err:#}"))),
        };
        let entry = LmLogEntry {
            schema_version: LM_LOG_SCHEMA_VERSION,
            ts: now_epoch_ms().unwrap_or_default(),
            scenario: request.scenario.clone(),
            kind: request.kind,
            duration_ms: start.elapsed().as_millis() as u64,
            outcome,
            prompt_preview: Some(truncate_string(&request.user, PROMPT_PREVIEW_BYTES)),
            error,
        };
        self.record(&entry);
        result
    }
}

/// Append an LM log entry to the log file.
pub fn append_lm_log(log_path: &Path, entry: &LmLogEntry) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("create state directory for lm_log")?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("open lm_log for append: {}", log_path.display()))?;
    let line = serde_json::to_string(entry).context("serialize lm_log entry")?;
    writeln!(file, "{line}").context("write lm_log entry")?;
    Ok(())
}
