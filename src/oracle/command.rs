//! Local LM command provider.
//!
//! Delegates to a user-configured command (`llm`, `ollama run`, a wrapper
//! script): the prompt is fed on stdin and stdout is the reply. The command
//! runs under the same bounded runner as the sandbox, so a hung model is
//! killed after `llm.timeout_seconds`.
use super::{Oracle, OracleRequest};
use crate::process::BoundedCommand;
use crate::util::tail_string;
use anyhow::{anyhow, Context, Result};
use std::time::Duration;

const STDERR_TAIL_BYTES: usize = 1000;

#[derive(Debug, Clone)]
pub struct CommandOracle {
    /// The command to invoke (parsed via shell-words).
    command: String,
    timeout: Duration,
}

impl CommandOracle {
    pub fn new(command: String, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

impl Oracle for CommandOracle {
    fn complete(&self, request: &OracleRequest) -> Result<String> {
        let scratch = tempfile::Builder::new()
            .prefix("glyph-lm-")
            .tempdir()
            .context("create LM scratch directory")?;
        let prompt = request.combined_prompt();
        let run = BoundedCommand {
            label: "LM command",
            command: &self.command,
            extra_args: &[],
            cwd: None,
            stdin: Some(prompt.as_str()),
            timeout: self.timeout,
        }
        .run(scratch.path())
        .with_context(|| format!("{} request for {}", request.kind, request.scenario))?;

        tracing::debug!(
            scenario = request.scenario.as_str(),
            kind = %request.kind,
            elapsed_ms = run.duration.as_millis(),
            reply_bytes = run.stdout.len(),
            timed_out = run.timed_out,
            "oracle command returned"
        );

        if run.timed_out {
            return Err(anyhow!(
                "LM command timed out after {}s ({} request for {})",
                self.timeout.as_secs_f32(),
                request.kind,
                request.scenario
            ));
        }
        if !run.succeeded() {
            let status = run
                .status
                .map(|status| status.to_string())
                .unwrap_or_else(|| "no status".to_string());
            return Err(anyhow!(
                "LM command failed ({status}) for {} request: {}",
                request.kind,
                tail_string(run.stderr.trim(), STDERR_TAIL_BYTES)
            ));
        }
        Ok(run.stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::oracle::PromptKind;
    use std::time::Instant;

    fn request(user: &str) -> OracleRequest {
        OracleRequest {
            kind: PromptKind::Step,
            scenario: "login".to_string(),
            system: "SYSTEM".to_string(),
            user: user.to_string(),
        }
    }

    fn oracle(command: &str) -> CommandOracle {
        CommandOracle::new(command.to_string(), Duration::from_secs(10))
    }

    #[test]
    fn prompt_goes_to_stdin_and_reply_comes_from_stdout() {
        let reply = oracle("cat").complete(&request("open the page")).expect("reply");
        assert_eq!(reply, "SYSTEM\n\nopen the page");
    }

    #[test]
    fn failing_command_reports_stderr() {
        let err = oracle("sh -c 'echo quota exceeded >&2; exit 3'")
            .complete(&request("x"))
            .expect_err("failure");
        let message = err.to_string();
        assert!(message.contains("quota exceeded"));
        assert!(message.contains("step request"));
    }

    #[test]
    fn hung_command_is_killed_at_the_timeout() {
        let oracle = CommandOracle::new(
            "sh -c 'cat >/dev/null; sleep 5; echo late'".to_string(),
            Duration::from_millis(300),
        );
        let start = Instant::now();
        let err = oracle.complete(&request("x")).expect_err("timeout");
        assert!(start.elapsed() < Duration::from_secs(4));
        let message = err.to_string();
        assert!(message.contains("timed out"), "{message}");
        assert!(message.contains("login"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = oracle("   ").complete(&request("x")).expect_err("empty");
        assert!(format!("{err:#}").contains("LM command is empty"));
    }
}
