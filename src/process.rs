//! Bounded child process execution, shared by the runner sandbox and the
//! command LM provider.
//!
//! Output goes to files in a scratch directory rather than pipes, so leftover
//! grandchildren cannot block collection. On unix the child leads its own
//! process group and the whole group is killed on timeout.
use anyhow::{anyhow, Context, Result};
use std::fs::{self, File};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// What to run and under which limits.
#[derive(Debug, Clone, Copy)]
pub struct BoundedCommand<'a> {
    /// Used in error messages ("runner", "LM command").
    pub label: &'a str,
    /// Parsed with shell-words.
    pub command: &'a str,
    pub extra_args: &'a [String],
    pub cwd: Option<&'a Path>,
    pub stdin: Option<&'a str>,
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct ProcessRun {
    /// None when the process was killed on timeout.
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessRun {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.is_some_and(|status| status.success())
    }

    pub fn combined_output(&self) -> String {
        if self.stderr.trim().is_empty() {
            return self.stdout.clone();
        }
        format!("{}\n{}", self.stdout.trim_end(), self.stderr)
    }
}

impl BoundedCommand<'_> {
    /// Run to completion or until the timeout, keeping logs in `scratch`.
    pub fn run(&self, scratch: &Path) -> Result<ProcessRun> {
        let label = self.label;
        let args = shell_words::split(self.command)
            .with_context(|| format!("parse {label}: {}", self.command))?;
        let Some((program, rest)) = args.split_first() else {
            return Err(anyhow!("{label} is empty"));
        };

        let stdin = match self.stdin {
            Some(input) => {
                let stdin_path = scratch.join("stdin.txt");
                fs::write(&stdin_path, input)
                    .with_context(|| format!("write {}", stdin_path.display()))?;
                let file = File::open(&stdin_path)
                    .with_context(|| format!("open {}", stdin_path.display()))?;
                Stdio::from(file)
            }
            None => Stdio::null(),
        };
        let stdout_path = scratch.join("stdout.log");
        let stderr_path = scratch.join("stderr.log");
        let stdout = File::create(&stdout_path)
            .with_context(|| format!("create {}", stdout_path.display()))?;
        let stderr = File::create(&stderr_path)
            .with_context(|| format!("create {}", stderr_path.display()))?;

        let mut command = Command::new(program);
        command
            .args(rest)
            .args(self.extra_args)
            .stdin(stdin)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        if let Some(cwd) = self.cwd {
            command.current_dir(cwd);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let start = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("spawn {label}: {program}"))?;

        let mut timed_out = false;
        let status = loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("check {label} status"))?
            {
                break Some(status);
            }
            if start.elapsed() > self.timeout {
                timed_out = true;
                kill_tree(&mut child);
                break None;
            }
            std::thread::sleep(POLL_INTERVAL);
        };
        let duration = start.elapsed();
        tracing::debug!(
            label,
            program = program.as_str(),
            elapsed_ms = duration.as_millis(),
            timed_out,
            "child process finished"
        );

        Ok(ProcessRun {
            status,
            timed_out,
            stdout: read_lossy(&stdout_path)?,
            stderr: read_lossy(&stderr_path)?,
            duration,
        })
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let group = i32::try_from(child.id()).map(Pid::from_raw);
    let signalled = group.is_ok_and(|group| killpg(group, Signal::SIGKILL).is_ok());
    if !signalled {
        let _ = child.kill();
    }
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
