//! Command implementations behind the CLI.
//!
//! Each `run_*` function loads the project, does its work, prints a
//! human-readable summary, and returns the process exit code.
use crate::assemble::artifact_is_current;
use crate::build::{BuildSettings, Orchestrator, ScenarioOutcome, ScenarioReport};
use crate::cli::{BuildArgs, PurgeArgs, TestArgs};
use crate::config::{load_config, Config};
use crate::guide::{ensure_guide, GuideGenerator};
use crate::oracle::oracle_from_config;
use crate::paths::ProjectPaths;
use crate::progress::ProgressStore;
use crate::sandbox::{PlaywrightSandbox, Sandbox};
use crate::scenario::{Scenario, ScenarioStore};
use crate::util::{display_path, tail_string};
use anyhow::{anyhow, Context, Result};
use std::fmt::Write as _;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

const TEST_OUTPUT_TAIL_BYTES: usize = 2_000;

/// Config, paths and scenarios of one project.
struct ProjectContext {
    paths: ProjectPaths,
    config: Config,
    scenarios: ScenarioStore,
}

impl ProjectContext {
    fn load(project: &Path) -> Result<Self> {
        let root = fs::canonicalize(project)
            .with_context(|| format!("project root {}", project.display()))?;
        let paths = ProjectPaths::new(root);
        let config = load_config(&paths)?;
        let scenarios = ScenarioStore::load_dir(&paths.scenarios_dir(&config.scenarios_dir))?;
        Ok(Self {
            paths,
            config,
            scenarios,
        })
    }

    /// The scenario named by `selector`, or every scenario.
    fn targets(&self, selector: Option<&Path>) -> Result<Vec<&Scenario>> {
        match selector {
            Some(selector) => self
                .scenarios
                .find(selector)
                .map(|scenario| vec![scenario])
                .ok_or_else(|| anyhow!("unknown scenario {}", selector.display())),
            None => Ok(self.scenarios.iter().collect()),
        }
    }

    /// Like [`ProjectContext::targets`], plus everything a selected
    /// scenario references so dependencies are built too.
    fn build_targets(&self, selector: Option<&Path>) -> Result<Vec<&Scenario>> {
        let selected = self.targets(selector)?;
        if selector.is_none() {
            return Ok(selected);
        }
        let mut targets: Vec<&Scenario> = Vec::new();
        for scenario in selected {
            for dependency in self.scenarios.dependencies(scenario) {
                if !targets.iter().any(|known| known.name == dependency.name) {
                    targets.push(dependency);
                }
            }
            targets.push(scenario);
        }
        Ok(targets)
    }

    /// Print a failure line per scenario file that could not be loaded.
    fn report_unreadable(&self) -> usize {
        for (path, reason) in self.scenarios.unreadable() {
            println!(
                "  failed   {}: {reason}",
                display_path(path, Some(self.paths.root()))
            );
        }
        self.scenarios.unreadable().len()
    }

    fn settings(&self, verbose: bool) -> BuildSettings {
        BuildSettings {
            base_url: self.config.connection.url.clone(),
            max_step_attempts: self.config.build.max_step_attempts,
            max_reference_depth: self.config.build.max_reference_depth,
            workers: self.config.build.workers,
            verbose,
        }
    }
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Regenerate guides for scenarios whose text changed.
pub fn run_load(project: &Path) -> Result<ExitCode> {
    let ctx = ProjectContext::load(project)?;
    let mut failures = ctx.report_unreadable();
    if ctx.scenarios.is_empty() {
        if failures == 0 {
            println!("no scenarios found");
        }
        return Ok(exit_code(failures == 0));
    }
    let oracle = oracle_from_config(&ctx.config.llm, &ctx.paths)?;
    let generator = GuideGenerator::new(&oracle, &ctx.config.connection.url);
    for scenario in ctx.scenarios.iter() {
        match ensure_guide(
            &ctx.paths,
            &generator,
            scenario,
            &ctx.scenarios,
            ctx.config.build.max_reference_depth,
        ) {
            Ok((guide, true)) => println!("  loaded   {} ({} steps)", scenario.name, guide.len()),
            Ok((_, false)) => println!("  cached   {}", scenario.name),
            Err(err) => {
                failures += 1;
                println!("  failed   {}: {err:#}", scenario.name);
            }
        }
    }
    if failures > 0 {
        eprintln!("{failures} guide(s) could not be generated");
    }
    Ok(exit_code(failures == 0))
}

/// Build one or all scenarios and print a per-scenario summary.
pub fn run_build(project: &Path, args: BuildArgs, cancel: &AtomicBool) -> Result<ExitCode> {
    let ctx = ProjectContext::load(project)?;
    let unreadable = match args.scenario {
        Some(_) => 0,
        None => ctx.report_unreadable(),
    };
    let targets = ctx.build_targets(args.scenario.as_deref())?;
    if targets.is_empty() {
        if unreadable == 0 {
            println!("no scenarios found");
        }
        return Ok(exit_code(unreadable == 0));
    }
    let oracle = oracle_from_config(&ctx.config.llm, &ctx.paths)?;
    let sandbox = PlaywrightSandbox::from_config(ctx.paths.clone(), &ctx.config);
    sandbox.ensure_environment()?;
    let progress = ProgressStore::open(&ctx.paths)?;
    let orchestrator = Orchestrator::new(
        &ctx.paths,
        &progress,
        &oracle,
        &sandbox,
        ctx.settings(args.verbose),
        cancel,
    );

    let reports = orchestrator.build_all(&targets, &ctx.scenarios);
    print!("{}", render_summary(&reports, &ctx.paths, args.verbose));
    let ok = unreadable == 0
        && reports.iter().all(|report| {
            !report.failed() && !matches!(report.outcome, ScenarioOutcome::Cancelled)
        });
    Ok(exit_code(ok))
}

/// Per-scenario lines followed by a totals line.
fn render_summary(reports: &[ScenarioReport], paths: &ProjectPaths, verbose: bool) -> String {
    let mut out = String::new();
    let (mut built, mut skipped, mut failed, mut cancelled) = (0, 0, 0, 0);
    for report in reports {
        let name = &report.scenario;
        match &report.outcome {
            ScenarioOutcome::Skipped => {
                skipped += 1;
                let _ = writeln!(out, "  skipped   {name} (up to date)");
            }
            ScenarioOutcome::Built { artifact, steps } => {
                built += 1;
                let _ = writeln!(
                    out,
                    "  built     {name} ({steps} steps, {:.1}s) -> {}",
                    report.duration.as_secs_f64(),
                    display_path(artifact, Some(paths.root()))
                );
            }
            ScenarioOutcome::Failed {
                step_index,
                error,
                last_observation,
            } => {
                failed += 1;
                match step_index {
                    Some(index) => {
                        let _ = writeln!(out, "  failed    {name} at step {}: {error:#}", index + 1);
                    }
                    None => {
                        let _ = writeln!(out, "  failed    {name}: {error:#}");
                    }
                }
                if let Some(observation) = last_observation.as_ref().filter(|_| verbose) {
                    let _ = writeln!(out, "            last page state:");
                    for line in observation.to_prompt().lines() {
                        let _ = writeln!(out, "              {line}");
                    }
                }
            }
            ScenarioOutcome::Cancelled => {
                cancelled += 1;
                let _ = writeln!(out, "  cancelled {name} (progress kept)");
            }
        }
    }
    let _ = write!(
        out,
        "{} scenario(s): {built} built, {skipped} skipped, {failed} failed",
        reports.len()
    );
    if cancelled > 0 {
        let _ = write!(out, ", {cancelled} cancelled");
    }
    out.push('\n');
    out
}

/// Run built artifacts and report pass/fail per scenario.
pub fn run_test(project: &Path, args: TestArgs) -> Result<ExitCode> {
    let ctx = ProjectContext::load(project)?;
    let mut failed = match args.scenario {
        Some(_) => 0,
        None => ctx.report_unreadable(),
    };
    let targets = ctx.targets(args.scenario.as_deref())?;
    let sandbox = PlaywrightSandbox::from_config(ctx.paths.clone(), &ctx.config);
    let mut passed = 0;
    for scenario in targets {
        if !artifact_is_current(&ctx.paths, &scenario.name, &scenario.hash)? {
            failed += 1;
            println!("  not built {} (run `glyph build` first)", scenario.name);
            continue;
        }
        let outcome = sandbox.run_artifact(&ctx.paths.artifact_path(&scenario.name))?;
        if outcome.passed {
            passed += 1;
            println!(
                "  pass      {} ({:.1}s)",
                scenario.name,
                outcome.duration.as_secs_f64()
            );
        } else {
            failed += 1;
            let reason = if outcome.timed_out { " (timed out)" } else { "" };
            println!("  fail      {}{reason}", scenario.name);
            for line in tail_string(&outcome.output, TEST_OUTPUT_TAIL_BYTES).lines() {
                println!("            {line}");
            }
        }
    }
    println!("{passed} passed, {failed} failed");
    Ok(exit_code(failed == 0))
}

/// Delete progress, guides and built tests after confirmation.
pub fn run_purge(project: &Path, args: PurgeArgs) -> Result<ExitCode> {
    let root = fs::canonicalize(project)
        .with_context(|| format!("project root {}", project.display()))?;
    let paths = ProjectPaths::new(root);
    if !args.force {
        let stdin = io::stdin();
        let prompt = format!(
            "Delete all build progress and tests under {}? [y/N] ",
            paths.state_dir().display()
        );
        if !confirm(&prompt, &mut stdin.lock())? {
            println!("aborted");
            return Ok(ExitCode::SUCCESS);
        }
    }
    let removed = ProgressStore::open(&paths)?.purge_all()?;
    println!("removed {removed} file(s)");
    Ok(ExitCode::SUCCESS)
}

fn confirm(prompt: &str, input: &mut impl BufRead) -> Result<bool> {
    print!("{prompt}");
    io::stdout().flush().context("flush stdout")?;
    let mut answer = String::new();
    input.read_line(&mut answer).context("read confirmation")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BuildError, ExecutionFailure, FailureKind};
    use crate::sandbox::Observation;
    use std::path::PathBuf;
    use std::time::Duration;

    fn report(scenario: &str, outcome: ScenarioOutcome) -> ScenarioReport {
        ScenarioReport {
            scenario: scenario.to_string(),
            outcome,
            duration: Duration::from_millis(1_500),
        }
    }

    #[test]
    fn summary_lists_every_scenario_and_totals() {
        let paths = ProjectPaths::new(PathBuf::from("/work/app"));
        let reports = vec![
            report(
                "login",
                ScenarioOutcome::Built {
                    artifact: PathBuf::from("/work/app/.glyph/tests/login.spec.js"),
                    steps: 3,
                },
            ),
            report("signup", ScenarioOutcome::Skipped),
            report(
                "checkout",
                ScenarioOutcome::Failed {
                    step_index: Some(1),
                    error: BuildError::RetriesExhausted {
                        step_index: 1,
                        attempts: 3,
                        last_failure: ExecutionFailure::new(FailureKind::Timeout, "exceeded 60s"),
                    }
                    .into(),
                    last_observation: Some(Observation {
                        url: "http://localhost:3000/cart".to_string(),
                        ..Observation::default()
                    }),
                },
            ),
        ];
        let quiet = render_summary(&reports, &paths, false);
        assert!(quiet.contains("built     login (3 steps, 1.5s) -> .glyph/tests/login.spec.js"));
        assert!(quiet.contains("skipped   signup"));
        assert!(quiet.contains(
            "failed    checkout at step 2: step 2 failed after 3 attempt(s): timeout: exceeded 60s"
        ));
        assert!(!quiet.contains("localhost:3000/cart"));
        assert!(quiet.ends_with("3 scenario(s): 1 built, 1 skipped, 1 failed\n"));

        let verbose = render_summary(&reports, &paths, true);
        assert!(verbose.contains("URL: http://localhost:3000/cart"));
    }

    #[test]
    fn cancelled_scenarios_are_counted() {
        let paths = ProjectPaths::new(PathBuf::from("/work/app"));
        let summary = render_summary(&[report("login", ScenarioOutcome::Cancelled)], &paths, false);
        assert!(summary.contains("cancelled login (progress kept)"));
        assert!(summary.ends_with(", 1 cancelled\n"));
    }

    #[test]
    fn confirmation_accepts_only_yes() {
        assert!(confirm("? ", &mut "y\n".as_bytes()).expect("confirm"));
        assert!(confirm("? ", &mut "YES\n".as_bytes()).expect("confirm"));
        assert!(!confirm("? ", &mut "n\n".as_bytes()).expect("confirm"));
        assert!(!confirm("? ", &mut "".as_bytes()).expect("confirm"));
    }

    #[cfg(unix)]
    fn project_with_stub_lm(reply: &str) -> tempfile::TempDir {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("lm.sh");
        fs::write(
            &script,
            format!("#!/bin/sh\ncat >/dev/null\nprintf '%s\\n' '{reply}'\n"),
        )
        .expect("write stub");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");
        fs::write(
            dir.path().join("glyph.config.yml"),
            format!("llm:\n  command: {}\n", script.display()),
        )
        .expect("write config");
        fs::create_dir_all(dir.path().join("scenarios")).expect("mkdir");
        dir
    }

    #[cfg(unix)]
    #[test]
    fn load_generates_then_reuses_guides() {
        let dir = project_with_stub_lm(r#"["Open the login page", "Sign in as admin"]"#);
        fs::write(
            dir.path().join("scenarios/login.glyph"),
            "go to the login page\nuse admin/admin_password\n",
        )
        .expect("write scenario");

        assert_eq!(run_load(dir.path()).expect("load"), ExitCode::SUCCESS);
        let paths = ProjectPaths::new(fs::canonicalize(dir.path()).expect("canonical"));
        let guide = crate::guide::load_guide(&paths, "login")
            .expect("read")
            .expect("guide");
        assert_eq!(guide.steps, vec!["Open the login page", "Sign in as admin"]);

        assert_eq!(run_load(dir.path()).expect("load again"), ExitCode::SUCCESS);
        let log = fs::read_to_string(paths.lm_log_path()).expect("lm log");
        assert_eq!(log.lines().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn load_reports_unknown_references() {
        let dir = project_with_stub_lm(r#"["Open the settings page"]"#);
        fs::write(
            dir.path().join("scenarios/settings.glyph"),
            "[ref: login]\nopen settings\n",
        )
        .expect("write scenario");
        assert_eq!(run_load(dir.path()).expect("load"), ExitCode::FAILURE);
    }

    #[cfg(unix)]
    #[test]
    fn load_reports_an_undecodable_scenario_and_loads_the_rest() {
        let dir = project_with_stub_lm(r#"["Open the login page"]"#);
        fs::write(dir.path().join("scenarios/login.glyph"), "go to the login page\n")
            .expect("write scenario");
        fs::write(dir.path().join("scenarios/latin1.glyph"), b"caf\xe9 menu\n").expect("write");

        assert_eq!(run_load(dir.path()).expect("load"), ExitCode::FAILURE);
        let paths = ProjectPaths::new(fs::canonicalize(dir.path()).expect("canonical"));
        assert!(crate::guide::load_guide(&paths, "login")
            .expect("read")
            .is_some());
    }

    #[test]
    fn build_targets_pull_in_referenced_scenarios() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("glyph.config.yml"), "").expect("config");
        fs::create_dir_all(dir.path().join("scenarios")).expect("mkdir");
        for (name, text) in [
            ("login", "sign in"),
            ("cart", "[ref: login] add an item"),
            ("checkout", "[ref: cart] pay"),
            ("about", "open the about page"),
        ] {
            fs::write(dir.path().join(format!("scenarios/{name}.glyph")), text).expect("write");
        }
        let ctx = ProjectContext::load(dir.path()).expect("context");

        let names = |selector: Option<&Path>| -> Vec<String> {
            ctx.build_targets(selector)
                .expect("targets")
                .iter()
                .map(|scenario| scenario.name.clone())
                .collect()
        };
        assert_eq!(names(Some(Path::new("checkout"))), vec!["cart", "login", "checkout"]);
        assert_eq!(names(Some(Path::new("about"))), vec!["about"]);
        assert_eq!(names(None).len(), 4);
    }

    #[test]
    fn purge_without_state_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let code = run_purge(dir.path(), PurgeArgs { force: true }).expect("purge");
        assert_eq!(code, ExitCode::SUCCESS);
    }
}
