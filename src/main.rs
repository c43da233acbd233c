//! glyph: build browser tests from natural-language scenarios.
//!
//! A scenario is decomposed into step descriptions by an LM, then each step's
//! code is generated and validated against a live page before it is kept.
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod assemble;
mod build;
mod cli;
mod config;
mod error;
mod guide;
mod oracle;
mod paths;
mod process;
mod progress;
mod reference;
mod sandbox;
mod scenario;
mod step;
mod templates;
mod util;
mod workflow;

const LOG_ENV: &str = "GLYPH_LOG";
const INTERRUPTED_EXIT: i32 = 130;

static CANCELLED: AtomicBool = AtomicBool::new(false);

fn main() -> ExitCode {
    init_tracing();
    let args = cli::RootArgs::parse();
    let result = match args.command {
        cli::Command::Load(_) => workflow::run_load(&args.project),
        cli::Command::Build(build) => {
            install_interrupt_handler();
            workflow::run_build(&args.project, build, &CANCELLED)
        }
        cli::Command::Test(test) => workflow::run_test(&args.project, test),
        cli::Command::Purge(purge) => workflow::run_purge(&args.project, purge),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// First Ctrl-C stops the build between steps and keeps accepted progress;
/// a second one exits immediately.
fn install_interrupt_handler() {
    let installed = ctrlc::set_handler(|| {
        if CANCELLED.swap(true, Ordering::SeqCst) {
            std::process::exit(INTERRUPTED_EXIT);
        }
        eprintln!("interrupt: finishing the current step (Ctrl-C again to quit)");
    });
    if let Err(err) = installed {
        tracing::warn!(error = %err, "could not install Ctrl-C handler; Ctrl-C stops the build immediately");
    }
}
