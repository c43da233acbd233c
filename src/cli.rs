//! CLI argument parsing.
//!
//! The CLI is thin: each subcommand maps onto one `workflow::run_*` function.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "glyph",
    version,
    about = "Build browser tests from natural-language scenarios",
    after_help = "Commands:\n  load                 Generate guides for new or edited scenarios\n  build [--scenario F] Build tests step by step, resuming cached progress\n  test [--scenario F]  Run the built tests\n  purge [-f]           Delete cached progress, guides and built tests\n\nExamples:\n  glyph load\n  glyph build -v\n  glyph build --scenario scenarios/login.glyph\n  glyph purge -f",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Project root containing glyph.config.yml
    #[arg(long, value_name = "DIR", global = true, default_value = ".")]
    pub project: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Load(LoadArgs),
    Build(BuildArgs),
    Test(TestArgs),
    Purge(PurgeArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Generate guides for scenarios whose text changed")]
pub struct LoadArgs {}

#[derive(Parser, Debug)]
#[command(about = "Build tests for one or all scenarios")]
pub struct BuildArgs {
    /// Scenario file (or name) to build; all scenarios when omitted
    #[arg(long, value_name = "FILE")]
    pub scenario: Option<PathBuf>,

    /// Print the diagnostic detail of every rejected attempt
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Run previously built tests")]
pub struct TestArgs {
    /// Scenario file (or name) to test; all built scenarios when omitted
    #[arg(long, value_name = "FILE")]
    pub scenario: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Delete build progress, guides and built tests")]
pub struct PurgeArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub force: bool,
}
