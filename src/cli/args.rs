// src/cli/args.rs

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "toolscout",
    version,
    about = "Detects C/C++ toolchains and resolves IntelliSense configurations."
)]
pub struct Cli {
    /// Additional definition root directories (searched for toolset.*.json).
    #[arg(long = "definitions", global = true, value_name = "DIR")]
    pub definition_roots: Vec<PathBuf>,

    /// Storage directory for the persistent toolset snapshot.
    #[arg(long, global = true, value_name = "DIR")]
    pub storage: Option<PathBuf>,

    /// Skip the persistent snapshot and start from a clean registry.
    #[arg(long, global = true)]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover every toolset the loaded definitions can find.
    Scan(ScanArgs),
    /// Identify a single candidate: an absolute compiler path or a
    /// name pattern such as 'msvc/*'.
    Identify(IdentifyArgs),
    /// Resolve the IntelliSense configuration for one compiler invocation.
    Analyze(AnalyzeArgs),
    /// List the loaded definitions after inheritance and conditions.
    Definitions,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Print the full registry as JSON instead of a summary.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct IdentifyArgs {
    /// An absolute executable path or a glob over toolset names.
    pub candidate: String,

    /// Print the identified toolset as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// An absolute compiler path or a toolset name pattern.
    pub compiler: String,

    /// Source language for the translation unit (c or cpp).
    #[arg(long)]
    pub language: Option<String>,

    /// Language standard (e.g. C17, C++20).
    #[arg(long)]
    pub standard: Option<String>,

    /// Directory compiler-relative paths resolve against.
    #[arg(long, value_name = "DIR")]
    pub base_directory: Option<PathBuf>,

    /// Print the resolved configuration as JSON instead of a summary.
    #[arg(long)]
    pub json: bool,

    /// The compiler invocation to analyze (after `--`).
    #[arg(last = true, value_name = "ARGS")]
    pub compiler_args: Vec<String>,
}
