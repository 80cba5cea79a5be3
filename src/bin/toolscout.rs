// src/bin/toolscout.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use toolscout::cli::{Cli, Command, handlers};
use toolscout::core::engine::Engine;
use toolscout::models::InitializeOptions;

fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()) {
        eprintln!("\n{}: {}", "Error".red().bold(), e);
        let mut causes = e.chain().skip(1);
        if let Some(cause) = causes.next() {
            eprintln!("\nCaused by:");
            eprintln!("   0: {}", cause);
            for (i, cause) in causes.enumerate() {
                eprintln!("   {}: {}", i + 1, cause);
            }
        }
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    // Definition roots: explicit flags first, then the user's config dir.
    let mut definition_roots = cli.definition_roots.clone();
    if let Some(config_dir) = dirs::config_dir() {
        definition_roots.push(config_dir.join("toolscout").join("definitions"));
    }

    let storage_path = if cli.no_cache {
        None
    } else {
        cli.storage
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join("toolscout")))
    };

    let engine = Engine::new();
    engine.initialize(
        &definition_roots,
        InitializeOptions {
            quick: false,
            storage_path,
        },
    )?;

    match &cli.command {
        Command::Scan(args) => handlers::scan::handle(&engine, args),
        Command::Identify(args) => handlers::identify::handle(&engine, args),
        Command::Analyze(args) => handlers::analyze::handle(&engine, args),
        Command::Definitions => handlers::definitions::handle(&engine),
    }
}
