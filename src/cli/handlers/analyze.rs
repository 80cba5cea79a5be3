use crate::cli::args::AnalyzeArgs;
use crate::core::engine::Engine;
use crate::models::AnalysisOptions;
use anyhow::{Result, anyhow};
use colored::Colorize;

pub fn handle(engine: &Engine, args: &AnalyzeArgs) -> Result<()> {
    let toolset = engine
        .identify_toolset(&args.compiler)?
        .ok_or_else(|| anyhow!("No toolset matched '{}'.", args.compiler))?;

    let options = AnalysisOptions {
        base_directory: args.base_directory.clone(),
        language: args.language.clone(),
        standard: args.standard.clone(),
        ..Default::default()
    };
    let configuration =
        engine.intellisense_configuration(&toolset, &args.compiler_args, &options);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&configuration)?);
        return Ok(());
    }

    println!("{}", toolset.name().green().bold());
    if let Some(language) = &configuration.language {
        println!("  language:  {}", language);
    }
    if let Some(standard) = &configuration.standard {
        println!("  standard:  {}", standard);
    }
    if !configuration.macros.is_empty() {
        println!("  macros:    {}", configuration.macros.len());
    }
    for (label, paths) in [
        ("include", &configuration.include.paths),
        ("system", &configuration.include.system_paths),
        ("built-in", &configuration.include.built_in_paths),
    ] {
        for path in paths {
            println!("  {:9} {}", label.cyan(), path);
        }
    }
    if !configuration.parser_arguments.is_empty() {
        println!("  parser:    {}", configuration.parser_arguments.join(" ").dimmed());
    }
    Ok(())
}
