use crate::cli::args::IdentifyArgs;
use crate::core::engine::Engine;
use anyhow::{Result, anyhow};
use colored::Colorize;

pub fn handle(engine: &Engine, args: &IdentifyArgs) -> Result<()> {
    let toolset = engine
        .identify_toolset(&args.candidate)?
        .ok_or_else(|| anyhow!("No toolset matched '{}'.", args.candidate))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&toolset.to_serialized())?
        );
        return Ok(());
    }

    println!(
        "{}  {}",
        toolset.name().green().bold(),
        toolset.compiler_path().display().to_string().dimmed()
    );
    Ok(())
}
