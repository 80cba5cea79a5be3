use crate::cli::args::ScanArgs;
use crate::core::engine::Engine;
use anyhow::Result;
use colored::Colorize;

pub fn handle(engine: &Engine, args: &ScanArgs) -> Result<()> {
    let toolsets = engine.get_toolsets()?;

    if args.json {
        let entries: Vec<serde_json::Value> = toolsets
            .iter()
            .map(|(path, toolset)| {
                serde_json::json!({
                    "name": toolset.name(),
                    "compilerPath": path,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if toolsets.is_empty() {
        println!("{}", "No toolsets found.".yellow());
        return Ok(());
    }

    println!("{} toolset(s) discovered:", toolsets.len());
    for (path, toolset) in &toolsets {
        println!("  {}  {}", toolset.name().green().bold(), path.dimmed());
    }
    Ok(())
}
