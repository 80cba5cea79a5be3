use crate::core::engine::Engine;
use anyhow::Result;
use colored::Colorize;

pub fn handle(engine: &Engine) -> Result<()> {
    let definitions = engine.definitions();
    if definitions.is_empty() {
        println!("{}", "No definitions loaded.".yellow());
        return Ok(());
    }

    for definition in definitions {
        let binaries = definition.binary_names().join(", ");
        if binaries.is_empty() {
            println!("{}", definition.name().green().bold());
        } else {
            println!(
                "{}  {}",
                definition.name().green().bold(),
                format!("({})", binaries).dimmed()
            );
        }
    }
    Ok(())
}
