//! `polyrun languages`: list registered languages.

use polyrun_core::{LanguageRegistry, RecipeKind, StudioConfig};

use crate::colors;

pub fn execute(config: &StudioConfig) -> anyhow::Result<()> {
    let registry = LanguageRegistry::from_config(config)?;

    let header = format!(
        "{:<12} {:<14} {:<6} {:<8} TOOLS",
        "ID", "NAME", "EXT", "KIND"
    );
    println!("{}", colors::paint(colors::BOLD, &header));
    for recipe in registry.recipes() {
        let kind = match recipe.kind {
            RecipeKind::Execute if recipe.requires_build_step() => "compile",
            RecipeKind::Execute => "run",
            RecipeKind::Render => "preview",
        };
        let tools = recipe.required_tools().join(", ");
        let availability = if recipe.tool_available() {
            colors::paint(colors::GREEN, "ok")
        } else {
            colors::paint(colors::RED, "missing")
        };
        println!(
            "{:<12} {:<14} {:<6} {:<8} {} ({})",
            recipe.id, recipe.display_name, recipe.file_extension, kind, tools, availability
        );
        if !recipe.aliases.is_empty() {
            let aliases = format!("{:<12} aliases: {}", "", recipe.aliases.join(", "));
            println!("{}", colors::paint(colors::DIM, &aliases));
        }
    }
    let blockly = format!("blockly -> {}", registry.blockly_target());
    println!("{}", colors::paint(colors::DIM, &blockly));
    Ok(())
}
