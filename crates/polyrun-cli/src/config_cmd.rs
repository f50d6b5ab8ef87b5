//! `polyrun config`: show or initialize the configuration file.

use std::path::Path;

use polyrun_core::StudioConfig;

pub fn execute(config: &StudioConfig, path: &Path, init: bool) -> anyhow::Result<()> {
    if init {
        if path.exists() {
            anyhow::bail!("{} already exists", path.display());
        }
        StudioConfig::default().save_to(path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
