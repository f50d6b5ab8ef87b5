//! `polyrun extensions` and `polyrun invoke`.

use std::path::{Path, PathBuf};

use polyrun_core::{
    ExtensionKind, ExtensionLoader, ExtensionRecord, ExtensionRegistry, ExtensionWatcher,
    LoadStatus, StudioConfig,
};

use crate::colors;

fn extensions_dir(config: &StudioConfig, dir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => Ok(config.studio_dirs()?.extensions_dir),
    }
}

/// Scan, print, and optionally keep rescanning on changes.
pub async fn list(config: &StudioConfig, dir: Option<PathBuf>, watch: bool) -> anyhow::Result<()> {
    let dir = extensions_dir(config, dir)?;
    let loader = ExtensionLoader::new(config.extension_load_timeout());
    let registry = ExtensionRegistry::global();

    let records = registry.rescan(&loader, &dir).await?;
    print_records(&dir, &records);
    if !watch {
        return Ok(());
    }

    let mut watcher = ExtensionWatcher::new(&dir)?;
    eprintln!(
        "{}",
        colors::paint(colors::DIM, "Watching for changes, Ctrl-C to stop")
    );
    loop {
        tokio::select! {
            changed = watcher.changed() => {
                if changed.is_none() {
                    break;
                }
                registry.rescan(&loader, &dir).await?;
                print_records(&dir, &registry.list());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

/// Load extensions and run one action. Returns the action's exit code.
pub async fn invoke(
    config: &StudioConfig,
    dir: Option<PathBuf>,
    extension: &str,
    action: &str,
    payload: &str,
) -> anyhow::Result<i32> {
    let dir = extensions_dir(config, dir)?;
    let loader = ExtensionLoader::new(config.extension_load_timeout());
    let registry = ExtensionRegistry::global();
    registry.rescan(&loader, &dir).await?;

    let output = registry.invoke(extension, action, payload).await?;
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    Ok(output.code)
}

fn print_records(dir: &Path, records: &[ExtensionRecord]) {
    if records.is_empty() {
        println!("No extensions in {}", dir.display());
        return;
    }
    for record in records {
        let kind = match record.kind {
            ExtensionKind::Native => "native",
            ExtensionKind::Process => "process",
        };
        match &record.load_status {
            LoadStatus::Loaded => println!(
                "{} {:<20} {:<8} {}",
                colors::paint(colors::GREEN, "loaded"),
                record.id,
                kind,
                record.actions.join(", ")
            ),
            LoadStatus::Failed(message) => println!(
                "{} {:<20} {:<8} {}",
                colors::paint(colors::RED, "failed"),
                record.id,
                kind,
                message
            ),
        }
    }
}
