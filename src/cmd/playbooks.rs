//! Playbook listing command: `playctl playbooks`.

use std::path::Path;

use anyhow::{Context, Result};

pub fn cmd_playbooks(dir: &Path, json: bool) -> Result<()> {
    let names = playctl::jobs::list_playbooks(dir)
        .with_context(|| format!("Failed to list playbooks in {}", dir.display()))?;

    if json {
        println!("{}", serde_json::json!({ "playbooks": names }));
        return Ok(());
    }

    if names.is_empty() {
        println!("No playbooks found in {}", dir.display());
        return Ok(());
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}
