//! `cq pending` - show the changes of a pending-commit manifest

use crate::cli::style::{Stylize, bullet};
use anstream::println;
use anyhow::{Context, Result};
use cq_pool::manifest::{links_to_changes, load_pending_commits};
use std::path::Path;

/// Print the change links of `manifest`, most-failing first
pub fn run_pending(manifest: &Path) -> Result<()> {
    let changes = load_pending_commits(manifest)
        .with_context(|| format!("reading {}", manifest.display()))?;

    if changes.is_empty() {
        println!("{}", "No pending commits".muted());
        return Ok(());
    }

    let internal = changes.iter().filter(|c| c.internal).count();
    println!(
        "{} pending commits ({} internal)",
        changes.len().accent(),
        internal.accent()
    );
    for link in links_to_changes(&changes) {
        println!("  {} {link}", bullet());
    }
    Ok(())
}
