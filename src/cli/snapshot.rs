//! `cq snapshot` - summarize a saved pool

use crate::cli::style::{Stream, Stylize, bullet, check, cross, hyperlink};
use anstream::println;
use anyhow::{Context, Result};
use cq_pool::config::PoolConfig;
use cq_pool::pool::{PoolPhase, PoolSnapshot};
use cq_pool::types::Change;
use std::path::Path;

/// Print what a pool snapshot holds
pub fn run_snapshot(path: &Path, config: &PoolConfig) -> Result<()> {
    let snapshot =
        PoolSnapshot::load(path).with_context(|| format!("loading {}", path.display()))?;
    let state = &snapshot.state;

    let phase = match snapshot.phase {
        PoolPhase::Candidate => "candidate",
        PoolPhase::Applied => "applied",
    };
    println!(
        "{} (version {}, phase {})",
        "Pool snapshot".emphasis(),
        snapshot.version,
        phase.accent()
    );
    if state.tree_was_open {
        println!("{} Tree was {}", check(), "open".success());
    } else {
        println!("{} Tree was {}", cross(), "throttled".warn());
    }

    print_section("Candidates", &state.candidates, config, false);
    print_section("Applied", &state.applied, config, false);
    print_section("Non-manifest", &state.non_manifest_changes, config, false);
    print_section(
        "Failed to apply earlier",
        &state.changes_that_failed_to_apply_earlier,
        config,
        true,
    );
    print_section("Deferred by throttling", &state.filtered_set, config, false);
    Ok(())
}

fn print_section(title: &str, changes: &[Change], config: &PoolConfig, failing: bool) {
    if changes.is_empty() {
        return;
    }
    let count = changes.len();
    let count = if failing { count.error() } else { count.accent() };
    println!();
    println!("{} ({count})", title.emphasis());
    for change in changes {
        let url = config.cl_status_url(change);
        let label = change.gerrit_number_str();
        println!(
            "  {} {} {} {}",
            bullet(),
            hyperlink(Stream::Stdout, &label, &url).accent(),
            change.project.muted(),
            change.subject
        );
    }
}
