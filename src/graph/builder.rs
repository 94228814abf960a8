//! Dependency map builder
//!
//! Looks up the direct dependencies of every change through the
//! [`PatchSeries`] and condenses them into a [`DependencyMap`].

use super::DependencyMap;
use crate::error::{Error, Result};
use crate::platform::PatchSeries;
use crate::types::{Change, ChangeId};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

/// Build the dependency map of `changes`
///
/// The whole lookup runs under `timeout`. On expiry the round is abandoned
/// with [`Error::Timeout`]; nothing is cached from a partial lookup. Lookup
/// errors propagate unchanged.
pub async fn get_depend_map_for_changes(
    changes: &[Change],
    series: &dyn PatchSeries,
    timeout: Duration,
) -> Result<DependencyMap> {
    let direct = tokio::time::timeout(timeout, lookup_direct_dependencies(changes, series))
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "computing the dependency map of {} changes took longer than {}s",
                changes.len(),
                timeout.as_secs()
            ))
        })??;

    let order: Vec<ChangeId> = changes.iter().map(|c| c.id.clone()).collect();
    let map = DependencyMap::from_edges(&order, direct);
    debug!(
        changes = changes.len(),
        with_dependencies = map.len(),
        "Computed dependency map"
    );
    Ok(map)
}

async fn lookup_direct_dependencies(
    changes: &[Change],
    series: &dyn PatchSeries,
) -> Result<HashMap<ChangeId, Vec<ChangeId>>> {
    let mut direct = HashMap::new();

    for change in changes {
        let deps = series.get_dep_changes_for_change(change).await?;
        let mut seen = HashSet::new();
        let list: Vec<ChangeId> = deps
            .all()
            .filter(|dep| seen.insert((*dep).clone()))
            .cloned()
            .collect();

        if !list.is_empty() {
            debug!(change = %change.id, deps = ?list, "Direct dependencies");
            direct.insert(change.id.clone(), list);
        }
    }

    Ok(direct)
}
