//! Tree-status gate and change acquisition

use super::{CandidatePool, ValidationPool, messages};
use crate::error::Result;
use crate::manifest::load_pending_commits;
use crate::types::{BuildStatus, Change, TreeState};
use std::path::Path;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Gerrit search for changes the commit queue may pick up
pub const CQ_READY_QUERY: &str = "status:open AND -label:CodeReview=-2 AND -label:Verified=-1 \
     AND label:Code-Review=+2 AND label:Verified=+1 AND label:Commit-Queue>=1";

impl ValidationPool {
    /// Wait for the tree, sync, and acquire candidates until something shows up
    ///
    /// Returns an empty pool when running dry or once `acquire_timeout`
    /// passes without anything to do.
    pub async fn acquire_pool(&self, query: &str) -> Result<CandidatePool> {
        let deadline = Instant::now() + self.config.acquire_timeout();

        loop {
            let tree = self
                .services
                .tree
                .wait_for_tree_status(self.config.tree_status_timeout())
                .await?;
            self.services.checkout.sync_to_tip().await?;

            let mut pool = CandidatePool::new();
            pool.state.tree_was_open = tree == TreeState::Open;
            info!(tree = ?tree, "Tree status");

            if self.acquire_changes(&mut pool, query).await? {
                return Ok(pool);
            }
            if self.config.dryrun || Instant::now() >= deadline {
                info!("Nothing to acquire");
                return Ok(pool);
            }

            debug!(
                secs = self.config.sleep_timeout().as_secs(),
                "No changes ready; sleeping"
            );
            sleep(self.config.sleep_timeout()).await;
        }
    }

    /// Query Gerrit and add the ready changes to `pool`
    ///
    /// Returns whether anything (manifest or non-manifest) was acquired.
    pub async fn acquire_changes(&self, pool: &mut CandidatePool, query: &str) -> Result<bool> {
        let mut changes = self.services.gerrit.query(query).await?;
        // Gerrit answers newest first; the pool works oldest first.
        changes.reverse();
        info!(changes = ?ids(&changes), "Queried changes");

        let mut manifest_changes = Vec::new();
        let mut non_manifest_changes = Vec::new();
        for change in changes {
            if !self.matches_project_patterns(&change.project) {
                debug!(change = %change.id, project = %change.project, "Not a queue project");
                continue;
            }
            if self
                .services
                .series
                .get_git_repo_for_change(&change, false)
                .await?
                .is_some()
            {
                manifest_changes.push(change);
            } else if change.mergeable {
                non_manifest_changes.push(change);
            }
        }

        let mut ready = Vec::new();
        for change in manifest_changes {
            if change.ready && change.is_draft {
                self.handle_unpublished_change(&change, messages::DRAFT_CHANGE)
                    .await?;
            } else if change.ready && change.is_private {
                self.handle_unpublished_change(&change, messages::PRIVATE_CHANGE)
                    .await?;
            } else if change.ready && change.mergeable {
                ready.push(change);
            }
        }
        info!(changes = ?ids(&ready), "Ready changes");

        pool.state.candidates.extend(ready);
        pool.state.non_manifest_changes.extend(non_manifest_changes);
        Ok(!pool.state.candidates.is_empty() || !pool.state.non_manifest_changes.is_empty())
    }

    /// Seed `pool` from a pending-commit manifest
    pub fn add_pending_commits_into_pool(
        &self,
        pool: &mut CandidatePool,
        manifest: &Path,
    ) -> Result<()> {
        let changes = load_pending_commits(manifest)?;
        info!(count = changes.len(), manifest = %manifest.display(), "Loaded pending commits");
        pool.state.candidates.extend(changes);
        Ok(())
    }

    /// Admit a smaller batch while the tree is throttled
    ///
    /// Admits `max(1, n >> fail_streak)` candidates; the rest move to the
    /// filtered set for a later round.
    pub async fn filter_changes_for_throttled_tree(&self, pool: &mut CandidatePool) -> Result<()> {
        if pool.state.tree_was_open {
            return Ok(());
        }

        let streak = self.get_fail_streak().await?;
        let total = pool.state.candidates.len();
        let admitted = total.checked_shr(u32::try_from(streak).unwrap_or(u32::MAX));
        let admitted = admitted.unwrap_or(0).max(1).min(total);

        let deferred = pool.state.candidates.split_off(admitted);
        if !deferred.is_empty() {
            warn!(
                fail_streak = streak,
                admitted,
                deferred = ?ids(&deferred),
                "Tree is throttled; deferring changes"
            );
        }
        pool.state.filtered_set.extend(deferred);
        Ok(())
    }

    /// Consecutive failed builds of this configuration, newest first
    ///
    /// Inflight builds are skipped; counting stops at the first pass.
    pub async fn get_fail_streak(&self) -> Result<usize> {
        let builds = self
            .services
            .history
            .get_build_history(&self.config.build_config, self.config.fail_streak_history)
            .await?;

        let streak = builds
            .iter()
            .filter(|b| b.status != BuildStatus::Inflight)
            .take_while(|b| b.status != BuildStatus::Passed)
            .filter(|b| b.status == BuildStatus::Failed)
            .count();
        debug!(streak, "Fail streak");
        Ok(streak)
    }

    async fn handle_unpublished_change(&self, change: &Change, template: &str) -> Result<()> {
        warn!(change = %change.id, "Ready change is not public");
        self.send_notification(change, template, &[]).await?;
        self.remove_ready(change, None).await
    }
}

pub(super) fn ids(changes: &[Change]) -> Vec<String> {
    changes.iter().map(|c| c.id.to_string()).collect()
}
