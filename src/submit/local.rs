//! Submission by pushing the local checkout

use super::gerrit::INCONSISTENT_SUBMIT;
use super::{Ledger, VerifiedChanges, rejected_dependency};
use crate::error::{PatchError, Result};
use crate::graph::DependencyMap;
use crate::pool::ValidationPool;
use crate::types::{Change, ChangeId};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Changes of one branch of one repository
struct BranchPush {
    repo: PathBuf,
    branch: String,
    changes: Vec<Change>,
}

impl BranchPush {
    fn contains(&self, id: &ChangeId) -> bool {
        self.changes.iter().any(|c| &c.id == id)
    }
}

impl ValidationPool {
    /// Re-apply manifest changes onto a fresh tip and push them branch by branch
    ///
    /// Changes land in the order they were applied, with a single push per
    /// branch, and each change is then confirmed in Gerrit. Branches are
    /// pushed after the branches they depend on. A push carries the whole
    /// branch, so a branch holding a change whose dependency was already
    /// rejected is not pushed at all.
    pub(super) async fn submit_local_changes(
        &self,
        local: Vec<(PathBuf, Change)>,
        deps: &DependencyMap,
        verified: &VerifiedChanges,
        ledger: &mut Ledger,
    ) -> Result<()> {
        let changes: Vec<Change> = local.iter().map(|(_, c)| c.clone()).collect();
        let outcome = self.services.series.reapply_changes(&changes).await?;
        let reapplied: HashSet<ChangeId> = outcome.applied.iter().map(|c| c.id.clone()).collect();
        for err in outcome.failed_tot.into_iter().chain(outcome.failed_inflight) {
            warn!(change = %err.change(), error = %err, "Change no longer applies");
            ledger.reject(err);
        }

        let mut pushes: Vec<BranchPush> = Vec::new();
        for (repo, change) in local {
            if !reapplied.contains(&change.id) {
                ledger.reject(PatchError::FailedToSubmit {
                    change: change.id.clone(),
                    message: Some("The change could not be re-applied before pushing.".to_string()),
                });
                continue;
            }
            let existing = pushes
                .iter()
                .position(|p| p.repo == repo && p.branch == change.tracking_branch);
            match existing {
                Some(i) => pushes[i].changes.push(change),
                None => pushes.push(BranchPush {
                    repo,
                    branch: change.tracking_branch.clone(),
                    changes: vec![change],
                }),
            }
        }

        for push in dependency_order(pushes, deps) {
            let blocked: Vec<PatchError> = push
                .changes
                .iter()
                .filter_map(|c| rejected_dependency(c, deps, ledger))
                .collect();
            if let Some(first) = blocked.first() {
                let message = format!(
                    "The branch was not pushed because {} depends on a change that was not submitted.",
                    first.change()
                );
                warn!(
                    repo = %push.repo.display(),
                    branch = %push.branch,
                    blocked = blocked.len(),
                    "Not pushing branch; a dependency was rejected"
                );
                for err in blocked {
                    ledger.reject(err);
                }
                for change in &push.changes {
                    ledger.reject(PatchError::FailedToSubmit {
                        change: change.id.clone(),
                        message: Some(message.clone()),
                    });
                }
                continue;
            }

            let failures = self
                .push_repo_branch(&push.repo, &push.changes, &push.branch)
                .await;
            let mut failed: Vec<(ChangeId, PatchError)> = failures
                .into_iter()
                .map(|e| (e.change().clone(), e))
                .collect();

            for change in &push.changes {
                let failure = failed
                    .iter()
                    .position(|(id, _)| id == &change.id)
                    .map(|i| failed.swap_remove(i).1);
                let reason = verified.get(&change.id).and_then(Option::as_deref);
                let confirmed = self
                    .check_change_was_submitted(change, failure.is_none(), reason)
                    .await?;

                match failure {
                    Some(err) => ledger.reject(err),
                    None if confirmed => ledger.mark_submitted(&change.id),
                    None => ledger.reject(PatchError::FailedToSubmit {
                        change: change.id.clone(),
                        message: Some(INCONSISTENT_SUBMIT.to_string()),
                    }),
                }
            }
        }
        Ok(())
    }

    /// Sync and push `HEAD` of `repo` to `branch`, retrying a few times
    ///
    /// Gives up early if the sync fails, which usually means somebody pushed
    /// to the branch behind the queue's back. Returns one error per change
    /// when the push never went through.
    pub async fn push_repo_branch(
        &self,
        repo: &Path,
        changes: &[Change],
        branch: &str,
    ) -> Vec<PatchError> {
        let Some(first) = changes.first() else {
            return Vec::new();
        };
        let project_url = first.project_url.as_str();

        for attempt in 1..=self.config.push_attempts {
            if let Err(e) = self.services.checkout.sync_branch(repo, branch).await {
                error!(
                    repo = %repo.display(),
                    branch,
                    error = %e,
                    "Sync failed; a change was likely pushed in the middle of the run"
                );
                break;
            }
            match self
                .services
                .checkout
                .push_branch(repo, project_url, branch, self.config.dryrun)
                .await
            {
                Ok(()) => {
                    info!(repo = %repo.display(), branch, count = changes.len(), "Pushed changes");
                    return Vec::new();
                }
                Err(e) => warn!(
                    repo = %repo.display(),
                    branch,
                    attempt,
                    error = %e,
                    "Push failed"
                ),
            }
        }

        let message = format!("Failed to push to {project_url} {branch}");
        changes
            .iter()
            .map(|c| PatchError::FailedToSubmit {
                change: c.id.clone(),
                message: Some(message.clone()),
            })
            .collect()
    }
}

/// Order branches so each is pushed after the branches it depends on
///
/// Pool order is kept where dependencies allow it. Branches that depend on
/// each other keep their pool order.
fn dependency_order(mut pending: Vec<BranchPush>, deps: &DependencyMap) -> Vec<BranchPush> {
    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let next = (0..pending.len())
            .find(|&i| {
                !pending.iter().enumerate().any(|(j, other)| {
                    j != i
                        && pending[i]
                            .changes
                            .iter()
                            .any(|c| deps.dependencies_of(&c.id).any(|dep| other.contains(dep)))
                })
            })
            .unwrap_or(0);
        ordered.push(pending.remove(next));
    }
    ordered
}
