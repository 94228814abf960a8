//! Submission of verified changes
//!
//! Handles the workflow of landing what the fleet verified:
//! 1. Re-validation - reload each change and drop anything that moved
//! 2. Local push - manifest changes are re-applied and pushed per branch
//! 3. Gerrit submit - everything else goes through the submit API in
//!    dependency order
//!
//! A local change is never pushed once one of its dependencies was rejected.
//! Local pushes all happen before the first Gerrit submit, so a local change
//! that depends on a remote one can still land first and then be left
//! without it.
//!
//! Nothing is ever rolled back. A change that landed without one of its
//! dependencies is reported in [`SubmissionResult::incorrectly_submitted`].

mod gerrit;
mod local;
mod revalidate;

pub use revalidate::Revalidated;

use crate::error::{Error, PatchError, Result};
use crate::graph::DependencyMap;
use crate::pool::{AppliedPool, ValidationPool};
use crate::types::{BuildFailureMessage, Change, ChangeId};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Verified changes mapped to the strategy recorded with their submission
pub type VerifiedChanges = BTreeMap<ChangeId, Option<String>>;

/// Outcome of a submission round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionResult {
    /// Changes that landed (or were already merged), in submission order
    pub submitted: Vec<ChangeId>,
    /// Changes that did not land and why
    pub rejected: BTreeMap<ChangeId, PatchError>,
    /// Changes that landed even though a dependency did not
    pub incorrectly_submitted: Vec<PatchError>,
}

impl SubmissionResult {
    /// Whether every verified change landed
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Running tally of one submission round
#[derive(Debug, Default)]
struct Ledger {
    submitted: Vec<ChangeId>,
    errors: BTreeMap<ChangeId, PatchError>,
}

impl Ledger {
    fn is_submitted(&self, id: &ChangeId) -> bool {
        self.submitted.contains(id)
    }

    fn mark_submitted(&mut self, id: &ChangeId) {
        if !self.is_submitted(id) {
            self.submitted.push(id.clone());
        }
    }

    /// Keep the first error recorded for a change
    fn reject(&mut self, err: PatchError) {
        self.errors.entry(err.change().clone()).or_insert(err);
    }

    fn error_for(&self, id: &ChangeId) -> Option<&PatchError> {
        self.errors.get(id)
    }
}

impl ValidationPool {
    /// Submit every applied change of `pool`
    ///
    /// Changes that failed to apply earlier only because of an inflight
    /// conflict are rejected first. Fails with
    /// [`Error::FailedToSubmitAllChanges`] unless everything landed.
    pub async fn submit_pool(
        &self,
        pool: &AppliedPool,
        reason: Option<&str>,
    ) -> Result<SubmissionResult> {
        let state = pool.state();
        let earlier: Vec<PatchError> = state
            .changes_that_failed_to_apply_earlier
            .iter()
            .map(|c| PatchError::ApplyPatch {
                change: c.id.clone(),
                inflight: true,
                message: "It conflicted with other changes tested in this run.".to_string(),
            })
            .collect();
        if !earlier.is_empty() {
            self.handle_apply_failure(state, &earlier).await?;
        }

        let verified = verified_with_reason(pool.applied(), reason);
        let result = self.submit_changes(pool, &verified).await?;
        if !result.is_complete() {
            error!(
                submitted = result.submitted.len(),
                verified = verified.len(),
                "Not every verified change was submitted"
            );
            return Err(Error::FailedToSubmitAllChanges {
                changes: result.rejected.keys().cloned().collect(),
                num_submitted: result.submitted.len(),
            });
        }
        Ok(result)
    }

    /// Submit the changes of `pool` that live outside the checkout
    pub async fn submit_non_manifest_changes(
        &self,
        pool: &AppliedPool,
        reason: Option<&str>,
    ) -> Result<SubmissionResult> {
        let verified = verified_with_reason(&pool.state().non_manifest_changes, reason);
        self.submit_changes(pool, &verified).await
    }

    /// Submit only the changes the fleet fully verified
    ///
    /// Used when some builds failed. Everything else is rejected, and a
    /// change that depends on a rejected change is rejected as if the
    /// dependency had failed to submit.
    pub async fn submit_partial_pool(
        &self,
        pool: &AppliedPool,
        messages: &[BuildFailureMessage],
    ) -> Result<SubmissionResult> {
        let fully_verified: HashSet<ChangeId> = self
            .services
            .triage
            .fully_verified_changes(pool.applied(), messages)
            .await?
            .into_iter()
            .collect();
        info!(changes = ?fully_verified, "Submitting fully verified changes");

        let verified: VerifiedChanges = pool
            .applied()
            .iter()
            .filter(|c| fully_verified.contains(&c.id))
            .map(|c| (c.id.clone(), None))
            .collect();

        let mut result = if verified.is_empty() {
            SubmissionResult::default()
        } else {
            self.submit_changes(pool, &verified).await?
        };
        for change in pool.applied() {
            if !verified.contains_key(&change.id) {
                result.rejected.insert(
                    change.id.clone(),
                    PatchError::Rejected {
                        change: change.id.clone(),
                    },
                );
            }
        }
        Ok(result)
    }

    /// Submit `verified`, which must name changes of `pool`
    ///
    /// Returns what landed and what was rejected. Every rejected owner is
    /// notified and loses the ready flag.
    pub async fn submit_changes(
        &self,
        pool: &AppliedPool,
        verified: &VerifiedChanges,
    ) -> Result<SubmissionResult> {
        if !self.config.is_master || self.config.pre_cq_trybot {
            return Err(Error::Internal(
                "only the commit queue master submits changes".to_string(),
            ));
        }

        let state = pool.state();
        let changes = resolve_verified(pool, verified)?;

        let Revalidated {
            unmodified,
            already_merged,
            errors,
        } = self.filter_modified_changes(&changes).await?;

        let mut ledger = Ledger::default();
        for id in &already_merged {
            ledger.mark_submitted(id);
        }
        for err in errors {
            ledger.reject(err);
        }

        let deps = self.get_depend_map_for_changes(&unmodified).await?;
        let present: HashSet<ChangeId> = unmodified.iter().map(|c| c.id.clone()).collect();
        let mut ready = Vec::with_capacity(unmodified.len());
        for change in unmodified {
            match missing_dependency(&change, &deps, &present, &ledger) {
                Some(err) => {
                    info!(change = %change.id, error = %err, "Dependency will not be submitted");
                    ledger.reject(err);
                }
                None => ready.push(change),
            }
        }

        let mut local: Vec<(PathBuf, Change)> = Vec::new();
        let mut remote: Vec<Change> = Vec::new();
        for change in ready {
            match self
                .services
                .series
                .get_git_repo_for_change(&change, false)
                .await?
            {
                Some(repo) => local.push((repo, change)),
                None => remote.push(change),
            }
        }

        if !local.is_empty() {
            self.submit_local_changes(local, &deps, verified, &mut ledger)
                .await?;
        }
        if !remote.is_empty() {
            self.submit_remote_changes(&remote, &deps, verified, &mut ledger)
                .await?;
        }

        let incorrectly_submitted = submitted_without_deps(&ledger, &deps);
        for failure in &incorrectly_submitted {
            if let Some(change) = state.find(failure.change()) {
                warn!(
                    change = %change.id,
                    error = %failure,
                    "Change was submitted without its dependencies"
                );
                self.handle_incorrect_submission(change, failure).await?;
            }
        }

        for (id, err) in &ledger.errors {
            error!(change = %id, error = %err, "Could not submit change");
            if let Some(change) = state.find(id) {
                self.handle_could_not_submit(change, err).await?;
            }
        }

        Ok(SubmissionResult {
            submitted: ledger.submitted,
            rejected: ledger.errors,
            incorrectly_submitted,
        })
    }
}

fn verified_with_reason(changes: &[Change], reason: Option<&str>) -> VerifiedChanges {
    changes
        .iter()
        .map(|c| (c.id.clone(), reason.map(ToString::to_string)))
        .collect()
}

/// Look up the verified ids in pool order
fn resolve_verified(pool: &AppliedPool, verified: &VerifiedChanges) -> Result<Vec<Change>> {
    let state = pool.state();
    let mut changes: Vec<Change> = Vec::with_capacity(verified.len());
    for change in state.applied.iter().chain(&state.non_manifest_changes) {
        if verified.contains_key(&change.id) && !changes.iter().any(|c| c.id == change.id) {
            changes.push(change.clone());
        }
    }
    if let Some(missing) = verified
        .keys()
        .find(|id| !changes.iter().any(|c| &c.id == *id))
    {
        return Err(Error::Internal(format!(
            "verified change {missing} is not part of the pool"
        )));
    }
    Ok(changes)
}

/// Dependency error for a change whose closure reaches outside `present`
///
/// Dependencies that already merged are fine. Anything else outside the
/// verified set is treated as rejected.
fn missing_dependency(
    change: &Change,
    deps: &DependencyMap,
    present: &HashSet<ChangeId>,
    ledger: &Ledger,
) -> Option<PatchError> {
    deps.dependencies_of(&change.id)
        .find(|dep| !present.contains(*dep) && !ledger.is_submitted(dep))
        .map(|dep| {
            let cause = ledger
                .error_for(dep)
                .cloned()
                .unwrap_or_else(|| PatchError::Rejected { change: dep.clone() });
            PatchError::dependency(change.id.clone(), cause)
        })
}

/// Dependency error for a change with a dependency already rejected this round
fn rejected_dependency(
    change: &Change,
    deps: &DependencyMap,
    ledger: &Ledger,
) -> Option<PatchError> {
    deps.dependencies_of(&change.id)
        .find_map(|dep| ledger.error_for(dep))
        .map(|cause| PatchError::dependency(change.id.clone(), cause.clone()))
}

/// Submitted changes with a direct dependency that was rejected
fn submitted_without_deps(ledger: &Ledger, deps: &DependencyMap) -> Vec<PatchError> {
    ledger
        .submitted
        .iter()
        .filter_map(|id| {
            deps.direct_dependencies(id)
                .iter()
                .find_map(|dep| ledger.error_for(dep))
                .map(|cause| PatchError::SubmittedWithoutDeps {
                    change: id.clone(),
                    cause: Box::new(cause.clone()),
                })
        })
        .collect()
}
