//! Submission through the Gerrit submit API

use super::{Ledger, VerifiedChanges};
use crate::error::{Error, PatchError, Result};
use crate::graph::DependencyMap;
use crate::plan::{PlanOptions, create_disjoint_transactions};
use crate::pool::{ValidationPool, messages};
use crate::types::{Change, ChangeId, ChangeStatus, ClAction};
use std::collections::{BTreeSet, HashMap};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Gerrit kept reporting a change we just submitted as unsubmitted
pub(super) const INCONSISTENT_SUBMIT: &str =
    "Gerrit thinks that the change was not submitted, even though we hit the submit button.";

type Attempt = std::result::Result<(), PatchError>;

impl ValidationPool {
    /// Submit changes outside the checkout, one transaction at a time
    ///
    /// Changes of one project share a transaction so Gerrit never sees two
    /// concurrent submits to the same project.
    pub(super) async fn submit_remote_changes(
        &self,
        remote: &[Change],
        deps: &DependencyMap,
        verified: &VerifiedChanges,
        ledger: &mut Ledger,
    ) -> Result<()> {
        let plan = create_disjoint_transactions(
            remote,
            deps,
            PlanOptions {
                max_txn_length: None,
                merge_projects: true,
            },
        );
        let by_id: HashMap<&ChangeId, &Change> = remote.iter().map(|c| (&c.id, c)).collect();

        // Unresolved plans reach into local changes, which are settled by now.
        let order: Vec<ChangeId> = plan
            .planned()
            .cloned()
            .chain(plan.unresolved.iter().map(|e| e.change().clone()))
            .collect();
        debug!(transactions = plan.transactions.len(), "Submitting remote changes");

        for id in &order {
            if let Some(change) = by_id.get(id) {
                self.submit_change_with_deps(change, deps, &by_id, verified, ledger)
                    .await?;
            }
        }
        Ok(())
    }

    /// Submit `change` after whatever of its dependencies has not landed yet
    ///
    /// Each change is submitted at most once per round. When a dependency
    /// cannot land, `change` is rejected with a dependency error wrapping the
    /// dependency's failure.
    async fn submit_change_with_deps(
        &self,
        change: &Change,
        deps: &DependencyMap,
        by_id: &HashMap<&ChangeId, &Change>,
        verified: &VerifiedChanges,
        ledger: &mut Ledger,
    ) -> Result<()> {
        if ledger.is_submitted(&change.id) || ledger.error_for(&change.id).is_some() {
            return Ok(());
        }

        let mut plan: Vec<&ChangeId> = deps.dependencies_of(&change.id).collect();
        plan.sort_by_key(|id| (deps.get(id).map_or(0, BTreeSet::len), *id));
        plan.push(&change.id);

        let mut dep_error = None;
        for id in plan {
            if ledger.is_submitted(id) {
                continue;
            }
            if let Some(err) = ledger.error_for(id) {
                dep_error = Some(err.clone());
                break;
            }
            let Some(next) = by_id.get(id) else {
                dep_error = Some(PatchError::Rejected { change: id.clone() });
                break;
            };
            let reason = verified.get(id).and_then(Option::as_deref);
            match self.submit_change_using_gerrit(next, reason).await? {
                Ok(()) => ledger.mark_submitted(id),
                Err(err) => {
                    ledger.reject(err.clone());
                    dep_error = Some(err);
                    break;
                }
            }
        }

        if let Some(cause) = dep_error {
            if !ledger.is_submitted(&change.id) && ledger.error_for(&change.id).is_none() {
                ledger.reject(PatchError::dependency(change.id.clone(), cause));
            }
        }
        Ok(())
    }

    /// Submit one change and wait for Gerrit to confirm it
    ///
    /// A 409 on an already-closed change means somebody else merged it and
    /// counts as success. Every attempt is recorded.
    pub(super) async fn submit_change_using_gerrit(
        &self,
        change: &Change,
        reason: Option<&str>,
    ) -> Result<Attempt> {
        info!(change = %change.id, "Submitting change");
        match self
            .services
            .gerrit
            .submit_change(change, self.config.dryrun)
            .await
        {
            Ok(()) => {}
            Err(Error::Gerrit(e)) if e.is_closed_change() => {
                info!(change = %change.id, "Change was already merged");
                self.record(change, ClAction::Submitted, reason).await?;
                return Ok(Ok(()));
            }
            Err(Error::Gerrit(e)) => {
                warn!(change = %change.id, error = %e, "Gerrit refused the submit");
                self.record(change, ClAction::SubmitFailed, reason).await?;
                let err = if e.is_conflict() {
                    PatchError::Conflict {
                        change: change.id.clone(),
                    }
                } else {
                    PatchError::FailedToSubmit {
                        change: change.id.clone(),
                        message: Some(e.reason),
                    }
                };
                return Ok(Err(err));
            }
            Err(e) => return Err(e),
        }

        if self.check_change_was_submitted(change, true, reason).await? {
            Ok(Ok(()))
        } else {
            Ok(Err(PatchError::FailedToSubmit {
                change: change.id.clone(),
                message: Some(INCONSISTENT_SUBMIT.to_string()),
            }))
        }
    }

    /// Confirm that Gerrit moved a pushed or submitted change out of NEW
    ///
    /// MERGED is success. A change stuck in SUBMITTED after
    /// `submitted_wait_polls` polls is assumed to merge eventually, and the
    /// owner is asked to double-check. The outcome is recorded as
    /// [`ClAction::Submitted`] or [`ClAction::SubmitFailed`], also on a dry
    /// run, where Gerrit is not asked at all.
    pub(super) async fn check_change_was_submitted(
        &self,
        change: &Change,
        push_success: bool,
        reason: Option<&str>,
    ) -> Result<bool> {
        let success = if self.config.dryrun {
            info!(change = %change.id, "Dry run; not checking submit status");
            push_success
        } else {
            self.wait_for_submit_status(change, push_success).await?
        };

        let action = if success {
            ClAction::Submitted
        } else {
            ClAction::SubmitFailed
        };
        self.record(change, action, reason).await?;
        Ok(success)
    }

    async fn wait_for_submit_status(&self, change: &Change, push_success: bool) -> Result<bool> {
        let mut status = self.reload_status(&change.id).await?;
        if push_success && status == ChangeStatus::Submitted {
            let mut polls = 0;
            while status == ChangeStatus::Submitted && polls < self.config.submitted_wait_polls {
                sleep(self.config.submitted_poll_interval()).await;
                status = self.reload_status(&change.id).await?;
                polls += 1;
            }
            if status == ChangeStatus::Submitted {
                warn!(
                    change = %change.id,
                    polls,
                    "Timed out waiting for Gerrit to merge a submitted change"
                );
                self.services
                    .gerrit
                    .set_review(change, messages::STILL_SUBMITTED, self.config.dryrun)
                    .await?;
            }
        }

        let success = push_success
            && matches!(status, ChangeStatus::Merged | ChangeStatus::Submitted);
        if push_success && !success {
            error!(change = %change.id, status = ?status, "Gerrit was unable to merge the change");
        }
        Ok(success)
    }

    async fn reload_status(&self, id: &ChangeId) -> Result<ChangeStatus> {
        self.services
            .gerrit
            .query_change(id)
            .await?
            .map(|c| c.status)
            .ok_or_else(|| Error::InconsistentReload(format!("{id} disappeared while submitting")))
    }
}
