//! Applying the pool into the checkout

use super::{AppliedPool, CandidatePool, PoolState, ValidationPool};
use crate::error::{Error, PatchError, Result};
use crate::manifest::print_links_to_changes;
use crate::platform::ApplyOutcome;
use crate::types::{Change, ClAction, ClActionRecord};
use tracing::{error, info};

impl ValidationPool {
    /// Apply the candidates of `pool`
    ///
    /// The master applies transactionally through the patch series and owns
    /// the follow-up: success notices, rejection of tip-of-tree failures and
    /// deferral of inflight conflicts. Slaves apply one change at a time in
    /// manifest order.
    ///
    /// If the apply itself fails, every candidate is rejected with an
    /// internal error before the failure is returned.
    pub async fn apply_pool_into_repo(&self, pool: CandidatePool) -> Result<AppliedPool> {
        let mut state = pool.state;
        let candidates: Vec<Change> = state
            .candidates
            .iter()
            .filter(|c| !state.applied.iter().any(|a| a.id == c.id))
            .cloned()
            .collect();

        let ApplyOutcome {
            mut applied,
            mut failed_tot,
            mut failed_inflight,
        } = if self.config.is_master {
            self.apply_as_master(&state, &candidates).await?
        } else {
            self.apply_as_slave(&state, &candidates).await?
        };

        if self.config.is_master {
            self.update_fail_counts(&mut applied).await?;
        }
        for change in &applied {
            self.record(change, ClAction::PickedUp, None).await?;
        }
        print_links_to_changes(&applied);

        if self.config.is_master && !self.config.pre_cq_trybot {
            for change in &applied {
                self.handle_apply_success(change).await?;
            }
        }

        // Pre-CQ trybots reject right away; otherwise the launcher would
        // think the change was never tested.
        if !self.config.pre_cq_trybot {
            failed_tot = self.filter_dependency_errors(&state, failed_tot);
            failed_inflight = self.filter_dependency_errors(&state, failed_inflight);
        }

        if !failed_tot.is_empty() {
            info!(
                changes = ?failed_tot.iter().map(|e| e.change().to_string()).collect::<Vec<_>>(),
                "Changes could not be applied to the tip of tree"
            );
            self.handle_apply_failure(&state, &failed_tot).await?;
        }

        if !failed_inflight.is_empty() {
            let ids: Vec<String> = failed_inflight.iter().map(|e| e.change().to_string()).collect();
            info!(
                changes = ?ids,
                "Changes conflict with the current stack; they will be retried if it fails"
            );
        }
        for failure in &failed_inflight {
            if let Some(change) = state.find(failure.change()).cloned() {
                self.handle_failed_to_apply_due_to_inflight_conflict(&change)
                    .await?;
                state.changes_that_failed_to_apply_earlier.push(change);
            }
        }

        state.applied.extend(applied);
        Ok(AppliedPool::from_state(state))
    }

    async fn apply_as_master(
        &self,
        state: &PoolState,
        candidates: &[Change],
    ) -> Result<ApplyOutcome> {
        match self.services.series.apply(candidates).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let message = format!(
                    "Unhandled exception occurred while applying changes: {e}\n\n\
                     To be safe, we have kicked out all of the CLs, so that the commit queue \
                     does not go into an infinite loop retrying patches."
                );
                error!(error = %e, "Apply failed; kicking out all candidates");
                let errors: Vec<PatchError> = candidates
                    .iter()
                    .map(|c| PatchError::InternalCq {
                        change: c.id.clone(),
                        message: message.clone(),
                    })
                    .collect();
                self.handle_apply_failure(state, &errors).await?;
                Err(e)
            }
        }
    }

    async fn apply_as_slave(
        &self,
        state: &PoolState,
        candidates: &[Change],
    ) -> Result<ApplyOutcome> {
        self.services.series.fetch_changes(candidates).await?;

        let mut outcome = ApplyOutcome::default();
        for change in candidates {
            match self.services.series.apply_change(change).await {
                Ok(()) => outcome.applied.push(change.clone()),
                Err(e @ Error::Patch(_)) => {
                    error!(change = %change.id, error = %e, "Change failed to apply on slave");
                    let err = PatchError::InternalCq {
                        change: change.id.clone(),
                        message: e.to_string(),
                    };
                    self.handle_apply_failure(state, &[err]).await?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    /// Fill in the failure history of freshly applied changes
    async fn update_fail_counts(&self, applied: &mut [Change]) -> Result<()> {
        if applied.is_empty() {
            return Ok(());
        }
        let history = self
            .services
            .recorder
            .get_actions_for_changes(applied)
            .await?;

        for change in applied.iter_mut() {
            change.total_fail_count = count_actions(&history, change, ClAction::KickedOut, false);
            change.fail_count = count_actions(&history, change, ClAction::KickedOut, true);
            change.pass_count = count_actions(&history, change, ClAction::SubmitFailed, true);
        }
        Ok(())
    }
}

fn count_actions(
    history: &[ClActionRecord],
    change: &Change,
    action: ClAction,
    latest_patchset_only: bool,
) -> u32 {
    let count = history
        .iter()
        .filter(|a| a.change == change.id && a.action == action)
        .filter(|a| !latest_patchset_only || a.patch_number == change.patch_number)
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}
