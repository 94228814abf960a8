//! Blame, rejection and notification
//!
//! Every rejection produces an owner notification, removal of the ready flag
//! (master only) and a row in the action log.

use super::messages::{self, render};
use super::{AppliedPool, PoolState, ValidationPool};
use crate::error::{Error, PatchError, Result};
use crate::types::{BuildFailureMessage, Change, ClAction};
use chrono::Utc;
use std::collections::HashMap;
use tracing::{error, info, warn};

impl ValidationPool {
    /// Drop dependency errors that should not reject anybody yet
    ///
    /// An error is dropped when its root is a change deferred by throttling,
    /// or when the affected change is not ready or was approved within the
    /// rejection grace window.
    pub fn filter_dependency_errors(
        &self,
        state: &PoolState,
        errors: Vec<PatchError>,
    ) -> Vec<PatchError> {
        let grace = chrono::Duration::from_std(self.config.rejection_grace_period())
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(grace).unwrap_or_default();

        errors
            .into_iter()
            .filter(|err| {
                if !state.filtered_set.is_empty() && err.is_dependency_error() {
                    if let PatchError::NotEligible { change } = err.root_error() {
                        if state.in_filtered_set(change) {
                            info!(
                                change = %err.change(),
                                dependency = %change,
                                "Ignoring dependency error; dependency was deferred by throttling"
                            );
                            return false;
                        }
                    }
                }

                let Some(change) = state.find(err.change()) else {
                    return true;
                };
                let recent = change.approved_since(cutoff);
                if change.ready && !recent {
                    return true;
                }
                if has_dependency_error(err) {
                    if change.ready {
                        info!(change = %change.id, "Ignoring dependency error due to grace period");
                    } else {
                        info!(change = %change.id, "Ignoring dependency error until change is ready");
                    }
                    return false;
                }
                true
            })
            .collect()
    }

    /// Reject changes that could not be applied
    pub async fn handle_apply_failure(
        &self,
        state: &PoolState,
        failures: &[PatchError],
    ) -> Result<()> {
        for failure in failures {
            info!(change = %failure.change(), "Change did not apply cleanly");
            if !self.config.is_master {
                continue;
            }
            let Some(change) = state.find(failure.change()) else {
                warn!(change = %failure.change(), "Rejected change is not in the pool");
                continue;
            };
            let text = failure.to_string();
            self.send_notification(
                change,
                messages::COULD_NOT_APPLY,
                &[("failure", text.as_str())],
            )
            .await?;
            self.remove_ready(change, None).await?;
        }
        Ok(())
    }

    /// Tell the owner their change is being tested
    pub async fn handle_apply_success(&self, change: &Change) -> Result<()> {
        let url = self.cl_status_url(change);
        self.send_notification(
            change,
            messages::APPLY_SUCCESS,
            &[("cl_status_url", url.as_str())],
        )
        .await
    }

    /// Tell the owner their change will be retried after an inflight conflict
    pub async fn handle_failed_to_apply_due_to_inflight_conflict(
        &self,
        change: &Change,
    ) -> Result<()> {
        self.send_notification(change, messages::INFLIGHT_CONFLICT, &[])
            .await
    }

    /// Reject a change that failed to submit
    pub async fn handle_could_not_submit(&self, change: &Change, error: &PatchError) -> Result<()> {
        let text = error.to_string();
        self.send_notification(
            change,
            messages::COULD_NOT_SUBMIT,
            &[("error", text.as_str())],
        )
        .await?;
        self.remove_ready(change, None).await
    }

    /// Flag a change that landed without its dependencies
    pub async fn handle_incorrect_submission(
        &self,
        change: &Change,
        failure: &PatchError,
    ) -> Result<()> {
        let text = failure.to_string();
        self.send_notification(
            change,
            messages::INCORRECT_SUBMISSION,
            &[("failure", text.as_str())],
        )
        .await?;
        self.remove_ready(change, None).await
    }

    /// Assign blame for a failed verification
    ///
    /// With `sanity == false`, or when no suspect is found, every applied
    /// change is forgiven. Otherwise suspects are kicked out and everything
    /// else is forgiven. On a pre-CQ trybot, changes that already passed the
    /// pre-CQ are left alone.
    pub async fn handle_validation_failure(
        &self,
        pool: &AppliedPool,
        failures: &[BuildFailureMessage],
        sanity: bool,
    ) -> Result<()> {
        let applied = pool.applied();
        let candidates: Vec<Change> = if self.config.pre_cq_trybot {
            let history = self
                .services
                .recorder
                .get_actions_for_changes(applied)
                .await?;
            applied
                .iter()
                .filter(|c| {
                    !history.iter().any(|a| {
                        a.change == c.id
                            && a.patch_number == c.patch_number
                            && a.action == ClAction::PreCqPassed
                    })
                })
                .cloned()
                .collect()
        } else {
            applied.to_vec()
        };

        let suspects: HashMap<_, _> = if sanity {
            self.services
                .triage
                .find_suspects(&candidates, failures)
                .await?
                .into_iter()
                .collect()
        } else {
            HashMap::new()
        };
        info!(
            suspects = ?suspects.keys().collect::<Vec<_>>(),
            sanity,
            "Handling validation failure"
        );

        let details = failure_details(failures);
        for change in &candidates {
            let retry = !sanity || !suspects.contains_key(&change.id);

            if !self.config.pre_cq_trybot || !retry {
                let url = self.cl_status_url(change);
                let template = if retry {
                    messages::VALIDATION_FAILED_RETRY
                } else {
                    messages::VALIDATION_FAILED
                };
                self.send_notification(
                    change,
                    template,
                    &[("details", details.as_str()), ("cl_status_url", url.as_str())],
                )
                .await?;
            }

            if retry {
                self.mark_forgiven(change, None).await?;
            } else {
                let reason = suspects.get(&change.id).cloned().flatten();
                self.remove_ready(change, reason.as_deref()).await?;
            }
        }
        Ok(())
    }

    /// Handle a verification that did not finish in time
    ///
    /// Only changes to the queue's own projects are rejected; a bare timeout
    /// says nothing about anybody else's change. Everybody else is told the
    /// change will be retried, then forgiven.
    pub async fn handle_validation_timeout(&self, pool: &AppliedPool, sanity: bool) -> Result<()> {
        info!("Validation timed out for all changes");
        for change in pool.applied() {
            if sanity && self.config.is_cq_project(&change.project) {
                info!(change = %change.id, "Rejecting queue change after timeout");
                self.send_notification(change, messages::VALIDATION_TIMEOUT, &[])
                    .await?;
                self.remove_ready(change, None).await?;
            } else {
                self.send_notification(change, messages::VALIDATION_TIMEOUT_RETRY, &[])
                    .await?;
                self.mark_forgiven(change, None).await?;
            }
        }
        Ok(())
    }

    /// Strip the ready flag and record the kick-out
    ///
    /// A change somebody else already merged is not an error.
    pub async fn remove_ready(&self, change: &Change, reason: Option<&str>) -> Result<()> {
        match self
            .services
            .gerrit
            .remove_ready(change, self.config.dryrun)
            .await
        {
            Ok(()) => {}
            Err(Error::Gerrit(e)) if e.is_closed_change() => {
                warn!(change = %change.id, "Change is closed; ignoring conflict on ready removal");
            }
            Err(e) => {
                error!(change = %change.id, error = %e, "Failed to remove ready flag");
                return Err(e);
            }
        }

        self.record(change, ClAction::KickedOut, reason).await?;
        if self.config.pre_cq_trybot {
            self.record(change, ClAction::PreCqFailed, None).await?;
        }
        Ok(())
    }

    /// Record that a failure was not blamed on `change`
    pub async fn mark_forgiven(&self, change: &Change, reason: Option<&str>) -> Result<()> {
        self.record(change, ClAction::Forgiven, reason).await
    }

    /// Render `template` and send it to the owner of `change`
    pub async fn send_notification(
        &self,
        change: &Change,
        template: &str,
        extra: &[(&str, &str)],
    ) -> Result<()> {
        let mut args: Vec<(&str, &str)> = vec![
            ("queue", self.config.queue_name()),
            ("build_log", self.config.build_log.as_str()),
        ];
        args.extend_from_slice(extra);
        let message = render(template, &args);
        self.services.notifier.send(change, &message).await
    }

    /// CL status page of the current patch set
    pub fn cl_status_url(&self, change: &Change) -> String {
        self.config.cl_status_url(change)
    }

    pub(crate) async fn record(
        &self,
        change: &Change,
        action: ClAction,
        reason: Option<&str>,
    ) -> Result<()> {
        self.services
            .recorder
            .insert_cl_action(change, action, reason)
            .await
    }
}

fn has_dependency_error(err: &PatchError) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if matches!(e, PatchError::Dependency { .. }) {
            return true;
        }
        current = e.cause();
    }
    false
}

fn failure_details(failures: &[BuildFailureMessage]) -> String {
    if failures.is_empty() {
        return "No failure details were reported.".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{}: {}", f.builder, f.summary))
        .collect::<Vec<_>>()
        .join("\n")
}
