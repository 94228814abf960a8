//! Pre-submit re-validation

use crate::error::{Error, PatchError, Result};
use crate::pool::ValidationPool;
use crate::types::{Change, ChangeId};
use tracing::{error, warn};

/// Verified changes sorted by what a fresh reload says about them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Revalidated {
    /// Unchanged and still submittable, as originally verified
    pub unmodified: Vec<Change>,
    /// Merged by somebody else while the run was in flight
    pub already_merged: Vec<ChangeId>,
    /// Changes that moved underneath the run
    pub errors: Vec<PatchError>,
}

impl ValidationPool {
    /// Reload `changes` and drop the ones that changed since verification
    ///
    /// A new patch set means the verified code is not what would land. A
    /// change that lost its Verified label or became unmergeable is rejected
    /// too. A change missing from Gerrit is an inconsistent reload and fails
    /// the whole round.
    pub async fn filter_modified_changes(&self, changes: &[Change]) -> Result<Revalidated> {
        let mut out = Revalidated::default();

        for old in changes {
            let Some(fresh) = self.services.gerrit.query_change(&old.id).await? else {
                error!(change = %old.id, "Change disappeared after reloading");
                return Err(Error::InconsistentReload(format!(
                    "{} disappeared after reloading",
                    old.id
                )));
            };

            if fresh.is_already_merged() {
                warn!(change = %old.id, "Change is already merged; it was most likely chumped");
                out.already_merged.push(old.id.clone());
            } else if fresh.patch_number != old.patch_number {
                out.errors.push(PatchError::Modified {
                    change: old.id.clone(),
                    new_patch_number: fresh.patch_number,
                });
            } else if !fresh.verified {
                out.errors.push(PatchError::NotMergeable {
                    change: old.id.clone(),
                    reason: "is not marked Verified=+1.".to_string(),
                });
            } else if !fresh.mergeable {
                out.errors.push(PatchError::NotMergeable {
                    change: old.id.clone(),
                    reason: "is no longer mergeable.".to_string(),
                });
            } else {
                out.unmodified.push(old.clone());
            }
        }
        Ok(out)
    }
}
