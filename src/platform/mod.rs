//! External collaborators of the validation pool
//!
//! The pool never talks to Gerrit, git, the build database or the tree-status
//! service directly. Each of them is a trait here, injected as
//! `Arc<dyn Trait>` so the same pool logic runs against production clients
//! and in-memory fakes.

mod notifier;

pub use notifier::GerritNotifier;

use crate::error::Result;
use crate::types::{
    BuildFailureMessage, BuildRecord, Change, ChangeId, ClAction, ClActionRecord, DepChanges,
    TreeState,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Gerrit REST operations used by the pool
///
/// Errors surface as [`crate::error::Error::Gerrit`] carrying the HTTP status
/// and reason string, so callers can recognise 409 "change is closed".
#[async_trait]
pub trait GerritClient: Send + Sync {
    /// Run a change search, newest first
    async fn query(&self, search: &str) -> Result<Vec<Change>>;

    /// Fetch the current record of one change, `None` if it no longer exists
    async fn query_change(&self, id: &ChangeId) -> Result<Option<Change>>;

    /// Submit the current patch set
    async fn submit_change(&self, change: &Change, dryrun: bool) -> Result<()>;

    /// Post a review message
    async fn set_review(&self, change: &Change, message: &str, dryrun: bool) -> Result<()>;

    /// Strip the commit-ready flag
    async fn remove_ready(&self, change: &Change, dryrun: bool) -> Result<()>;
}

/// Partition of the candidates after an apply
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    /// Changes now present in the checkout
    pub applied: Vec<Change>,
    /// Changes that do not apply to the tip of tree
    pub failed_tot: Vec<crate::error::PatchError>,
    /// Changes that only conflict with something applied earlier in this run
    pub failed_inflight: Vec<crate::error::PatchError>,
}

/// Patch application against the local checkout
///
/// An implementation is bound to one checkout and its manifest.
#[async_trait]
pub trait PatchSeries: Send + Sync {
    /// Direct parents and `CQ-DEPEND` annotations of `change`
    async fn get_dep_changes_for_change(&self, change: &Change) -> Result<DepChanges>;

    /// Apply `changes` transactionally
    async fn apply(&self, changes: &[Change]) -> Result<ApplyOutcome>;

    /// Apply one change on top of whatever is already applied
    ///
    /// An apply failure is returned as [`crate::error::Error::Patch`].
    async fn apply_change(&self, change: &Change) -> Result<()>;

    /// Fetch the refs of `changes` without applying them
    async fn fetch_changes(&self, changes: &[Change]) -> Result<()>;

    /// Local checkout path of the change's project, `None` if not in the manifest
    async fn get_git_repo_for_change(&self, change: &Change, strict: bool)
    -> Result<Option<PathBuf>>;

    /// Re-apply already-verified changes onto a fresh tip before pushing
    async fn reapply_changes(&self, changes: &[Change]) -> Result<ApplyOutcome>;
}

/// Append-only action log in the build database
#[async_trait]
pub trait ActionRecorder: Send + Sync {
    /// Record one action on the current patch set of `change`
    async fn insert_cl_action(
        &self,
        change: &Change,
        action: ClAction,
        reason: Option<&str>,
    ) -> Result<()>;

    /// Full history of the given changes, oldest first
    async fn get_actions_for_changes(&self, changes: &[Change]) -> Result<Vec<ClActionRecord>>;
}

/// Build history lookups
#[async_trait]
pub trait BuildHistory: Send + Sync {
    /// Most recent builds of `build_config`, newest first
    async fn get_build_history(&self, build_config: &str, limit: usize)
    -> Result<Vec<BuildRecord>>;
}

/// Delivery of owner-facing messages
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send `message` to the owner of `change`
    async fn send(&self, change: &Change, message: &str) -> Result<()>;
}

/// Blame assignment from build failures
#[async_trait]
pub trait Triage: Send + Sync {
    /// Changes likely responsible for `messages`, with a reason per change
    async fn find_suspects(
        &self,
        changes: &[Change],
        messages: &[BuildFailureMessage],
    ) -> Result<Vec<(ChangeId, Option<String>)>>;

    /// Changes verified by enough passing configurations to be submitted
    async fn fully_verified_changes(
        &self,
        changes: &[Change],
        messages: &[BuildFailureMessage],
    ) -> Result<Vec<ChangeId>>;
}

/// Tree-status service
#[async_trait]
pub trait TreeStatusSource: Send + Sync {
    /// Block until the tree is open or throttled, or `timeout` elapses
    async fn wait_for_tree_status(&self, timeout: Duration) -> Result<TreeState>;
}

/// Git operations on the local checkout
#[async_trait]
pub trait Checkout: Send + Sync {
    /// Sync the whole checkout to the tip of tree
    async fn sync_to_tip(&self) -> Result<()>;

    /// Rebase the local branch of `repo` onto its remote tracking branch
    async fn sync_branch(&self, repo: &Path, branch: &str) -> Result<()>;

    /// Push `HEAD` of `repo` to `branch` of `project_url`
    async fn push_branch(
        &self,
        repo: &Path,
        project_url: &str,
        branch: &str,
        dryrun: bool,
    ) -> Result<()>;
}
