//! In-memory fakes for the pool's external collaborators
//!
//! These are hand-written rather than generated so each fake can keep
//! state between calls (a submitted change becomes MERGED, a push marks
//! its branch merged, and so on).
//!
//! Features:
//! - Call tracking for verification
//! - Configurable responses per change
//! - Error injection for failure path testing

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use cq_pool::error::{Error, GerritError, PatchError, Result};
use cq_pool::platform::{
    ActionRecorder, ApplyOutcome, BuildHistory, Checkout, GerritClient, Notifier, PatchSeries,
    Triage, TreeStatusSource,
};
use cq_pool::types::{
    BuildFailureMessage, BuildRecord, Change, ChangeId, ChangeStatus, ClAction, ClActionRecord,
    DepChanges, TreeState,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Gerrit
// ============================================================================

/// Fake Gerrit host
///
/// `query_change` answers from the stored records. A successful submit moves
/// the change to its configured post-submit status (MERGED by default).
#[derive(Default)]
pub struct FakeGerrit {
    records: Mutex<HashMap<ChangeId, Change>>,
    query_results: Mutex<Vec<Change>>,
    after_submit: Mutex<HashMap<ChangeId, ChangeStatus>>,
    // Call tracking
    queries: Mutex<Vec<String>>,
    query_change_calls: Mutex<Vec<ChangeId>>,
    submit_calls: Mutex<Vec<ChangeId>>,
    reviews: Mutex<Vec<(ChangeId, String)>>,
    remove_ready_calls: Mutex<Vec<ChangeId>>,
    // Error injection
    submit_errors: Mutex<HashMap<ChangeId, GerritError>>,
    remove_ready_error: Mutex<Option<GerritError>>,
}

impl FakeGerrit {
    /// Store the server-side record of each change
    pub fn add_changes(&self, changes: &[Change]) {
        let mut records = self.records.lock().unwrap();
        for change in changes {
            records.insert(change.id.clone(), change.clone());
        }
    }

    /// Replace the record of one change
    pub fn update(&self, change: Change) {
        self.records.lock().unwrap().insert(change.id.clone(), change);
    }

    /// Forget a change entirely
    pub fn remove(&self, id: &ChangeId) {
        self.records.lock().unwrap().remove(id);
    }

    /// Answer every `query` with `changes` (newest first, as Gerrit does)
    pub fn set_query_results(&self, changes: Vec<Change>) {
        *self.query_results.lock().unwrap() = changes;
    }

    /// Status a change moves to after a successful submit
    pub fn set_status_after_submit(&self, id: &ChangeId, status: ChangeStatus) {
        self.after_submit.lock().unwrap().insert(id.clone(), status);
    }

    /// Mark every stored change on `project_url`/`branch` as merged
    pub fn merge_branch(&self, project_url: &str, branch: &str) {
        for change in self.records.lock().unwrap().values_mut() {
            if change.project_url == project_url && change.tracking_branch == branch {
                change.status = ChangeStatus::Merged;
            }
        }
    }

    /// Current stored status of a change
    pub fn status_of(&self, id: &ChangeId) -> Option<ChangeStatus> {
        self.records.lock().unwrap().get(id).map(|c| c.status)
    }

    // === Error injection methods ===

    /// Make `submit_change` for `id` fail with an HTTP error
    pub fn fail_submit(&self, id: &ChangeId, status: u16, reason: &str) {
        self.submit_errors
            .lock()
            .unwrap()
            .insert(id.clone(), GerritError::http(status, reason));
    }

    /// Make every `remove_ready` fail with an HTTP error
    pub fn fail_remove_ready(&self, status: u16, reason: &str) {
        *self.remove_ready_error.lock().unwrap() = Some(GerritError::http(status, reason));
    }

    // === Call verification methods ===

    /// Searches passed to `query`
    pub fn get_queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    /// Changes passed to `submit_change`, in order
    pub fn get_submit_calls(&self) -> Vec<ChangeId> {
        self.submit_calls.lock().unwrap().clone()
    }

    /// Number of `query_change` calls for `id`
    pub fn query_change_count(&self, id: &ChangeId) -> usize {
        self.query_change_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == id)
            .count()
    }

    /// Review messages posted, in order
    pub fn get_reviews(&self) -> Vec<(ChangeId, String)> {
        self.reviews.lock().unwrap().clone()
    }

    /// Changes whose ready flag was removed, in order
    pub fn get_remove_ready_calls(&self) -> Vec<ChangeId> {
        self.remove_ready_calls.lock().unwrap().clone()
    }

    /// Assert `submit_change` was called for exactly `ids`, in order
    pub fn assert_submitted(&self, ids: &[ChangeId]) {
        assert_eq!(self.get_submit_calls(), ids, "unexpected submit calls");
    }

    /// Assert the ready flag of `id` was removed
    pub fn assert_ready_removed(&self, id: &ChangeId) {
        assert!(
            self.get_remove_ready_calls().contains(id),
            "expected ready flag of {id} to be removed, got {:?}",
            self.get_remove_ready_calls()
        );
    }

    /// Assert the ready flag of `id` was left alone
    pub fn assert_ready_kept(&self, id: &ChangeId) {
        assert!(
            !self.get_remove_ready_calls().contains(id),
            "ready flag of {id} was removed"
        );
    }
}

#[async_trait]
impl GerritClient for FakeGerrit {
    async fn query(&self, search: &str) -> Result<Vec<Change>> {
        self.queries.lock().unwrap().push(search.to_string());
        Ok(self.query_results.lock().unwrap().clone())
    }

    async fn query_change(&self, id: &ChangeId) -> Result<Option<Change>> {
        self.query_change_calls.lock().unwrap().push(id.clone());
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn submit_change(&self, change: &Change, _dryrun: bool) -> Result<()> {
        self.submit_calls.lock().unwrap().push(change.id.clone());
        if let Some(err) = self.submit_errors.lock().unwrap().get(&change.id) {
            return Err(Error::Gerrit(err.clone()));
        }
        let status = self
            .after_submit
            .lock()
            .unwrap()
            .get(&change.id)
            .copied()
            .unwrap_or(ChangeStatus::Merged);
        if let Some(record) = self.records.lock().unwrap().get_mut(&change.id) {
            record.status = status;
        }
        Ok(())
    }

    async fn set_review(&self, change: &Change, message: &str, _dryrun: bool) -> Result<()> {
        self.reviews
            .lock()
            .unwrap()
            .push((change.id.clone(), message.to_string()));
        Ok(())
    }

    async fn remove_ready(&self, change: &Change, _dryrun: bool) -> Result<()> {
        self.remove_ready_calls.lock().unwrap().push(change.id.clone());
        match self.remove_ready_error.lock().unwrap().clone() {
            Some(err) => Err(Error::Gerrit(err)),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Patch series
// ============================================================================

/// Fake patch series over an imaginary checkout
///
/// Projects registered with [`FakeSeries::add_repo`] are in the manifest.
/// Every change applies unless told otherwise.
#[derive(Default)]
pub struct FakeSeries {
    deps: Mutex<HashMap<ChangeId, DepChanges>>,
    repos: Mutex<HashMap<String, PathBuf>>,
    tot_failures: Mutex<HashSet<ChangeId>>,
    inflight_failures: Mutex<HashSet<ChangeId>>,
    reapply_failures: Mutex<HashSet<ChangeId>>,
    dep_lookup_delay: Mutex<Option<Duration>>,
    // Call tracking
    dep_lookups: Mutex<Vec<ChangeId>>,
    apply_calls: Mutex<Vec<Vec<ChangeId>>>,
    apply_change_calls: Mutex<Vec<ChangeId>>,
    fetch_calls: Mutex<Vec<Vec<ChangeId>>>,
    reapply_calls: Mutex<Vec<Vec<ChangeId>>>,
    // Error injection
    apply_error: Mutex<Option<String>>,
}

impl FakeSeries {
    /// Declare the direct dependencies of `id`
    pub fn set_deps(&self, id: &ChangeId, deps: DepChanges) {
        self.deps.lock().unwrap().insert(id.clone(), deps);
    }

    /// Put `project` into the manifest at `path`
    pub fn add_repo(&self, project: &str, path: &str) {
        self.repos
            .lock()
            .unwrap()
            .insert(project.to_string(), PathBuf::from(path));
    }

    /// Make `id` fail to apply against the tip of tree
    pub fn fail_tot(&self, id: &ChangeId) {
        self.tot_failures.lock().unwrap().insert(id.clone());
    }

    /// Make `id` conflict with something applied in the same run
    pub fn fail_inflight(&self, id: &ChangeId) {
        self.inflight_failures.lock().unwrap().insert(id.clone());
    }

    /// Make `id` fail to re-apply before pushing
    pub fn fail_reapply(&self, id: &ChangeId) {
        self.reapply_failures.lock().unwrap().insert(id.clone());
    }

    /// Make the transactional `apply` itself blow up
    pub fn fail_apply(&self, msg: &str) {
        *self.apply_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Delay every dependency lookup
    pub fn delay_dep_lookups(&self, delay: Duration) {
        *self.dep_lookup_delay.lock().unwrap() = Some(delay);
    }

    // === Call verification methods ===

    /// Batches passed to `apply`
    pub fn get_apply_calls(&self) -> Vec<Vec<ChangeId>> {
        self.apply_calls.lock().unwrap().clone()
    }

    /// Changes passed to `apply_change`, in order
    pub fn get_apply_change_calls(&self) -> Vec<ChangeId> {
        self.apply_change_calls.lock().unwrap().clone()
    }

    /// Batches passed to `fetch_changes`
    pub fn get_fetch_calls(&self) -> Vec<Vec<ChangeId>> {
        self.fetch_calls.lock().unwrap().clone()
    }

    /// Batches passed to `reapply_changes`
    pub fn get_reapply_calls(&self) -> Vec<Vec<ChangeId>> {
        self.reapply_calls.lock().unwrap().clone()
    }

    fn outcome(&self, changes: &[Change], tot: &HashSet<ChangeId>) -> ApplyOutcome {
        let inflight = self.inflight_failures.lock().unwrap();
        let mut outcome = ApplyOutcome::default();
        for change in changes {
            if tot.contains(&change.id) {
                outcome.failed_tot.push(PatchError::ApplyPatch {
                    change: change.id.clone(),
                    inflight: false,
                    message: "Merge conflict in README".to_string(),
                });
            } else if inflight.contains(&change.id) {
                outcome.failed_inflight.push(PatchError::ApplyPatch {
                    change: change.id.clone(),
                    inflight: true,
                    message: "Merge conflict in README".to_string(),
                });
            } else {
                outcome.applied.push(change.clone());
            }
        }
        outcome
    }
}

fn ids(changes: &[Change]) -> Vec<ChangeId> {
    changes.iter().map(|c| c.id.clone()).collect()
}

#[async_trait]
impl PatchSeries for FakeSeries {
    async fn get_dep_changes_for_change(&self, change: &Change) -> Result<DepChanges> {
        self.dep_lookups.lock().unwrap().push(change.id.clone());
        let delay = *self.dep_lookup_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .deps
            .lock()
            .unwrap()
            .get(&change.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn apply(&self, changes: &[Change]) -> Result<ApplyOutcome> {
        self.apply_calls.lock().unwrap().push(ids(changes));
        if let Some(msg) = self.apply_error.lock().unwrap().clone() {
            return Err(Error::Internal(msg));
        }
        let tot = self.tot_failures.lock().unwrap().clone();
        Ok(self.outcome(changes, &tot))
    }

    async fn apply_change(&self, change: &Change) -> Result<()> {
        self.apply_change_calls.lock().unwrap().push(change.id.clone());
        if self.tot_failures.lock().unwrap().contains(&change.id) {
            return Err(Error::Patch(PatchError::ApplyPatch {
                change: change.id.clone(),
                inflight: false,
                message: "Merge conflict in README".to_string(),
            }));
        }
        Ok(())
    }

    async fn fetch_changes(&self, changes: &[Change]) -> Result<()> {
        self.fetch_calls.lock().unwrap().push(ids(changes));
        Ok(())
    }

    async fn get_git_repo_for_change(
        &self,
        change: &Change,
        _strict: bool,
    ) -> Result<Option<PathBuf>> {
        Ok(self.repos.lock().unwrap().get(&change.project).cloned())
    }

    async fn reapply_changes(&self, changes: &[Change]) -> Result<ApplyOutcome> {
        self.reapply_calls.lock().unwrap().push(ids(changes));
        let failing = self.reapply_failures.lock().unwrap().clone();
        Ok(self.outcome(changes, &failing))
    }
}

// ============================================================================
// Build database
// ============================================================================

/// Fake action log
#[derive(Default)]
pub struct FakeRecorder {
    rows: Mutex<Vec<ClActionRecord>>,
    fail_inserts: Mutex<Option<String>>,
}

impl FakeRecorder {
    /// Pre-populate history
    pub fn seed(&self, change: &Change, patch_number: u32, action: ClAction) {
        self.rows.lock().unwrap().push(ClActionRecord {
            change: change.id.clone(),
            patch_number,
            action,
            reason: None,
            build_config: "master-paladin".to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Make every insert fail
    pub fn fail_inserts(&self, msg: &str) {
        *self.fail_inserts.lock().unwrap() = Some(msg.to_string());
    }

    /// Actions recorded for `id`, oldest first
    pub fn actions_for(&self, id: &ChangeId) -> Vec<ClAction> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| &r.change == id)
            .map(|r| r.action)
            .collect()
    }

    /// Reasons recorded for `id` with `action`
    pub fn reasons_for(&self, id: &ChangeId, action: ClAction) -> Vec<Option<String>> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| &r.change == id && r.action == action)
            .map(|r| r.reason.clone())
            .collect()
    }
}

#[async_trait]
impl ActionRecorder for FakeRecorder {
    async fn insert_cl_action(
        &self,
        change: &Change,
        action: ClAction,
        reason: Option<&str>,
    ) -> Result<()> {
        if let Some(msg) = self.fail_inserts.lock().unwrap().clone() {
            return Err(Error::Internal(msg));
        }
        self.rows.lock().unwrap().push(ClActionRecord {
            change: change.id.clone(),
            patch_number: change.patch_number,
            action,
            reason: reason.map(ToString::to_string),
            build_config: "master-paladin".to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn get_actions_for_changes(&self, changes: &[Change]) -> Result<Vec<ClActionRecord>> {
        let wanted: HashSet<&ChangeId> = changes.iter().map(|c| &c.id).collect();
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| wanted.contains(&r.change))
            .cloned()
            .collect())
    }
}

/// Fake build history, newest first
#[derive(Default)]
pub struct FakeHistory {
    builds: Mutex<Vec<BuildRecord>>,
}

impl FakeHistory {
    /// Replace the history (newest first)
    pub fn set_builds(&self, builds: Vec<BuildRecord>) {
        *self.builds.lock().unwrap() = builds;
    }
}

#[async_trait]
impl BuildHistory for FakeHistory {
    async fn get_build_history(
        &self,
        build_config: &str,
        limit: usize,
    ) -> Result<Vec<BuildRecord>> {
        Ok(self
            .builds
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.build_config == build_config)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Notifications and triage
// ============================================================================

/// Notifier that only remembers what it was asked to send
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(ChangeId, String)>>,
}

impl RecordingNotifier {
    /// Messages sent to the owner of `id`, in order
    pub fn messages_for(&self, id: &ChangeId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Total messages sent
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Assert some message to `id` contains `needle`
    pub fn assert_sent(&self, id: &ChangeId, needle: &str) {
        let messages = self.messages_for(id);
        assert!(
            messages.iter().any(|m| m.contains(needle)),
            "no message to {id} contains {needle:?}; got {messages:?}"
        );
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, change: &Change, message: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((change.id.clone(), message.to_string()));
        Ok(())
    }
}

/// Triage with canned answers
#[derive(Default)]
pub struct FakeTriage {
    suspects: Mutex<Vec<(ChangeId, Option<String>)>>,
    fully_verified: Mutex<Vec<ChangeId>>,
}

impl FakeTriage {
    /// Blame `id`, optionally with a reason
    pub fn add_suspect(&self, id: &ChangeId, reason: Option<&str>) {
        self.suspects
            .lock()
            .unwrap()
            .push((id.clone(), reason.map(ToString::to_string)));
    }

    /// Report `ids` as fully verified
    pub fn set_fully_verified(&self, ids: &[ChangeId]) {
        *self.fully_verified.lock().unwrap() = ids.to_vec();
    }
}

#[async_trait]
impl Triage for FakeTriage {
    async fn find_suspects(
        &self,
        changes: &[Change],
        _messages: &[BuildFailureMessage],
    ) -> Result<Vec<(ChangeId, Option<String>)>> {
        Ok(self
            .suspects
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| changes.iter().any(|c| &c.id == id))
            .cloned()
            .collect())
    }

    async fn fully_verified_changes(
        &self,
        changes: &[Change],
        _messages: &[BuildFailureMessage],
    ) -> Result<Vec<ChangeId>> {
        Ok(self
            .fully_verified
            .lock()
            .unwrap()
            .iter()
            .filter(|id| changes.iter().any(|c| &c.id == *id))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Tree status and checkout
// ============================================================================

/// Tree status that replays a script, then stays open
#[derive(Default)]
pub struct FakeTree {
    script: Mutex<VecDeque<TreeState>>,
    calls: Mutex<usize>,
}

impl FakeTree {
    /// States returned by the next calls, in order
    pub fn set_script(&self, states: &[TreeState]) {
        *self.script.lock().unwrap() = states.iter().copied().collect();
    }

    /// Number of waits so far
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl TreeStatusSource for FakeTree {
    async fn wait_for_tree_status(&self, _timeout: Duration) -> Result<TreeState> {
        *self.calls.lock().unwrap() += 1;
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TreeState::Open))
    }
}

/// Fake checkout whose pushes merge the branch on the fake Gerrit
pub struct FakeCheckout {
    gerrit: Arc<FakeGerrit>,
    push_failures_left: Mutex<u32>,
    fail_sync: Mutex<bool>,
    // Call tracking
    sync_to_tip_calls: Mutex<usize>,
    sync_branch_calls: Mutex<Vec<(PathBuf, String)>>,
    push_calls: Mutex<Vec<(PathBuf, String, String)>>,
}

impl FakeCheckout {
    /// Checkout pushing to `gerrit`
    pub fn new(gerrit: Arc<FakeGerrit>) -> Self {
        Self {
            gerrit,
            push_failures_left: Mutex::new(0),
            fail_sync: Mutex::new(false),
            sync_to_tip_calls: Mutex::new(0),
            sync_branch_calls: Mutex::new(Vec::new()),
            push_calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `n` pushes
    pub fn fail_pushes(&self, n: u32) {
        *self.push_failures_left.lock().unwrap() = n;
    }

    /// Make every branch sync fail
    pub fn fail_sync(&self) {
        *self.fail_sync.lock().unwrap() = true;
    }

    /// Number of full syncs
    pub fn sync_to_tip_count(&self) -> usize {
        *self.sync_to_tip_calls.lock().unwrap()
    }

    /// Pushes attempted: (repo, project url, branch)
    pub fn get_push_calls(&self) -> Vec<(PathBuf, String, String)> {
        self.push_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Checkout for FakeCheckout {
    async fn sync_to_tip(&self) -> Result<()> {
        *self.sync_to_tip_calls.lock().unwrap() += 1;
        Ok(())
    }

    async fn sync_branch(&self, repo: &Path, branch: &str) -> Result<()> {
        self.sync_branch_calls
            .lock()
            .unwrap()
            .push((repo.to_path_buf(), branch.to_string()));
        if *self.fail_sync.lock().unwrap() {
            return Err(Error::Internal("rebase failed".to_string()));
        }
        Ok(())
    }

    async fn push_branch(
        &self,
        repo: &Path,
        project_url: &str,
        branch: &str,
        _dryrun: bool,
    ) -> Result<()> {
        self.push_calls.lock().unwrap().push((
            repo.to_path_buf(),
            project_url.to_string(),
            branch.to_string(),
        ));
        {
            let mut left = self.push_failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(Error::Internal("push rejected".to_string()));
            }
        }
        self.gerrit.merge_branch(project_url, branch);
        Ok(())
    }
}
