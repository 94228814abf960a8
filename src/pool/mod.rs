//! Validation pool
//!
//! The façade the build pipeline drives. A pool moves through strictly
//! sequential phases, each a distinct type:
//!
//! 1. [`CandidatePool`] - acquired from Gerrit or a manifest, filtered for a
//!    throttled tree
//! 2. [`AppliedPool`] - applied into the checkout, awaiting verification
//! 3. [`crate::submit::SubmissionResult`] - what landed and what was rejected
//!
//! Between processes of one logical build a phase is handed over as a
//! [`PoolSnapshot`].

mod acquire;
mod apply;
mod failure;
pub(crate) mod messages;
mod snapshot;

pub use acquire::CQ_READY_QUERY;
pub use snapshot::{PoolPhase, PoolSnapshot, RestoredPool, SNAPSHOT_VERSION};

use crate::config::PoolConfig;
use crate::error::{PatchError, Result};
use crate::graph::{DependencyMap, get_depend_map_for_changes};
use crate::plan::{PlanOptions, Transaction, create_disjoint_transactions};
use crate::platform::{
    ActionRecorder, BuildHistory, Checkout, GerritClient, Notifier, PatchSeries, Triage,
    TreeStatusSource,
};
use crate::types::{Change, ChangeId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// External collaborators of a pool
#[derive(Clone)]
pub struct PoolServices {
    /// Gerrit REST client
    pub gerrit: Arc<dyn GerritClient>,
    /// Patch application against the checkout
    pub series: Arc<dyn PatchSeries>,
    /// Build database action log
    pub recorder: Arc<dyn ActionRecorder>,
    /// Build database history
    pub history: Arc<dyn BuildHistory>,
    /// Owner notifications
    pub notifier: Arc<dyn Notifier>,
    /// Blame assignment
    pub triage: Arc<dyn Triage>,
    /// Tree-status service
    pub tree: Arc<dyn TreeStatusSource>,
    /// Local git operations
    pub checkout: Arc<dyn Checkout>,
}

/// Change lists shared by every phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    /// Changes tracked by the manifest
    pub candidates: Vec<Change>,
    /// Mergeable changes in projects outside the manifest
    pub non_manifest_changes: Vec<Change>,
    /// Changes present in the checkout
    pub applied: Vec<Change>,
    /// Changes that only conflicted with something else in this run
    pub changes_that_failed_to_apply_earlier: Vec<Change>,
    /// Candidates deferred by throttling
    pub filtered_set: Vec<Change>,
    /// Tree was open (not throttled) when the pool was acquired
    pub tree_was_open: bool,
}

impl PoolState {
    /// Find a change anywhere in the pool
    pub fn find(&self, id: &ChangeId) -> Option<&Change> {
        self.candidates
            .iter()
            .chain(&self.applied)
            .chain(&self.non_manifest_changes)
            .chain(&self.changes_that_failed_to_apply_earlier)
            .chain(&self.filtered_set)
            .find(|c| &c.id == id)
    }

    fn in_filtered_set(&self, id: &ChangeId) -> bool {
        self.filtered_set.iter().any(|c| &c.id == id)
    }
}

/// Phase 1: candidates acquired, nothing applied yet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidatePool {
    state: PoolState,
}

impl CandidatePool {
    /// Empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool with the given manifest and non-manifest candidates
    pub fn from_changes(candidates: Vec<Change>, non_manifest_changes: Vec<Change>) -> Self {
        Self {
            state: PoolState {
                candidates,
                non_manifest_changes,
                tree_was_open: true,
                ..PoolState::default()
            },
        }
    }

    /// Current change lists
    pub const fn state(&self) -> &PoolState {
        &self.state
    }

    /// Manifest candidates
    pub fn candidates(&self) -> &[Change] {
        &self.state.candidates
    }

    /// Candidates deferred by throttling
    pub fn filtered_set(&self) -> &[Change] {
        &self.state.filtered_set
    }

    /// Serializable snapshot of this phase
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot::new(PoolPhase::Candidate, self.state.clone())
    }

    pub(crate) const fn from_state(state: PoolState) -> Self {
        Self { state }
    }
}

/// Phase 2: applied into the checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPool {
    state: PoolState,
}

impl AppliedPool {
    /// Current change lists
    pub const fn state(&self) -> &PoolState {
        &self.state
    }

    /// Changes present in the checkout
    pub fn applied(&self) -> &[Change] {
        &self.state.applied
    }

    /// Whether anything applied
    pub fn has_applied(&self) -> bool {
        !self.state.applied.is_empty()
    }

    /// Serializable snapshot of this phase
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot::new(PoolPhase::Applied, self.state.clone())
    }

    pub(crate) const fn from_state(state: PoolState) -> Self {
        Self { state }
    }
}

/// Transactions that survived the unresolved-dependency policy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlannedTransactions {
    /// Disjoint, dependency-ordered transactions
    pub transactions: Vec<Transaction>,
    /// Changes rejected by this planning round
    pub rejected: Vec<PatchError>,
}

/// The validation pool
pub struct ValidationPool {
    pub(crate) services: PoolServices,
    pub(crate) config: PoolConfig,
    project_patterns: Vec<Regex>,
}

impl ValidationPool {
    /// Create a pool over `services`
    pub fn new(services: PoolServices, config: PoolConfig) -> Result<Self> {
        let project_patterns = config.compile_project_patterns()?;
        Ok(Self {
            services,
            config,
            project_patterns,
        })
    }

    /// Active configuration
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Dependency map of `changes`, bounded by `dependency_map_timeout`
    pub async fn get_depend_map_for_changes(&self, changes: &[Change]) -> Result<DependencyMap> {
        get_depend_map_for_changes(
            changes,
            self.services.series.as_ref(),
            self.config.dependency_map_timeout(),
        )
        .await
    }

    /// Plan `changes` into disjoint transactions and act on the leftovers
    ///
    /// Unresolved changes go through [`Self::filter_dependency_errors`]; what
    /// survives, and every member of an over-long cycle, is rejected.
    /// `changes` must belong to `state`.
    pub async fn create_disjoint_transactions(
        &self,
        state: &PoolState,
        changes: &[Change],
        options: PlanOptions,
    ) -> Result<PlannedTransactions> {
        let deps = self.get_depend_map_for_changes(changes).await?;
        let plan = create_disjoint_transactions(changes, &deps, options);

        if !plan.dropped.is_empty() {
            info!(dropped = ?plan.dropped, "Deferred changes beyond the transaction limit");
        }

        let mut rejected = self.filter_dependency_errors(state, plan.unresolved);
        rejected.extend(plan.too_long);
        self.handle_apply_failure(state, &rejected).await?;

        Ok(PlannedTransactions {
            transactions: plan.transactions,
            rejected,
        })
    }

    fn matches_project_patterns(&self, project: &str) -> bool {
        self.project_patterns.iter().any(|p| p.is_match(project))
    }
}
