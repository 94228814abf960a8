//! Test data factories for cq-pool types
//!
//! These are test utilities - not all may be used in every test binary.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use cq_pool::config::PoolConfig;
use cq_pool::pool::{
    AppliedPool, CandidatePool, PoolPhase, PoolSnapshot, PoolState, RestoredPool, SNAPSHOT_VERSION,
};
use cq_pool::types::{
    BuildFailureMessage, BuildRecord, BuildStatus, Change, ChangeId, ChangeStatus, DepChanges,
};

/// Project of changes made by [`make_change`]
pub const DEFAULT_PROJECT: &str = "chromiumos/platform2";

/// Id of external change `n`
pub fn make_id(n: u64) -> ChangeId {
    ChangeId::new("cros", n)
}

/// A ready, verified, mergeable change approved two hours ago
pub fn make_change(n: u64) -> Change {
    make_change_in(n, DEFAULT_PROJECT)
}

/// Like [`make_change`], in `project`
pub fn make_change_in(n: u64, project: &str) -> Change {
    Change {
        id: make_id(n),
        change_id: format!("I{n:040x}"),
        gerrit_number: n,
        patch_number: 1,
        project: project.to_string(),
        project_url: format!("https://chromium.googlesource.com/{project}"),
        tracking_branch: "main".to_string(),
        remote: "cros".to_string(),
        git_ref: format!("refs/changes/{:02}/{n}/1", n % 100),
        commit: format!("{n:040x}"),
        owner_email: "dev@chromium.org".to_string(),
        subject: format!("Change number {n}"),
        approval_timestamp: Some(hours_ago(2)),
        ready: true,
        mergeable: true,
        verified: true,
        status: ChangeStatus::New,
        is_draft: false,
        is_private: false,
        internal: false,
        fail_count: 0,
        pass_count: 0,
        total_fail_count: 0,
    }
}

/// A change approved a moment ago, inside any sensible grace window
pub fn make_fresh_change(n: u64) -> Change {
    Change {
        approval_timestamp: Some(Utc::now()),
        ..make_change(n)
    }
}

/// `change` with its status replaced
pub fn with_status(change: &Change, status: ChangeStatus) -> Change {
    Change {
        status,
        ..change.clone()
    }
}

/// `change` with its patch number replaced
pub fn with_patch(change: &Change, patch_number: u32) -> Change {
    Change {
        patch_number,
        ..change.clone()
    }
}

/// Dependency record with same-repository parents only
pub fn parents(ids: &[u64]) -> DepChanges {
    DepChanges {
        gerrit: ids.iter().map(|&n| make_id(n)).collect(),
        cq: Vec::new(),
    }
}

/// Dependency record with `CQ-DEPEND` annotations only
pub fn cq_depends(ids: &[u64]) -> DepChanges {
    DepChanges {
        gerrit: Vec::new(),
        cq: ids.iter().map(|&n| make_id(n)).collect(),
    }
}

/// A build with the given status
pub fn make_build(build_number: u64, status: BuildStatus) -> BuildRecord {
    BuildRecord {
        build_number,
        build_config: "master-paladin".to_string(),
        status,
    }
}

/// A failure report from `builder`
pub fn make_failure(builder: &str, summary: &str) -> BuildFailureMessage {
    BuildFailureMessage {
        builder: builder.to_string(),
        summary: summary.to_string(),
        infra_fail: false,
    }
}

/// Pool configuration that never sleeps
pub fn test_config() -> PoolConfig {
    PoolConfig {
        build_log: "https://ci.example.com/build/1".to_string(),
        sleep_timeout_secs: 0,
        acquire_timeout_secs: 0,
        tree_status_timeout_secs: 1,
        submitted_wait_polls: 3,
        submitted_poll_interval_ms: 0,
        dependency_map_timeout_secs: 5,
        ..PoolConfig::default()
    }
}

/// An applied pool holding `applied` and `non_manifest`
pub fn make_applied_pool(applied: Vec<Change>, non_manifest: Vec<Change>) -> AppliedPool {
    let snapshot = PoolSnapshot {
        version: SNAPSHOT_VERSION,
        phase: PoolPhase::Applied,
        state: PoolState {
            candidates: applied.clone(),
            applied,
            non_manifest_changes: non_manifest,
            tree_was_open: true,
            ..PoolState::default()
        },
    };
    match snapshot.restore() {
        RestoredPool::Applied(pool) => pool,
        RestoredPool::Candidate(_) => unreachable!("snapshot phase is applied"),
    }
}

/// A candidate pool as acquired under the given tree state
pub fn make_candidate_pool(candidates: Vec<Change>, tree_was_open: bool) -> CandidatePool {
    let snapshot = PoolSnapshot {
        version: SNAPSHOT_VERSION,
        phase: PoolPhase::Candidate,
        state: PoolState {
            candidates,
            tree_was_open,
            ..PoolState::default()
        },
    };
    match snapshot.restore() {
        RestoredPool::Candidate(pool) => pool,
        RestoredPool::Applied(_) => unreachable!("snapshot phase is candidate"),
    }
}

/// A timestamp `hours` in the past
pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}
