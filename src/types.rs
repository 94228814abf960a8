//! Core types for cq-pool

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of a change across every Gerrit host the pool talks to.
///
/// Two `Change` records with the same `ChangeId` describe the same review,
/// possibly at different patch sets. All maps and sets in the pool are keyed
/// by this id rather than by the record itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(pub String);

impl ChangeId {
    /// Build an id from the Gerrit remote name and review number
    pub fn new(remote: &str, gerrit_number: u64) -> Self {
        Self(format!("{remote}:{gerrit_number}"))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChangeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Review status as reported by Gerrit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    /// Open and not yet submitted
    #[default]
    New,
    /// Submit accepted, merge still pending on the server
    Submitted,
    /// Merged into the target branch
    Merged,
    /// Abandoned by its owner
    Abandoned,
    /// Unpublished draft
    Draft,
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::Submitted => "SUBMITTED",
            Self::Merged => "MERGED",
            Self::Abandoned => "ABANDONED",
            Self::Draft => "DRAFT",
        };
        f.write_str(s)
    }
}

/// A proposed change, as fetched from Gerrit
///
/// The pool treats this as a value: it is re-fetched whenever freshness
/// matters and never written back to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Pool-wide identity
    pub id: ChangeId,
    /// Gerrit `Change-Id` footer
    pub change_id: String,
    /// Review number on its Gerrit host
    pub gerrit_number: u64,
    /// Current patch set number
    pub patch_number: u32,
    /// Project (repository) path on the Gerrit host
    pub project: String,
    /// Fetch URL of the project
    #[serde(default)]
    pub project_url: String,
    /// Branch the change targets
    pub tracking_branch: String,
    /// Remote name (e.g. "cros")
    pub remote: String,
    /// Gerrit ref of the patch set
    #[serde(default)]
    pub git_ref: String,
    /// Commit SHA of the patch set
    #[serde(default)]
    pub commit: String,
    /// Owner email address
    #[serde(default)]
    pub owner_email: String,
    /// First line of the commit message
    #[serde(default)]
    pub subject: String,
    /// When the change was last marked ready
    #[serde(default)]
    pub approval_timestamp: Option<DateTime<Utc>>,
    /// Carries the commit-ready flag
    #[serde(default)]
    pub ready: bool,
    /// Gerrit considers the change submittable
    #[serde(default)]
    pub mergeable: bool,
    /// Carries the Verified approval
    #[serde(default)]
    pub verified: bool,
    /// Review status
    #[serde(default)]
    pub status: ChangeStatus,
    /// Latest patch set is an unpublished draft
    #[serde(default)]
    pub is_draft: bool,
    /// Change is private
    #[serde(default)]
    pub is_private: bool,
    /// Hosted on the internal Gerrit instance
    #[serde(default)]
    pub internal: bool,
    /// Times this patch set was kicked out of the CQ
    #[serde(default)]
    pub fail_count: u32,
    /// Times this patch set passed verification but failed to submit
    #[serde(default)]
    pub pass_count: u32,
    /// Times any patch set of the change was kicked out
    #[serde(default)]
    pub total_fail_count: u32,
}

impl Change {
    /// Whether the change already landed upstream
    pub fn is_already_merged(&self) -> bool {
        self.status == ChangeStatus::Merged
    }

    /// Whether the ready flag was set after `cutoff`
    pub fn approved_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.approval_timestamp.is_some_and(|t| t > cutoff)
    }

    /// Review number with the internal-host prefix, e.g. `*1234`
    pub fn gerrit_number_str(&self) -> String {
        if self.internal {
            format!("*{}", self.gerrit_number)
        } else {
            self.gerrit_number.to_string()
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CL:{}", self.gerrit_number_str())
    }
}

/// Direct dependencies of one change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepChanges {
    /// Parent commits in the same repository
    pub gerrit: Vec<ChangeId>,
    /// Cross-repository `CQ-DEPEND` annotations
    pub cq: Vec<ChangeId>,
}

impl DepChanges {
    /// All direct dependencies, parents first
    pub fn all(&self) -> impl Iterator<Item = &ChangeId> {
        self.gerrit.iter().chain(self.cq.iter())
    }
}

/// An action the pool took on a change, as persisted in the build database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClAction {
    /// Change was applied into the build
    PickedUp,
    /// Change was submitted
    Submitted,
    /// Submit was attempted and failed
    SubmitFailed,
    /// Ready flag was removed
    KickedOut,
    /// A failure was not blamed on the change
    Forgiven,
    /// Change was verified by a pre-CQ trybot
    Verified,
    /// Pre-CQ verification failed
    PreCqFailed,
    /// Pre-CQ verification passed
    PreCqPassed,
}

/// One immutable row of the action log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClActionRecord {
    /// Change the action applies to
    pub change: ChangeId,
    /// Patch set the action applies to
    pub patch_number: u32,
    /// What happened
    pub action: ClAction,
    /// Optional machine-readable reason
    pub reason: Option<String>,
    /// Builder configuration that took the action
    pub build_config: String,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a completed or running build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Build passed
    Passed,
    /// Build failed
    Failed,
    /// Build is still running
    Inflight,
    /// Build was aborted
    Aborted,
}

/// A build row from the build database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Build number within its configuration
    pub build_number: u64,
    /// Builder configuration name
    pub build_config: String,
    /// Current status
    pub status: BuildStatus,
}

/// State of the source tree as reported by the tree-status service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeState {
    /// Changes may land freely
    Open,
    /// Changes may land at a reduced rate
    Throttled,
    /// Nothing may land
    Closed,
}

/// Failure report from one builder in the fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFailureMessage {
    /// Builder that failed
    pub builder: String,
    /// Human-readable summary of the failure
    pub summary: String,
    /// The failure was purely infrastructural
    #[serde(default)]
    pub infra_fail: bool,
}
