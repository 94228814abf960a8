//! Error types for cq-pool

use crate::types::ChangeId;
use std::fmt;
use thiserror::Error;

/// Gerrit reason string for an operation on an already-closed change
pub const GERRIT_REASON_CLOSED_CHANGE: &str = "change is closed";

/// HTTP status Gerrit returns on submit conflicts
pub const HTTP_CONFLICT: u16 = 409;

/// Error returned by a Gerrit host
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct GerritError {
    /// HTTP status, when the failure came from the REST layer
    pub http_status: Option<u16>,
    /// Reason string from the response body
    pub reason: String,
}

impl GerritError {
    /// Create an error from an HTTP status and reason
    pub fn http(status: u16, reason: impl Into<String>) -> Self {
        Self {
            http_status: Some(status),
            reason: reason.into(),
        }
    }

    /// Create an error without an HTTP status (transport failure, bad JSON, ...)
    pub fn other(reason: impl Into<String>) -> Self {
        Self {
            http_status: None,
            reason: reason.into(),
        }
    }

    /// 409 of any kind
    pub fn is_conflict(&self) -> bool {
        self.http_status == Some(HTTP_CONFLICT)
    }

    /// 409 because somebody else already closed (merged) the change
    pub fn is_closed_change(&self) -> bool {
        self.is_conflict() && self.reason == GERRIT_REASON_CLOSED_CHANGE
    }
}

impl fmt::Display for GerritError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.http_status {
            Some(code) => write!(f, "Gerrit error (HTTP {code}): {}", self.reason),
            None => write!(f, "Gerrit error: {}", self.reason),
        }
    }
}

/// Why a particular change was not (or should not be) applied or submitted
///
/// These are decisions, not control flow: the pool collects them, notifies
/// owners and records them, but never unwinds on them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// Change did not apply to the checkout
    ApplyPatch {
        /// Affected change
        change: ChangeId,
        /// Failed only because of another change applied earlier in this run
        inflight: bool,
        /// Detail from the apply tool
        message: String,
    },

    /// A dependency of the change could not be used
    Dependency {
        /// Affected change
        change: ChangeId,
        /// What went wrong with the dependency
        cause: Box<PatchError>,
    },

    /// Change is not marked ready (or not in the pool at all)
    NotEligible {
        /// Affected change
        change: ChangeId,
    },

    /// Change was not fully verified by this run
    Rejected {
        /// Affected change
        change: ChangeId,
    },

    /// Unexpected failure inside the CQ itself
    InternalCq {
        /// Affected change
        change: ChangeId,
        /// What happened
        message: String,
    },

    /// Gerrit reported a submit conflict
    Conflict {
        /// Affected change
        change: ChangeId,
    },

    /// Submit failed
    FailedToSubmit {
        /// Affected change
        change: ChangeId,
        /// Message from Gerrit, if any
        message: Option<String>,
    },

    /// A new patch set was uploaded while the change was being tested
    Modified {
        /// Affected change
        change: ChangeId,
        /// Patch set found on reload
        new_patch_number: u32,
    },

    /// Change lost an approval or otherwise became unsubmittable
    NotMergeable {
        /// Affected change
        change: ChangeId,
        /// Owner-facing reason
        reason: String,
    },

    /// Change landed although one of its dependencies did not
    SubmittedWithoutDeps {
        /// Affected change
        change: ChangeId,
        /// Why the dependency did not land
        cause: Box<PatchError>,
    },

    /// Change is part of a cycle too large for one transaction
    TransactionTooLong {
        /// Affected change
        change: ChangeId,
        /// Size of the cyclic transaction
        size: usize,
        /// Configured maximum length
        limit: usize,
    },
}

impl PatchError {
    /// Wrap `cause` as a dependency failure of `change`
    pub fn dependency(change: ChangeId, cause: Self) -> Self {
        Self::Dependency {
            change,
            cause: Box::new(cause),
        }
    }

    /// The change this error is about
    pub fn change(&self) -> &ChangeId {
        match self {
            Self::ApplyPatch { change, .. }
            | Self::Dependency { change, .. }
            | Self::NotEligible { change }
            | Self::Rejected { change }
            | Self::InternalCq { change, .. }
            | Self::Conflict { change }
            | Self::FailedToSubmit { change, .. }
            | Self::Modified { change, .. }
            | Self::NotMergeable { change, .. }
            | Self::SubmittedWithoutDeps { change, .. }
            | Self::TransactionTooLong { change, .. } => change,
        }
    }

    /// The wrapped cause, for errors that have one
    pub fn cause(&self) -> Option<&Self> {
        match self {
            Self::Dependency { cause, .. } | Self::SubmittedWithoutDeps { cause, .. } => {
                Some(cause)
            }
            _ => None,
        }
    }

    /// The innermost error of the cause chain
    pub fn root_error(&self) -> &Self {
        let mut current = self;
        while let Some(cause) = current.cause() {
            current = cause;
        }
        current
    }

    /// Whether this is a dependency error (including incorrect submissions)
    pub const fn is_dependency_error(&self) -> bool {
        matches!(
            self,
            Self::Dependency { .. } | Self::SubmittedWithoutDeps { .. }
        )
    }

    /// Owner-facing sentence, phrased to follow the change id
    pub fn short_explanation(&self) -> String {
        match self {
            Self::ApplyPatch {
                inflight: false,
                message,
                ..
            } => format!("could not be applied to the tip of tree. {message}"),
            Self::ApplyPatch {
                inflight: true,
                message,
                ..
            } => format!("conflicts with another change applied in this run. {message}"),
            Self::Dependency { cause, .. } => format!(
                "depends on {}, which {}",
                cause.change(),
                cause.short_explanation()
            ),
            Self::NotEligible { .. } => {
                "is not marked as ready for the commit queue.".to_string()
            }
            Self::Rejected { .. } => "was rejected by the CQ.".to_string(),
            Self::InternalCq { message, .. } => {
                format!("failed to apply due to a CQ issue: {message}")
            }
            Self::Conflict { .. } => "could not be submitted because Gerrit reported a \
                 conflict. Did you modify your patch during the CQ run? Or do you just need \
                 to rebase?"
                .to_string(),
            Self::FailedToSubmit { message, .. } => match message {
                Some(msg) => format!(
                    "could not be submitted by the CQ. The error message from Gerrit was: {msg}"
                ),
                None => "could not be submitted by the CQ. The Gerrit server might be having \
                     trouble."
                    .to_string(),
            },
            Self::Modified {
                new_patch_number, ..
            } => format!(
                "was modified while the CQ was in the middle of testing it. Patch set \
                 {new_patch_number} was uploaded."
            ),
            Self::NotMergeable { reason, .. } => reason.clone(),
            Self::SubmittedWithoutDeps { cause, .. } => format!(
                "was submitted, even though it depends on {}, which {}\n\nYou may want to \
                 revert your patch, and investigate why its dependencies failed to submit.",
                cause.change(),
                cause.short_explanation()
            ),
            Self::TransactionTooLong { size, limit, .. } => format!(
                "is part of a dependency cycle of {size} changes, which exceeds the \
                 transaction limit of {limit}."
            ),
        }
    }
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.change(), self.short_explanation())
    }
}

/// Errors that can occur in cq-pool
#[derive(Error, Debug)]
pub enum Error {
    /// Gerrit request failed
    #[error(transparent)]
    Gerrit(#[from] GerritError),

    /// A change-level failure escaped to the caller
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// An external lookup exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    /// Not every verified change landed
    #[error(
        "FAILED TO SUBMIT ALL CHANGES: Could not verify that changes {} were submitted.\nSubmitted {num_submitted} changes successfully.",
        join_ids(.changes)
    )]
    FailedToSubmitAllChanges {
        /// Changes that did not land
        changes: Vec<ChangeId>,
        /// How many did
        num_submitted: usize,
    },

    /// Re-fetching from Gerrit returned a different set of changes
    #[error("inconsistent reload: {0}")]
    InconsistentReload(String),

    /// Pending-commit manifest could not be read
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Configuration is invalid
    #[error("config error: {0}")]
    Config(String),

    /// Pool snapshot could not be used
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

fn join_ids(ids: &[ChangeId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Result type alias for cq-pool
pub type Result<T> = std::result::Result<T, Error>;
