//! Versioned pool snapshots
//!
//! Hands a pool from one process of a build to the next. Only change
//! records and flags are stored; services are re-injected on load.

use super::{AppliedPool, CandidatePool, PoolState};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Current snapshot format
pub const SNAPSHOT_VERSION: u32 = 1;

/// Phase a snapshot was taken in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPhase {
    /// Acquired, not yet applied
    Candidate,
    /// Applied, awaiting verification or submission
    Applied,
}

/// Serialized pool state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Format version
    pub version: u32,
    /// Phase the pool was in
    pub phase: PoolPhase,
    /// Change lists
    #[serde(flatten)]
    pub state: PoolState,
}

/// A pool restored into its phase type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoredPool {
    /// Restored before apply
    Candidate(CandidatePool),
    /// Restored after apply
    Applied(AppliedPool),
}

impl PoolSnapshot {
    pub(super) const fn new(phase: PoolPhase, state: PoolState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            phase,
            state,
        }
    }

    /// Write as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), phase = ?self.phase, "Saved pool snapshot");
        Ok(())
    }

    /// Read a snapshot, rejecting other format versions
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Parse a snapshot, rejecting other format versions
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let version = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| Error::Snapshot("missing version".to_string()))?;
        if version != u64::from(SNAPSHOT_VERSION) {
            return Err(Error::Snapshot(format!(
                "unsupported snapshot version {version} (expected {SNAPSHOT_VERSION})"
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Restore the phase type the snapshot was taken in
    pub fn restore(self) -> RestoredPool {
        match self.phase {
            PoolPhase::Candidate => RestoredPool::Candidate(CandidatePool::from_state(self.state)),
            PoolPhase::Applied => RestoredPool::Applied(AppliedPool::from_state(self.state)),
        }
    }
}
