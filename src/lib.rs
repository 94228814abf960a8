//! cq-pool - commit-queue validation pool
//!
//! Picks up Gerrit changes marked ready, resolves their cross-repository
//! dependencies, applies them into a checkout, and submits what the build
//! fleet verified in dependency order.
//!
//! The pipeline drives a [`pool::ValidationPool`] through its phases:
//!
//! ```ignore
//! let pool = ValidationPool::new(services, config)?;
//! let mut candidates = pool.acquire_pool(CQ_READY_QUERY).await?;
//! pool.filter_changes_for_throttled_tree(&mut candidates).await?;
//! let applied = pool.apply_pool_into_repo(candidates).await?;
//! // ... the fleet verifies `applied` ...
//! let result = pool.submit_pool(&applied, None).await?;
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod plan;
pub mod platform;
pub mod pool;
pub mod submit;
pub mod types;

pub use config::PoolConfig;
pub use error::{Error, PatchError, Result};
pub use pool::{AppliedPool, CandidatePool, PoolServices, ValidationPool};
pub use submit::SubmissionResult;
pub use types::{Change, ChangeId};
