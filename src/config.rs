//! Pool configuration
//!
//! Loaded from TOML (`~/.config/cq-pool/config.toml` unless a path is given),
//! then overridden from `CQ_POOL_*` environment variables. Every field has a
//! default, so an empty file is a valid configuration.

use crate::error::{Error, Result};
use crate::types::Change;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Overrides `dryrun`
pub const ENV_DRYRUN: &str = "CQ_POOL_DRYRUN";
/// Overrides `rejection_grace_period_secs`
pub const ENV_GRACE_PERIOD: &str = "CQ_POOL_GRACE_PERIOD_SECS";
/// Overrides `build_log`
pub const ENV_BUILD_LOG: &str = "CQ_POOL_BUILD_LOG";

/// Tunables for one validation pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Builder name shown in notifications
    pub builder_name: String,
    /// Builder configuration used for build-history lookups and action rows
    pub build_config: String,
    /// URL of this build's log
    pub build_log: String,
    /// Running as the master (owns ordering, ready flags and submission)
    pub is_master: bool,
    /// Running as a pre-CQ trybot
    pub pre_cq_trybot: bool,
    /// Do not modify anything on Gerrit
    pub dryrun: bool,
    /// Unresolved dependencies of changes approved within this window are
    /// retried silently instead of rejected
    pub rejection_grace_period_secs: u64,
    /// Idle time between acquisition attempts
    pub sleep_timeout_secs: u64,
    /// Wall-clock budget for acquiring a pool
    pub acquire_timeout_secs: u64,
    /// Budget for a single tree-status wait
    pub tree_status_timeout_secs: u64,
    /// Extra status polls allowed while Gerrit reports SUBMITTED
    pub submitted_wait_polls: u32,
    /// Time between status polls, in milliseconds
    pub submitted_poll_interval_ms: u64,
    /// Budget for looking up the dependencies of one candidate set
    pub dependency_map_timeout_secs: u64,
    /// Builds inspected when computing the fail streak
    pub fail_streak_history: usize,
    /// Sync+push attempts per branch before giving up
    pub push_attempts: u32,
    /// Projects that make up the CQ itself
    pub cq_projects: Vec<String>,
    /// Regexes selecting the projects this queue handles
    pub project_patterns: Vec<String>,
    /// Prefix of the CL status viewer
    pub cl_status_url_prefix: String,
    /// Gerrit host for internal changes
    pub internal_gerrit_host: String,
    /// Gerrit host for external changes
    pub external_gerrit_host: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            builder_name: "master-paladin".to_string(),
            build_config: "master-paladin".to_string(),
            build_log: String::new(),
            is_master: true,
            pre_cq_trybot: false,
            dryrun: false,
            rejection_grace_period_secs: 30 * 60,
            sleep_timeout_secs: 30,
            acquire_timeout_secs: 4 * 60 * 60,
            tree_status_timeout_secs: 4 * 60 * 60,
            submitted_wait_polls: 3 * 60,
            submitted_poll_interval_ms: 1000,
            dependency_map_timeout_secs: 5 * 60,
            fail_streak_history: 4,
            push_attempts: 3,
            cq_projects: vec!["chromiumos/chromite".to_string()],
            project_patterns: vec![
                "^chromiumos/".to_string(),
                "^chromeos/".to_string(),
                "^aosp/".to_string(),
            ],
            cl_status_url_prefix: "https://chromeos-cl-viewer-ui.googleplex.com/cl_status"
                .to_string(),
            internal_gerrit_host: "chrome-internal-review.googlesource.com".to_string(),
            external_gerrit_host: "chromium-review.googlesource.com".to_string(),
        }
    }
}

impl PoolConfig {
    /// Load configuration from `path`, or from the default location
    ///
    /// A missing file at the default location yields the defaults; a missing
    /// file at an explicit path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the patterns and URLs without loading anything else
    pub fn validate(&self) -> Result<()> {
        self.compile_project_patterns()?;
        Url::parse(&self.cl_status_url_prefix)
            .map_err(|e| Error::Config(format!("bad cl_status_url_prefix: {e}")))?;
        if !self.build_log.is_empty() {
            Url::parse(&self.build_log)
                .map_err(|e| Error::Config(format!("bad build_log: {e}")))?;
        }
        Ok(())
    }

    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parse TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply `CQ_POOL_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply `CQ_POOL_*` overrides from an arbitrary lookup
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(ENV_DRYRUN) {
            self.dryrun = matches!(value.as_str(), "1" | "true" | "yes");
        }
        if let Some(value) = lookup(ENV_GRACE_PERIOD) {
            self.rejection_grace_period_secs = value
                .parse()
                .map_err(|_| Error::Config(format!("{ENV_GRACE_PERIOD} must be an integer")))?;
        }
        if let Some(value) = lookup(ENV_BUILD_LOG) {
            self.build_log = value;
        }
        Ok(())
    }

    /// Compile `project_patterns`, failing on the first invalid regex
    pub fn compile_project_patterns(&self) -> Result<Vec<Regex>> {
        self.project_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| Error::Config(format!("bad project pattern {p}: {e}")))
            })
            .collect()
    }

    /// Queue name used in owner notifications
    pub fn queue_name(&self) -> &'static str {
        if self.pre_cq_trybot {
            "A trybot"
        } else {
            "The Commit Queue"
        }
    }

    /// Whether `project` belongs to the CQ itself
    pub fn is_cq_project(&self, project: &str) -> bool {
        self.cq_projects.iter().any(|p| p == project)
    }

    /// CL status page of the current patch set of `change`
    pub fn cl_status_url(&self, change: &Change) -> String {
        let host = if change.internal {
            &self.internal_gerrit_host
        } else {
            &self.external_gerrit_host
        };
        format!(
            "{}/{}/{}/{}",
            self.cl_status_url_prefix, host, change.gerrit_number, change.patch_number
        )
    }

    /// Grace window for unresolved dependencies
    pub const fn rejection_grace_period(&self) -> Duration {
        Duration::from_secs(self.rejection_grace_period_secs)
    }

    /// Idle interval of the acquisition loop
    pub const fn sleep_timeout(&self) -> Duration {
        Duration::from_secs(self.sleep_timeout_secs)
    }

    /// Deadline of the acquisition loop
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Budget for one tree-status wait
    pub const fn tree_status_timeout(&self) -> Duration {
        Duration::from_secs(self.tree_status_timeout_secs)
    }

    /// Interval between submit-status polls
    pub const fn submitted_poll_interval(&self) -> Duration {
        Duration::from_millis(self.submitted_poll_interval_ms)
    }

    /// Budget for the dependency lookup
    pub const fn dependency_map_timeout(&self) -> Duration {
        Duration::from_secs(self.dependency_map_timeout_secs)
    }
}

/// `<config dir>/cq-pool/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cq-pool").join("config.toml"))
}
