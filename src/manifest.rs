//! Pending-commit manifests and change links
//!
//! A manifest produced upstream lists the changes of a pool as
//! `<pending_commit>` elements, so builders without Gerrit access can
//! reconstruct the candidates.

use crate::error::{Error, Result};
use crate::types::{Change, ChangeId, ChangeStatus};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Remote name of the internal Gerrit instance
pub const INTERNAL_REMOTE: &str = "cros-internal";

const SUBJECT_WIDTH: usize = 80;
const STANDARD_EMAIL_DOMAINS: [&str; 2] = ["@google.com", "@chromium.org"];

#[derive(Debug, Deserialize)]
struct ManifestXml {
    #[serde(rename = "pending_commit", default)]
    pending_commits: Vec<PendingCommit>,
}

#[derive(Debug, Deserialize)]
struct PendingCommit {
    #[serde(rename = "@change_id")]
    change_id: String,
    #[serde(rename = "@commit")]
    commit: String,
    #[serde(rename = "@branch")]
    branch: String,
    #[serde(rename = "@project")]
    project: String,
    #[serde(rename = "@project_url", default)]
    project_url: String,
    #[serde(rename = "@ref")]
    git_ref: String,
    #[serde(rename = "@remote")]
    remote: String,
    #[serde(rename = "@owner_email", default)]
    owner_email: String,
    #[serde(rename = "@gerrit_number")]
    gerrit_number: u64,
    #[serde(rename = "@patch_number")]
    patch_number: u32,
    #[serde(rename = "@fail_count", default)]
    fail_count: u32,
    #[serde(rename = "@pass_count", default)]
    pass_count: u32,
    #[serde(rename = "@total_fail_count", default)]
    total_fail_count: u32,
    #[serde(rename = "@commit_message", default)]
    commit_message: Option<String>,
}

impl From<PendingCommit> for Change {
    fn from(pc: PendingCommit) -> Self {
        let subject = pc
            .commit_message
            .as_deref()
            .and_then(|m| m.lines().next())
            .unwrap_or_default()
            .to_string();
        Self {
            id: ChangeId::new(&pc.remote, pc.gerrit_number),
            internal: pc.remote == INTERNAL_REMOTE,
            change_id: pc.change_id,
            gerrit_number: pc.gerrit_number,
            patch_number: pc.patch_number,
            project: pc.project,
            project_url: pc.project_url,
            tracking_branch: pc.branch,
            remote: pc.remote,
            git_ref: pc.git_ref,
            commit: pc.commit,
            owner_email: pc.owner_email,
            subject,
            approval_timestamp: None,
            // Listed in a manifest means it was picked up as ready.
            ready: true,
            mergeable: true,
            verified: true,
            status: ChangeStatus::New,
            is_draft: false,
            is_private: false,
            fail_count: pc.fail_count,
            pass_count: pc.pass_count,
            total_fail_count: pc.total_fail_count,
        }
    }
}

/// Parse the pending commits of a manifest, in document order
pub fn parse_pending_commits(xml: &str) -> Result<Vec<Change>> {
    let manifest: ManifestXml =
        quick_xml::de::from_str(xml).map_err(|e| Error::Manifest(e.to_string()))?;
    Ok(manifest
        .pending_commits
        .into_iter()
        .map(Change::from)
        .collect())
}

/// Read and parse a manifest file
pub fn load_pending_commits(path: &Path) -> Result<Vec<Change>> {
    let xml = std::fs::read_to_string(path)
        .map_err(|e| Error::Manifest(format!("cannot read {}: {e}", path.display())))?;
    parse_pending_commits(&xml)
}

/// One-line summary of a change for build logs
///
/// `project | owner | number [| fails:N(M)] [| passed:N] [| subject]`
pub fn format_change_link(change: &Change) -> String {
    let mut line = format!(
        "{} | {} | {}",
        project_basename(&change.project),
        display_owner(&change.owner_email),
        change.gerrit_number_str()
    );

    if change.total_fail_count > 0 {
        line.push_str(&format!(" | fails:{}", change.fail_count));
        if change.total_fail_count > change.fail_count {
            line.push_str(&format!("({})", change.total_fail_count));
        }
    }
    if change.pass_count > 0 {
        line.push_str(&format!(" | passed:{}", change.pass_count));
    }
    if !change.subject.is_empty() {
        line.push_str(" | ");
        line.extend(change.subject.chars().take(SUBJECT_WIDTH));
    }
    line
}

/// Change links sorted most-failing first
pub fn links_to_changes<'a>(changes: impl IntoIterator<Item = &'a Change>) -> Vec<String> {
    let mut sorted: Vec<&Change> = changes.into_iter().collect();
    sorted.sort_by(|a, b| {
        b.total_fail_count
            .cmp(&a.total_fail_count)
            .then(b.fail_count.cmp(&a.fail_count))
            .then_with(|| project_basename(&a.project).cmp(project_basename(&b.project)))
            .then(a.gerrit_number.cmp(&b.gerrit_number))
    });
    sorted.into_iter().map(format_change_link).collect()
}

/// Log the links of `changes`
pub fn print_links_to_changes<'a>(changes: impl IntoIterator<Item = &'a Change>) {
    for link in links_to_changes(changes) {
        info!("{link}");
    }
}

fn project_basename(project: &str) -> &str {
    project.rsplit('/').next().unwrap_or(project)
}

/// Username for standard addresses, otherwise the address with `@` spelled out
fn display_owner(email: &str) -> String {
    for domain in STANDARD_EMAIL_DOMAINS {
        if let Some(user) = email.strip_suffix(domain) {
            return user.to_string();
        }
    }
    email.replace('@', "-AT-")
}
