//! Notifications posted as Gerrit review messages

use super::{GerritClient, Notifier};
use crate::error::Result;
use crate::types::Change;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Default [`Notifier`]: posts the message as a review comment
pub struct GerritNotifier {
    gerrit: Arc<dyn GerritClient>,
    dryrun: bool,
}

impl GerritNotifier {
    /// Create a notifier posting through `gerrit`
    pub fn new(gerrit: Arc<dyn GerritClient>, dryrun: bool) -> Self {
        Self { gerrit, dryrun }
    }
}

#[async_trait]
impl Notifier for GerritNotifier {
    async fn send(&self, change: &Change, message: &str) -> Result<()> {
        debug!(change = %change.id, dryrun = self.dryrun, "Posting review message");
        self.gerrit.set_review(change, message, self.dryrun).await
    }
}
