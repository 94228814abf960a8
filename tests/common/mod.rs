//! Shared test harness
//!
//! These are test utilities - not all may be used in every test binary.

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_platform;

use cq_pool::config::PoolConfig;
use cq_pool::pool::{PoolServices, ValidationPool};
use mock_platform::{
    FakeCheckout, FakeGerrit, FakeHistory, FakeRecorder, FakeSeries, FakeTree, FakeTriage,
    RecordingNotifier,
};
use std::sync::Arc;

/// Every fake, wired together
pub struct Harness {
    pub gerrit: Arc<FakeGerrit>,
    pub series: Arc<FakeSeries>,
    pub recorder: Arc<FakeRecorder>,
    pub history: Arc<FakeHistory>,
    pub notifier: Arc<RecordingNotifier>,
    pub triage: Arc<FakeTriage>,
    pub tree: Arc<FakeTree>,
    pub checkout: Arc<FakeCheckout>,
}

impl Harness {
    pub fn new() -> Self {
        let gerrit = Arc::new(FakeGerrit::default());
        let checkout = Arc::new(FakeCheckout::new(Arc::clone(&gerrit)));
        Self {
            gerrit,
            series: Arc::new(FakeSeries::default()),
            recorder: Arc::new(FakeRecorder::default()),
            history: Arc::new(FakeHistory::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            triage: Arc::new(FakeTriage::default()),
            tree: Arc::new(FakeTree::default()),
            checkout,
        }
    }

    pub fn services(&self) -> PoolServices {
        PoolServices {
            gerrit: self.gerrit.clone(),
            series: self.series.clone(),
            recorder: self.recorder.clone(),
            history: self.history.clone(),
            notifier: self.notifier.clone(),
            triage: self.triage.clone(),
            tree: self.tree.clone(),
            checkout: self.checkout.clone(),
        }
    }

    /// Master pool with [`fixtures::test_config`]
    pub fn pool(&self) -> ValidationPool {
        self.pool_with(fixtures::test_config())
    }

    pub fn pool_with(&self, config: PoolConfig) -> ValidationPool {
        ValidationPool::new(self.services(), config).unwrap()
    }
}
