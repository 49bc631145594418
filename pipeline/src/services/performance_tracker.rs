//! Per call-kind statistics for outbound requests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use shared::{ApiFailure, CallKind};
use tokio::sync::RwLock;

use crate::types::CallStats;

/// In-memory call statistics shared by every executor clone
#[derive(Clone, Default)]
pub struct CallTracker {
    stats: Arc<RwLock<BTreeMap<CallKind, CallStats>>>,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_success(&self, kind: CallKind, response_time: Duration) {
        let mut stats = self.stats.write().await;
        let entry = stats.entry(kind).or_default();

        entry.total_calls += 1;
        entry.successful_calls += 1;
        entry.total_response_time_ms += response_time.as_millis() as u64;
    }

    pub async fn record_failure(&self, kind: CallKind, failure: &ApiFailure, response_time: Duration) {
        let mut stats = self.stats.write().await;
        let entry = stats.entry(kind).or_default();

        entry.total_calls += 1;
        entry.failed_calls += 1;
        entry.total_response_time_ms += response_time.as_millis() as u64;
        if failure.is_quota() {
            entry.quota_hits += 1;
        }
    }

    /// Record a call that has no ApiFailure classification (uploads)
    pub async fn record_outcome(&self, kind: CallKind, succeeded: bool, response_time: Duration) {
        let mut stats = self.stats.write().await;
        let entry = stats.entry(kind).or_default();

        entry.total_calls += 1;
        if succeeded {
            entry.successful_calls += 1;
        } else {
            entry.failed_calls += 1;
        }
        entry.total_response_time_ms += response_time.as_millis() as u64;
    }

    pub async fn snapshot(&self) -> BTreeMap<CallKind, CallStats> {
        self.stats.read().await.clone()
    }
}
