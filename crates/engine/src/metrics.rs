//! Healing metrics
//!
//! Collectors are injected into the orchestrator; there is no global registry.

use parking_lot::RwLock;
use selfheal_common::{HealingResult, HealingStatus, HealingStrategy};
use std::collections::HashMap;
use std::time::Duration;

/// Sink for per-attempt and per-request measurements
pub trait HealingMetrics: Send + Sync {
    fn record_attempt(&self, strategy: HealingStrategy, success: bool, duration: Duration);

    fn record_result(&self, result: &HealingResult);
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl HealingMetrics for NoopMetrics {
    fn record_attempt(&self, _strategy: HealingStrategy, _success: bool, _duration: Duration) {}

    fn record_result(&self, _result: &HealingResult) {}
}

/// Point-in-time copy of [`InMemoryMetrics`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub attempts: HashMap<HealingStrategy, u64>,
    pub failed_attempts: HashMap<HealingStrategy, u64>,
    pub results: HashMap<HealingStatus, u64>,
    pub attempt_time: Duration,
}

impl MetricsSnapshot {
    pub fn attempts_for(&self, strategy: HealingStrategy) -> u64 {
        self.attempts.get(&strategy).copied().unwrap_or(0)
    }

    pub fn results_with(&self, status: HealingStatus) -> u64 {
        self.results.get(&status).copied().unwrap_or(0)
    }

    pub fn total_results(&self) -> u64 {
        self.results.values().sum()
    }
}

/// Counters kept in process, readable with [`snapshot`](Self::snapshot)
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: RwLock<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.read().clone()
    }
}

impl HealingMetrics for InMemoryMetrics {
    fn record_attempt(&self, strategy: HealingStrategy, success: bool, duration: Duration) {
        let mut inner = self.inner.write();
        *inner.attempts.entry(strategy).or_insert(0) += 1;
        if !success {
            *inner.failed_attempts.entry(strategy).or_insert(0) += 1;
        }
        inner.attempt_time += duration;
    }

    fn record_result(&self, result: &HealingResult) {
        *self.inner.write().results.entry(result.status).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selfheal_common::HealingRequest;

    #[test]
    fn test_in_memory_counts() {
        let metrics = InMemoryMetrics::new();
        metrics.record_attempt(HealingStrategy::SelectorRepair, false, Duration::from_millis(10));
        metrics.record_attempt(HealingStrategy::SelectorRepair, true, Duration::from_millis(20));
        metrics.record_attempt(HealingStrategy::Retry, true, Duration::ZERO);

        let mut result = HealingResult::begin(
            &HealingRequest::new("t", "e"),
            HealingStrategy::SelectorRepair,
        );
        result.status = HealingStatus::Success;
        metrics.record_result(&result);

        let snap = metrics.snapshot();
        assert_eq!(snap.attempts_for(HealingStrategy::SelectorRepair), 2);
        assert_eq!(snap.failed_attempts.get(&HealingStrategy::SelectorRepair), Some(&1));
        assert_eq!(snap.attempts_for(HealingStrategy::Skip), 0);
        assert_eq!(snap.results_with(HealingStatus::Success), 1);
        assert_eq!(snap.total_results(), 1);
        assert_eq!(snap.attempt_time, Duration::from_millis(30));
    }
}
