use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide session counters, reported by `/health`.
#[derive(Default)]
pub struct Metrics {
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_failed: AtomicU64,
    sessions_cancelled: AtomicU64,
    planner_calls: AtomicU64,
    planner_failures: AtomicU64,
    actions_executed: AtomicU64,
    action_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_sessions_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sessions_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sessions_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sessions_cancelled(&self) {
        self.sessions_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_planner_calls(&self) {
        self.planner_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_planner_failures(&self) {
        self.planner_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_actions_executed(&self) {
        self.actions_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_action_failures(&self) {
        self.action_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let planner_calls = self.planner_calls.load(Ordering::Relaxed);
        let planner_failures = self.planner_failures.load(Ordering::Relaxed);
        let actions_executed = self.actions_executed.load(Ordering::Relaxed);
        let action_failures = self.action_failures.load(Ordering::Relaxed);
        MetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            sessions_cancelled: self.sessions_cancelled.load(Ordering::Relaxed),
            planner_calls,
            planner_failures,
            actions_executed,
            action_failures,
            planner_success_rate: success_rate(planner_calls, planner_failures),
            action_success_rate: success_rate(actions_executed, action_failures),
        }
    }
}

/// 1.0 when nothing has run yet.
fn success_rate(total: u64, failures: u64) -> f64 {
    if total == 0 {
        return 1.0;
    }
    1.0 - (failures as f64 / total as f64)
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub sessions_cancelled: u64,
    pub planner_calls: u64,
    pub planner_failures: u64,
    pub actions_executed: u64,
    pub action_failures: u64,
    pub planner_success_rate: f64,
    pub action_success_rate: f64,
}
