use crate::Probe;
use praefect_base::{StorageName, VirtualStorageName};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Consecutive successful probes required to become healthy.
    pub healthy_after: u32,
    /// Consecutive failed probes required to become unhealthy.
    pub unhealthy_after: u32,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            healthy_after: 2,
            unhealthy_after: 3,
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct NodeState {
    health: HealthState,
    consecutive_successes: u32,
    consecutive_failures: u32,
}

impl Default for NodeState {
    fn default() -> Self {
        NodeState { health: HealthState::Unhealthy, consecutive_successes: 0, consecutive_failures: 0 }
    }
}

/// Monitor is the node-health monitor of spec.md §4.B. It owns a
/// process-wide snapshot of per-(virtual-storage, storage) health,
/// guarded by a non-async lock so that `healthy_nodes()` never blocks
/// on an in-flight probe (spec.md §4.B: "Probes ... never block other
/// operations").
#[derive(Clone)]
pub struct Monitor {
    thresholds: Thresholds,
    state: Arc<RwLock<HashMap<(VirtualStorageName, StorageName), NodeState>>>,
}

impl Monitor {
    pub fn new(nodes: impl IntoIterator<Item = (VirtualStorageName, StorageName)>, thresholds: Thresholds) -> Self {
        let mut state = HashMap::new();
        for key in nodes {
            state.insert(key, NodeState::default());
        }
        Monitor { thresholds, state: Arc::new(RwLock::new(state)) }
    }

    /// Runs the probe loop until `shutdown` resolves. Each tick probes
    /// every known node concurrently, each under its own
    /// `probe_timeout` deadline, so a single unreachable node can never
    /// delay the others (spec.md §4.B).
    pub async fn run(&self, probe: Arc<dyn Probe>, shutdown: impl std::future::Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.thresholds.probe_interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = &mut shutdown => return,
            }
            self.probe_all(probe.clone()).await;
        }
    }

    async fn probe_all(&self, probe: Arc<dyn Probe>) {
        let keys: Vec<_> = self.state.read().unwrap().keys().cloned().collect();
        let timeout = self.thresholds.probe_timeout;

        let results = futures::future::join_all(keys.into_iter().map(|(vs, storage)| {
            let probe = probe.clone();
            async move {
                let ok = tokio::time::timeout(timeout, probe.probe(&storage))
                    .await
                    .unwrap_or(false);
                (vs, storage, ok)
            }
        }))
        .await;

        for (vs, storage, ok) in results {
            self.record_result(&vs, &storage, ok);
        }
    }

    /// Applies a single probe outcome to the state machine. Exposed
    /// directly so unit tests can exercise the consecutive-count
    /// thresholds without running the async loop.
    pub fn record_result(&self, vs: &VirtualStorageName, storage: &StorageName, success: bool) {
        let mut state = self.state.write().unwrap();
        let entry = state.entry((vs.clone(), storage.clone())).or_default();

        if success {
            entry.consecutive_successes += 1;
            entry.consecutive_failures = 0;
            if entry.consecutive_successes >= self.thresholds.healthy_after {
                entry.health = HealthState::Healthy;
            }
        } else {
            entry.consecutive_failures += 1;
            entry.consecutive_successes = 0;
            if entry.consecutive_failures >= self.thresholds.unhealthy_after {
                entry.health = HealthState::Unhealthy;
            }
        }
    }

    /// Returns the healthy set for `vs`. The snapshot is read under a
    /// single lock acquisition, so it is internally consistent even
    /// though the set backing it is updated concurrently by probes
    /// (spec.md §4.B: "this snapshot is consistent during a single
    /// call").
    pub fn healthy_nodes(&self, vs: &VirtualStorageName) -> HashSet<StorageName> {
        self.state
            .read()
            .unwrap()
            .iter()
            .filter(|((node_vs, _), state)| node_vs == vs && state.health == HealthState::Healthy)
            .map(|((_, storage), _)| storage.clone())
            .collect()
    }

    pub fn state_of(&self, vs: &VirtualStorageName, storage: &StorageName) -> HealthState {
        self.state
            .read()
            .unwrap()
            .get(&(vs.clone(), storage.clone()))
            .map(|s| s.health)
            .unwrap_or(HealthState::Unhealthy)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn vs(name: &str) -> VirtualStorageName {
        VirtualStorageName(name.into())
    }
    fn storage(name: &str) -> StorageName {
        StorageName(name.into())
    }

    fn monitor() -> Monitor {
        Monitor::new(
            [(vs("default"), storage("a")), (vs("default"), storage("b"))],
            Thresholds { healthy_after: 2, unhealthy_after: 2, ..Thresholds::default() },
        )
    }

    #[test]
    fn node_becomes_healthy_after_n_consecutive_successes() {
        let m = monitor();
        assert!(m.healthy_nodes(&vs("default")).is_empty());

        m.record_result(&vs("default"), &storage("a"), true);
        assert!(m.healthy_nodes(&vs("default")).is_empty(), "one success is not enough");

        m.record_result(&vs("default"), &storage("a"), true);
        assert_eq!(m.healthy_nodes(&vs("default")), HashSet::from([storage("a")]));
    }

    #[test]
    fn node_becomes_unhealthy_after_m_consecutive_failures() {
        let m = monitor();
        m.record_result(&vs("default"), &storage("a"), true);
        m.record_result(&vs("default"), &storage("a"), true);
        assert_eq!(m.state_of(&vs("default"), &storage("a")), HealthState::Healthy);

        m.record_result(&vs("default"), &storage("a"), false);
        assert_eq!(m.state_of(&vs("default"), &storage("a")), HealthState::Healthy, "one failure is not enough");

        m.record_result(&vs("default"), &storage("a"), false);
        assert_eq!(m.state_of(&vs("default"), &storage("a")), HealthState::Unhealthy);
    }

    #[test]
    fn a_single_success_after_failures_resets_the_failure_streak() {
        let m = monitor();
        m.record_result(&vs("default"), &storage("a"), false);
        m.record_result(&vs("default"), &storage("a"), true);
        m.record_result(&vs("default"), &storage("a"), false);
        // Only one consecutive failure so far; still not unhealthy (threshold is 2).
        assert_eq!(m.state_of(&vs("default"), &storage("a")), HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn unreachable_node_does_not_affect_others() {
        struct OneDown;
        #[async_trait::async_trait]
        impl Probe for OneDown {
            async fn probe(&self, storage: &StorageName) -> bool {
                storage.0 != "a"
            }
        }

        let m = monitor();
        m.probe_all(Arc::new(OneDown)).await;
        m.probe_all(Arc::new(OneDown)).await;

        assert_eq!(m.healthy_nodes(&vs("default")), HashSet::from([storage("b")]));
    }
}
