use praefect_base::{Generation, RepositoryId, Result, StorageName, VirtualStorageName};
use praefect_datastore::RepositoryStore;
use praefect_health::Monitor;
use praefect_queue::{ChangeKind, ReplicationJob, ReplicationQueue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// RepositoryInventory abstracts scanning a single storage node for
/// the repositories it actually holds and their on-disk generations,
/// mirroring `praefect_health::Probe`'s role: it lets the reconciler's
/// divergence logic be tested without a live back-end.
#[async_trait::async_trait]
pub trait RepositoryInventory: Send + Sync {
    async fn list(&self, storage: &StorageName) -> Result<HashMap<RepositoryId, Generation>>;
}

/// Reconciler is the periodic reconciler of spec.md §4.I: a thin
/// wrapper around the datastore (§4.C) and queue (§4.D) that scans the
/// healthy set and enqueues jobs for divergences it was not already
/// aware of.
pub struct Reconciler {
    vs: VirtualStorageName,
    monitor: Monitor,
    inventory: Arc<dyn RepositoryInventory>,
    store: Arc<dyn RepositoryStore>,
    queue: Arc<dyn ReplicationQueue>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        vs: VirtualStorageName,
        monitor: Monitor,
        inventory: Arc<dyn RepositoryInventory>,
        store: Arc<dyn RepositoryStore>,
        queue: Arc<dyn ReplicationQueue>,
        interval: Duration,
    ) -> Self {
        Reconciler { vs, monitor, inventory, store, queue, interval }
    }

    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>, clock: impl Fn() -> i64) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                () = &mut shutdown => return,
            }
            if let Err(err) = self.reconcile_once(clock()).await {
                tracing::error!(error = %err, "reconciliation pass failed");
            }
        }
    }

    /// Runs a single scan-and-enqueue pass, returning the jobs it
    /// enqueued (exposed directly so tests don't need the `run` loop).
    pub async fn reconcile_once(&self, now_ms: i64) -> Result<Vec<ReplicationJob>> {
        let mut enqueued = Vec::new();
        let healthy = self.monitor.healthy_nodes(&self.vs);
        let already_tracked = self.already_outdated(&healthy).await?;

        for storage in &healthy {
            let observed = self.inventory.list(storage).await?;
            for (repo, gen) in observed {
                let replicas = self.store.get_replicas(&repo).await?;
                let reference = praefect_datastore::max_generation(replicas.values());
                if gen >= reference {
                    continue;
                }
                if already_tracked.get(&repo).map(|targets| targets.contains(storage)).unwrap_or(false) {
                    continue;
                }
                let Some(source) = replicas.iter().find(|(s, g)| *s != storage && **g == reference).map(|(s, _)| s.clone()) else {
                    continue;
                };
                let job = ReplicationJob {
                    change_kind: ChangeKind::Update,
                    virtual_storage: self.vs.clone(),
                    relative_path: repo.relative_path.clone(),
                    source_storage: Some(source),
                    target_storage: storage.clone(),
                    params: serde_json::Value::Null,
                };
                self.queue.enqueue(job.clone(), serde_json::Value::Null, 3, now_ms).await?;
                enqueued.push(job);
            }
        }
        Ok(enqueued)
    }

    async fn already_outdated(&self, healthy: &std::collections::HashSet<StorageName>) -> Result<HashMap<RepositoryId, std::collections::HashSet<StorageName>>> {
        let mut merged: HashMap<RepositoryId, std::collections::HashSet<StorageName>> = HashMap::new();
        for reference in healthy {
            let outdated = self.queue.get_outdated_repositories(&self.vs, reference).await?;
            for (repo, targets) in outdated {
                merged.entry(repo).or_default().extend(targets);
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use praefect_base::RelativePath;
    use praefect_datastore::MemoryStore;
    use praefect_health::Thresholds;
    use praefect_queue::MemoryQueue;

    fn vs() -> VirtualStorageName {
        VirtualStorageName("default".into())
    }
    fn storage(name: &str) -> StorageName {
        StorageName(name.into())
    }
    fn repo() -> RepositoryId {
        RepositoryId { virtual_storage: vs(), relative_path: RelativePath("group/proj.git".into()) }
    }

    struct FixedInventory(HashMap<StorageName, HashMap<RepositoryId, Generation>>);

    #[async_trait::async_trait]
    impl RepositoryInventory for FixedInventory {
        async fn list(&self, storage: &StorageName) -> Result<HashMap<RepositoryId, Generation>> {
            Ok(self.0.get(storage).cloned().unwrap_or_default())
        }
    }

    fn healthy_monitor(nodes: &[&str]) -> Monitor {
        let thresholds = Thresholds { healthy_after: 1, unhealthy_after: 1, probe_interval: Duration::from_secs(60), probe_timeout: Duration::from_secs(1) };
        let monitor = Monitor::new(nodes.iter().map(|n| (vs(), storage(n))), thresholds);
        for n in nodes {
            monitor.record_result(&vs(), &storage(n), true);
        }
        monitor
    }

    #[tokio::test]
    async fn a_node_behind_the_stores_maximum_gets_a_job_enqueued() {
        let store = Arc::new(MemoryStore::new());
        store.seed(&repo(), &storage("a"), Generation::Known(5));
        store.seed(&repo(), &storage("b"), Generation::Known(5));

        let inventory = Arc::new(FixedInventory(HashMap::from([(storage("b"), HashMap::from([(repo(), Generation::Known(3))]))])));
        let queue = Arc::new(MemoryQueue::new());
        let reconciler = Reconciler::new(vs(), healthy_monitor(&["a", "b"]), inventory, store, queue.clone(), Duration::from_secs(30));

        let enqueued = reconciler.reconcile_once(100).await.unwrap();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].target_storage, storage("b"));
        assert_eq!(enqueued[0].source_storage, Some(storage("a")));
    }

    #[tokio::test]
    async fn a_divergence_already_tracked_by_the_queue_is_not_enqueued_twice() {
        let store = Arc::new(MemoryStore::new());
        store.seed(&repo(), &storage("a"), Generation::Known(5));
        store.seed(&repo(), &storage("b"), Generation::Known(5));

        let inventory = Arc::new(FixedInventory(HashMap::from([(storage("b"), HashMap::from([(repo(), Generation::Known(3))]))])));
        let queue = Arc::new(MemoryQueue::new());
        let stale_job = ReplicationJob {
            change_kind: ChangeKind::Update,
            virtual_storage: vs(),
            relative_path: RelativePath("group/proj.git".into()),
            source_storage: Some(storage("a")),
            target_storage: storage("b"),
            params: serde_json::Value::Null,
        };
        queue.enqueue(stale_job, serde_json::Value::Null, 3, 0).await.unwrap();

        let reconciler = Reconciler::new(vs(), healthy_monitor(&["a", "b"]), inventory, store, queue.clone(), Duration::from_secs(30));
        let enqueued = reconciler.reconcile_once(100).await.unwrap();
        assert!(enqueued.is_empty(), "an already-queued divergence should not be re-enqueued");
    }
}
