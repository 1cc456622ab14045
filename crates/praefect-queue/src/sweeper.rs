use crate::queue::ReplicationQueue;
use std::sync::Arc;
use std::time::Duration;

/// Sweeper is the independent stale job-lock reaper SPEC_FULL.md adds
/// alongside the queue: a worker can die mid-job without ever calling
/// `acknowledge`, and without this loop its lock would be held
/// forever. Mirrors `praefect_health::Monitor::run`'s tick-or-shutdown
/// select loop.
pub struct Sweeper {
    queue: Arc<dyn ReplicationQueue>,
    interval: Duration,
    stale_after: Duration,
}

impl Sweeper {
    pub fn new(queue: Arc<dyn ReplicationQueue>, interval: Duration, stale_after: Duration) -> Self {
        Sweeper { queue, interval, stale_after }
    }

    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>, clock: impl Fn() -> i64) {
        let mut ticker = tokio::time::interval(self.interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = &mut shutdown => return,
            }
            self.sweep_once(&clock).await;
        }
    }

    async fn sweep_once(&self, clock: &impl Fn() -> i64) {
        let now_ms = clock();
        let stale_before_ms = now_ms - self.stale_after.as_millis() as i64;
        match self.queue.sweep_stale(stale_before_ms, now_ms).await {
            Ok(reclaimed) if !reclaimed.is_empty() => {
                tracing::warn!(count = reclaimed.len(), "reclaimed stale replication jobs");
            }
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "stale job sweep failed"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::MemoryQueue;
    use crate::types::{ChangeKind, ReplicationJob};
    use praefect_base::{RelativePath, StorageName, VirtualStorageName};

    #[tokio::test]
    async fn sweep_once_reclaims_jobs_past_the_deadline() {
        let queue = Arc::new(MemoryQueue::new());
        let job = ReplicationJob {
            change_kind: ChangeKind::Update,
            virtual_storage: VirtualStorageName("default".into()),
            relative_path: RelativePath("group/proj.git".into()),
            source_storage: Some(StorageName("gitaly-1".into())),
            target_storage: StorageName("gitaly-2".into()),
            params: serde_json::Value::Null,
        };
        queue.enqueue(job, serde_json::Value::Null, 3, 0).await.unwrap();
        queue
            .dequeue(&VirtualStorageName("default".into()), &StorageName("gitaly-2".into()), 10, 10)
            .await
            .unwrap();

        let sweeper = Sweeper::new(queue.clone(), Duration::from_secs(1), Duration::from_millis(50));
        sweeper.sweep_once(&|| 1_000).await;

        let retried = queue
            .dequeue(&VirtualStorageName("default".into()), &StorageName("gitaly-2".into()), 10, 1_001)
            .await
            .unwrap();
        assert_eq!(retried.len(), 1, "a job whose heartbeat is older than stale_after should be reclaimed");
    }
}
