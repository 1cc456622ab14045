use crate::queue::ReplicationQueue;
use crate::types::{EventState, ReplicationEvent, ReplicationJob};
use praefect_base::{RepositoryId, Result, StorageName, VirtualStorageName};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

struct Lock {
    held: bool,
    heartbeat_ms: i64,
}

/// MemoryQueue is an in-process fake implementing the same contract as
/// `PgQueue`, mirroring `praefect_datastore::memory::MemoryStore`'s
/// role: it lets the router, proxy, and replicator be tested without a
/// database while exercising the exact invariants spec.md §8 lists.
#[derive(Default)]
pub struct MemoryQueue {
    events: Mutex<Vec<ReplicationEvent>>,
    locks: Mutex<HashMap<String, Lock>>,
    next_id: Mutex<i64>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ReplicationQueue for MemoryQueue {
    async fn enqueue(&self, job: ReplicationJob, meta: serde_json::Value, attempts: i32, now_ms: i64) -> Result<ReplicationEvent> {
        let mut next_id = self.next_id.lock().unwrap();
        let id = *next_id;
        *next_id += 1;
        drop(next_id);

        let lock_id = job.lock_id();
        self.locks.lock().unwrap().entry(lock_id).or_insert(Lock { held: false, heartbeat_ms: now_ms });

        let event = ReplicationEvent::new(id, job, meta, attempts, now_ms);
        self.events.lock().unwrap().push(event.clone());
        Ok(event)
    }

    async fn dequeue(
        &self,
        vs: &VirtualStorageName,
        target_storage: &StorageName,
        n: u32,
        now_ms: i64,
    ) -> Result<Vec<ReplicationEvent>> {
        let mut events = self.events.lock().unwrap();
        let mut locks = self.locks.lock().unwrap();

        let mut eligible: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.job.virtual_storage == *vs
                    && e.job.target_storage == *target_storage
                    && matches!(e.state, EventState::Ready | EventState::Failed)
                    && e.attempts_remaining > 0
                    && locks.get(&e.lock_id).map(|l| !l.held).unwrap_or(true)
            })
            .map(|(i, _)| i)
            .collect();

        eligible.sort_by_key(|&i| events[i].created_at);

        let mut taken_locks: HashSet<String> = HashSet::new();
        let mut selected = Vec::new();
        for idx in eligible {
            if selected.len() as u32 >= n {
                break;
            }
            let lock_id = events[idx].lock_id.clone();
            if taken_locks.contains(&lock_id) {
                continue;
            }
            taken_locks.insert(lock_id.clone());
            selected.push(idx);
        }

        let mut out = Vec::with_capacity(selected.len());
        for idx in selected {
            let event = &mut events[idx];
            event.state = EventState::InProgress;
            event.attempts_remaining -= 1;
            event.updated_at = now_ms;
            locks.entry(event.lock_id.clone()).or_insert(Lock { held: false, heartbeat_ms: now_ms });
            let lock = locks.get_mut(&event.lock_id).unwrap();
            lock.held = true;
            lock.heartbeat_ms = now_ms;
            out.push(event.clone());
        }
        Ok(out)
    }

    async fn acknowledge(&self, state: EventState, ids: &[i64], now_ms: i64) -> Result<Vec<i64>> {
        if !state.is_terminal() {
            return Err(praefect_base::Error::InvalidArgument(format!("acknowledge requires a terminal state, got {state:?}")));
        }
        let mut events = self.events.lock().unwrap();
        let mut locks = self.locks.lock().unwrap();
        let id_set: HashSet<i64> = ids.iter().copied().collect();

        let mut acked = Vec::new();
        for event in events.iter_mut() {
            if id_set.contains(&event.id) && event.state == EventState::InProgress {
                event.state = state;
                event.updated_at = now_ms;
                acked.push(event.id);
            }
        }

        for event in events.iter() {
            if acked.contains(&event.id) {
                let still_in_progress = events_has_in_progress(&events, &event.lock_id);
                if !still_in_progress {
                    if let Some(lock) = locks.get_mut(&event.lock_id) {
                        lock.held = false;
                    }
                }
            }
        }
        Ok(acked)
    }

    async fn heartbeat(&self, ids: &[i64], now_ms: i64) -> Result<Vec<i64>> {
        let events = self.events.lock().unwrap();
        let mut locks = self.locks.lock().unwrap();
        let mut refreshed = Vec::new();
        for &id in ids {
            if let Some(event) = events.iter().find(|e| e.id == id) {
                if event.state == EventState::InProgress {
                    if let Some(lock) = locks.get_mut(&event.lock_id) {
                        if lock.held {
                            lock.heartbeat_ms = now_ms;
                            refreshed.push(id);
                        }
                    }
                }
            }
        }
        Ok(refreshed)
    }

    async fn sweep_stale(&self, stale_before_ms: i64, now_ms: i64) -> Result<Vec<i64>> {
        let mut events = self.events.lock().unwrap();
        let mut locks = self.locks.lock().unwrap();
        let mut reclaimed = Vec::new();

        for event in events.iter_mut() {
            if event.state != EventState::InProgress {
                continue;
            }
            let stale = locks.get(&event.lock_id).map(|l| l.heartbeat_ms < stale_before_ms).unwrap_or(false);
            if stale {
                event.state = EventState::Failed;
                event.updated_at = now_ms;
                reclaimed.push(event.id);
            }
        }

        for id in &reclaimed {
            let lock_id = events.iter().find(|e| e.id == *id).unwrap().lock_id.clone();
            if !events_has_in_progress(&events, &lock_id) {
                if let Some(lock) = locks.get_mut(&lock_id) {
                    lock.held = false;
                }
            }
        }
        Ok(reclaimed)
    }

    async fn get_outdated_repositories(
        &self,
        vs: &VirtualStorageName,
        reference: &StorageName,
    ) -> Result<HashMap<RepositoryId, HashSet<StorageName>>> {
        let events = self.events.lock().unwrap();
        let mut latest: HashMap<(RepositoryId, StorageName), &ReplicationEvent> = HashMap::new();

        for event in events.iter().filter(|e| e.job.virtual_storage == *vs) {
            let key = (event.job.repository(), event.job.target_storage.clone());
            let slot = latest.entry(key).or_insert(event);
            if event.created_at >= slot.created_at {
                *slot = event;
            }
        }

        let mut out: HashMap<RepositoryId, HashSet<StorageName>> = HashMap::new();
        for ((repo, target), event) in latest {
            if target == *reference {
                continue;
            }
            let behind = event.state != EventState::Completed
                || event.job.source_storage.as_ref().map(|s| s != reference).unwrap_or(false);
            if behind {
                out.entry(repo).or_default().insert(target);
            }
        }
        Ok(out)
    }
}

fn events_has_in_progress(events: &[ReplicationEvent], lock_id: &str) -> bool {
    events.iter().any(|e| e.lock_id == lock_id && e.state == EventState::InProgress)
}

#[cfg(test)]
mod test {
    use super::*;

    fn job(target: &str) -> ReplicationJob {
        ReplicationJob {
            change_kind: crate::types::ChangeKind::Update,
            virtual_storage: VirtualStorageName("default".into()),
            relative_path: praefect_base::RelativePath("group/proj.git".into()),
            source_storage: Some(StorageName("gitaly-1".into())),
            target_storage: StorageName(target.into()),
            params: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn dequeue_never_returns_two_events_for_the_same_lock_id() {
        let queue = MemoryQueue::new();
        queue.enqueue(job("gitaly-2"), serde_json::Value::Null, 3, 0).await.unwrap();
        queue.enqueue(job("gitaly-2"), serde_json::Value::Null, 3, 1).await.unwrap();

        let batch = queue
            .dequeue(&VirtualStorageName("default".into()), &StorageName("gitaly-2".into()), 10, 10)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1, "only the oldest job for a locked repository should be leased");
    }

    #[tokio::test]
    async fn acknowledge_is_idempotent() {
        let queue = MemoryQueue::new();
        queue.enqueue(job("gitaly-2"), serde_json::Value::Null, 3, 0).await.unwrap();
        let batch = queue
            .dequeue(&VirtualStorageName("default".into()), &StorageName("gitaly-2".into()), 10, 10)
            .await
            .unwrap();
        let id = batch[0].id;

        let first = queue.acknowledge(EventState::Completed, &[id], 20).await.unwrap();
        assert_eq!(first, vec![id]);
        let second = queue.acknowledge(EventState::Completed, &[id], 30).await.unwrap();
        assert!(second.is_empty(), "re-acknowledging a terminal event is a no-op");
    }

    #[tokio::test]
    async fn sweep_stale_reclaims_a_dead_worker_job_for_retry() {
        let queue = MemoryQueue::new();
        queue.enqueue(job("gitaly-2"), serde_json::Value::Null, 3, 0).await.unwrap();
        let batch = queue
            .dequeue(&VirtualStorageName("default".into()), &StorageName("gitaly-2".into()), 10, 10)
            .await
            .unwrap();
        assert_eq!(batch[0].attempts_remaining, 2);

        let reclaimed = queue.sweep_stale(100, 200).await.unwrap();
        assert_eq!(reclaimed, vec![batch[0].id]);

        let retried = queue
            .dequeue(&VirtualStorageName("default".into()), &StorageName("gitaly-2".into()), 10, 300)
            .await
            .unwrap();
        assert_eq!(retried.len(), 1, "a failed event with attempts remaining is eligible again");
        assert_eq!(retried[0].attempts_remaining, 1);
    }

    #[tokio::test]
    async fn get_outdated_repositories_flags_targets_behind_the_reference() {
        let queue = MemoryQueue::new();
        let mut stale_job = job("gitaly-2");
        stale_job.source_storage = Some(StorageName("gitaly-9".into()));
        let event = queue.enqueue(stale_job, serde_json::Value::Null, 3, 0).await.unwrap();
        queue.acknowledge(EventState::Completed, &[event.id], 5).await.unwrap();

        let outdated = queue
            .get_outdated_repositories(&VirtualStorageName("default".into()), &StorageName("gitaly-1".into()))
            .await
            .unwrap();
        let repo = RepositoryId::new("default", "group/proj.git");
        assert_eq!(outdated.get(&repo).unwrap(), &HashSet::from([StorageName("gitaly-2".into())]));
    }
}
