use crate::types::{EventState, ReplicationEvent, ReplicationJob};
use praefect_base::{Result, StorageName, VirtualStorageName};
use std::collections::HashMap;

/// ReplicationQueue is the spec.md §4.D interface: a durable,
/// per-repository-exclusive job queue. Implementations must uphold the
/// four invariants spec.md §4.D lists:
/// 1. at most one event per lock-id is ever `in_progress`;
/// 2. `attempts_remaining` is non-negative;
/// 3. acknowledging a non-`in_progress` event is a no-op;
/// 4. transitions follow `ready -> in_progress -> {terminal}`, with
///    `failed -> in_progress` allowed while attempts remain.
#[async_trait::async_trait]
pub trait ReplicationQueue: Send + Sync {
    /// Inserts the lock row if absent, and a new event row in state
    /// `ready`. `now_ms` is supplied by the caller (rather than read
    /// from the system clock inside the implementation) so tests can
    /// drive time deterministically.
    async fn enqueue(&self, job: ReplicationJob, meta: serde_json::Value, attempts: i32, now_ms: i64) -> Result<ReplicationEvent>;

    /// Atomically selects up to `n` eligible events for `(vs,
    /// target_storage)`: state in {ready, failed}, attempts > 0, lock
    /// free, FIFO by created_at per lock-id, at most one in-progress
    /// per lock-id. Transitions them to `in_progress`, decrements
    /// attempts, and acquires their locks.
    async fn dequeue(
        &self,
        vs: &VirtualStorageName,
        target_storage: &StorageName,
        n: u32,
        now_ms: i64,
    ) -> Result<Vec<ReplicationEvent>>;

    /// Moves `ids` that are currently `in_progress` into `state`
    /// (which must be terminal), releasing each event's lock once
    /// every in-progress event sharing it is terminal. Returns the
    /// subset of `ids` actually updated — a second call with the same
    /// `ids` returns an empty vec (spec.md §8 property 5).
    async fn acknowledge(&self, state: EventState, ids: &[i64], now_ms: i64) -> Result<Vec<i64>>;

    /// Refreshes the job-lock heartbeat ("triggered_at") for `ids`.
    /// Returns the subset still owned by the caller (an empty result
    /// means another party has since taken ownership, signaling the
    /// caller to stop refreshing).
    async fn heartbeat(&self, ids: &[i64], now_ms: i64) -> Result<Vec<i64>>;

    /// Moves any `in_progress` event whose job-lock heartbeat is older
    /// than `stale_before_ms` back to `failed` (preserving its
    /// attempts count) and releases its lock, so another worker can
    /// pick it up. Returns the ids reclaimed.
    async fn sweep_stale(&self, stale_before_ms: i64, now_ms: i64) -> Result<Vec<i64>>;

    /// Per repository, the set of target storages whose latest job's
    /// source differs from `reference`, or whose latest job is not
    /// `completed` (spec.md §4.D).
    async fn get_outdated_repositories(
        &self,
        vs: &VirtualStorageName,
        reference: &StorageName,
    ) -> Result<HashMap<praefect_base::RepositoryId, std::collections::HashSet<StorageName>>>;
}
