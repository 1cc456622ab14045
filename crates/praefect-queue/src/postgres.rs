use crate::queue::ReplicationQueue;
use crate::types::{ChangeKind, EventState, ReplicationEvent, ReplicationJob};
use praefect_base::{RelativePath, RepositoryId, Result, StorageName, VirtualStorageName};
use sqlx::{PgPool, Row};
use std::collections::{HashMap, HashSet};

fn change_kind_str(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Update => "update",
        ChangeKind::Delete => "delete",
        ChangeKind::Rename => "rename",
        ChangeKind::Create => "create",
        ChangeKind::Gc => "gc",
    }
}

fn change_kind_from_str(s: &str) -> ChangeKind {
    match s {
        "delete" => ChangeKind::Delete,
        "rename" => ChangeKind::Rename,
        "create" => ChangeKind::Create,
        "gc" => ChangeKind::Gc,
        _ => ChangeKind::Update,
    }
}

fn state_str(state: EventState) -> &'static str {
    match state {
        EventState::Ready => "ready",
        EventState::InProgress => "in_progress",
        EventState::Completed => "completed",
        EventState::Failed => "failed",
        EventState::Cancelled => "cancelled",
        EventState::Dead => "dead",
    }
}

fn state_from_str(s: &str) -> EventState {
    match s {
        "in_progress" => EventState::InProgress,
        "completed" => EventState::Completed,
        "failed" => EventState::Failed,
        "cancelled" => EventState::Cancelled,
        "dead" => EventState::Dead,
        _ => EventState::Ready,
    }
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> ReplicationEvent {
    let job = ReplicationJob {
        change_kind: change_kind_from_str(row.get::<String, _>("change_kind").as_str()),
        virtual_storage: VirtualStorageName(row.get("virtual_storage")),
        relative_path: RelativePath(row.get("relative_path")),
        source_storage: row.get::<Option<String>, _>("source_storage").map(StorageName),
        target_storage: StorageName(row.get("target_storage")),
        params: row.get::<Option<serde_json::Value>, _>("params").unwrap_or(serde_json::Value::Null),
    };
    ReplicationEvent {
        id: row.get("id"),
        state: state_from_str(row.get::<String, _>("state").as_str()),
        attempts_remaining: row.get("attempts_remaining"),
        lock_id: row.get("lock_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        job,
        meta: row.get::<Option<serde_json::Value>, _>("meta").unwrap_or(serde_json::Value::Null),
    }
}

/// PgQueue is the Postgres-backed `ReplicationQueue` against the
/// `replication_queue_lock` / `replication_queue` tables laid out in
/// spec.md §6, grounded on `automations::server`'s `FOR UPDATE SKIP
/// LOCKED` dequeue pattern: a lock row per lock-id guards exclusivity,
/// and workers race for unlocked rows rather than blocking on them.
pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        PgQueue { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS replication_queue_lock (
                lock_id       TEXT PRIMARY KEY,
                held          BOOLEAN NOT NULL DEFAULT FALSE,
                triggered_at  BIGINT NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS replication_queue (
                id                 BIGSERIAL PRIMARY KEY,
                state              TEXT NOT NULL,
                attempts_remaining INT NOT NULL,
                lock_id            TEXT NOT NULL REFERENCES replication_queue_lock(lock_id),
                virtual_storage    TEXT NOT NULL,
                relative_path      TEXT NOT NULL,
                target_storage     TEXT NOT NULL,
                source_storage     TEXT,
                change_kind        TEXT NOT NULL,
                params             JSONB,
                meta               JSONB,
                created_at         BIGINT NOT NULL,
                updated_at         BIGINT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl ReplicationQueue for PgQueue {
    async fn enqueue(&self, job: ReplicationJob, meta: serde_json::Value, attempts: i32, now_ms: i64) -> Result<ReplicationEvent> {
        let lock_id = job.lock_id();
        let mut txn = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO replication_queue_lock (lock_id, held, triggered_at) VALUES ($1, FALSE, $2) \
             ON CONFLICT (lock_id) DO NOTHING",
        )
        .bind(&lock_id)
        .bind(now_ms)
        .execute(&mut *txn)
        .await?;

        let row = sqlx::query(
            "INSERT INTO replication_queue \
             (state, attempts_remaining, lock_id, virtual_storage, relative_path, target_storage, source_storage, change_kind, params, meta, created_at, updated_at) \
             VALUES ('ready', $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10) \
             RETURNING *",
        )
        .bind(attempts)
        .bind(&lock_id)
        .bind(&job.virtual_storage.0)
        .bind(&job.relative_path.0)
        .bind(&job.target_storage.0)
        .bind(job.source_storage.as_ref().map(|s| s.0.as_str()))
        .bind(change_kind_str(job.change_kind))
        .bind(&job.params)
        .bind(&meta)
        .bind(now_ms)
        .fetch_one(&mut *txn)
        .await?;

        txn.commit().await?;
        Ok(row_to_event(&row))
    }

    async fn dequeue(
        &self,
        vs: &VirtualStorageName,
        target_storage: &StorageName,
        n: u32,
        now_ms: i64,
    ) -> Result<Vec<ReplicationEvent>> {
        let mut txn = self.pool.begin().await?;

        let candidates = sqlx::query(
            "SELECT DISTINCT ON (q.lock_id) q.* FROM replication_queue q \
             JOIN replication_queue_lock l ON l.lock_id = q.lock_id \
             WHERE q.virtual_storage = $1 AND q.target_storage = $2 \
               AND q.state IN ('ready', 'failed') AND q.attempts_remaining > 0 \
               AND l.held = FALSE \
             ORDER BY q.lock_id, q.created_at ASC \
             FOR UPDATE OF q SKIP LOCKED",
        )
        .bind(&vs.0)
        .bind(&target_storage.0)
        .fetch_all(&mut *txn)
        .await?;

        let mut events: Vec<ReplicationEvent> = candidates.iter().map(row_to_event).collect();
        events.sort_by_key(|e| e.created_at);
        events.truncate(n as usize);

        let mut out = Vec::with_capacity(events.len());
        for mut event in events {
            event.state = EventState::InProgress;
            event.attempts_remaining -= 1;
            event.updated_at = now_ms;

            sqlx::query("UPDATE replication_queue SET state = 'in_progress', attempts_remaining = $1, updated_at = $2 WHERE id = $3")
                .bind(event.attempts_remaining)
                .bind(now_ms)
                .bind(event.id)
                .execute(&mut *txn)
                .await?;

            sqlx::query("UPDATE replication_queue_lock SET held = TRUE, triggered_at = $1 WHERE lock_id = $2")
                .bind(now_ms)
                .bind(&event.lock_id)
                .execute(&mut *txn)
                .await?;

            out.push(event);
        }

        txn.commit().await?;
        Ok(out)
    }

    async fn acknowledge(&self, state: EventState, ids: &[i64], now_ms: i64) -> Result<Vec<i64>> {
        if !state.is_terminal() {
            return Err(praefect_base::Error::InvalidArgument(format!("acknowledge requires a terminal state, got {state:?}")));
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut txn = self.pool.begin().await?;

        let acked: Vec<i64> = sqlx::query(
            "UPDATE replication_queue SET state = $1, updated_at = $2 \
             WHERE id = ANY($3) AND state = 'in_progress' RETURNING id",
        )
        .bind(state_str(state))
        .bind(now_ms)
        .bind(ids)
        .fetch_all(&mut *txn)
        .await?
        .into_iter()
        .map(|row| row.get::<i64, _>("id"))
        .collect();

        sqlx::query(
            "UPDATE replication_queue_lock SET held = FALSE \
             WHERE lock_id IN ( \
                SELECT DISTINCT lock_id FROM replication_queue WHERE id = ANY($1) \
             ) AND lock_id NOT IN ( \
                SELECT DISTINCT lock_id FROM replication_queue WHERE state = 'in_progress' \
             )",
        )
        .bind(&acked)
        .execute(&mut *txn)
        .await?;

        txn.commit().await?;
        Ok(acked)
    }

    async fn heartbeat(&self, ids: &[i64], now_ms: i64) -> Result<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "UPDATE replication_queue_lock SET triggered_at = $1 \
             WHERE held = TRUE AND lock_id IN ( \
                SELECT lock_id FROM replication_queue WHERE id = ANY($2) AND state = 'in_progress' \
             ) RETURNING lock_id",
        )
        .bind(now_ms)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        let refreshed_locks: HashSet<String> = rows.into_iter().map(|row| row.get::<String, _>("lock_id")).collect();

        let events = sqlx::query("SELECT id, lock_id FROM replication_queue WHERE id = ANY($1) AND state = 'in_progress'")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(events
            .into_iter()
            .filter(|row| refreshed_locks.contains(&row.get::<String, _>("lock_id")))
            .map(|row| row.get::<i64, _>("id"))
            .collect())
    }

    async fn sweep_stale(&self, stale_before_ms: i64, now_ms: i64) -> Result<Vec<i64>> {
        let mut txn = self.pool.begin().await?;

        let reclaimed: Vec<i64> = sqlx::query(
            "UPDATE replication_queue q SET state = 'failed', updated_at = $1 \
             FROM replication_queue_lock l \
             WHERE q.lock_id = l.lock_id AND q.state = 'in_progress' AND l.triggered_at < $2 \
             RETURNING q.id",
        )
        .bind(now_ms)
        .bind(stale_before_ms)
        .fetch_all(&mut *txn)
        .await?
        .into_iter()
        .map(|row| row.get::<i64, _>("id"))
        .collect();

        sqlx::query(
            "UPDATE replication_queue_lock SET held = FALSE \
             WHERE lock_id IN (SELECT DISTINCT lock_id FROM replication_queue WHERE id = ANY($1)) \
             AND lock_id NOT IN (SELECT DISTINCT lock_id FROM replication_queue WHERE state = 'in_progress')",
        )
        .bind(&reclaimed)
        .execute(&mut *txn)
        .await?;

        txn.commit().await?;
        Ok(reclaimed)
    }

    async fn get_outdated_repositories(
        &self,
        vs: &VirtualStorageName,
        reference: &StorageName,
    ) -> Result<HashMap<RepositoryId, HashSet<StorageName>>> {
        let rows = sqlx::query(
            "SELECT DISTINCT ON (relative_path, target_storage) \
                relative_path, target_storage, source_storage, state \
             FROM replication_queue \
             WHERE virtual_storage = $1 AND target_storage != $2 \
             ORDER BY relative_path, target_storage, created_at DESC",
        )
        .bind(&vs.0)
        .bind(&reference.0)
        .fetch_all(&self.pool)
        .await?;

        let mut out: HashMap<RepositoryId, HashSet<StorageName>> = HashMap::new();
        for row in rows {
            let target = StorageName(row.get("target_storage"));
            let source: Option<String> = row.get("source_storage");
            let state = state_from_str(row.get::<String, _>("state").as_str());

            let behind = state != EventState::Completed || source.as_deref() != Some(reference.0.as_str());
            if behind {
                let repo = RepositoryId {
                    virtual_storage: vs.clone(),
                    relative_path: RelativePath(row.get("relative_path")),
                };
                out.entry(repo).or_default().insert(target);
            }
        }
        Ok(out)
    }
}
