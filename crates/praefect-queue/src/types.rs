use praefect_base::{RepositoryId, StorageName, VirtualStorageName};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Update,
    Delete,
    Rename,
    Create,
    Gc,
}

/// ReplicationJob is the payload of a ReplicationEvent (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationJob {
    pub change_kind: ChangeKind,
    pub virtual_storage: VirtualStorageName,
    pub relative_path: praefect_base::RelativePath,
    pub source_storage: Option<StorageName>,
    pub target_storage: StorageName,
    /// Kind-specific parameters (e.g. the new path for a rename).
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ReplicationJob {
    pub fn repository(&self) -> RepositoryId {
        RepositoryId {
            virtual_storage: self.virtual_storage.clone(),
            relative_path: self.relative_path.clone(),
        }
    }

    /// `vs|targetStorage|relativePath` (spec.md §3, GLOSSARY "Lock-id").
    pub fn lock_id(&self) -> String {
        self.repository().lock_id(&self.target_storage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Ready,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Dead,
}

impl EventState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventState::Completed | EventState::Failed | EventState::Cancelled | EventState::Dead)
    }
}

/// ReplicationEvent wraps a ReplicationJob with queue bookkeeping
/// (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationEvent {
    pub id: i64,
    pub state: EventState,
    pub attempts_remaining: i32,
    pub lock_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub job: ReplicationJob,
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl ReplicationEvent {
    pub fn new(id: i64, job: ReplicationJob, meta: serde_json::Value, attempts: i32, now_ms: i64) -> Self {
        ReplicationEvent {
            id,
            state: EventState::Ready,
            attempts_remaining: attempts,
            lock_id: job.lock_id(),
            created_at: now_ms,
            updated_at: now_ms,
            job,
            meta,
        }
    }
}
