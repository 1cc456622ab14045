//! The replication event queue (spec §3, §4.D): durable, per-repository
//! exclusive jobs backed by Postgres, with an in-memory fake for tests
//! and an independent stale-lock sweeper.

mod memory;
mod postgres;
mod queue;
mod sweeper;
mod types;

pub use memory::MemoryQueue;
pub use postgres::PgQueue;
pub use queue::ReplicationQueue;
pub use sweeper::Sweeper;
pub use types::{ChangeKind, EventState, ReplicationEvent, ReplicationJob};
