//! Shared types used across the praefect-rs workspace: the error
//! taxonomy (spec §7), the repository/generation data model (spec §3),
//! and the static cluster configuration (spec §6).

mod config;
mod error;
mod generation;
mod identity;

pub use config::{Config, ElectionStrategy, ReplicationTuning, TransactionTuning, VirtualStorage, PhysicalNode, Listen, TlsListen};
pub use error::{Error, Result};
pub use generation::Generation;
pub use identity::{RelativePath, RepositoryId, StorageName, VirtualStorageName};
