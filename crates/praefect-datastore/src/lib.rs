//! Repository store (spec.md §4.C): a persistent record, per
//! (virtual-storage, repository) pair, of which physical storages hold
//! which generation of that repository.

mod memory;
mod postgres;
mod store;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{max_generation, outdated, RepositoryStore};
