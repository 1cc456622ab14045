use praefect_base::{Generation, RepositoryId, Result, StorageName};
use std::collections::{HashMap, HashSet};

/// RepositoryStore is the spec.md §4.C interface. Each operation
/// either succeeds atomically or leaves the store unchanged — a
/// concurrent conflict on the same repository aborts with
/// `Error::Internal` and the caller retries, rather than applying a
/// partial update.
#[async_trait::async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn get_replicas(&self, repo: &RepositoryId) -> Result<HashMap<StorageName, Generation>>;

    /// Advances `primary` and each of `secondaries` to
    /// `max(current generations of all participants) + 1`. Storages
    /// not named here keep their current generation, and so become
    /// outdated if the new value exceeds it. Fails with
    /// `FailedPrecondition` if `primary`'s generation is not already
    /// the repository's current maximum (spec.md §4.C).
    async fn increment_generation(
        &self,
        repo: &RepositoryId,
        primary: &StorageName,
        secondaries: &[StorageName],
    ) -> Result<Generation>;

    /// Idempotently aligns a single replica's generation to `gen`,
    /// used by the replication executor once it has brought a replica
    /// up to date (spec.md §4.C, §4.H step 4).
    async fn set_generation(&self, repo: &RepositoryId, storage: &StorageName, gen: Generation) -> Result<()>;

    async fn get_outdated_replicas(&self, repo: &RepositoryId) -> Result<HashSet<StorageName>>;

    /// The statically-or-dynamically elected primary for `repo`, used
    /// by the `per_repository` election strategy (SPEC_FULL.md
    /// supplemental feature 4). `None` if no election has happened
    /// yet.
    async fn get_primary(&self, repo: &RepositoryId) -> Result<Option<StorageName>>;

    async fn set_primary(&self, repo: &RepositoryId, storage: &StorageName) -> Result<()>;
}

/// Computes the maximum generation among a set of replicas, treating
/// an empty set as `Unknown` (spec.md §3: "unknown generation is
/// treated as less than any integer").
pub fn max_generation<'a>(replicas: impl IntoIterator<Item = &'a Generation>) -> Generation {
    replicas.into_iter().copied().max().unwrap_or(Generation::Unknown)
}

/// Computes the outdated subset of `replicas`: those whose generation
/// is strictly less than the repository-wide maximum (spec.md §3,
/// §4.C).
pub fn outdated(replicas: &HashMap<StorageName, Generation>) -> HashSet<StorageName> {
    let max = max_generation(replicas.values());
    replicas
        .iter()
        .filter(|(_, gen)| **gen < max)
        .map(|(storage, _)| storage.clone())
        .collect()
}
