use praefect_base::{Generation, RepositoryId, Result, StorageName, VirtualStorageName};
use praefect_datastore::RepositoryStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// ElectionStrategy picks the primary for a mutator RPC (spec.md
/// §4.F). `Sql` and `PerRepository` are distinct strategies rather
/// than a single parameterized one because their failure semantics
/// differ: `Sql`'s primary is an administrative decision that can go
/// stale, while `PerRepository`'s is recomputed from observed state on
/// every call (SPEC_FULL.md supplemental feature 1).
#[async_trait::async_trait]
pub trait ElectionStrategy: Send + Sync {
    async fn primary(&self, vs: &VirtualStorageName, repo: &RepositoryId, healthy: &HashSet<StorageName>) -> Result<Option<StorageName>>;

    /// Whether the primary this strategy names should be routed to
    /// even when the health monitor considers it unhealthy. `local`
    /// is the only strategy where this is true (SPEC_FULL.md: "the
    /// configured primary is always used and health checks are
    /// bypassed for routing purposes, but still recorded").
    fn bypasses_health_check(&self) -> bool {
        false
    }
}

/// SqlElection reads the administratively configured primary from the
/// datastore's `repositories` table, falling back to the static
/// `virtual_storages.*.primary` config value the first time a
/// repository is seen.
pub struct SqlElection {
    store: Arc<dyn RepositoryStore>,
    configured: HashMap<VirtualStorageName, StorageName>,
}

impl SqlElection {
    pub fn new(store: Arc<dyn RepositoryStore>, configured: HashMap<VirtualStorageName, StorageName>) -> Self {
        SqlElection { store, configured }
    }
}

#[async_trait::async_trait]
impl ElectionStrategy for SqlElection {
    async fn primary(&self, vs: &VirtualStorageName, repo: &RepositoryId, _healthy: &HashSet<StorageName>) -> Result<Option<StorageName>> {
        if let Some(primary) = self.store.get_primary(repo).await? {
            return Ok(Some(primary));
        }
        Ok(self.configured.get(vs).cloned())
    }
}

/// PerRepositoryElection recomputes the primary on every call: the
/// healthy node with the highest generation, ties broken by lexical
/// storage name (spec.md §4.F).
pub struct PerRepositoryElection {
    store: Arc<dyn RepositoryStore>,
}

impl PerRepositoryElection {
    pub fn new(store: Arc<dyn RepositoryStore>) -> Self {
        PerRepositoryElection { store }
    }
}

#[async_trait::async_trait]
impl ElectionStrategy for PerRepositoryElection {
    async fn primary(&self, _vs: &VirtualStorageName, repo: &RepositoryId, healthy: &HashSet<StorageName>) -> Result<Option<StorageName>> {
        let replicas = self.store.get_replicas(repo).await?;
        Ok(healthy
            .iter()
            .map(|storage| (storage, replicas.get(storage).copied().unwrap_or(Generation::Unknown)))
            .max_by(|(a_name, a_gen), (b_name, b_gen)| a_gen.cmp(b_gen).then_with(|| a_name.cmp(b_name)))
            .map(|(storage, _)| storage.clone()))
    }
}

/// LocalElection always names a single, fixed storage as primary,
/// ignoring the observed health set entirely: the configured primary
/// is used even when the monitor considers it unhealthy, though that
/// health is still recorded and still governs which secondaries are
/// eligible. It exists for single-node deployments where holding an
/// election is pure overhead (SPEC_FULL.md supplemental feature 1).
pub struct LocalElection {
    local_storage: StorageName,
}

impl LocalElection {
    pub fn new(local_storage: StorageName) -> Self {
        LocalElection { local_storage }
    }
}

#[async_trait::async_trait]
impl ElectionStrategy for LocalElection {
    async fn primary(&self, _vs: &VirtualStorageName, _repo: &RepositoryId, _healthy: &HashSet<StorageName>) -> Result<Option<StorageName>> {
        Ok(Some(self.local_storage.clone()))
    }

    fn bypasses_health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use praefect_datastore::MemoryStore;

    fn repo() -> RepositoryId {
        RepositoryId::new("default", "group/proj.git")
    }
    fn storage(name: &str) -> StorageName {
        StorageName(name.into())
    }

    #[tokio::test]
    async fn per_repository_picks_the_highest_generation_breaking_ties_lexically() {
        let store = Arc::new(MemoryStore::new());
        store.seed(&repo(), &storage("b"), Generation::Known(3));
        store.seed(&repo(), &storage("a"), Generation::Known(3));
        store.seed(&repo(), &storage("c"), Generation::Known(1));

        let election = PerRepositoryElection::new(store);
        let healthy = HashSet::from([storage("a"), storage("b"), storage("c")]);
        let primary = election.primary(&VirtualStorageName("default".into()), &repo(), &healthy).await.unwrap();
        assert_eq!(primary, Some(storage("a")), "equal generations break ties lexically");
    }

    #[tokio::test]
    async fn local_election_always_names_the_fixed_node_regardless_of_health() {
        let election = LocalElection::new(storage("local"));
        let vs = VirtualStorageName("default".into());

        let healthy = HashSet::from([storage("local")]);
        assert_eq!(election.primary(&vs, &repo(), &healthy).await.unwrap(), Some(storage("local")));

        let healthy = HashSet::new();
        assert_eq!(election.primary(&vs, &repo(), &healthy).await.unwrap(), Some(storage("local")));
        assert!(election.bypasses_health_check());
    }
}
