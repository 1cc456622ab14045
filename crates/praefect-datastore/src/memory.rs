use crate::store::{max_generation, RepositoryStore};
use praefect_base::{Error, Generation, RepositoryId, Result, StorageName};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// MemoryStore is an in-process fake implementing the same contract as
/// `PgStore`, used by tests throughout the workspace (and by
/// `ElectionStrategy::Local` development setups) so that router and
/// coordinator logic can be exercised without a database.
#[derive(Default)]
pub struct MemoryStore {
    replicas: Mutex<HashMap<RepositoryId, HashMap<StorageName, Generation>>>,
    primaries: Mutex<HashMap<RepositoryId, StorageName>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/bootstrap helper to seed a replica's generation directly.
    pub fn seed(&self, repo: &RepositoryId, storage: &StorageName, gen: Generation) {
        self.replicas
            .lock()
            .unwrap()
            .entry(repo.clone())
            .or_default()
            .insert(storage.clone(), gen);
    }
}

#[async_trait::async_trait]
impl RepositoryStore for MemoryStore {
    async fn get_replicas(&self, repo: &RepositoryId) -> Result<HashMap<StorageName, Generation>> {
        Ok(self.replicas.lock().unwrap().get(repo).cloned().unwrap_or_default())
    }

    async fn increment_generation(
        &self,
        repo: &RepositoryId,
        primary: &StorageName,
        secondaries: &[StorageName],
    ) -> Result<Generation> {
        let mut replicas = self.replicas.lock().unwrap();
        let entry = replicas.entry(repo.clone()).or_default();

        let max = max_generation(entry.values());
        let primary_gen = entry.get(primary).copied().unwrap_or(Generation::Unknown);

        if !max.is_unknown() && primary_gen != max {
            return Err(Error::FailedPrecondition(format!(
                "primary '{primary}' generation {primary_gen} is not the current maximum {max} for {repo}"
            )));
        }

        let next = Generation::advanced_from(max);
        for storage in std::iter::once(primary).chain(secondaries.iter()) {
            entry.insert(storage.clone(), next);
        }
        Ok(next)
    }

    async fn set_generation(&self, repo: &RepositoryId, storage: &StorageName, gen: Generation) -> Result<()> {
        self.replicas.lock().unwrap().entry(repo.clone()).or_default().insert(storage.clone(), gen);
        Ok(())
    }

    async fn get_outdated_replicas(&self, repo: &RepositoryId) -> Result<HashSet<StorageName>> {
        let replicas = self.get_replicas(repo).await?;
        Ok(crate::store::outdated(&replicas))
    }

    async fn get_primary(&self, repo: &RepositoryId) -> Result<Option<StorageName>> {
        Ok(self.primaries.lock().unwrap().get(repo).cloned())
    }

    async fn set_primary(&self, repo: &RepositoryId, storage: &StorageName) -> Result<()> {
        self.primaries.lock().unwrap().insert(repo.clone(), storage.clone());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn repo() -> RepositoryId {
        RepositoryId::new("default", "group/proj.git")
    }
    fn storage(name: &str) -> StorageName {
        StorageName(name.into())
    }

    #[tokio::test]
    async fn increment_generation_advances_named_participants_only() {
        let store = MemoryStore::new();
        store.seed(&repo(), &storage("a"), Generation::Known(1));
        store.seed(&repo(), &storage("b"), Generation::Known(1));
        store.seed(&repo(), &storage("c"), Generation::Known(1));

        let next = store.increment_generation(&repo(), &storage("a"), &[storage("b")]).await.unwrap();
        assert_eq!(next, Generation::Known(2));

        let replicas = store.get_replicas(&repo()).await.unwrap();
        assert_eq!(replicas[&storage("a")], Generation::Known(2));
        assert_eq!(replicas[&storage("b")], Generation::Known(2));
        assert_eq!(replicas[&storage("c")], Generation::Known(1), "unnamed secondary stays behind");
    }

    #[tokio::test]
    async fn increment_generation_rejects_a_stale_primary() {
        let store = MemoryStore::new();
        store.seed(&repo(), &storage("a"), Generation::Known(1));
        store.seed(&repo(), &storage("b"), Generation::Known(2));

        let err = store.increment_generation(&repo(), &storage("a"), &[]).await.unwrap_err();
        assert!(matches!(err, Error::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn first_write_to_an_unknown_repository_starts_at_zero() {
        let store = MemoryStore::new();
        let next = store.increment_generation(&repo(), &storage("a"), &[storage("b")]).await.unwrap();
        assert_eq!(next, Generation::Known(0));
    }

    #[tokio::test]
    async fn get_outdated_replicas_excludes_the_maximum() {
        let store = MemoryStore::new();
        store.seed(&repo(), &storage("a"), Generation::Known(2));
        store.seed(&repo(), &storage("b"), Generation::Known(1));
        let outdated = store.get_outdated_replicas(&repo()).await.unwrap();
        assert_eq!(outdated, HashSet::from([storage("b")]));
    }
}
