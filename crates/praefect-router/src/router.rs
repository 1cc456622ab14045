use crate::strategy::ElectionStrategy;
use crate::types::{MethodClass, MutatorRoute, RouteDecision};
use praefect_base::{Error, Generation, RepositoryId, Result, StorageName, VirtualStorageName};
use praefect_datastore::RepositoryStore;
use praefect_health::Monitor;
use std::sync::Arc;

/// Router implements spec.md §4.F: given a classified method and a
/// repository identity, decides which physical node(s) serve it.
pub struct Router {
    store: Arc<dyn RepositoryStore>,
    health: Monitor,
    election: Arc<dyn ElectionStrategy>,
}

impl Router {
    pub fn new(store: Arc<dyn RepositoryStore>, health: Monitor, election: Arc<dyn ElectionStrategy>) -> Self {
        Router { store, health, election }
    }

    pub async fn route(&self, vs: &VirtualStorageName, repo: &RepositoryId, method: MethodClass) -> Result<RouteDecision> {
        let healthy = self.health.healthy_nodes(vs);
        if healthy.is_empty() {
            return Err(Error::Unavailable(format!("no healthy nodes in virtual storage '{vs}'")));
        }

        match method {
            MethodClass::Accessor => {
                let mut candidates: Vec<_> = healthy.into_iter().collect();
                candidates.sort();
                Ok(RouteDecision::Accessor(candidates.into_iter().next().expect("checked non-empty above")))
            }
            MethodClass::AccessorFresh => {
                let replicas = self.store.get_replicas(repo).await?;
                let max = praefect_datastore::max_generation(replicas.values());
                let mut candidates: Vec<_> = healthy
                    .into_iter()
                    .filter(|storage| replicas.get(storage).copied().unwrap_or(Generation::Unknown) == max && !max.is_unknown())
                    .collect();
                candidates.sort();
                candidates
                    .into_iter()
                    .next()
                    .map(RouteDecision::Accessor)
                    .ok_or_else(|| Error::Unavailable(format!("no up-to-date healthy node for {repo}")))
            }
            MethodClass::Mutator => {
                let primary = self
                    .election
                    .primary(vs, repo, &self.health.healthy_nodes(vs))
                    .await?
                    .ok_or_else(|| Error::FailedPrecondition(format!("no primary available for {repo}")))?;

                let healthy = self.health.healthy_nodes(vs);
                if !healthy.contains(&primary) && !self.election.bypasses_health_check() {
                    return Err(Error::FailedPrecondition(format!("primary '{primary}' for {repo} is unhealthy")));
                }

                let replicas = self.store.get_replicas(repo).await?;
                let primary_gen = replicas.get(&primary).copied().unwrap_or(Generation::Unknown);

                let mut secondaries = Vec::new();
                let mut outdated = Vec::new();
                for storage in healthy.into_iter().filter(|s| *s != primary) {
                    let gen = replicas.get(&storage).copied().unwrap_or(Generation::Unknown);
                    if gen.is_unknown() || gen < primary_gen {
                        outdated.push(storage);
                    } else {
                        secondaries.push(storage);
                    }
                }
                secondaries.sort();
                outdated.sort();

                Ok(RouteDecision::Mutator(MutatorRoute { primary, secondaries, outdated }))
            }
        }
    }

    pub fn storage_is_healthy(&self, vs: &VirtualStorageName, storage: &StorageName) -> bool {
        self.health.healthy_nodes(vs).contains(storage)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::strategy::{LocalElection, SqlElection};
    use praefect_datastore::MemoryStore;
    use praefect_health::Thresholds;
    use std::collections::HashMap;
    use std::time::Duration;

    fn repo() -> RepositoryId {
        RepositoryId::new("default", "group/proj.git")
    }
    fn storage(name: &str) -> StorageName {
        StorageName(name.into())
    }
    fn vs() -> VirtualStorageName {
        VirtualStorageName("default".into())
    }

    fn healthy_monitor(nodes: &[&str]) -> Monitor {
        let thresholds = Thresholds { healthy_after: 1, unhealthy_after: 1, probe_interval: Duration::from_secs(60), probe_timeout: Duration::from_secs(1) };
        let monitor = Monitor::new(nodes.iter().map(|n| (vs(), storage(n))), thresholds);
        for n in nodes {
            monitor.record_result(&vs(), &storage(n), true);
        }
        monitor
    }

    #[tokio::test]
    async fn mutator_route_excludes_an_outdated_secondary_but_keeps_it_for_replication() {
        let store = Arc::new(MemoryStore::new());
        store.seed(&repo(), &storage("a"), Generation::Known(5));
        store.seed(&repo(), &storage("b"), Generation::Known(5));
        store.seed(&repo(), &storage("c"), Generation::Known(2));

        let election = Arc::new(SqlElection::new(store.clone(), HashMap::from([(vs(), storage("a"))])));
        let router = Router::new(store, healthy_monitor(&["a", "b", "c"]), election);

        let route = router.route(&vs(), &repo(), MethodClass::Mutator).await.unwrap();
        let RouteDecision::Mutator(route) = route else { panic!("expected a mutator route") };
        assert_eq!(route.primary, storage("a"));
        assert_eq!(route.secondaries, vec![storage("b")]);
        assert_eq!(route.outdated, vec![storage("c")]);
    }

    #[tokio::test]
    async fn mutator_route_fails_closed_when_the_primary_is_unhealthy() {
        let store = Arc::new(MemoryStore::new());
        let election = Arc::new(SqlElection::new(store.clone(), HashMap::from([(vs(), storage("a"))])));
        let router = Router::new(store, healthy_monitor(&["b"]), election);

        let err = router.route(&vs(), &repo(), MethodClass::Mutator).await.unwrap_err();
        assert!(matches!(err, Error::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn local_election_routes_to_the_configured_primary_even_when_it_is_unhealthy() {
        let store = Arc::new(MemoryStore::new());
        store.seed(&repo(), &storage("local"), Generation::Known(1));
        store.seed(&repo(), &storage("other"), Generation::Known(1));

        let election = Arc::new(LocalElection::new(storage("local")));
        let router = Router::new(store, healthy_monitor(&["other"]), election);

        let route = router.route(&vs(), &repo(), MethodClass::Mutator).await.unwrap();
        let RouteDecision::Mutator(route) = route else { panic!("expected a mutator route") };
        assert_eq!(route.primary, storage("local"));
    }

    #[tokio::test]
    async fn accessor_fresh_requires_a_node_at_the_maximum_generation() {
        let store = Arc::new(MemoryStore::new());
        store.seed(&repo(), &storage("a"), Generation::Known(5));
        store.seed(&repo(), &storage("b"), Generation::Known(2));

        let election = Arc::new(SqlElection::new(store.clone(), HashMap::new()));
        let router = Router::new(store, healthy_monitor(&["b"]), election);

        let err = router.route(&vs(), &repo(), MethodClass::AccessorFresh).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }
}
