use bytes::Bytes;
use praefect_base::{Config, ElectionStrategy as ElectionStrategyKind, RepositoryId, StorageName, VirtualStorageName};
use praefect_datastore::{PgStore, RepositoryStore};
use praefect_health::{Monitor, Probe, Thresholds};
use praefect_proxy::{Coordinator, GrpcTransport};
use praefect_queue::{PgQueue, ReplicationQueue};
use praefect_replicator::{Reconciler, RepositoryInventory, RepositoryOperation, Worker};
use praefect_router::{ElectionStrategy, LocalElection, PerRepositoryElection, Router, SqlElection};
use praefect_txn::TransactionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Channel;

/// Topology is every long-lived component wired together for `serve`,
/// built once at startup from `Config` (spec.md §6) and a live
/// Postgres pool.
pub struct Topology {
    pub coordinator: Arc<Coordinator>,
    pub monitor: Monitor,
    pub probe: Arc<dyn Probe>,
    pub thresholds: Thresholds,
    pub workers: Vec<Worker>,
    pub reconcilers: Vec<Reconciler>,
    pub sweeper: praefect_queue::Sweeper,
    pub store: Arc<dyn RepositoryStore>,
    pub queue: Arc<dyn ReplicationQueue>,
}

pub async fn build(config: &Config, pool: sqlx::PgPool) -> anyhow::Result<Topology> {
    let store: Arc<dyn RepositoryStore> = Arc::new(PgStore::new(pool.clone()));
    let queue: Arc<dyn ReplicationQueue> = Arc::new(PgQueue::new(pool));

    let mut node_tokens = HashMap::new();
    let mut channels = HashMap::new();
    let mut health_nodes = Vec::new();
    let mut configured_primaries = HashMap::new();

    for vs in &config.virtual_storages {
        let vs_name = VirtualStorageName(vs.name.clone());
        if let Some(primary) = &vs.primary {
            configured_primaries.insert(vs_name.clone(), StorageName(primary.clone()));
        }
        for node in &vs.nodes {
            let storage = StorageName(node.storage.clone());
            health_nodes.push((vs_name.clone(), storage.clone()));
            node_tokens.insert(storage.clone(), node.token.clone());
            let channel = Channel::from_shared(node.address.clone())?.connect_lazy();
            channels.insert(storage, channel);
        }
    }

    let thresholds = Thresholds::default();
    let monitor = Monitor::new(health_nodes, thresholds);
    let transport = Arc::new(GrpcTransport::new(channels.clone(), node_tokens));
    let probe: Arc<dyn Probe> = Arc::new(GrpcProbe { channels });

    let election: Arc<dyn ElectionStrategy> = match config.failover.election_strategy {
        ElectionStrategyKind::Sql => Arc::new(SqlElection::new(store.clone(), configured_primaries)),
        ElectionStrategyKind::PerRepository => Arc::new(PerRepositoryElection::new(store.clone())),
        ElectionStrategyKind::Local => {
            let local = configured_primaries
                .values()
                .next()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("election_strategy = \"local\" requires a virtual_storages.*.primary"))?;
            Arc::new(LocalElection::new(local))
        }
    };

    let router = Arc::new(Router::new(store.clone(), monitor.clone(), election));
    let registry = Arc::new(praefect_protocol::default_registry(praefect_protocol::UnknownMethodPolicy::Reject));
    let txn = TransactionManager::new();
    let coordinator = Arc::new(Coordinator::new(registry, router, txn, queue.clone(), store.clone(), transport));

    let operation: Arc<dyn RepositoryOperation> = Arc::new(UnimplementedOperation);
    let mut workers = Vec::new();
    let mut reconcilers = Vec::new();
    for vs in &config.virtual_storages {
        let vs_name = VirtualStorageName(vs.name.clone());
        for node in &vs.nodes {
            workers.push(Worker::new(
                vs_name.clone(),
                StorageName(node.storage.clone()),
                queue.clone(),
                store.clone(),
                operation.clone(),
                config.replication.batch_size,
                config.replication.poll_interval,
                config.replication.heartbeat_interval,
            ));
        }
        reconcilers.push(Reconciler::new(
            vs_name,
            monitor.clone(),
            Arc::new(NullInventory) as Arc<dyn RepositoryInventory>,
            store.clone(),
            queue.clone(),
            Duration::from_secs(60),
        ));
    }

    let sweeper = praefect_queue::Sweeper::new(queue.clone(), config.replication.poll_interval, config.replication.stale_threshold);

    Ok(Topology { coordinator, monitor, probe, thresholds, workers, reconcilers, sweeper, store, queue })
}

/// GrpcProbe checks reachability with a lightweight unary call to the
/// standard gRPC health-checking protocol. Any response — including
/// `Unimplemented`, if a back-end doesn't speak it — proves the node
/// is up and answering; only a transport-level failure counts against
/// it (spec.md §4.B: "probes have their own deadlines").
struct GrpcProbe {
    channels: HashMap<StorageName, Channel>,
}

#[async_trait::async_trait]
impl Probe for GrpcProbe {
    async fn probe(&self, storage: &StorageName) -> bool {
        let Some(channel) = self.channels.get(storage) else {
            return false;
        };
        let mut client = tonic::client::Grpc::new(channel.clone());
        if client.ready().await.is_err() {
            return false;
        }
        let path = http::uri::PathAndQuery::from_static("/grpc.health.v1.Health/Check");
        match client.unary(tonic::Request::new(Bytes::new()), path, praefect_proxy::RawCodec).await {
            Ok(_) => true,
            Err(status) => status.code() != tonic::Code::Unavailable,
        }
    }
}

/// UnimplementedOperation is the default `RepositoryOperation` until a
/// concrete back-end client (shelling out to `git`, calling a
/// back-end-specific RPC, etc.) is wired in — deliberately out of
/// scope here (spec.md §1 Non-goals: "does not implement repository
/// storage itself").
struct UnimplementedOperation;

#[async_trait::async_trait]
impl RepositoryOperation for UnimplementedOperation {
    async fn update(&self, job: &praefect_queue::ReplicationJob) -> praefect_base::Result<()> {
        Err(unimplemented_error(job))
    }
    async fn delete(&self, job: &praefect_queue::ReplicationJob) -> praefect_base::Result<()> {
        Err(unimplemented_error(job))
    }
    async fn rename(&self, job: &praefect_queue::ReplicationJob) -> praefect_base::Result<()> {
        Err(unimplemented_error(job))
    }
    async fn gc(&self, job: &praefect_queue::ReplicationJob) -> praefect_base::Result<()> {
        Err(unimplemented_error(job))
    }
}

fn unimplemented_error(job: &praefect_queue::ReplicationJob) -> praefect_base::Error {
    praefect_base::Error::Internal(format!(
        "no RepositoryOperation backend wired for target '{}': the core does not implement repository storage itself",
        job.target_storage
    ))
}

/// NullInventory is the default `RepositoryInventory`: it reports no
/// repositories observed on any node, so `praefect reconcile` is
/// wiring-complete but a no-op until a real back-end scanner (walking
/// disk, or calling a back-end-specific introspection RPC) is plugged
/// in — that scanner is inherently back-end-specific and out of this
/// core's scope (spec.md §1 Non-goals).
struct NullInventory;

#[async_trait::async_trait]
impl RepositoryInventory for NullInventory {
    async fn list(&self, _storage: &StorageName) -> praefect_base::Result<HashMap<RepositoryId, praefect_base::Generation>> {
        Ok(HashMap::new())
    }
}
