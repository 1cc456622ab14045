use crate::finalize::{finalize, MutatorOutcome, RpcStatus};
use crate::transport::{UpstreamResult, UpstreamTransport, VotingMetadata};
use bytes::Bytes;
use futures::stream;
use futures::{FutureExt, StreamExt};
use praefect_base::{Error, RepositoryId, Result, StorageName, VirtualStorageName};
use praefect_datastore::RepositoryStore;
use praefect_protocol::{MethodInfo, Registry};
use praefect_queue::{ChangeKind, ReplicationJob, ReplicationQueue};
use praefect_router::{MethodClass, MutatorRoute, RouteDecision, Router};
use praefect_txn::TransactionManager;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tonic::Status;

/// Coordinator is the stream coordinator of spec.md §4.G: the entry
/// point every proxied RPC passes through. It owns no transport
/// details itself (those live behind `UpstreamTransport`) so its
/// fan-out/finalize policy can be driven by tests without a live
/// cluster.
pub struct Coordinator {
    registry: Arc<Registry>,
    router: Arc<Router>,
    txn: TransactionManager,
    queue: Arc<dyn ReplicationQueue>,
    store: Arc<dyn RepositoryStore>,
    transport: Arc<dyn UpstreamTransport>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<Registry>,
        router: Arc<Router>,
        txn: TransactionManager,
        queue: Arc<dyn ReplicationQueue>,
        store: Arc<dyn RepositoryStore>,
        transport: Arc<dyn UpstreamTransport>,
    ) -> Self {
        Coordinator { registry, router, txn, queue, store, transport }
    }

    /// Handles one proxied RPC end to end (spec.md §4.G Steps 1-5).
    /// `method` is the full gRPC method name; `first_frame` is the
    /// already-peeked first request message; `frames` is the full
    /// sequence of request frames (including the first), buffered so
    /// it can be fanned out to every destination.
    pub async fn handle(&self, method: &str, frames: Vec<Bytes>, now_ms: i64) -> Result<Vec<Bytes>> {
        let info = self.registry.classify(method)?;
        let Some(first_frame) = frames.first() else {
            return Err(Error::InvalidArgument("stream closed before the first request frame".into()));
        };
        let (vs, relative_path) = self.registry.extract_repository(&info, first_frame)?;
        let repo = RepositoryId { virtual_storage: vs.clone(), relative_path };

        let class = classify(&info);
        let route = self.router.route(&vs, &repo, class).await?;

        match route {
            RouteDecision::Accessor(storage) => {
                let result = self.transport.dispatch(&storage, method, None, stream::iter(frames).boxed()).await;
                result.status.map_err(|status| Error::Unavailable(status.message().to_string()))?;
                Ok(collect(result.response_frames).await)
            }
            RouteDecision::Mutator(route) => self.handle_mutator(method, &info, &vs, &repo, route, frames, now_ms).await,
        }
    }

    async fn handle_mutator(
        &self,
        method: &str,
        info: &MethodInfo,
        vs: &VirtualStorageName,
        repo: &RepositoryId,
        route: MutatorRoute,
        frames: Vec<Bytes>,
        now_ms: i64,
    ) -> Result<Vec<Bytes>> {
        let handle = info
            .transactional
            .then(|| self.txn.register_transaction(route.voters(), None).ok())
            .flatten();

        let mut destinations: Vec<StorageName> = std::iter::once(route.primary.clone()).chain(route.secondaries.iter().cloned()).collect();
        destinations.dedup();

        let backchannel = "praefect-internal-voting-service".to_string();
        let mut legs = Vec::with_capacity(destinations.len());
        for storage in &destinations {
            let metadata = handle.as_ref().map(|(id, _)| VotingMetadata {
                transaction_id: *id,
                voter_id: storage.0.clone(),
                vote_backchannel_address: backchannel.clone(),
            });
            let transport = self.transport.clone();
            let storage = storage.clone();
            let method = method.to_string();
            let frames = frames.clone();
            legs.push(tokio::spawn(dispatch_leg(transport, storage, method, metadata, frames)));
        }

        let mut results = Vec::with_capacity(legs.len());
        for (storage, handle) in destinations.iter().cloned().zip(legs) {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_err) => results.push(UpstreamResult {
                    storage,
                    status: Err(Status::internal(format!("upstream leg task failed: {join_err}"))),
                    response_frames: stream::empty().boxed(),
                }),
            }
        }

        let mut primary_frames = Vec::new();
        let mut primary_status = RpcStatus::Ok;
        let mut secondary_status = HashMap::new();
        for mut result in results {
            let ok = result.status.is_ok();
            if result.storage == route.primary {
                primary_status = if ok { RpcStatus::Ok } else { RpcStatus::Failed };
                primary_frames = collect(result.response_frames).await;
            } else {
                secondary_status.insert(result.storage.clone(), if ok { RpcStatus::Ok } else { RpcStatus::Failed });
                while result.response_frames.next().await.is_some() {}
            }
        }

        let committed_secondaries: HashSet<StorageName> = route.secondaries.iter().filter(|s| secondary_status.get(s) == Some(&RpcStatus::Ok)).cloned().collect();
        let primary_committed = primary_status == RpcStatus::Ok;

        if let Some((id, _)) = &handle {
            self.txn.stop_transaction(*id);
        }

        let outcome = MutatorOutcome {
            primary: route.primary.clone(),
            primary_status,
            secondary_status,
            committed_secondaries,
            primary_committed,
            had_subtransactions: info.transactional,
            outdated_at_plan_time: route.outdated.clone(),
        };
        let plan = finalize(&outcome);

        for job in plan.replication_jobs {
            let replication_job = ReplicationJob {
                change_kind: ChangeKind::Update,
                virtual_storage: vs.clone(),
                relative_path: repo.relative_path.clone(),
                source_storage: Some(job.source),
                target_storage: job.target,
                params: serde_json::Value::Null,
            };
            if let Err(err) = self.queue.enqueue(replication_job, serde_json::Value::Null, 3, now_ms).await {
                tracing::error!(error = %err, "failed to enqueue replication job");
            }
        }

        if let Some(update) = plan.generation_update {
            if let Err(err) = self.store.increment_generation(repo, &update.primary, &update.secondaries).await {
                tracing::error!(error = %err, "failed to advance generation after a committed mutator");
            }
        }

        match primary_status {
            RpcStatus::Ok => Ok(primary_frames),
            RpcStatus::Failed => Err(Error::Internal(format!("primary '{}' failed to execute {}", route.primary, method))),
        }
    }
}

/// Runs one upstream leg inside its own spawned task (spec.md §4.G:
/// "each active RPC spawns one sub-task per upstream"), with a panic
/// inside `transport.dispatch` caught at the task boundary and turned
/// into a failed leg rather than unwinding into every other leg's task
/// or the RPC-handling task that spawned them (spec.md §7).
async fn dispatch_leg(
    transport: Arc<dyn UpstreamTransport>,
    storage: StorageName,
    method: String,
    metadata: Option<VotingMetadata>,
    frames: Vec<Bytes>,
) -> UpstreamResult {
    let storage_for_panic = storage.clone();
    let dispatch = transport.dispatch(&storage, &method, metadata, stream::iter(frames).boxed());
    match AssertUnwindSafe(dispatch).catch_unwind().await {
        Ok(result) => result,
        Err(_) => UpstreamResult {
            storage: storage_for_panic.clone(),
            status: Err(Status::internal(format!("upstream leg to '{storage_for_panic}' panicked"))),
            response_frames: stream::empty().boxed(),
        },
    }
}

fn classify(info: &MethodInfo) -> MethodClass {
    if info.mutates {
        MethodClass::Mutator
    } else if info.consistency == praefect_protocol::Consistency::UpToDate {
        MethodClass::AccessorFresh
    } else {
        MethodClass::Accessor
    }
}

async fn collect(mut stream: futures::stream::BoxStream<'static, std::result::Result<Bytes, tonic::Status>>) -> Vec<Bytes> {
    let mut out = Vec::new();
    while let Some(item) = stream.next().await {
        if let Ok(frame) = item {
            out.push(frame);
        }
    }
    out
}
