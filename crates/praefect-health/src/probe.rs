use praefect_base::StorageName;

/// Probe abstracts the actual back-end reachability check so the
/// monitor's state-machine logic can be unit tested without a real
/// gRPC connection (spec.md §9's "abstract the transport so tests can
/// pass an in-process implementation", applied here to health checks).
#[async_trait::async_trait]
pub trait Probe: Send + Sync + 'static {
    async fn probe(&self, storage: &StorageName) -> bool;
}
