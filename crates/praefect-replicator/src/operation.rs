use praefect_base::Result;
use praefect_queue::ReplicationJob;

/// RepositoryOperation is the back-end-facing half of the replication
/// executor (spec.md §4.H step 3): it carries out the on-disk effect
/// of one job against its target storage. Kept as a trait so the
/// worker loop can be exercised against a fake without a live
/// back-end.
#[async_trait::async_trait]
pub trait RepositoryOperation: Send + Sync {
    async fn update(&self, job: &ReplicationJob) -> Result<()>;
    async fn delete(&self, job: &ReplicationJob) -> Result<()>;
    async fn rename(&self, job: &ReplicationJob) -> Result<()>;
    async fn gc(&self, job: &ReplicationJob) -> Result<()>;

    async fn dispatch(&self, job: &ReplicationJob) -> Result<()> {
        use praefect_queue::ChangeKind;
        match job.change_kind {
            ChangeKind::Update => self.update(job).await,
            ChangeKind::Delete => self.delete(job).await,
            ChangeKind::Rename => self.rename(job).await,
            ChangeKind::Create => self.update(job).await,
            ChangeKind::Gc => self.gc(job).await,
        }
    }
}
