use bytes::Bytes;
use futures::stream::BoxStream;
use praefect_base::StorageName;
use tonic::Status;

/// Metadata injected into the outgoing request to a mutator
/// destination so the back-end can reach the voting service
/// (spec.md §4.G Step 3: "the transaction id, the per-voter id, and
/// the address of the voting service").
#[derive(Debug, Clone)]
pub struct VotingMetadata {
    pub transaction_id: u64,
    pub voter_id: String,
    pub vote_backchannel_address: String,
}

/// The result of one upstream leg of a fan-out (spec.md §4.G Step 4).
pub struct UpstreamResult {
    pub storage: StorageName,
    pub status: Result<(), Status>,
    /// Frames received from this upstream; only the primary's are
    /// merged back to the client (Step 3).
    pub response_frames: BoxStream<'static, Result<Bytes, Status>>,
}

/// UpstreamTransport abstracts "open a bidirectional gRPC stream to a
/// physical back-end, forward client frames to it, and report its
/// status" so the Step 1-5 coordination policy in `coordinator` can be
/// unit-tested against a fake, independent of a live gRPC transport.
/// `GrpcTransport` is the real implementation, built on `tonic`'s
/// generic (`RawCodec`) client so no generated message types are
/// needed (spec.md §1).
#[async_trait::async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn dispatch(
        &self,
        storage: &StorageName,
        method: &str,
        metadata: Option<VotingMetadata>,
        client_frames: BoxStream<'static, Bytes>,
    ) -> UpstreamResult;
}
