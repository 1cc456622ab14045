//! The stream coordinator (spec §4.G): the entry point for every
//! proxied RPC. Peeks the first request frame to route it, fans it out
//! to the primary and in-sync secondaries, and finalizes generations
//! and replication jobs once every leg completes.

mod codec;
mod coordinator;
mod finalize;
mod grpc;
mod transport;

pub use codec::RawCodec;
pub use coordinator::Coordinator;
pub use finalize::{finalize, FinalizationPlan, GenerationUpdate, MutatorOutcome, ReplicationTarget, RpcStatus};
pub use grpc::GrpcTransport;
pub use transport::{UpstreamResult, UpstreamTransport, VotingMetadata};
