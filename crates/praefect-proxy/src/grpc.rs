use crate::codec::RawCodec;
use crate::transport::{UpstreamResult, UpstreamTransport, VotingMetadata};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use praefect_base::StorageName;
use std::collections::HashMap;
use std::str::FromStr;
use tonic::transport::Channel;
use tonic::{Request, Status};

/// GrpcTransport is the production `UpstreamTransport`: one pre-dialed
/// `tonic::transport::Channel` per physical back-end, driven through
/// `tonic::client::Grpc`'s generic-codec path (`RawCodec`) so the
/// coordinator never needs the back-end's generated message types.
pub struct GrpcTransport {
    channels: HashMap<StorageName, Channel>,
    tokens: HashMap<StorageName, String>,
}

impl GrpcTransport {
    pub fn new(channels: HashMap<StorageName, Channel>, tokens: HashMap<StorageName, String>) -> Self {
        GrpcTransport { channels, tokens }
    }
}

#[async_trait::async_trait]
impl UpstreamTransport for GrpcTransport {
    async fn dispatch(
        &self,
        storage: &StorageName,
        method: &str,
        metadata: Option<VotingMetadata>,
        client_frames: BoxStream<'static, Bytes>,
    ) -> UpstreamResult {
        let Some(channel) = self.channels.get(storage) else {
            return UpstreamResult {
                storage: storage.clone(),
                status: Err(Status::unavailable(format!("no channel dialed for storage '{storage}'"))),
                response_frames: futures::stream::empty().boxed(),
            };
        };

        let path = match http::uri::PathAndQuery::from_str(method) {
            Ok(path) => path,
            Err(err) => {
                return UpstreamResult {
                    storage: storage.clone(),
                    status: Err(Status::internal(format!("invalid method path '{method}': {err}"))),
                    response_frames: futures::stream::empty().boxed(),
                }
            }
        };

        let mut request = Request::new(client_frames);
        if let Some(token) = self.tokens.get(storage) {
            if let Ok(value) = format!("Bearer {token}").parse() {
                request.metadata_mut().insert("authorization", value);
            }
        }
        if let Some(meta) = metadata {
            if let Ok(value) = meta.transaction_id.to_string().parse() {
                request.metadata_mut().insert("praefect-transaction-id", value);
            }
            if let Ok(value) = meta.voter_id.parse() {
                request.metadata_mut().insert("praefect-voter-id", value);
            }
            if let Ok(value) = meta.vote_backchannel_address.parse() {
                request.metadata_mut().insert("praefect-vote-backchannel", value);
            }
        }

        let mut client = tonic::client::Grpc::new(channel.clone());
        if let Err(err) = client.ready().await {
            return UpstreamResult {
                storage: storage.clone(),
                status: Err(Status::unavailable(format!("channel to '{storage}' not ready: {err}"))),
                response_frames: futures::stream::empty().boxed(),
            };
        }

        match client.streaming(request, path, RawCodec).await {
            Ok(response) => {
                let storage = storage.clone();
                let stream = response.into_inner();
                UpstreamResult { storage, status: Ok(()), response_frames: stream.boxed() }
            }
            Err(status) => {
                UpstreamResult { storage: storage.clone(), status: Err(status), response_frames: futures::stream::empty().boxed() }
            }
        }
    }
}
