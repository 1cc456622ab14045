//! A byte-level gRPC frontend for the stream coordinator (spec.md
//! §4.G, §6 "the proxy exposes the same RPC surface as the back-end
//! storage service"). Ordinary `tonic::transport::Server` routing is
//! keyed by a fixed, compiled-in service name per `add_service` call,
//! which can't express "every method, on every service, forwarded to
//! one handler" — so this talks to `hyper` directly and drives gRPC
//! framing itself with the same `RawCodec` shape `grpc.rs` already
//! uses client-side.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderValue, Request, Response};
use hyper::Body;
use praefect_proxy::Coordinator;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::Status;

#[derive(Clone)]
pub struct ProxyService {
    coordinator: Arc<Coordinator>,
    auth_token: Arc<str>,
}

impl ProxyService {
    pub fn new(coordinator: Arc<Coordinator>, auth_token: String) -> Self {
        ProxyService { coordinator, auth_token: auth_token.into() }
    }
}

impl tower::Service<Request<Body>> for ProxyService {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}

impl ProxyService {
    async fn handle(&self, req: Request<Body>) -> Response<Body> {
        if !authorized(&req, &self.auth_token) {
            return grpc_response(Err(Status::unauthenticated("missing or invalid bearer token")));
        }

        let method = req.uri().path().trim_start_matches('/').to_string();
        let now_ms = crate::clock::now_ms();
        let result = self.dispatch(&method, req.into_body(), now_ms).await;
        grpc_response(result)
    }

    async fn dispatch(&self, method: &str, body: Body, now_ms: i64) -> Result<Vec<Bytes>, Status> {
        let frames = decode_frames(body).await?;
        self.coordinator.handle(method, frames, now_ms).await.map_err(Status::from)
    }
}

fn authorized(req: &Request<Body>, expected: &str) -> bool {
    let Some(header) = req.headers().get("authorization") else {
        return false;
    };
    let Ok(value) = header.to_str() else {
        return false;
    };
    value.strip_prefix("Bearer ").map(|token| token == expected).unwrap_or(false)
}

/// Reads the full request body and splits it into the length-delimited
/// gRPC messages within it. The stream coordinator fans requests out
/// to every destination, so frames are buffered in full rather than
/// decoded incrementally (the same buffered-frame tradeoff `coordinator.rs`
/// already documents for the fan-out side).
async fn decode_frames(mut body: Body) -> Result<Vec<Bytes>, Status> {
    use http_body::Body as _;

    let mut buf = BytesMut::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|e| Status::internal(format!("reading request body: {e}")))?;
        buf.extend_from_slice(&chunk);
    }

    let mut frames = Vec::new();
    let mut cursor = buf.freeze();
    while cursor.has_remaining() {
        if cursor.remaining() < 5 {
            return Err(Status::internal("truncated gRPC frame header"));
        }
        let _compressed = cursor.get_u8();
        let len = cursor.get_u32() as usize;
        if cursor.remaining() < len {
            return Err(Status::internal("truncated gRPC frame body"));
        }
        frames.push(cursor.copy_to_bytes(len));
    }
    Ok(frames)
}

fn encode_frame(payload: Bytes, out: &mut BytesMut) {
    out.put_u8(0);
    out.put_u32(payload.len() as u32);
    out.put_slice(&payload);
}

/// gRPC's status is carried in HTTP/2 trailers, sent only after the
/// message body, so the response body is a channel we can keep writing
/// to rather than a single fixed buffer.
fn grpc_response(result: Result<Vec<Bytes>, Status>) -> Response<Body> {
    let (status, frames) = match result {
        Ok(frames) => (Status::ok(""), Some(frames)),
        Err(status) => (status, None),
    };
    let trailers = status_trailers(&status);

    let (mut sender, body) = Body::channel();
    tokio::spawn(async move {
        if let Some(frames) = frames {
            let mut buf = BytesMut::new();
            for frame in frames {
                encode_frame(frame, &mut buf);
            }
            if sender.send_data(buf.freeze()).await.is_err() {
                return;
            }
        }
        let _ = sender.send_trailers(trailers).await;
    });

    Response::builder().status(200).header("content-type", "application/grpc").body(body).unwrap()
}

fn status_trailers(status: &Status) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("grpc-status", HeaderValue::from(status.code() as i32));
    if let Ok(value) = HeaderValue::from_str(status.message()) {
        headers.insert("grpc-message", value);
    }
    headers
}
