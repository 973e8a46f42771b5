//! RPC server side: accept loop and per-connection dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::codec::{self, Request, Response};
use crate::error::RpcFault;

/// Dispatches decoded calls. Implemented by the gateway and by drivers.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcFault>;
}

/// Decode call params, reporting failures as `INVALID_PARAMS`.
pub fn params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, RpcFault> {
    serde_json::from_value(params)
        .map_err(|e| RpcFault::new(RpcFault::INVALID_PARAMS, format!("{method}: {e}")))
}

/// Encode a call result.
pub fn reply<T: Serialize>(value: &T) -> Result<Value, RpcFault> {
    serde_json::to_value(value).map_err(|e| RpcFault::internal(e.to_string()))
}

/// Fault for a method the handler does not know.
pub fn unknown_method(method: &str) -> RpcFault {
    RpcFault::new(RpcFault::UNKNOWN_METHOD, format!("unknown method '{method}'"))
}

/// Accept connections until `shutdown` fires, serving each on its own task.
pub async fn serve<H: Handler>(listener: UnixListener, handler: Arc<H>, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _)) => {
                debug!("rpc: accepted connection");
                tokio::spawn(serve_connection(
                    stream,
                    handler.clone(),
                    shutdown.child_token(),
                ));
            }
            Err(e) => error!("rpc: accept failed: {e}"),
        }
    }
    debug!("rpc: accept loop stopped");
}

/// Serve one connection. Each call runs on its own task so a slow call
/// does not hold up the others.
pub async fn serve_connection<H: Handler>(
    stream: UnixStream,
    handler: Arc<H>,
    shutdown: CancellationToken,
) {
    let (rd, wr) = stream.into_split();
    let mut frames = FramedRead::new(rd, codec::frame_codec());
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    let writer = tokio::spawn(async move {
        let mut sink = FramedWrite::new(wr, codec::frame_codec());
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(frame).await {
                warn!("rpc: reply write failed: {e}");
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.next() => frame,
        };
        let bytes = match frame {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                warn!("rpc: read failed: {e}");
                break;
            }
            None => break,
        };

        let req: Request = match codec::decode(&bytes) {
            Ok(req) => req,
            Err(e) => {
                // Answer if the caller can match the reply, so it does not
                // wait out its timeout.
                match request_id(&bytes) {
                    Some(id) => {
                        warn!("rpc: malformed request {id}: {e}");
                        let fault =
                            RpcFault::new(RpcFault::INVALID_PARAMS, format!("malformed request: {e}"));
                        send_response(&tx, &Response::fault(id, fault));
                    }
                    None => warn!("rpc: dropping malformed request: {e}"),
                }
                continue;
            }
        };

        let handler = handler.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            debug!("rpc: call {} ({})", req.method, req.id);
            let resp = match handler.handle(&req.method, req.params).await {
                Ok(result) => Response::ok(req.id, result),
                Err(fault) => {
                    debug!("rpc: {} failed: {}", req.method, fault);
                    Response::fault(req.id, fault)
                }
            };
            send_response(&tx, &resp);
        });
    }

    drop(tx);
    let _ = writer.await;
}

/// The `id` of a frame that is JSON but not a well-formed request.
fn request_id(frame: &[u8]) -> Option<u64> {
    codec::decode::<Value>(frame).ok()?.get("id")?.as_u64()
}

fn send_response(tx: &mpsc::UnboundedSender<Bytes>, resp: &Response) {
    match codec::encode(resp) {
        Ok(frame) => {
            let _ = tx.send(frame);
        }
        Err(e) => error!("rpc: failed to encode reply {}: {e}", resp.id),
    }
}
