//! Multiplexing RPC client over a Unix socket.
//!
//! One writer task drains an outbound queue into the socket and one reader
//! task routes responses to the waiting callers by id. The client is cheap
//! to clone and every clone shares the connection, so concurrent callers
//! can keep several calls in flight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use super::codec::{self, Request, Response};
use crate::error::{RpcError, RpcFault};

type Reply = Result<Value, RpcFault>;

struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    closed: CancellationToken,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to one RPC connection.
#[derive(Clone)]
pub struct RpcClient {
    path: Arc<PathBuf>,
    shared: Arc<Shared>,
    next_id: Arc<AtomicU64>,
    outbound: mpsc::UnboundedSender<Bytes>,
    timeout: Duration,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("path", &self.path)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl RpcClient {
    /// Connect to the socket at `path`. `timeout` bounds the connect and
    /// every call made through the client.
    pub async fn connect(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, RpcError> {
        let path = path.as_ref();
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| RpcError::Timeout {
                method: "connect".to_string(),
                timeout,
            })?
            .map_err(|source| RpcError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("rpc: connected to {}", path.display());
        Ok(Self::from_stream(stream, path, timeout))
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: UnixStream, path: impl Into<PathBuf>, timeout: Duration) -> Self {
        let (rd, wr) = stream.into_split();
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
        });
        let (outbound, rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(
            FramedWrite::new(wr, codec::frame_codec()),
            rx,
            shared.closed.clone(),
        ));
        tokio::spawn(read_loop(
            FramedRead::new(rd, codec::frame_codec()),
            shared.clone(),
        ));

        Self {
            path: Arc::new(path.into()),
            shared,
            next_id: Arc::new(AtomicU64::new(1)),
            outbound,
            timeout,
        }
    }

    /// Socket path this client was connected to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// False once the connection has failed or been closed.
    pub fn is_alive(&self) -> bool {
        !self.shared.closed.is_cancelled()
    }

    /// Resolves when the connection is gone.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await
    }

    /// Tear down the connection. Outstanding calls fail with
    /// [`RpcError::Disconnected`].
    pub fn close(&self) {
        self.shared.closed.cancel();
    }

    /// Call `method` with JSON params, returning the JSON result.
    pub async fn call_value(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        if !self.is_alive() {
            return Err(RpcError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = codec::encode(&Request {
            id,
            method: method.to_string(),
            params,
        })?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(id, tx);
        // The reader clears the table after cancelling, so a close racing
        // with the insert is caught here.
        if !self.is_alive() || self.outbound.send(frame).is_err() {
            self.shared.pending().remove(&id);
            return Err(RpcError::Disconnected);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Err(_) => {
                self.shared.pending().remove(&id);
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout: self.timeout,
                })
            }
            Ok(Err(_)) => Err(RpcError::Disconnected),
            Ok(Ok(reply)) => reply.map_err(RpcError::Remote),
        }
    }

    /// Typed call.
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.call_value(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }
}

async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    closed: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = rx.recv() => frame,
        };
        let Some(frame) = frame else {
            // Every client handle is gone.
            break;
        };
        if let Err(e) = sink.send(frame).await {
            warn!("rpc: write failed: {e}");
            break;
        }
    }
    closed.cancel();
}

async fn read_loop(mut frames: FramedRead<OwnedReadHalf, LengthDelimitedCodec>, shared: Arc<Shared>) {
    loop {
        let frame = tokio::select! {
            _ = shared.closed.cancelled() => break,
            frame = frames.next() => frame,
        };
        let bytes = match frame {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                warn!("rpc: read failed: {e}");
                break;
            }
            None => {
                debug!("rpc: peer closed connection");
                break;
            }
        };

        let resp: Response = match codec::decode(&bytes) {
            Ok(resp) => resp,
            Err(e) => {
                warn!("rpc: dropping malformed response: {e}");
                continue;
            }
        };
        match shared.pending().remove(&resp.id) {
            Some(tx) => {
                let _ = tx.send(resp.into_result());
            }
            None => debug!("rpc: response for unknown call {}", resp.id),
        }
    }

    shared.closed.cancel();
    // Dropping the senders fails every outstanding call.
    shared.pending().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::codec::Framed;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Answers requests in reverse order of arrival, after `batch` arrive.
    async fn reversing_peer(stream: UnixStream, batch: usize) {
        let mut framed = Framed::new(stream, codec::frame_codec());
        let mut held = Vec::new();
        while held.len() < batch {
            let frame = framed.next().await.unwrap().unwrap();
            held.push(codec::decode::<Request>(&frame).unwrap());
        }
        for req in held.into_iter().rev() {
            let resp = Response::ok(req.id, json!({ "echo": req.params }));
            framed.send(codec::encode(&resp).unwrap()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_concurrent_calls_matched_by_id() {
        let (a, b) = UnixStream::pair().unwrap();
        tokio::spawn(reversing_peer(b, 3));
        let client = RpcClient::from_stream(a, "pair", TIMEOUT);

        let (r1, r2, r3) = tokio::join!(
            client.call_value("M", json!(1)),
            client.call_value("M", json!(2)),
            client.call_value("M", json!(3)),
        );
        assert_eq!(r1.unwrap(), json!({"echo": 1}));
        assert_eq!(r2.unwrap(), json!({"echo": 2}));
        assert_eq!(r3.unwrap(), json!({"echo": 3}));
    }

    #[tokio::test]
    async fn test_remote_fault() {
        let (a, b) = UnixStream::pair().unwrap();
        tokio::spawn(async move {
            let mut framed = Framed::new(b, codec::frame_codec());
            let req: Request = codec::decode(&framed.next().await.unwrap().unwrap()).unwrap();
            let resp = Response::fault(req.id, RpcFault::new(RpcFault::NOT_FOUND, "no such key"));
            framed.send(codec::encode(&resp).unwrap()).await.unwrap();
        });

        let client = RpcClient::from_stream(a, "pair", TIMEOUT);
        let err = client.call_value("GetMeta", Value::Null).await.unwrap_err();
        assert!(matches!(err, RpcError::Remote(ref f) if f.code == RpcFault::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_peer_hangup_fails_pending_calls() {
        let (a, b) = UnixStream::pair().unwrap();
        tokio::spawn(async move {
            let mut framed = Framed::new(b, codec::frame_codec());
            let _ = framed.next().await;
            // Drop without answering.
        });

        let client = RpcClient::from_stream(a, "pair", TIMEOUT);
        let err = client.call_value("Slow", Value::Null).await.unwrap_err();
        assert!(matches!(err, RpcError::Disconnected));

        client.closed().await;
        assert!(!client.is_alive());
        assert!(matches!(
            client.call_value("Again", Value::Null).await,
            Err(RpcError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let (a, _b) = UnixStream::pair().unwrap();
        let client = RpcClient::from_stream(a, "pair", Duration::from_millis(50));
        let err = client.call_value("Never", Value::Null).await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout { ref method, .. } if method == "Never"));
        assert!(client.is_alive());
    }

    #[tokio::test]
    async fn test_connect_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let err = RpcClient::connect(dir.path().join("nope.sock"), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Connect { .. }));
    }
}
