//! Full-duplex relay between a device session and a caller stream.
//!
//! Two copy loops run concurrently, one per direction. They share a
//! [`CancellationToken`] as the termination signal: whichever loop ends
//! first (EOF, read error or write error) cancels it and the other loop
//! stops at its next suspension point. Errors are reported on a shared
//! channel and collected into the [`RelaySummary`].

use std::fmt;
use std::io;

use log::{debug, error};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const RELAY_CHUNK: usize = 4096;

/// Which way bytes were flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Caller to device.
    ToDevice,
    /// Device to caller.
    ToCaller,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ToDevice => f.write_str("caller->device"),
            Direction::ToCaller => f.write_str("device->caller"),
        }
    }
}

/// An I/O error raised by one of the copy loops.
#[derive(Debug)]
pub struct RelayError {
    pub direction: Direction,
    pub error: io::Error,
}

/// Outcome of an interactive session.
#[derive(Debug, Default)]
pub struct RelaySummary {
    /// Bytes copied from the caller to the device.
    pub to_device: u64,

    /// Bytes copied from the device to the caller.
    pub to_caller: u64,

    /// Errors that ended a copy loop. Empty on a clean EOF.
    pub errors: Vec<RelayError>,
}

impl RelaySummary {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Any stream usable as the caller side of a relay.
pub trait Duplex: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized> Duplex for T {}

/// Relay bytes between `device` and `caller` until either side ends.
pub async fn relay<D, C>(device: D, caller: C) -> RelaySummary
where
    D: AsyncRead + AsyncWrite + Send,
    C: AsyncRead + AsyncWrite + Send,
{
    let (device_rx, device_tx) = tokio::io::split(device);
    let (caller_rx, caller_tx) = tokio::io::split(caller);

    let done = CancellationToken::new();
    let (err_tx, mut err_rx) = mpsc::unbounded_channel();

    let (to_device, to_caller) = tokio::join!(
        pump(Direction::ToDevice, caller_rx, device_tx, done.clone(), err_tx.clone()),
        pump(Direction::ToCaller, device_rx, caller_tx, done.clone(), err_tx),
    );

    let mut errors = Vec::new();
    while let Ok(err) = err_rx.try_recv() {
        errors.push(err);
    }

    debug!(
        "relay finished: {} bytes to device, {} bytes to caller, {} errors",
        to_device,
        to_caller,
        errors.len()
    );

    RelaySummary {
        to_device,
        to_caller,
        errors,
    }
}

async fn pump<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    done: CancellationToken,
    errors: mpsc::UnboundedSender<RelayError>,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_CHUNK];
    let mut total = 0u64;

    let result: io::Result<()> = async {
        loop {
            let n = tokio::select! {
                _ = done.cancelled() => return Ok(()),
                n = reader.read(&mut buf) => n?,
            };
            if n == 0 {
                return Ok(());
            }
            tokio::select! {
                _ = done.cancelled() => return Ok(()),
                r = writer.write_all(&buf[..n]) => r?,
            }
            writer.flush().await?;
            total += n as u64;
        }
    }
    .await;

    if let Err(e) = result {
        error!("relay {direction}: {e}");
        let _ = errors.send(RelayError {
            direction,
            error: e,
        });
    } else {
        debug!("relay {direction}: closed after {total} bytes");
    }

    // Best effort: let the peer see EOF.
    let _ = writer.shutdown().await;
    done.cancel();
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_bytes_cross_unmodified() {
        let device = Builder::new()
            .read(b"login: ")
            .write(b"admin\r\n")
            .read(b"\xffraw\x00bytes")
            .build();

        let (caller, mut operator) = duplex(64);

        let session = tokio::spawn(async move { relay(device, caller).await });

        let mut buf = [0u8; 7];
        operator.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"login: ");

        operator.write_all(b"admin\r\n").await.unwrap();

        let mut buf = [0u8; 10];
        operator.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"\xffraw\x00bytes");

        // Device reached EOF: both loops end even though the operator
        // side is still open.
        let summary = session.await.unwrap();
        assert!(summary.is_clean());
        assert_eq!(summary.to_caller, 17);
        assert_eq!(summary.to_device, 7);
    }

    #[tokio::test]
    async fn test_caller_hangup_stops_both_loops() {
        let (device, mut device_peer) = duplex(64);
        let (caller, operator) = duplex(64);

        drop(operator);
        let summary = relay(device, caller).await;

        assert_eq!(summary.to_device, 0);
        let mut rest = Vec::new();
        device_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_device_error_is_reported() {
        let device = Builder::new()
            .read(b"ok")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let (caller, mut operator) = duplex(64);

        let summary = tokio::spawn(async move { relay(device, caller).await });

        let mut buf = [0u8; 2];
        operator.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");

        let summary = summary.await.unwrap();
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].direction, Direction::ToCaller);
        assert_eq!(summary.errors[0].error.kind(), io::ErrorKind::ConnectionReset);
    }
}
