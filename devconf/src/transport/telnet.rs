//! Telnet transport.
//!
//! Devices behind telnet expect an interactive terminal, so the session
//! is a plain byte stream. [`TelnetStream`] strips the in-band protocol
//! (IAC commands) from what the device sends and refuses every option it
//! offers, leaving the caller with the terminal bytes only.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use log::{debug, info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

use super::config::{CredentialFn, host_port};
use super::relay::{Duplex, RelaySummary, relay};
use super::{ClientTransport, DEFAULT_DIAL_TIMEOUT};
use crate::device::DeviceId;
use crate::error::{Result, TransportError};

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

const DEFAULT_PORT: u16 = 23;
const READ_CHUNK: usize = 4096;
const WRITE_HIGH_WATER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    Cr,
    Iac,
    Negotiate(u8),
    Sub,
    SubIac,
}

/// Incremental IAC decoder. Command sequences may be split across reads.
#[derive(Debug)]
struct Decoder {
    state: State,
}

impl Decoder {
    fn new() -> Self {
        Self { state: State::Data }
    }

    /// Append the data bytes of `input` to `out` and queue negotiation
    /// replies in `replies`.
    fn decode(&mut self, mut input: &[u8], out: &mut BytesMut, replies: &mut BytesMut) {
        while !input.is_empty() {
            if self.state == State::Data {
                let end = memchr::memchr2(IAC, b'\r', input).unwrap_or(input.len());
                out.extend_from_slice(&input[..end]);
                input = &input[end..];
                let Some((&b, rest)) = input.split_first() else {
                    break;
                };
                input = rest;
                if b == IAC {
                    self.state = State::Iac;
                } else {
                    out.put_u8(b'\r');
                    self.state = State::Cr;
                }
                continue;
            }

            let b = input[0];
            input = &input[1..];
            self.state = match self.state {
                State::Data => unreachable!(),
                State::Cr => match b {
                    0 => State::Data,
                    IAC => State::Iac,
                    b'\r' => {
                        out.put_u8(b);
                        State::Cr
                    }
                    _ => {
                        out.put_u8(b);
                        State::Data
                    }
                },
                State::Iac => match b {
                    IAC => {
                        out.put_u8(IAC);
                        State::Data
                    }
                    DO | DONT | WILL | WONT => State::Negotiate(b),
                    SB => State::Sub,
                    // NOP, GA, AYT and friends carry no payload.
                    _ => State::Data,
                },
                State::Negotiate(verb) => {
                    match verb {
                        DO => replies.put_slice(&[IAC, WONT, b]),
                        WILL => replies.put_slice(&[IAC, DONT, b]),
                        _ => {}
                    }
                    State::Data
                }
                State::Sub => match b {
                    IAC => State::SubIac,
                    _ => State::Sub,
                },
                State::SubIac => match b {
                    SE => State::Data,
                    _ => State::Sub,
                },
            };
        }
    }
}

/// Escape IAC bytes in outgoing data.
fn encode(data: &[u8], out: &mut BytesMut) {
    let mut data = data;
    out.reserve(data.len());
    while let Some(i) = memchr::memchr(IAC, data) {
        out.extend_from_slice(&data[..=i]);
        out.put_u8(IAC);
        data = &data[i + 1..];
    }
    out.extend_from_slice(data);
}

/// Byte stream with the telnet protocol layer removed.
pub struct TelnetStream<S> {
    inner: S,
    decoder: Decoder,
    /// Decoded bytes not yet handed to the reader.
    rbuf: BytesMut,
    /// Escaped output and negotiation replies not yet written.
    wbuf: BytesMut,
    raw: Box<[u8]>,
}

impl<S> TelnetStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: Decoder::new(),
            rbuf: BytesMut::new(),
            wbuf: BytesMut::new(),
            raw: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.wbuf.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.wbuf))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.wbuf.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S> AsyncRead for TelnetStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            if !this.rbuf.is_empty() {
                let n = buf.remaining().min(this.rbuf.len());
                buf.put_slice(&this.rbuf[..n]);
                this.rbuf.advance(n);
                return Poll::Ready(Ok(()));
            }

            let mut raw = ReadBuf::new(&mut this.raw);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut raw))?;
            let filled = raw.filled();
            if filled.is_empty() {
                return Poll::Ready(Ok(()));
            }
            this.decoder.decode(filled, &mut this.rbuf, &mut this.wbuf);

            // Answer negotiation without waiting for the next write.
            if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
                return Poll::Ready(Err(e));
            }
        }
    }
}

impl<S> AsyncWrite for TelnetStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.wbuf.len() >= WRITE_HIGH_WATER {
            ready!(this.poll_drain(cx))?;
        }
        encode(buf, &mut this.wbuf);
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

/// Telnet client transport.
pub struct Telnet {
    caller: String,
    timeout: Duration,
    conn: Option<TelnetStream<TcpStream>>,
}

impl Telnet {
    pub fn new(caller: &str) -> Self {
        Self {
            caller: caller.to_string(),
            timeout: DEFAULT_DIAL_TIMEOUT,
            conn: None,
        }
    }

    fn conn(&mut self) -> Result<&mut TelnetStream<TcpStream>> {
        Ok(self.conn.as_mut().ok_or(TransportError::NotConnected)?)
    }
}

#[async_trait]
impl ClientTransport for Telnet {
    fn name(&self) -> &'static str {
        "telnet"
    }

    async fn dial(&mut self, id: DeviceId, location: &str) -> Result<()> {
        let (host, port) = host_port(location, DEFAULT_PORT)?;
        info!("{}:telnet: dialing device {id} at {host}:{port}", self.caller);

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|source| TransportError::ConnectionFailed {
                location: location.to_string(),
                source,
            })?;
        stream.set_nodelay(true).map_err(TransportError::Io)?;

        self.conn = Some(TelnetStream::new(stream));
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.conn()?.read(buf).await.map_err(TransportError::Io)?;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn.write(buf).await.map_err(TransportError::Io)?;
        conn.flush().await.map_err(TransportError::Io)?;
        Ok(n)
    }

    async fn send_file(&mut self, _name: &str, _data: &[u8]) -> Result<()> {
        Err(TransportError::not_implemented("SendFile").into())
    }

    async fn recv_file(&mut self, _name: &str) -> Result<Vec<u8>> {
        Err(TransportError::not_implemented("RecvFile").into())
    }

    async fn interact(&mut self, caller: &mut dyn Duplex) -> Result<RelaySummary> {
        let conn = self.conn()?;
        Ok(relay(conn, caller).await)
    }

    fn set_credential_fn(&mut self, _source: CredentialFn) {}

    fn internal_auth(&self) -> bool {
        false
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            debug!("{}:telnet: closing", self.caller);
            conn.shutdown().await.map_err(TransportError::Io)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn decode_all(chunks: &[&[u8]]) -> (Vec<u8>, Vec<u8>) {
        let mut decoder = Decoder::new();
        let mut out = BytesMut::new();
        let mut replies = BytesMut::new();
        for chunk in chunks {
            decoder.decode(chunk, &mut out, &mut replies);
        }
        (out.to_vec(), replies.to_vec())
    }

    #[test]
    fn test_plain_bytes_pass_through() {
        let (out, replies) = decode_all(&[b"login: ", b"\r\nPassword:"]);
        assert_eq!(out, b"login: \r\nPassword:");
        assert!(replies.is_empty());
    }

    #[test]
    fn test_options_refused() {
        let (out, replies) = decode_all(&[&[IAC, DO, 24, b'o', b'k', IAC, WILL, 1]]);
        assert_eq!(out, b"ok");
        assert_eq!(replies, [IAC, WONT, 24, IAC, DONT, 1]);
    }

    #[test]
    fn test_dont_and_wont_need_no_reply() {
        let (_, replies) = decode_all(&[&[IAC, DONT, 1, IAC, WONT, 3]]);
        assert!(replies.is_empty());
    }

    #[test]
    fn test_sequences_split_across_reads() {
        let (out, replies) = decode_all(&[b"a", &[IAC], &[DO], &[31, b'b', IAC], &[IAC]]);
        assert_eq!(out, [b'a', b'b', IAC]);
        assert_eq!(replies, [IAC, WONT, 31]);
    }

    #[test]
    fn test_subnegotiation_swallowed() {
        let (out, _) = decode_all(&[&[b'x', IAC, SB, 24, 1, IAC, IAC, 7, IAC, SE, b'y']]);
        assert_eq!(out, b"xy");
    }

    #[test]
    fn test_cr_nul() {
        let (out, _) = decode_all(&[b"a\r", b"\0b\r\r\nc"]);
        assert_eq!(out, b"a\rb\r\r\nc");
    }

    #[test]
    fn test_encode_escapes_iac() {
        let mut out = BytesMut::new();
        encode(&[1, IAC, 2, IAC], &mut out);
        assert_eq!(&out[..], [1, IAC, IAC, 2, IAC, IAC]);

        let mut out = BytesMut::new();
        encode(b"show run\n", &mut out);
        assert_eq!(&out[..], b"show run\n");
    }

    #[tokio::test]
    async fn test_stream_answers_negotiation() {
        let mock = Builder::new()
            .read(&[IAC, DO, 1, b'#', b' '])
            .write(&[IAC, WONT, 1])
            .write(b"exit\r\n")
            .build();
        let mut stream = TelnetStream::new(mock);

        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"# ");

        stream.write_all(b"exit\r\n").await.unwrap();
        stream.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_not_implemented_ops() {
        let mut t = Telnet::new("test");
        assert!(t.send_file("a", b"b").await.unwrap_err().is_not_implemented());
        assert!(t.recv_file("a").await.unwrap_err().is_not_implemented());
        assert!(!t.internal_auth());
        t.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut t = Telnet::new("test");
        let err = t.dial(DeviceId(1), &addr.to_string()).await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Transport(TransportError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_round_trip_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let device = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&[b'>', IAC, WILL, 3]).await.unwrap();
            let mut got = [0u8; 5];
            sock.read_exact(&mut got).await.unwrap();
            got
        });

        let mut t = Telnet::new("test");
        t.dial(DeviceId(1), &addr.to_string()).await.unwrap();

        let mut buf = [0u8; 8];
        let n = t.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b">");
        t.write(b"q\n").await.unwrap();

        let got = device.await.unwrap();
        assert_eq!(got, [IAC, DONT, 3, b'q', b'\n']);
        t.close().await.unwrap();
    }

    async fn read_until(stream: &mut (impl AsyncRead + Unpin), end: &[u8]) -> Vec<u8> {
        let mut got = Vec::new();
        let mut buf = [0u8; 64];
        while !got.ends_with(end) {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "EOF before {end:?}, got {got:?}");
            got.extend_from_slice(&buf[..n]);
        }
        got
    }

    #[tokio::test]
    async fn test_interact_relays_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Prompts, reads one command line, answers and hangs up.
        let device = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&[b'#', IAC, WILL, 1, b' ']).await.unwrap();
            let got = read_until(&mut sock, b"\r\n").await;
            sock.write_all(b"ok").await.unwrap();
            got
        });

        let mut t = Telnet::new("test");
        t.dial(DeviceId(1), &addr.to_string()).await.unwrap();

        let (mut caller, mut user) = tokio::io::duplex(64);
        let operator = async {
            let prompt = read_until(&mut user, b"# ").await;
            user.write_all(&[b's', b'h', IAC, b'\r', b'\n']).await.unwrap();
            let answer = read_until(&mut user, b"ok").await;
            (prompt, answer)
        };
        let (summary, (prompt, answer)) = tokio::join!(t.interact(&mut caller), operator);

        let summary = summary.unwrap();
        assert!(summary.is_clean(), "{:?}", summary.errors);
        assert_eq!(prompt, b"# ");
        assert_eq!(answer, b"ok");
        assert_eq!(summary.to_caller, 4);
        assert_eq!(summary.to_device, 5);

        let got = device.await.unwrap();
        assert_eq!(got, [IAC, DONT, 1, b's', b'h', IAC, IAC, b'\r', b'\n']);
    }
}
