//! Drives the per-session state machine in [`super::session`] over an
//! abstract datagram transport.
//!
//! [`Endpoint`] hides whether packets travel over a real [`UdpSocket`]
//! or an in-memory channel pair, which is what lets [`Socket`] (the
//! client-role handle used by tests) and [`run`] (the server-role
//! entry point) share the same retransmit/ack bookkeeping in
//! [`super::session::Session`], even though the two roles disagree on
//! what to *do* with delivered bytes: a client hands them to whoever
//! reads the socket, the server reverses lines.
//!
//! [`UdpSocket`]: tokio::net::UdpSocket

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use tracing::{debug, warn};

pub use super::packets::Packet;
use super::packets::{encode, MAX_PACKET_LEN};
use super::session::Session;

/// A transport that can be split into a stream of inbound packets and a
/// sink for outbound ones. Implemented by test harnesses wrapping a
/// [`UdpSocket`] connected to one peer; [`run`] demultiplexes a shared
/// socket by session id itself rather than going through this trait.
pub trait Endpoint<P, Rx, Tx> {
    fn split(self) -> (Rx, Tx);
}

/// Parameterizes the timing the driver runs on, so alternate timings
/// can be plugged in without touching the protocol logic itself.
pub trait SocketHandler: Send + Sync + 'static {
    const RETRANSMIT_INTERVAL: Duration = Duration::from_secs(3);
    const SESSION_TIMEOUT: Duration = Duration::from_secs(60);
    const DUPLEX_BUFFER: usize = 64 * 1024;
}

/// The timings this crate ships with in production: a 3 s retransmit
/// cadence and a 60 s inactivity timeout, as specified.
#[derive(Debug, Clone, Copy)]
pub struct DefaultSocketHandler;

impl SocketHandler for DefaultSocketHandler {}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("session handshake did not complete")]
    HandshakeFailed,
    #[error("session closed")]
    Closed,
}

fn next_session_id() -> u32 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or_default();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    #[allow(clippy::cast_possible_truncation)]
    {
        (nanos.wrapping_add(n.wrapping_mul(2_654_435_761)) & 0x7fff_ffff) as u32
    }
}

/// Splits `data` (the slice starting at byte offset `start` of the send
/// buffer) into chunks whose encoded `/data/session/pos/chunk/` frame
/// fits in [`MAX_PACKET_LEN`] bytes, escapes included.
fn chunk_for_wire(session: u32, start: u32, data: &[u8]) -> Vec<Packet> {
    if data.is_empty() {
        return Vec::new();
    }

    // `pos` grows across chunks; size the budget for its worst-case width
    // (31-bit values are at most 10 decimal digits) so a later chunk's
    // header never turns out longer than what space was reserved for it.
    let header_len = format!("/data/{session}/{:0>10}/", start).len() + 1;
    let budget = MAX_PACKET_LEN.saturating_sub(header_len);
    // Escaping can double a byte's width, so sizing a chunk to survive
    // the worst case (every byte escaped) never needs re-splitting.
    let max_raw = (budget / 2).max(1);

    let mut packets = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let end = (offset + max_raw).min(data.len());
        #[allow(clippy::cast_possible_truncation)]
        let pos = start + offset as u32;
        packets.push(Packet::Data {
            session,
            pos,
            data: data[offset..end].to_vec(),
        });
        offset = end;
    }
    packets
}

async fn send_packet(socket: &UdpSocket, peer: SocketAddr, packet: &Packet) -> io::Result<()> {
    let Ok(bytes) = encode(packet) else {
        warn!("packet too large to encode, dropping: {packet:?}");
        return Ok(());
    };
    socket.send_to(&bytes, peer).await?;
    Ok(())
}

/// Retransmits everything between `session.send_high_water() -
/// session.unacked().len()` and the high-water mark.
fn unacked_packets(session_id: u32, session: &Session) -> Vec<Packet> {
    let unacked = session.unacked();
    if unacked.is_empty() {
        return Vec::new();
    }
    #[allow(clippy::cast_possible_truncation)]
    let start = session.send_high_water() - unacked.len() as u32;
    chunk_for_wire(session_id, start, unacked)
}

/// Client-role handle: an [`AsyncRead`] + [`AsyncWrite`] byte stream
/// backed by one LRCP session. Application bytes written to it are
/// chunked into `data` frames and retransmitted until acked; bytes
/// delivered in order by the peer show up on reads.
pub struct Socket<H> {
    inner: DuplexStream,
    _task: tokio::task::JoinHandle<()>,
    _handler: std::marker::PhantomData<H>,
}

impl<H: SocketHandler> Socket<H> {
    /// Opens a new LRCP session over `endpoint` and waits for the
    /// peer's initial ack before returning.
    ///
    /// # Errors
    /// Returns [`Error::HandshakeFailed`] if no ack for the opening
    /// `connect` arrives within [`SocketHandler::SESSION_TIMEOUT`], or
    /// [`Error::Io`]/[`Error::Closed`] on a lower-level failure.
    pub async fn connect<E>(endpoint: E) -> Result<Self, Error>
    where
        E: Endpoint<Packet, mpsc::UnboundedReceiver<Packet>, mpsc::UnboundedSender<Packet>>,
    {
        let (mut rx, tx) = endpoint.split();
        let session_id = next_session_id();

        tx.send(Packet::Connect { session: session_id })
            .map_err(|_| Error::Closed)?;

        let mut retransmit = time::interval(H::RETRANSMIT_INTERVAL);
        retransmit.set_missed_tick_behavior(MissedTickBehavior::Delay);
        retransmit.tick().await; // first tick fires immediately, already sent above

        let deadline = time::sleep(H::SESSION_TIMEOUT);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = &mut deadline => return Err(Error::HandshakeFailed),
                _ = retransmit.tick() => {
                    tx.send(Packet::Connect { session: session_id }).ok();
                }
                packet = rx.recv() => {
                    match packet {
                        Some(Packet::Ack { session, length: 0 }) if session == session_id => break,
                        Some(_) => continue,
                        None => return Err(Error::Closed),
                    }
                }
            }
        }

        let (app_side, net_side) = tokio::io::duplex(H::DUPLEX_BUFFER);
        let task = tokio::spawn(client_driver::<H>(session_id, net_side, rx, tx));

        Ok(Self {
            inner: app_side,
            _task: task,
            _handler: std::marker::PhantomData,
        })
    }
}

/// Client-side driver: pipes bytes written to the duplex's network half
/// out as `data` frames, and bytes delivered in order back into it for
/// the application half to read.
async fn client_driver<H: SocketHandler>(
    session_id: u32,
    net_side: DuplexStream,
    mut rx: mpsc::UnboundedReceiver<Packet>,
    tx: mpsc::UnboundedSender<Packet>,
) {
    let mut session = Session::default();
    let (mut net_read, mut net_write) = tokio::io::split(net_side);

    let mut retransmit = time::interval(H::RETRANSMIT_INTERVAL);
    retransmit.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut read_buf = [0_u8; 4096];

    loop {
        tokio::select! {
            packet = rx.recv() => {
                match packet {
                    Some(Packet::Data { session: s, pos, data }) if s == session_id => {
                        let (ack, delivered) = session.on_data(pos, &data);
                        if tx.send(Packet::Ack { session: session_id, length: ack }).is_err() {
                            break;
                        }
                        if !delivered.is_empty() && net_write.write_all(&delivered).await.is_err() {
                            break;
                        }
                    }
                    Some(Packet::Ack { session: s, length }) if s == session_id => {
                        if length > session.send_high_water() {
                            tx.send(Packet::Close { session: session_id }).ok();
                            break;
                        }
                        let was_fully_acked = length == session.send_high_water();
                        session.on_ack(length);
                        if !was_fully_acked {
                            for p in unacked_packets(session_id, &session) {
                                if tx.send(p).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Packet::Close { session: s }) if s == session_id => {
                        tx.send(Packet::Close { session: session_id }).ok();
                        break;
                    }
                    Some(_) => {}
                    None => break,
                }
            }

            read = net_read.read(&mut read_buf), if !session.write_closed() => {
                match read {
                    Ok(0) => {
                        session.close_writes();
                    }
                    Ok(n) => {
                        let start = session.send_high_water();
                        session.queue_outbound(&read_buf[..n]);
                        for p in chunk_for_wire(session_id, start, &read_buf[..n]) {
                            if tx.send(p).is_err() {
                                break;
                            }
                        }
                    }
                    Err(_) => break,
                }
            }

            _ = retransmit.tick() => {
                for p in unacked_packets(session_id, &session) {
                    if tx.send(p).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Reverses each complete (`\n`-terminated) line in `delivered`,
/// carrying any trailing partial line forward in `tail` until the rest
/// of it arrives.
fn reverse_lines(tail: &mut Vec<u8>, delivered: &[u8]) -> Vec<u8> {
    tail.extend_from_slice(delivered);

    let mut out = Vec::new();
    loop {
        let Some(nl) = tail.iter().position(|&b| b == b'\n') else {
            break;
        };
        let mut line: Vec<u8> = tail.drain(..=nl).collect();
        line.pop(); // drop the '\n' before reversing
        line.reverse();
        out.extend_from_slice(&line);
        out.push(b'\n');
    }
    out
}

/// Server-role entry point: accepts LRCP sessions over `socket`,
/// reversing lines received on each one, until the socket errors.
///
/// # Errors
/// Propagates I/O errors from the underlying [`UdpSocket`].
#[tracing::instrument(skip(socket))]
pub async fn run<H: SocketHandler>(socket: UdpSocket) -> Result<(), Error> {
    let socket = Arc::new(socket);
    let (demux_tx, mut demux_rx) = mpsc::unbounded_channel::<(Packet, SocketAddr)>();

    let recv_socket = socket.clone();
    tokio::spawn(async move {
        let mut buf = [0_u8; 2048];
        loop {
            match recv_socket.recv_from(&mut buf).await {
                Ok((len, peer)) => {
                    if let Ok(packet) = Packet::try_from(&buf[..len]) {
                        if demux_tx.send((packet, peer)).is_err() {
                            break;
                        }
                    } else {
                        debug!("dropping malformed datagram from {peer}");
                    }
                }
                Err(err) => {
                    warn!("udp recv error: {err}");
                    break;
                }
            }
        }
    });

    let mut sessions: HashMap<u32, mpsc::UnboundedSender<Packet>> = HashMap::new();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<u32>();

    loop {
        tokio::select! {
            incoming = demux_rx.recv() => {
                let Some((packet, peer)) = incoming else { break };
                let session_id = packet.session();
                let is_connect = matches!(packet, Packet::Connect { .. });

                if is_connect && !sessions.contains_key(&session_id) {
                    let (session_tx, session_rx) = mpsc::unbounded_channel();
                    sessions.insert(session_id, session_tx);
                    tokio::spawn(server_session::<H>(
                        session_id,
                        peer,
                        socket.clone(),
                        session_rx,
                        done_tx.clone(),
                    ));
                }

                match sessions.get(&session_id) {
                    Some(tx) => {
                        if tx.send(packet).is_err() {
                            sessions.remove(&session_id);
                        }
                    }
                    None => {
                        send_packet(&socket, peer, &Packet::Close { session: session_id }).await.ok();
                    }
                }
            }

            Some(session_id) = done_rx.recv() => {
                sessions.remove(&session_id);
                debug!("session {session_id} finished");
            }
        }
    }

    Ok(())
}

/// Per-session server task: maintains `Session`'s buffers, acks and
/// retransmits, and feeds contiguous inbound bytes through
/// [`reverse_lines`] before queuing the result back out.
#[tracing::instrument(skip(socket, rx, done_tx))]
async fn server_session<H: SocketHandler>(
    session_id: u32,
    peer: SocketAddr,
    socket: Arc<UdpSocket>,
    mut rx: mpsc::UnboundedReceiver<Packet>,
    done_tx: mpsc::UnboundedSender<u32>,
) {
    let mut session = Session::default();
    let mut tail = Vec::new();

    let mut retransmit = time::interval(H::RETRANSMIT_INTERVAL);
    retransmit.set_missed_tick_behavior(MissedTickBehavior::Delay);

    send_packet(&socket, peer, &Packet::Ack { session: session_id, length: 0 })
        .await
        .ok();

    let mut deadline = time::Instant::now() + H::SESSION_TIMEOUT;

    'outer: loop {
        tokio::select! {
            packet = rx.recv() => {
                deadline = time::Instant::now() + H::SESSION_TIMEOUT;
                match packet {
                    Some(Packet::Connect { .. }) => {
                        send_packet(&socket, peer, &Packet::Ack { session: session_id, length: session.recv_high_water() }).await.ok();
                    }
                    Some(Packet::Data { pos, data, .. }) => {
                        let (ack, delivered) = session.on_data(pos, &data);
                        if send_packet(&socket, peer, &Packet::Ack { session: session_id, length: ack }).await.is_err() {
                            break 'outer;
                        }
                        if !delivered.is_empty() {
                            let reversed = reverse_lines(&mut tail, &delivered);
                            if !reversed.is_empty() {
                                let start = session.send_high_water();
                                session.queue_outbound(&reversed);
                                for p in chunk_for_wire(session_id, start, &reversed) {
                                    send_packet(&socket, peer, &p).await.ok();
                                }
                            }
                        }
                    }
                    Some(Packet::Ack { length, .. }) => {
                        if length > session.send_high_water() {
                            send_packet(&socket, peer, &Packet::Close { session: session_id }).await.ok();
                            break 'outer;
                        }
                        let was_fully_acked = length == session.send_high_water();
                        session.on_ack(length);
                        if !was_fully_acked {
                            for p in unacked_packets(session_id, &session) {
                                send_packet(&socket, peer, &p).await.ok();
                            }
                        }
                    }
                    Some(Packet::Close { .. }) => {
                        send_packet(&socket, peer, &Packet::Close { session: session_id }).await.ok();
                        break 'outer;
                    }
                    None => break 'outer,
                }
            }

            _ = retransmit.tick() => {
                for p in unacked_packets(session_id, &session) {
                    if send_packet(&socket, peer, &p).await.is_err() {
                        break 'outer;
                    }
                }
            }

            () = time::sleep_until(deadline) => {
                debug!("session {session_id} timed out");
                break 'outer;
            }
        }
    }

    done_tx.send(session_id).ok();
}

impl<H> AsyncRead for Socket<H> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<H> AsyncWrite for Socket<H> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverses_complete_lines_and_holds_the_tail() {
        let mut tail = Vec::new();
        let out = reverse_lines(&mut tail, b"hello\nworld");
        assert_eq!(out, b"olleh\n");
        assert_eq!(tail, b"world");

        let out = reverse_lines(&mut tail, b"!\n");
        assert_eq!(out, b"!dlrow\n");
        assert!(tail.is_empty());
    }

    #[test]
    fn chunk_for_wire_splits_oversized_payloads() {
        let data = vec![b'a'; 2000];
        let chunks = chunk_for_wire(1, 0, &data);
        assert!(chunks.len() > 1);
        let mut offset = 0;
        for chunk in &chunks {
            let encoded = encode(chunk).unwrap();
            assert!(encoded.len() <= MAX_PACKET_LEN);
            if let Packet::Data { pos, data, .. } = chunk {
                assert_eq!(*pos, offset);
                offset += data.len() as u32;
            }
        }
        assert_eq!(offset as usize, data.len());
    }
}
