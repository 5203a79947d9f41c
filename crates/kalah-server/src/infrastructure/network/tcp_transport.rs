//! TCP adapter: one stream per peer, datagrams framed with a length prefix.
//!
//! Wire format on the stream:
//! ```text
//! [len: u32 BE][datagram: len bytes] [len: u32 BE][datagram] ...
//! ```
//!
//! Every accepted connection gets a reader task and a writer task.  The
//! reader only forwards [`TransportEvent`]s into the session loop's channel;
//! the writer only writes what arrives on its own outbound channel.  Neither
//! touches lobby state.
//!
//! # Shutdown
//!
//! The accept loop polls `accept()` with a short timeout so it can notice
//! the shared `running` flag being cleared (see `main.rs`).

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::dispatcher::{PeerId, Transport, TransportError, TransportEvent};

/// Size of the length prefix in front of every datagram.
pub const STREAM_HEADER_SIZE: usize = 4;

/// Default upper bound on one datagram, in bytes.
pub const DEFAULT_MAX_DATAGRAM_BYTES: usize = 65_536;

/// Datagrams that may wait for one peer's writer before the peer is dropped.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 128;

/// How often the accept loop re-checks the `running` flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Error type for the TCP adapter.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("datagram of {len} bytes exceeds the {max}-byte limit")]
    DatagramTooLarge { len: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ── Stream framing ────────────────────────────────────────────────────────────

/// Reads one length-prefixed datagram.
///
/// Returns `Ok(None)` when the stream ends before the first header byte.
///
/// # Errors
///
/// - [`NetworkError::DatagramTooLarge`] if the header announces more than
///   `max` bytes; the payload is not read.
/// - [`NetworkError::Io`] if the stream fails or ends inside the header or
///   the payload.
pub async fn read_datagram<R>(reader: &mut R, max: usize) -> Result<Option<Vec<u8>>, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; STREAM_HEADER_SIZE];
    // Only EOF at a datagram boundary is a clean close.
    if reader.read(&mut header[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[1..]).await?;

    let len = u32::from_be_bytes(header) as usize;
    if len > max {
        return Err(NetworkError::DatagramTooLarge { len, max });
    }

    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    Ok(Some(bytes))
}

/// Writes one length-prefixed datagram and flushes.
///
/// # Errors
///
/// [`NetworkError::DatagramTooLarge`] if `bytes` exceeds `max` (nothing is
/// written), otherwise [`NetworkError::Io`].
pub async fn write_datagram<W>(writer: &mut W, bytes: &[u8], max: usize) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
{
    if bytes.len() > max {
        return Err(NetworkError::DatagramTooLarge {
            len: bytes.len(),
            max,
        });
    }
    let len = u32::try_from(bytes.len()).map_err(|_| NetworkError::DatagramTooLarge {
        len: bytes.len(),
        max,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

// ── Transport handle ──────────────────────────────────────────────────────────

#[derive(Debug)]
enum Outbound {
    Datagram(Vec<u8>),
    Close,
}

/// Outbound side of one connection.
#[derive(Debug)]
struct PeerHandle {
    outbound: mpsc::Sender<Outbound>,
    /// Set once the writer task is spawned.
    writer: Option<AbortHandle>,
}

impl PeerHandle {
    /// Stops the writer without waiting for its queue.  The connection task
    /// notices and reports the peer as disconnected.
    fn kill(self) {
        if let Some(writer) = self.writer {
            writer.abort();
        }
    }
}

type PeerTable = HashMap<PeerId, PeerHandle>;

/// Cloneable handle implementing [`Transport`] over the live connections.
///
/// Sending never blocks: datagrams are queued on the peer's bounded
/// outbound channel and written by its writer task.  A peer whose queue is
/// full is not reading; it is dropped instead of buffering without limit.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    peers: Arc<Mutex<PeerTable>>,
}

impl TcpTransport {
    fn table(&self) -> MutexGuard<'_, PeerTable> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, peer: PeerId) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        self.table().insert(
            peer,
            PeerHandle {
                outbound: tx,
                writer: None,
            },
        );
        rx
    }

    fn attach_writer(&self, peer: PeerId, writer: AbortHandle) {
        match self.table().get_mut(&peer) {
            Some(handle) => handle.writer = Some(writer),
            // Dropped before the writer existed.
            None => writer.abort(),
        }
    }

    fn unregister(&self, peer: PeerId) {
        self.table().remove(&peer);
    }

    /// Number of live connections.
    pub fn connected(&self) -> usize {
        self.table().len()
    }

    /// Asks every writer to finish its queue and close.
    pub fn close_all(&self) {
        let mut table = self.table();
        let stalled: Vec<PeerId> = table
            .iter()
            .filter(|(_, handle)| handle.outbound.try_send(Outbound::Close).is_err())
            .map(|(&peer, _)| peer)
            .collect();
        for peer in stalled {
            if let Some(handle) = table.remove(&peer) {
                handle.kill();
            }
        }
    }

    /// Removes a peer that stopped draining its queue and stops its writer.
    fn drop_stalled(&self, table: &mut PeerTable, peer: PeerId) {
        if let Some(handle) = table.remove(&peer) {
            warn!(%peer, capacity = OUTBOUND_QUEUE_CAPACITY, "outbound queue full; dropping peer");
            handle.kill();
        }
    }
}

impl Transport for TcpTransport {
    fn send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<(), TransportError> {
        let mut table = self.table();
        let handle = table.get(&peer).ok_or(TransportError::UnknownPeer(peer))?;
        match handle.outbound.try_send(Outbound::Datagram(bytes)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.drop_stalled(&mut table, peer);
                Err(TransportError::Backpressure(peer))
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::ChannelClosed(peer)),
        }
    }

    fn disconnect(&self, peer: PeerId) {
        let mut table = self.table();
        let Some(handle) = table.get(&peer) else {
            return;
        };
        if let Err(TrySendError::Full(_)) = handle.outbound.try_send(Outbound::Close) {
            self.drop_stalled(&mut table, peer);
        }
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// Bound TCP listener plus the transport handle for its connections.
pub struct TcpServer {
    listener: TcpListener,
    transport: TcpTransport,
    max_datagram_bytes: usize,
}

impl TcpServer {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// [`NetworkError::BindFailed`] if the address is in use or not
    /// permitted.
    pub async fn bind(addr: SocketAddr, max_datagram_bytes: usize) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::BindFailed { addr, source })?;
        Ok(Self {
            listener,
            transport: TcpTransport::default(),
            max_datagram_bytes,
        })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn transport(&self) -> TcpTransport {
        self.transport.clone()
    }

    /// Accepts connections until `running` is cleared.
    ///
    /// Peer ids are assigned in accept order starting from 1.
    pub async fn run(self, events: mpsc::Sender<TransportEvent>, running: Arc<AtomicBool>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("lobby server listening on {addr}");
        }
        let mut next_peer = 1u64;

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let peer = PeerId(next_peer);
                    next_peer += 1;
                    info!(%peer, "connection from {addr}");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, "set_nodelay failed: {e}");
                    }
                    tokio::spawn(handle_connection(
                        stream,
                        peer,
                        self.transport.clone(),
                        events.clone(),
                        self.max_datagram_bytes,
                    ));
                }
                Ok(Err(e)) => error!("accept error: {e}"),
                Err(_) => {}
            }
        }
    }
}

// ── Per-connection tasks ──────────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer: PeerId,
    transport: TcpTransport,
    events: mpsc::Sender<TransportEvent>,
    max: usize,
) {
    let outbound = transport.register(peer);
    if events.send(TransportEvent::Connected(peer)).await.is_err() {
        transport.unregister(peer);
        return;
    }

    let (mut reader, writer) = stream.into_split();
    let mut writer_task = tokio::spawn(write_loop(writer, outbound, peer, max));
    transport.attach_writer(peer, writer_task.abort_handle());
    let mut writer_done = false;

    loop {
        tokio::select! {
            read = read_datagram(&mut reader, max) => match read {
                Ok(Some(bytes)) => {
                    if events.send(TransportEvent::Datagram { peer, bytes }).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(%peer, "connection closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(%peer, "closing connection: {e}");
                    break;
                }
            },
            _ = &mut writer_task => {
                writer_done = true;
                break;
            }
        }
    }

    transport.unregister(peer);
    if !writer_done {
        let _ = writer_task.await;
    }
    let _ = events.send(TransportEvent::Disconnected(peer)).await;
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<Outbound>,
    peer: PeerId,
    max: usize,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Datagram(bytes) => match write_datagram(&mut writer, &bytes, max).await {
                Ok(()) => {}
                Err(NetworkError::DatagramTooLarge { len, max }) => {
                    warn!(%peer, len, max, "outbound datagram dropped");
                }
                Err(e) => {
                    warn!(%peer, "write failed: {e}");
                    break;
                }
            },
            Outbound::Close => {
                debug!(%peer, "closing on request");
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
}
