//! Broadcast dispatcher and the outbound transport seam.
//!
//! The dispatcher turns "send these frames to these sessions" into encoded
//! datagrams handed to a [`Transport`].  It never decides *who* should hear
//! about something; callers pass the exact membership list, so a frame meant
//! for one lobby cannot leak into another.
//!
//! # Why a trait? (for beginners)
//!
//! Game logic should be testable without opening sockets.  The server talks
//! to the network only through [`Transport`]; production code plugs in the
//! TCP adapter, tests plug in a fake that records every datagram.

use std::fmt;
use std::sync::Arc;

use kalah_core::protocol::{encode_datagram, Frame};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::application::session_registry::{Session, SessionId, SessionRegistry};

/// Transport-assigned identifier of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure to hand a datagram to a peer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer {0} is not connected")]
    UnknownPeer(PeerId),

    #[error("outbound channel of peer {0} is closed")]
    ChannelClosed(PeerId),

    /// The peer stopped reading and its outbound queue filled up; the
    /// connection is being dropped.
    #[error("outbound queue of peer {0} is full")]
    Backpressure(PeerId),
}

/// Inbound events produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(PeerId),
    Disconnected(PeerId),
    Datagram { peer: PeerId, bytes: Vec<u8> },
}

/// Outbound half of a transport.
///
/// Implementations must not block: the session loop calls these methods
/// from its single task.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Queues one datagram for `peer`.
    fn send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Queues the same datagram for every peer in `peers` and returns the
    /// failures.
    fn broadcast_to_group(&self, peers: &[PeerId], bytes: &[u8]) -> Vec<(PeerId, TransportError)> {
        peers
            .iter()
            .filter_map(|&peer| self.send(peer, bytes.to_vec()).err().map(|e| (peer, e)))
            .collect()
    }

    /// Closes the connection of `peer`.  A `Disconnected` event follows.
    fn disconnect(&self, peer: PeerId);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<(), TransportError> {
        (**self).send(peer, bytes)
    }

    fn broadcast_to_group(&self, peers: &[PeerId], bytes: &[u8]) -> Vec<(PeerId, TransportError)> {
        (**self).broadcast_to_group(peers, bytes)
    }

    fn disconnect(&self, peer: PeerId) {
        (**self).disconnect(peer)
    }
}

/// Encodes frames and fans them out through a [`Transport`].
pub struct Dispatcher<T: Transport> {
    transport: T,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends per-recipient frames to every session in `members` except
    /// `exclude`, and returns how many datagrams were handed to the
    /// transport.
    ///
    /// `factory` is called once per recipient; an empty result sends
    /// nothing to that recipient.  Members missing from the registry are
    /// skipped.
    pub fn broadcast<F>(
        &self,
        registry: &SessionRegistry,
        members: &[SessionId],
        exclude: Option<SessionId>,
        mut factory: F,
    ) -> usize
    where
        F: FnMut(&Session) -> Vec<Frame>,
    {
        let mut delivered = 0;
        for &id in members {
            if Some(id) == exclude {
                continue;
            }
            let Some(session) = registry.get(id) else {
                debug!(session = %id, "broadcast skipped unknown member");
                continue;
            };
            let frames = factory(session);
            if frames.is_empty() {
                continue;
            }
            if self.send_to(session, &frames) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Sends `frames` as one datagram to `session`.  Returns `true` if the
    /// transport accepted it.
    pub fn send_to(&self, session: &Session, frames: &[Frame]) -> bool {
        self.send_to_peer(session.peer, frames)
    }

    /// Sends `frames` as one datagram to `peer`.
    pub fn send_to_peer(&self, peer: PeerId, frames: &[Frame]) -> bool {
        let bytes = match encode_datagram(frames) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%peer, "dropping outbound datagram: {e}");
                return false;
            }
        };
        trace!(%peer, frames = frames.len(), len = bytes.len(), "send");
        match self.transport.send(peer, bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!(%peer, "send failed: {e}");
                false
            }
        }
    }

    /// Sends the same `frames` to every peer in `peers` and returns how many
    /// were accepted.
    pub fn announce_all(&self, peers: &[PeerId], frames: &[Frame]) -> usize {
        if peers.is_empty() {
            return 0;
        }
        let bytes = match encode_datagram(frames) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("dropping announcement: {e}");
                return 0;
            }
        };
        let failures = self.transport.broadcast_to_group(peers, &bytes);
        for (peer, e) in &failures {
            warn!(%peer, "announcement failed: {e}");
        }
        peers.len() - failures.len()
    }
}
