//! Binary codec for the frames inside one datagram.
//!
//! Wire format of a single frame:
//! ```text
//! fixed kinds:     [tag:1][payload:N]           N from FrameKind::layout
//! variable kinds:  [tag:1][len:2][payload:len]  len is big-endian u16
//! terminal:        [0x00]
//! ```
//! All multi-byte integers are big-endian.  Booleans are one byte, `0` or `1`.
//!
//! Decoding is lazy: [`decode_frames`] returns an iterator that reads one
//! frame per `next()` call.  The first malformed or overrunning frame yields
//! a single [`FrameError`] and ends the iteration, so the rest of the
//! datagram is discarded without ever indexing past the buffer.

use thiserror::Error;
use tracing::trace;

use crate::domain::board::{Board, GameResult, Seat, BOARD_CELLS};
use crate::protocol::frames::{
    ErrorCode, ErrorFrame, Frame, FrameKind, PayloadLayout, LENGTH_PREFIX_SIZE, TERMINAL_TAG,
};

/// Errors produced while decoding or encoding frames.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The tag byte is not a known [`FrameKind`].
    #[error("unknown frame tag 0x{tag:02X} at offset {offset}")]
    UnknownKind { tag: u8, offset: usize },

    /// A declared or implied length runs past the end of the datagram.
    #[error("{kind:?} frame needs {needed} bytes, only {available} remain")]
    Truncated {
        kind: FrameKind,
        needed: usize,
        available: usize,
    },

    /// The payload bytes are present but invalid.
    #[error("malformed {kind:?} payload: {reason}")]
    Malformed { kind: FrameKind, reason: String },

    /// A variable-length payload does not fit the `u16` length field.
    #[error("{kind:?} payload of {len} bytes exceeds the 65535-byte limit")]
    PayloadTooLarge { kind: FrameKind, len: usize },
}

impl FrameError {
    /// Returns `true` for errors caused by corrupt inbound bytes (as opposed
    /// to an encoding limit on our side).
    pub fn is_corruption(&self) -> bool {
        !matches!(self, FrameError::PayloadTooLarge { .. })
    }

    fn malformed(kind: FrameKind, reason: impl Into<String>) -> Self {
        FrameError::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Lazy iterator over the frames of one datagram.
///
/// Each call to [`decode_frames`] starts a fresh pass over the same bytes.
/// After a terminal tag, the end of the buffer, or the first error, the
/// iterator returns `None` forever.
#[derive(Debug, Clone)]
pub struct FrameDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> FrameDecoder<'a> {
    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.pos
    }

    fn fail(&mut self, err: FrameError) -> Option<Result<Frame, FrameError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl<'a> Iterator for FrameDecoder<'a> {
    type Item = Result<Frame, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.buf.len() {
            self.done = true;
            return None;
        }

        let tag_offset = self.pos;
        let tag = self.buf[tag_offset];
        self.pos += 1;
        if tag == TERMINAL_TAG {
            self.done = true;
            return None;
        }

        let Ok(kind) = FrameKind::try_from(tag) else {
            return self.fail(FrameError::UnknownKind {
                tag,
                offset: tag_offset,
            });
        };

        let remaining = self.buf.len() - self.pos;
        let len = match kind.layout() {
            PayloadLayout::Fixed(n) => n,
            PayloadLayout::LengthPrefixed => {
                if remaining < LENGTH_PREFIX_SIZE {
                    return self.fail(FrameError::Truncated {
                        kind,
                        needed: LENGTH_PREFIX_SIZE,
                        available: remaining,
                    });
                }
                let len = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
                self.pos += LENGTH_PREFIX_SIZE;
                usize::from(len)
            }
        };

        let available = self.buf.len() - self.pos;
        if available < len {
            return self.fail(FrameError::Truncated {
                kind,
                needed: len,
                available,
            });
        }

        let payload = &self.buf[self.pos..self.pos + len];
        self.pos += len;

        match decode_payload(kind, payload) {
            Ok(frame) => {
                trace!(?kind, len, "decoded frame");
                Some(Ok(frame))
            }
            Err(e) => self.fail(e),
        }
    }
}

impl std::iter::FusedIterator for FrameDecoder<'_> {}

/// Starts decoding the frames in `bytes`.
///
/// # Examples
///
/// ```rust
/// use kalah_core::protocol::{decode_frames, encode_datagram, Frame};
///
/// let bytes = encode_datagram(&[Frame::LobbySelect(2), Frame::Move(3)]).unwrap();
/// let frames: Vec<Frame> = decode_frames(&bytes).map(Result::unwrap).collect();
/// assert_eq!(frames, vec![Frame::LobbySelect(2), Frame::Move(3)]);
/// ```
pub fn decode_frames(bytes: &[u8]) -> FrameDecoder<'_> {
    FrameDecoder {
        buf: bytes,
        pos: 0,
        done: false,
    }
}

/// The result of decoding a whole datagram eagerly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedDatagram {
    /// Frames fully present before any corruption, in wire order.
    pub frames: Vec<Frame>,
    /// The error that cut decoding short, if any.
    pub error: Option<FrameError>,
}

/// Decodes every frame in `bytes`, keeping the good prefix on corruption.
pub fn decode_datagram(bytes: &[u8]) -> DecodedDatagram {
    let mut out = DecodedDatagram::default();
    for item in decode_frames(bytes) {
        match item {
            Ok(frame) => out.frames.push(frame),
            Err(e) => out.error = Some(e),
        }
    }
    out
}

fn decode_payload(kind: FrameKind, p: &[u8]) -> Result<Frame, FrameError> {
    match kind {
        FrameKind::Timestamp => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(p);
            Ok(Frame::Timestamp(u64::from_be_bytes(raw)))
        }
        FrameKind::Username => read_string(kind, p).map(Frame::Username),
        FrameKind::JoinUsername => read_string(kind, p).map(Frame::JoinUsername),
        FrameKind::ChatMessage => read_string(kind, p).map(Frame::ChatMessage),
        FrameKind::ConnectedUsersList => read_string(kind, p).map(Frame::ConnectedUsersList),
        FrameKind::LobbySelect => Ok(Frame::LobbySelect(p[0])),
        FrameKind::Move => Ok(Frame::Move(p[0])),
        FrameKind::StartGame => Ok(Frame::StartGame {
            board: read_board(p),
            turn: read_bool(kind, p[BOARD_CELLS])?,
            spectator: read_bool(kind, p[BOARD_CELLS + 1])?,
        }),
        FrameKind::UpdateGame => Ok(Frame::UpdateGame {
            board: read_board(p),
            turn: read_bool(kind, p[BOARD_CELLS])?,
        }),
        FrameKind::GameOver => Ok(Frame::GameOver {
            board: read_board(p),
            result: read_result(p[BOARD_CELLS])?,
        }),
        FrameKind::Shutdown => Ok(Frame::Shutdown),
        FrameKind::Error => {
            let (&code_byte, text) = p
                .split_first()
                .ok_or_else(|| FrameError::malformed(kind, "missing error code"))?;
            let code = ErrorCode::try_from(code_byte)
                .map_err(|_| FrameError::malformed(kind, format!("unknown error code {code_byte}")))?;
            let description = read_string(kind, text)?;
            Ok(Frame::Error(ErrorFrame { code, description }))
        }
    }
}

fn read_string(kind: FrameKind, p: &[u8]) -> Result<String, FrameError> {
    String::from_utf8(p.to_vec()).map_err(|e| FrameError::malformed(kind, e.to_string()))
}

fn read_bool(kind: FrameKind, byte: u8) -> Result<bool, FrameError> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(FrameError::malformed(kind, format!("invalid flag byte {other}"))),
    }
}

fn read_board(p: &[u8]) -> Board {
    let mut cells = [0u8; BOARD_CELLS];
    cells.copy_from_slice(&p[..BOARD_CELLS]);
    Board::from_cells(cells)
}

fn read_result(byte: u8) -> Result<GameResult, FrameError> {
    match byte {
        0 => Ok(GameResult::Draw),
        1 => Ok(GameResult::Winner(Seat::South)),
        2 => Ok(GameResult::Winner(Seat::North)),
        other => Err(FrameError::malformed(
            FrameKind::GameOver,
            format!("invalid result byte {other}"),
        )),
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Appends the encoding of `frame` to `buf`.
///
/// On error `buf` is left untouched.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] if a string payload does not fit
/// the `u16` length field.
pub fn encode_frame(frame: &Frame, buf: &mut Vec<u8>) -> Result<(), FrameError> {
    let kind = frame.kind();
    let mut payload = Vec::new();
    match frame {
        Frame::Timestamp(t) => payload.extend_from_slice(&t.to_be_bytes()),
        Frame::Username(s)
        | Frame::JoinUsername(s)
        | Frame::ChatMessage(s)
        | Frame::ConnectedUsersList(s) => payload.extend_from_slice(s.as_bytes()),
        Frame::LobbySelect(n) => payload.push(*n),
        Frame::Move(pit) => payload.push(*pit),
        Frame::StartGame {
            board,
            turn,
            spectator,
        } => {
            payload.extend_from_slice(board.cells());
            payload.push(u8::from(*turn));
            payload.push(u8::from(*spectator));
        }
        Frame::UpdateGame { board, turn } => {
            payload.extend_from_slice(board.cells());
            payload.push(u8::from(*turn));
        }
        Frame::GameOver { board, result } => {
            payload.extend_from_slice(board.cells());
            payload.push(match result {
                GameResult::Draw => 0,
                GameResult::Winner(Seat::South) => 1,
                GameResult::Winner(Seat::North) => 2,
            });
        }
        Frame::Shutdown => {}
        Frame::Error(e) => {
            payload.push(e.code as u8);
            payload.extend_from_slice(e.description.as_bytes());
        }
    }

    buf.reserve(1 + LENGTH_PREFIX_SIZE + payload.len());
    match kind.layout() {
        PayloadLayout::Fixed(n) => {
            debug_assert_eq!(n, payload.len(), "fixed layout mismatch for {kind:?}");
            buf.push(kind as u8);
        }
        PayloadLayout::LengthPrefixed => {
            let len = u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
                kind,
                len: payload.len(),
            })?;
            buf.push(kind as u8);
            buf.extend_from_slice(&len.to_be_bytes());
        }
    }
    buf.extend_from_slice(&payload);
    Ok(())
}

/// Encodes `frames` back to back into one datagram.
///
/// # Errors
///
/// Propagates the first [`FrameError`] from [`encode_frame`].
pub fn encode_datagram(frames: &[Frame]) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::new();
    for frame in frames {
        encode_frame(frame, &mut buf)?;
    }
    Ok(buf)
}

/// Like [`encode_datagram`] but appends the terminal tag.
///
/// # Errors
///
/// Propagates the first [`FrameError`] from [`encode_frame`].
pub fn encode_terminated(frames: &[Frame]) -> Result<Vec<u8>, FrameError> {
    let mut buf = encode_datagram(frames)?;
    buf.push(TERMINAL_TAG);
    Ok(buf)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
