//! Protocol module containing the frame types and the datagram codec.

pub mod codec;
pub mod frames;

pub use codec::{
    decode_datagram, decode_frames, encode_datagram, encode_frame, encode_terminated,
    DecodedDatagram, FrameDecoder, FrameError,
};
pub use frames::*;
