//! # Transport Layer
//!
//! Wire framing for the two channels every session uses.
//!
//! ## Channels
//! - **TCP**: ordered and reliable; length-prefixed frames of at most 255
//!   payload bytes, with a magic prefix on the legacy version
//! - **UDP**: unordered and lossy; one packet per datagram, framed
//!   differently in each direction

pub mod tcp;
pub mod udp;

pub use tcp::{serialize_tcp, TcpFrameCodec, MAX_FRAME_PAYLOAD};
pub use udp::{
    decode_client_datagram, decode_server_datagram, encode_client_datagram, encode_server_datagram,
    Admission, UdpEndpoint,
};
