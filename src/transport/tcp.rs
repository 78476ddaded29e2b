//! # TCP Frame Codec
//!
//! Stream reassembly and framing for the reliable channel.
//!
//! ## Wire Format
//! ```text
//! [Magic(5)?] [Length(1)] [tcp_packet(Length)]
//! ```
//! The magic (`hPKT\0`) is present only for versions registered with one,
//! which by default is the legacy version 100 alone.
//!
//! ## Recovery Policy
//! - Magic mismatch: the whole buffer is discarded and decoding resumes with
//!   the next chunk. This is a resync, not an error.
//! - Payload decode failure: the length prefix is trusted, exactly that one
//!   frame is skipped and decoding continues with the next.
//! - Incomplete frame: all bytes are kept until more arrive.

use crate::core::compiler::TCP_PACKET;
use crate::core::packet::{Frame, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::version::ProtocolVersion;
use crate::utils::metrics::global_metrics;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

/// Largest payload a one-byte length prefix can describe
pub const MAX_FRAME_PAYLOAD: usize = u8::MAX as usize;

/// Serialize a packet into one complete TCP frame.
///
/// Allocates exactly `magic + 1 + size` bytes. Payloads over 255 bytes are
/// rejected with [`ProtocolError::Encode`].
pub fn serialize_tcp(version: &ProtocolVersion, packet: &Packet) -> Result<Bytes> {
    let value = packet.to_tcp_value();
    let schema = version.schema();
    let size = schema.size_of(&value, TCP_PACKET)?;
    if size > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::Encode(format!(
            "{} ({size} bytes for {})",
            constants::ERR_FRAME_TOO_LARGE,
            packet.kind
        )));
    }

    let header = version.frame_header_len();
    let mut buf = BytesMut::zeroed(header + size);
    if let Some(magic) = version.magic() {
        buf[..magic.len()].copy_from_slice(magic);
    }
    buf[header - 1] = size as u8;
    schema.encode(&value, &mut buf, header, TCP_PACKET)?;
    Ok(buf.freeze())
}

/// Tokio codec turning a byte stream into [`Frame`]s of one protocol version
#[derive(Debug, Clone)]
pub struct TcpFrameCodec {
    version: Arc<ProtocolVersion>,
}

impl TcpFrameCodec {
    pub fn new(version: Arc<ProtocolVersion>) -> Self {
        Self { version }
    }

    pub fn version(&self) -> &Arc<ProtocolVersion> {
        &self.version
    }

    fn decode_payload(&self, payload: &[u8]) -> Result<Packet> {
        let (value, _) = self.version.schema().decode(payload, 0, TCP_PACKET)?;
        Packet::from_value(value, self.version.packet_types())
    }
}

impl Decoder for TcpFrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let header = self.version.frame_header_len();
        loop {
            if src.len() < header {
                return Ok(None);
            }

            if let Some(magic) = self.version.magic() {
                if &src[..magic.len()] != magic {
                    debug!(
                        version = self.version.id(),
                        discarded = src.len(),
                        "Frame magic mismatch, resynchronising"
                    );
                    global_metrics().magic_resync();
                    src.clear();
                    return Ok(None);
                }
            }

            let total = header + src[header - 1] as usize;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            let raw = src.split_to(total).freeze();
            match self.decode_payload(&raw[header..]) {
                Ok(packet) => {
                    trace!(packet = %packet.kind, bytes = raw.len(), "Decoded TCP frame");
                    global_metrics().packet_received(raw.len() as u64);
                    return Ok(Some(Frame { packet, raw }));
                }
                Err(e) => {
                    debug!(error = %e, bytes = raw.len(), "Skipping undecodable TCP frame");
                    global_metrics().frame_dropped();
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    debug!(bytes = src.len(), "Discarding partial frame at end of stream");
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Packet> for TcpFrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        let frame = serialize_tcp(&self.version, &packet)?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

impl Encoder<Bytes> for TcpFrameCodec {
    type Error = ProtocolError;

    /// Pre-serialized frames pass through untouched
    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&frame);
        Ok(())
    }
}
