use crate::net::GossipError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on a single frame's payload. A mempool transaction is a few
/// kilobytes at most; anything near this bound is a broken or hostile peer.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Wire framing: `u32` little-endian payload length, then the payload.
///
/// The payload bytes are opaque here; the session layer decodes them as
/// msgpack transactions (or the handshake hello).
#[derive(Debug, Default, Clone, Copy)]
pub struct TxFrameCodec;

impl Decoder for TxFrameCodec {
    type Item = Bytes;
    type Error = GossipError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > MAX_FRAME_LEN {
            return Err(GossipError::OversizedFrame(length, MAX_FRAME_LEN));
        }
        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Bytes> for TxFrameCodec {
    type Error = GossipError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_FRAME_LEN {
            return Err(GossipError::OversizedFrame(item.len(), MAX_FRAME_LEN));
        }
        dst.reserve(4 + item.len());
        dst.put_u32_le(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}
