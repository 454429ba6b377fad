//! Peer-to-peer transaction gossip over length-prefixed streams.

use crate::models::transaction::CodecError;
use thiserror::Error;

pub mod codec;
pub mod listener;
pub mod manager;
pub mod peer;

/// Opaque peer identifier, exchanged during the handshake.
pub type PeerId = String;

/// Error terminating a peer session.
#[derive(Debug, Error)]
pub enum GossipError {
    /// Stream-level failure; the session ends, the peer stays discoverable.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A frame exceeded the configured size bound.
    #[error("frame of {0} bytes exceeds the maximum of {1}")]
    OversizedFrame(usize, usize),
    /// The handshake frame could not be decoded or did not match.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The peer closed the stream before completing the handshake.
    #[error("stream closed during handshake")]
    EarlyEof,
    /// The writer has no local stream to subscribe to.
    #[error("no local stream for topic {0}")]
    MissingTopic(String),
    /// Payload (de)serialization failure outside the framing layer.
    #[error(transparent)]
    Codec(#[from] CodecError),
}
