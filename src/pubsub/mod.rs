//! Local pub/sub bridge.
//!
//! The pool actors hand every accepted entry/exit here. The bridge fans the
//! encoded transaction out on a per-topic broadcast channel (the stream the
//! gossip writers subscribe to) and forwards a copy to the external bus,
//! best-effort.

use crate::models::transaction::MempoolTx;
use crate::net::PeerId;
use async_trait::async_trait;
use auto_impl::auto_impl;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of each topic's broadcast channel. Slow subscribers lag and
/// re-sync rather than block the publishing actor.
const TOPIC_CHANNEL_CAPACITY: usize = 1024;

/// Error returned by an external bus client.
#[derive(Debug, Error)]
#[error("bus publish failed: {0}")]
pub struct BusError(pub String);

/// External pub/sub bus: accepts `(topic, bytes)`, delivers best-effort.
#[async_trait]
#[auto_impl(Arc, &)]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;
}

/// One pool lifecycle event as seen by local subscribers.
#[derive(Debug, Clone)]
pub struct TxEvent {
    /// msgpack-encoded transaction, exactly what goes on the wire.
    pub payload: Bytes,
    /// Peer the transaction was first received from, if it arrived over
    /// gossip. Writers use this to suppress echoing a tx back to its origin.
    pub origin: Option<PeerId>,
}

/// Topic-keyed fan-out of pool lifecycle events.
#[derive(Debug)]
pub struct PubSubBridge {
    topics: HashMap<String, broadcast::Sender<TxEvent>>,
    external: Option<Arc<dyn BusPublisher>>,
}

impl std::fmt::Debug for dyn BusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BusPublisher")
    }
}

impl PubSubBridge {
    /// Creates a bridge serving the given topics.
    pub fn new<I, S>(topics: I, external: Option<Arc<dyn BusPublisher>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics = topics
            .into_iter()
            .map(|name| (name.into(), broadcast::channel(TOPIC_CHANNEL_CAPACITY).0))
            .collect();
        Self { topics, external }
    }

    /// Subscribes to a topic's local stream. Returns `None` for a topic the
    /// bridge was not created with.
    pub fn subscribe(&self, topic: &str) -> Option<broadcast::Receiver<TxEvent>> {
        self.topics.get(topic).map(broadcast::Sender::subscribe)
    }

    /// Encodes and publishes one lifecycle event.
    ///
    /// Encoding failures are logged and swallowed; the pool mutation that
    /// triggered the publish already happened and must stand.
    pub async fn publish(&self, topic: &str, tx: &MempoolTx, origin: Option<PeerId>) {
        let payload = match tx.encode() {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                tracing::error!(target: "pubsub", %err, hash = %tx.hash, "failed to serialize tx");
                return;
            }
        };

        if let Some(sender) = self.topics.get(topic) {
            // no receivers is fine, gossip peers come and go
            let _ = sender.send(TxEvent {
                payload: payload.clone(),
                origin,
            });
        } else {
            tracing::warn!(target: "pubsub", topic, "publish on unregistered topic");
        }

        if let Some(bus) = &self.external {
            if let Err(err) = bus.publish(topic, &payload).await {
                tracing::error!(target: "pubsub", %err, topic, "failed to publish to bus");
            }
        }
    }
}
