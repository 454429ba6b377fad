use crate::models::transaction::MempoolTx;
use crate::net::codec::TxFrameCodec;
use crate::net::manager::ConnectionManager;
use crate::net::{GossipError, PeerId};
use crate::pool::actor::PoolHandle;
use crate::pubsub::{PubSubBridge, TxEvent};
use bytes::Bytes;
use futures::SinkExt;
use tokio_stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

/// How long the writer waits on the subscription before it polls the queue
/// directly, and how long such a synchronous drain may run.
const WRITE_DEBOUNCE: Duration = Duration::from_millis(256);

/// Handshakes that take longer than this are broken peers.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// First frame exchanged on every stream, both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    /// Stream protocol id; both ends must agree.
    pub protocol: String,
    /// The sender's opaque peer id.
    pub peer_id: PeerId,
}

impl Hello {
    pub fn new(protocol: impl Into<String>, peer_id: impl Into<PeerId>) -> Self {
        Self {
            protocol: protocol.into(),
            peer_id: peer_id.into(),
        }
    }
}

/// Everything a peer session needs from the rest of the engine.
#[derive(Clone)]
pub struct SessionContext {
    /// Our side of the handshake.
    pub local: Hello,
    /// Pending pool, target of every transaction read off the wire.
    pub pending: PoolHandle,
    /// Bridge whose entry stream the writer forwards.
    pub bridge: Arc<PubSubBridge>,
    /// Topic the writer subscribes to.
    pub entry_topic: String,
    /// Live-peer registry.
    pub manager: ConnectionManager,
}

/// Runs one peer stream through its whole life: handshake, registration,
/// concurrent reader and writer, teardown.
///
/// Either task finishing (EOF, stream error, lost subscription) tears the
/// whole session down; the sibling is cancelled, the stream dropped and the
/// peer unregistered so discovery may dial it again.
pub async fn run_session<S>(
    stream: S,
    ctx: SessionContext,
    token: CancellationToken,
) -> Result<(), GossipError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut frames_in = FramedRead::new(read_half, TxFrameCodec);
    let mut frames_out = FramedWrite::new(write_half, TxFrameCodec);

    let remote = handshake(&mut frames_in, &mut frames_out, &ctx.local).await?;
    let peer_id = remote.peer_id;

    if ctx.manager.is_connected(&peer_id) {
        tracing::debug!(target: "gossip", peer = %peer_id, "duplicate connection, dropping");
        ctx.manager.dropped(&peer_id);
        return Ok(());
    }
    ctx.manager.added(peer_id.clone());
    tracing::info!(target: "gossip", peer = %peer_id, "peer connected");

    let Some(subscription) = ctx.bridge.subscribe(&ctx.entry_topic) else {
        ctx.manager.dropped(&peer_id);
        return Err(GossipError::MissingTopic(ctx.entry_topic.clone()));
    };

    let session_token = token.child_token();
    let mut reader = tokio::spawn(read_loop(
        frames_in,
        ctx.pending.clone(),
        peer_id.clone(),
        session_token.clone(),
    ));
    let mut writer = tokio::spawn(write_loop(
        frames_out,
        subscription,
        peer_id.clone(),
        session_token.clone(),
    ));

    tokio::select! {
        _ = &mut reader => {
            session_token.cancel();
            let _ = writer.await;
        }
        _ = &mut writer => {
            session_token.cancel();
            let _ = reader.await;
        }
    }

    ctx.manager.dropped(&peer_id);
    tracing::info!(target: "gossip", peer = %peer_id, "peer disconnected");
    Ok(())
}

async fn handshake<R, W>(
    frames_in: &mut FramedRead<R, TxFrameCodec>,
    frames_out: &mut FramedWrite<W, TxFrameCodec>,
    local: &Hello,
) -> Result<Hello, GossipError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let hello = rmp_serde::to_vec_named(local)
        .map_err(|err| GossipError::Handshake(err.to_string()))?;
    frames_out.send(Bytes::from(hello)).await?;

    let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, frames_in.next())
        .await
        .map_err(|_| GossipError::Handshake("timed out".to_owned()))?
        .ok_or(GossipError::EarlyEof)??;

    let remote: Hello = rmp_serde::from_slice(&frame)
        .map_err(|err| GossipError::Handshake(err.to_string()))?;
    if remote.protocol != local.protocol {
        return Err(GossipError::Handshake(format!(
            "protocol mismatch: ours {}, theirs {}",
            local.protocol, remote.protocol
        )));
    }
    Ok(remote)
}

/// Reads frames until EOF, error or cancellation; every decoded transaction
/// goes into the pending pool tagged with this peer as its origin.
async fn read_loop<R>(
    mut frames: FramedRead<R, TxFrameCodec>,
    pending: PoolHandle,
    peer_id: PeerId,
    token: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = frames.next() => frame,
        };

        match frame {
            None => break,
            Some(Err(err)) => {
                tracing::warn!(target: "gossip", %err, peer = %peer_id, "failed to read from peer");
                break;
            }
            Some(Ok(payload)) => {
                let tx = match MempoolTx::decode(&payload) {
                    Ok(tx) => tx,
                    Err(err) => {
                        tracing::warn!(target: "gossip", %err, peer = %peer_id, "undecodable frame from peer");
                        continue;
                    }
                };
                if pending.add(tx, Some(peer_id.clone())).await {
                    tracing::debug!(target: "gossip", peer = %peer_id, bytes = payload.len(), "new tx from peer");
                } else {
                    tracing::trace!(target: "gossip", peer = %peer_id, "seen tx from peer");
                }
            }
        }
    }
}

/// Forwards the local entry stream to the peer, suppressing events that
/// originated from it. Flushes after every frame; when the subscription
/// stays silent for a debounce window, drains whatever queued up in one
/// synchronous burst bounded by the same window.
async fn write_loop<W>(
    mut frames: FramedWrite<W, TxFrameCodec>,
    mut events: broadcast::Receiver<TxEvent>,
    peer_id: PeerId,
    token: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if forward(&mut frames, &event, &peer_id).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "gossip", peer = %peer_id, skipped, "writer lagging behind entry stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::time::sleep(WRITE_DEBOUNCE) => {
                let started = Instant::now();
                loop {
                    match events.try_recv() {
                        Ok(event) => {
                            if forward(&mut frames, &event, &peer_id).await.is_err() {
                                return;
                            }
                        }
                        Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                    if started.elapsed() > WRITE_DEBOUNCE {
                        break;
                    }
                }
            }
        }
    }
}

async fn forward<W>(
    frames: &mut FramedWrite<W, TxFrameCodec>,
    event: &TxEvent,
    peer_id: &str,
) -> Result<(), GossipError>
where
    W: AsyncWrite + Unpin,
{
    // it came from this peer, no need to tell them again
    if event.origin.as_deref() == Some(peer_id) {
        return Ok(());
    }
    if let Err(err) = frames.send(event.payload.clone()).await {
        tracing::warn!(target: "gossip", %err, peer = %peer_id, "failed to notify peer");
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transaction::{sample_tx, PoolKind};
    use crate::pool::actor::PoolActor;
    use tokio::io::duplex;

    fn test_ctx(peer_suffix: &str) -> (SessionContext, Arc<PubSubBridge>, PoolHandle) {
        let bridge = Arc::new(PubSubBridge::new(["entry", "exit"], None));
        let pending = PoolActor::spawn(
            PoolKind::Pending,
            64,
            "entry",
            "exit",
            bridge.clone(),
            CancellationToken::new(),
        );
        let ctx = SessionContext {
            local: Hello::new("/test/tx/1.0.0", format!("node-{peer_suffix}")),
            pending: pending.clone(),
            bridge: bridge.clone(),
            entry_topic: "entry".to_owned(),
            manager: ConnectionManager::new(),
        };
        (ctx, bridge, pending)
    }

    /// Drives the remote end of a duplex stream as a raw framed peer.
    fn remote_peer(
        stream: tokio::io::DuplexStream,
        hello: Hello,
    ) -> (
        tokio::sync::mpsc::Sender<Bytes>,
        tokio::sync::mpsc::Receiver<Bytes>,
    ) {
        let (outgoing_tx, mut outgoing_rx) = tokio::sync::mpsc::channel::<Bytes>(32);
        let (incoming_tx, incoming_rx) = tokio::sync::mpsc::channel::<Bytes>(32);

        tokio::spawn(async move {
            let (read_half, write_half) = tokio::io::split(stream);
            let mut frames_in = FramedRead::new(read_half, TxFrameCodec);
            let mut frames_out = FramedWrite::new(write_half, TxFrameCodec);

            let hello = Bytes::from(rmp_serde::to_vec_named(&hello).unwrap());
            frames_out.send(hello).await.unwrap();

            loop {
                tokio::select! {
                    frame = frames_in.next() => match frame {
                        Some(Ok(frame)) => {
                            let _ = incoming_tx.send(frame).await;
                        }
                        _ => break,
                    },
                    outgoing = outgoing_rx.recv() => match outgoing {
                        Some(frame) => frames_out.send(frame).await.unwrap(),
                        None => break,
                    },
                }
            }
        });

        (outgoing_tx, incoming_rx)
    }

    #[tokio::test]
    async fn frames_from_peer_land_in_pending_pool() {
        let (ctx, _bridge, pending) = test_ctx("local");
        let (ours, theirs) = duplex(64 * 1024);
        let (to_us, mut from_us) = remote_peer(theirs, Hello::new("/test/tx/1.0.0", "peer-a"));

        let token = CancellationToken::new();
        tokio::spawn(run_session(ours, ctx, token.clone()));

        // skip our hello frame
        let first = from_us.recv().await.unwrap();
        let hello: Hello = rmp_serde::from_slice(&first).unwrap();
        assert_eq!(hello.peer_id, "node-local");

        let tx = sample_tx(0xdd, 0x01, 0, 10);
        to_us
            .send(Bytes::from(tx.encode().unwrap()))
            .await
            .unwrap();

        for _ in 0..100 {
            if pending.exists(tx.hash).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(pending.exists(tx.hash).await);

        // origin is stamped on the published event, not on the record
        let stored = pending.get(tx.hash).await.unwrap();
        assert_eq!(stored.hash, tx.hash);
        token.cancel();
    }

    #[tokio::test]
    async fn writer_suppresses_origin_but_reaches_other_peers() {
        let (ctx, bridge, _pending) = test_ctx("local");

        let (ours_a, theirs_a) = duplex(64 * 1024);
        let (_to_a, mut from_a) = remote_peer(theirs_a, Hello::new("/test/tx/1.0.0", "peer-a"));
        let (ours_b, theirs_b) = duplex(64 * 1024);
        let (_to_b, mut from_b) = remote_peer(theirs_b, Hello::new("/test/tx/1.0.0", "peer-b"));

        let token = CancellationToken::new();
        tokio::spawn(run_session(ours_a, ctx.clone(), token.clone()));
        tokio::spawn(run_session(ours_b, ctx.clone(), token.clone()));

        // swallow the hellos
        from_a.recv().await.unwrap();
        from_b.recv().await.unwrap();
        // let both writers subscribe before publishing
        tokio::time::sleep(Duration::from_millis(50)).await;

        let tx = sample_tx(0xdd, 0x02, 1, 20);
        bridge
            .publish("entry", &tx, Some("peer-a".to_owned()))
            .await;

        // peer B gets the frame
        let frame = tokio::time::timeout(Duration::from_secs(2), from_b.recv())
            .await
            .expect("peer b never saw the tx")
            .unwrap();
        let forwarded = MempoolTx::decode(&frame).unwrap();
        assert_eq!(forwarded.hash, tx.hash);

        // peer A must stay silent
        assert!(
            tokio::time::timeout(Duration::from_millis(600), from_a.recv())
                .await
                .is_err(),
            "tx was gossiped back to its origin"
        );
        token.cancel();
    }

    #[tokio::test]
    async fn duplicate_peer_stream_is_rejected() {
        let (ctx, _bridge, _pending) = test_ctx("local");

        let (ours_one, theirs_one) = duplex(64 * 1024);
        let (_to_one, mut from_one) = remote_peer(theirs_one, Hello::new("/test/tx/1.0.0", "peer-a"));
        let token = CancellationToken::new();
        tokio::spawn(run_session(ours_one, ctx.clone(), token.clone()));
        from_one.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ctx.manager.is_connected("peer-a"));

        // second stream claiming the same peer id
        let (ours_two, theirs_two) = duplex(64 * 1024);
        let (_to_two, mut from_two) = remote_peer(theirs_two, Hello::new("/test/tx/1.0.0", "peer-a"));
        let done = tokio::spawn(run_session(ours_two, ctx.clone(), token.clone()));
        from_two.recv().await.unwrap();

        // the duplicate session ends cleanly and unregisters the peer
        done.await.unwrap().unwrap();
        assert!(!ctx.manager.is_connected("peer-a"));
        token.cancel();
    }

    #[tokio::test]
    async fn protocol_mismatch_fails_handshake() {
        let (ctx, _bridge, _pending) = test_ctx("local");
        let (ours, theirs) = duplex(64 * 1024);
        let _remote = remote_peer(theirs, Hello::new("/other/protocol/2", "peer-a"));

        let result = run_session(ours, ctx.clone(), CancellationToken::new()).await;
        assert!(matches!(result, Err(GossipError::Handshake(_))));
        assert!(!ctx.manager.is_connected("peer-a"));
    }

    #[tokio::test]
    async fn undecodable_frame_keeps_session_alive() {
        let (ctx, _bridge, pending) = test_ctx("local");
        let (ours, theirs) = duplex(64 * 1024);
        let (to_us, mut from_us) = remote_peer(theirs, Hello::new("/test/tx/1.0.0", "peer-a"));

        let token = CancellationToken::new();
        tokio::spawn(run_session(ours, ctx, token.clone()));
        from_us.recv().await.unwrap();

        to_us.send(Bytes::from_static(b"garbage")).await.unwrap();
        let tx = sample_tx(0x0d, 0x01, 0, 10);
        to_us.send(Bytes::from(tx.encode().unwrap())).await.unwrap();

        for _ in 0..100 {
            if pending.exists(tx.hash).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(pending.exists(tx.hash).await);
        token.cancel();
    }
}
