use crate::config::Config;
use crate::models::transaction::PoolKind;
use crate::net::listener::{dial, listen};
use crate::net::manager::ConnectionManager;
use crate::net::peer::{Hello, SessionContext};
use crate::pool::actor::PoolActor;
use crate::pool::dispatcher::SnapshotDispatcher;
use crate::pool::pruner::Pruner;
use crate::pool::watcher::BlockWatcher;
use crate::poller::SnapshotPoller;
use crate::providers::node::NodeProvider;
use crate::pubsub::{BusPublisher, PubSubBridge};
use alloy_primitives::keccak256;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// How long children get to wind down after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Pause before a dead poller is respawned, so a down node is not hammered.
const POLLER_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Depth of the candidate channels feeding the pruners.
const CANDIDATE_CHANNEL_CAPACITY: usize = 64;

/// Wires the whole engine together and owns its lifetime.
///
/// Spawns the pool actors, the pruners, the block watcher, the snapshot
/// poller and the gossip listener under one cancellation token, restarts the
/// poller when its sentinel fires, and winds everything down within the
/// grace period once `shutdown` resolves.
pub struct Supervisor<P> {
    config: Config,
    provider: Arc<P>,
    external_bus: Option<Arc<dyn BusPublisher>>,
}

impl<P: NodeProvider + 'static> Supervisor<P> {
    pub fn new(
        config: Config,
        provider: Arc<P>,
        external_bus: Option<Arc<dyn BusPublisher>>,
    ) -> Self {
        Self {
            config,
            provider,
            external_bus,
        }
    }

    /// Runs until `shutdown` resolves; returns once every child stopped or
    /// the grace period forced them.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) -> eyre::Result<()> {
        let Self {
            config,
            provider,
            external_bus,
        } = self;

        let token = CancellationToken::new();
        let bridge = Arc::new(PubSubBridge::new(
            [
                config.pending_entry_topic.clone(),
                config.pending_exit_topic.clone(),
                config.queued_entry_topic.clone(),
                config.queued_exit_topic.clone(),
            ],
            external_bus,
        ));

        let pending = PoolActor::spawn(
            PoolKind::Pending,
            config.pending_pool_size,
            config.pending_entry_topic.clone(),
            config.pending_exit_topic.clone(),
            bridge.clone(),
            token.clone(),
        );
        let queued = PoolActor::spawn(
            PoolKind::Queued,
            config.queued_pool_size,
            config.queued_entry_topic.clone(),
            config.queued_exit_topic.clone(),
            bridge.clone(),
            token.clone(),
        );
        let dispatcher = SnapshotDispatcher::new(pending.clone(), queued.clone());

        let mut tasks = JoinSet::new();
        let permits = Arc::new(Semaphore::new(config.worker_pool_size()));

        let (pending_candidates, pending_candidate_rx) = mpsc::channel(CANDIDATE_CHANNEL_CAPACITY);
        let (queued_candidates, queued_candidate_rx) = mpsc::channel(CANDIDATE_CHANNEL_CAPACITY);
        tasks.spawn(
            Pruner::new(pending.clone(), provider.clone(), permits.clone())
                .run(pending_candidate_rx, token.clone()),
        );
        tasks.spawn(
            Pruner::new(queued.clone(), provider.clone(), permits.clone())
                .run(queued_candidate_rx, token.clone()),
        );
        tasks.spawn(
            BlockWatcher::new(
                provider.clone(),
                vec![pending_candidates, queued_candidates],
                config.polling_period(),
            )
            .run(token.clone()),
        );

        let (sentinel, mut poller_down) = mpsc::channel(1);
        tasks.spawn(
            SnapshotPoller::new(provider.clone(), dispatcher.clone(), config.polling_period())
                .run(token.clone(), sentinel.clone()),
        );

        // the listener failing to bind is a startup error, not a task death
        let listener = TcpListener::bind(config.listen_addr()).await?;
        let session_ctx = SessionContext {
            local: Hello::new(config.networking_stream.clone(), local_peer_id(&config)),
            pending: pending.clone(),
            bridge: bridge.clone(),
            entry_topic: config.pending_entry_topic.clone(),
            manager: ConnectionManager::new(),
        };
        tasks.spawn(listen(listener, session_ctx.clone(), token.clone()));
        if let Some(addr) = config.bootstrap_peer.clone() {
            tasks.spawn(dial(addr, session_ctx.clone(), token.clone()));
        }

        tracing::info!(
            target: "supervisor",
            peer_id = %session_ctx.local.peer_id,
            listen = %config.listen_addr(),
            rendezvous = %config.networking_rendezvous,
            workers = config.worker_pool_size(),
            "engine started"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(target: "supervisor", "shutdown requested");
                    break;
                }
                _ = poller_down.recv() => {
                    tracing::warn!(target: "supervisor", "snapshot poller died, restarting");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(POLLER_RESTART_DELAY) => {
                            tasks.spawn(
                                SnapshotPoller::new(
                                    provider.clone(),
                                    dispatcher.clone(),
                                    config.polling_period(),
                                )
                                .run(token.clone(), sentinel.clone()),
                            );
                        }
                    }
                }
            }
        }

        token.cancel();
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(target: "supervisor", "children outlived the grace period, aborting them");
            tasks.abort_all();
        }
        Ok(())
    }
}

/// Opaque id this node announces in its gossip handshake.
fn local_peer_id(config: &Config) -> String {
    let seed = format!(
        "{}-{}",
        config.listen_addr(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    let digest = keccak256(seed.as_bytes());
    format!("{digest:x}")[..16].to_owned()
}
