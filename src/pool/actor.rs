use crate::models::transaction::{MempoolTx, PoolKind, RemovalReason};
use crate::net::PeerId;
use crate::pool::index::{GasPriceIndex, SenderIndex, TombstoneSet};
use crate::pool::SortOrder;
use crate::pubsub::PubSubBridge;
use alloy_primitives::{Address, B256};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Request channel depth. Small on purpose: callers block until the actor
/// accepts, which is the pool's backpressure.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Typed request into a pool actor; every variant carries its reply slot.
#[derive(Debug)]
pub enum PoolRequest {
    Add {
        tx: Box<MempoolTx>,
        origin: Option<PeerId>,
        reply: oneshot::Sender<bool>,
    },
    Remove {
        hash: B256,
        reason: RemovalReason,
        reply: oneshot::Sender<bool>,
    },
    Exists {
        hash: B256,
        reply: oneshot::Sender<bool>,
    },
    Get {
        hash: B256,
        reply: oneshot::Sender<Option<Arc<MempoolTx>>>,
    },
    Count {
        reply: oneshot::Sender<u64>,
    },
    List {
        order: SortOrder,
        reply: oneshot::Sender<Vec<Arc<MempoolTx>>>,
    },
    TxsFrom {
        from: Address,
        reply: oneshot::Sender<Vec<Arc<MempoolTx>>>,
    },
}

/// Single-writer owner of one pool's state.
///
/// All mutations and queries arrive as [`PoolRequest`] messages; the loop
/// finishes every index update before taking the next request, so readers
/// never observe a half-applied mutation.
pub struct PoolActor {
    kind: PoolKind,
    capacity: usize,
    by_hash: std::collections::HashMap<B256, Arc<MempoolTx>>,
    by_gas_price: GasPriceIndex,
    by_sender: SenderIndex,
    dropped: TombstoneSet,
    bridge: Arc<PubSubBridge>,
    entry_topic: String,
    exit_topic: String,
    requests: mpsc::Receiver<PoolRequest>,
}

impl PoolActor {
    /// Spawns the actor task and returns the handle requests go through.
    ///
    /// `kind` must be [`PoolKind::Pending`] or [`PoolKind::Queued`]; the two
    /// terminal kinds only ever appear on records leaving a pool.
    pub fn spawn(
        kind: PoolKind,
        capacity: usize,
        entry_topic: impl Into<String>,
        exit_topic: impl Into<String>,
        bridge: Arc<PubSubBridge>,
        token: CancellationToken,
    ) -> PoolHandle {
        debug_assert!(matches!(kind, PoolKind::Pending | PoolKind::Queued));
        let (sender, requests) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let actor = Self {
            kind,
            capacity: capacity.max(1),
            by_hash: std::collections::HashMap::with_capacity(capacity),
            by_gas_price: GasPriceIndex::default(),
            by_sender: SenderIndex::default(),
            dropped: TombstoneSet::new(capacity.max(1) * 2),
            bridge,
            entry_topic: entry_topic.into(),
            exit_topic: exit_topic.into(),
            requests,
        };
        tokio::spawn(actor.run(token));
        PoolHandle { kind, requests: sender }
    }

    async fn run(mut self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                request = self.requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
            }
        }
        tracing::debug!(target: "pool", kind = %self.kind, txs = self.by_hash.len(), "pool actor stopped");
    }

    async fn handle(&mut self, request: PoolRequest) {
        match request {
            PoolRequest::Add { tx, origin, reply } => {
                let accepted = self.add(*tx, origin).await;
                let _ = reply.send(accepted);
            }
            PoolRequest::Remove { hash, reason, reply } => {
                let removed = self.remove(hash, reason).await;
                let _ = reply.send(removed);
            }
            PoolRequest::Exists { hash, reply } => {
                let _ = reply.send(self.by_hash.contains_key(&hash));
            }
            PoolRequest::Get { hash, reply } => {
                let _ = reply.send(self.by_hash.get(&hash).cloned());
            }
            PoolRequest::Count { reply } => {
                let _ = reply.send(self.by_hash.len() as u64);
            }
            PoolRequest::List { order, reply } => {
                let _ = reply.send(self.by_gas_price.snapshot(order));
            }
            PoolRequest::TxsFrom { from, reply } => {
                let _ = reply.send(self.by_sender.txs_from(&from));
            }
        }
    }

    async fn add(&mut self, mut tx: MempoolTx, origin: Option<PeerId>) -> bool {
        if self.by_hash.contains_key(&tx.hash) || self.dropped.contains(&tx.hash) {
            return false;
        }

        if self.by_hash.len() >= self.capacity {
            self.evict_lowest_priced();
        }

        let now = Utc::now();
        tx.pool = Some(self.kind);
        match self.kind {
            PoolKind::Queued => tx.queued_at = Some(now),
            _ => tx.pending_from = Some(now),
        }

        let tx = Arc::new(tx);
        self.by_gas_price.insert(tx.clone());
        self.by_sender.insert(tx.clone());
        self.by_hash.insert(tx.hash, tx.clone());

        self.bridge.publish(&self.entry_topic, &tx, origin).await;
        true
    }

    async fn remove(&mut self, hash: B256, reason: RemovalReason) -> bool {
        let Some(tx) = self.by_hash.remove(&hash) else {
            return false;
        };
        self.by_gas_price.remove(&tx);
        self.by_sender.remove(&tx);

        let mut exited = (*tx).clone();
        let now = Utc::now();
        match reason {
            RemovalReason::Confirmed => {
                exited.pool = Some(PoolKind::Confirmed);
                exited.confirmed_at = Some(now);
            }
            RemovalReason::Dropped => {
                exited.pool = Some(PoolKind::Dropped);
                exited.dropped_at = Some(now);
            }
            // a filled nonce gap: the tx is pending from here on
            RemovalReason::Unstuck => {
                exited.pool = Some(PoolKind::Pending);
                exited.pending_from = Some(now);
            }
        }

        self.bridge.publish(&self.exit_topic, &exited, None).await;
        true
    }

    /// Makes room for one more transaction: the lowest-priced entry leaves
    /// and its hash is tombstoned so later snapshots cannot re-admit it.
    fn evict_lowest_priced(&mut self) {
        let Some(victim) = self.by_gas_price.lowest().cloned() else {
            return;
        };
        self.by_gas_price.remove(&victim);
        self.by_sender.remove(&victim);
        self.by_hash.remove(&victim.hash);
        self.dropped.insert(victim.hash);
        tracing::debug!(
            target: "pool",
            kind = %self.kind,
            hash = %victim.hash,
            gas_price = %victim.gas_price,
            "dropped tx, pool was about to hit its limit"
        );
    }
}

/// Cloneable handle to a pool actor.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    kind: PoolKind,
    requests: mpsc::Sender<PoolRequest>,
}

impl PoolHandle {
    /// Which pool this handle talks to.
    pub const fn kind(&self) -> PoolKind {
        self.kind
    }

    async fn request<T: Default>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PoolRequest,
    ) -> T {
        let (reply, response) = oneshot::channel();
        if self.requests.send(build(reply)).await.is_err() {
            return T::default();
        }
        response.await.unwrap_or_default()
    }

    /// Attempts to admit a transaction. `false` means duplicate, tombstoned,
    /// or pool gone.
    pub async fn add(&self, tx: MempoolTx, origin: Option<PeerId>) -> bool {
        self.request(|reply| PoolRequest::Add {
            tx: Box::new(tx),
            origin,
            reply,
        })
        .await
    }

    /// Removes a transaction with the given classification.
    pub async fn remove(&self, hash: B256, reason: RemovalReason) -> bool {
        self.request(|reply| PoolRequest::Remove { hash, reason, reply })
            .await
    }

    pub async fn exists(&self, hash: B256) -> bool {
        self.request(|reply| PoolRequest::Exists { hash, reply }).await
    }

    pub async fn get(&self, hash: B256) -> Option<Arc<MempoolTx>> {
        self.request(|reply| PoolRequest::Get { hash, reply }).await
    }

    pub async fn count(&self) -> u64 {
        self.request(|reply| PoolRequest::Count { reply }).await
    }

    /// Snapshot of the pool ordered by gas price.
    pub async fn list(&self, order: SortOrder) -> Vec<Arc<MempoolTx>> {
        self.request(|reply| PoolRequest::List { order, reply }).await
    }

    /// Snapshot of one sender's transactions, nonce-ascending.
    pub async fn txs_from(&self, from: Address) -> Vec<Arc<MempoolTx>> {
        self.request(|reply| PoolRequest::TxsFrom { from, reply }).await
    }

    /// Transactions competing for the same `(sender, nonce)` slot as `hash`.
    /// The target itself is not part of the result.
    pub async fn duplicate_txs(&self, hash: B256) -> Vec<Arc<MempoolTx>> {
        let Some(target) = self.get(hash).await else {
            return Vec::new();
        };
        self.list(SortOrder::Desc)
            .await
            .into_iter()
            .filter(|tx| tx.is_duplicate_of(&target))
            .collect()
    }

    /// The `x` best-paying transactions; `x` is clamped to the pool size.
    pub async fn top_x_with_high_gas_price(&self, x: usize) -> Vec<Arc<MempoolTx>> {
        let mut txs = self.list(SortOrder::Desc).await;
        txs.truncate(x);
        txs
    }

    /// The `x` worst-paying transactions; `x` is clamped to the pool size.
    pub async fn top_x_with_low_gas_price(&self, x: usize) -> Vec<Arc<MempoolTx>> {
        let mut txs = self.list(SortOrder::Asc).await;
        txs.truncate(x);
        txs
    }

    /// All pool transactions sent from `address`, best-paying first.
    pub async fn sent_from(&self, address: Address) -> Vec<Arc<MempoolTx>> {
        self.list(SortOrder::Desc)
            .await
            .into_iter()
            .filter(|tx| tx.is_sent_from(&address))
            .collect()
    }

    /// All pool transactions sent to `address`, best-paying first.
    pub async fn sent_to(&self, address: Address) -> Vec<Arc<MempoolTx>> {
        self.list(SortOrder::Desc)
            .await
            .into_iter()
            .filter(|tx| tx.is_sent_to(&address))
            .collect()
    }

    /// Transactions that have been in this pool for at least `age`.
    pub async fn older_than(&self, age: chrono::Duration) -> Vec<Arc<MempoolTx>> {
        let queued = matches!(self.kind, PoolKind::Queued);
        self.list(SortOrder::Desc)
            .await
            .into_iter()
            .filter(|tx| {
                if queued {
                    tx.is_queued_for_gte(age)
                } else {
                    tx.is_pending_for_gte(age)
                }
            })
            .collect()
    }

    /// Transactions that have been in this pool for at most `age`.
    pub async fn fresher_than(&self, age: chrono::Duration) -> Vec<Arc<MempoolTx>> {
        let queued = matches!(self.kind, PoolKind::Queued);
        self.list(SortOrder::Desc)
            .await
            .into_iter()
            .filter(|tx| {
                if queued {
                    tx.is_queued_for_lte(age)
                } else {
                    tx.is_pending_for_lte(age)
                }
            })
            .collect()
    }
}
