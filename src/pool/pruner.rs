use crate::models::transaction::{MempoolTx, PoolKind, RemovalReason};
use crate::pool::actor::PoolHandle;
use crate::pool::SortOrder;
use crate::providers::node::{NodeProvider, ProviderError};
use alloy_primitives::{Address, B256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// One batch of candidate hashes, typically the transactions mined in a
/// freshly observed block.
pub type CandidateBatch = Vec<B256>;

/// Depth of the internal verdict channel between probe workers and the loop.
const VERDICT_CHANNEL_CAPACITY: usize = 1024;

/// Classifies pool transactions against the node and removes the ones that
/// can no longer be mined.
///
/// All RPC probing happens on worker tasks gated by the shared semaphore;
/// only `Remove` messages ever cross into the pool actor.
///
/// The pending pruner follows candidate hashes: a mined transaction prunes
/// itself and every same-sender transaction at a lower-or-equal nonce, each
/// classified as confirmed or dropped. The queued pruner treats a batch as
/// the signal that account nonces moved and sweeps its own pool for
/// transactions whose nonce gap has been filled, removing them as unstuck.
pub struct Pruner<P> {
    pool: PoolHandle,
    provider: Arc<P>,
    permits: Arc<Semaphore>,
}

impl<P: NodeProvider + 'static> Pruner<P> {
    pub fn new(pool: PoolHandle, provider: Arc<P>, permits: Arc<Semaphore>) -> Self {
        Self {
            pool,
            provider,
            permits,
        }
    }

    /// Runs until cancellation or until the candidate channel closes.
    pub async fn run(self, mut candidates: mpsc::Receiver<CandidateBatch>, token: CancellationToken) {
        let (verdict_sender, mut verdicts) = mpsc::channel::<(B256, RemovalReason)>(VERDICT_CHANNEL_CAPACITY);
        let mut removed = 0u64;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                batch = candidates.recv() => match batch {
                    Some(batch) => match self.pool.kind() {
                        PoolKind::Queued => self.sweep_queued(&verdict_sender).await,
                        _ => self.process_batch(batch, &verdict_sender).await,
                    },
                    None => break,
                },
                verdict = verdicts.recv() => {
                    // the loop owns a sender, the channel can't close here
                    if let Some((hash, reason)) = verdict {
                        if self.pool.remove(hash, reason).await {
                            removed += 1;
                            if removed % 10 == 0 {
                                tracing::info!(target: "pruner", kind = %self.pool.kind(), removed, "pruned txs from pool");
                            }
                        }
                    }
                }
            }
        }
    }

    /// Pending-pool path: resolve candidates, expand to prunables, probe each.
    async fn process_batch(&self, batch: CandidateBatch, verdicts: &mpsc::Sender<(B256, RemovalReason)>) {
        let mut targets = Vec::with_capacity(batch.len());
        for hash in batch {
            if let Some(tx) = self.pool.get(hash).await {
                targets.push(tx);
            }
        }
        // highest nonce first, so one candidate covers its sender's tail
        targets.sort_by(|a, b| b.nonce.cmp(&a.nonce));

        // scoped to this batch
        let mut max_nonce_seen: HashMap<Address, u64> = HashMap::new();
        let mut scheduled: HashSet<B256> = HashSet::new();

        for target in targets {
            if max_nonce_seen
                .get(&target.from)
                .is_some_and(|&nonce| nonce > target.nonce_u64())
            {
                continue;
            }
            for prunable in self.prunables(&target).await {
                if scheduled.insert(prunable.hash) {
                    self.spawn_probe(prunable, verdicts.clone());
                }
            }
            max_nonce_seen.insert(target.from, target.nonce_u64());
        }
    }

    /// The candidate itself plus every same-sender tx it obsoletes.
    async fn prunables(&self, target: &Arc<MempoolTx>) -> Vec<Arc<MempoolTx>> {
        let mut result = vec![target.clone()];
        for tx in self.pool.txs_from(target.from).await {
            if tx.hash != target.hash && tx.nonce <= target.nonce {
                result.push(tx);
            }
        }
        result
    }

    fn spawn_probe(&self, tx: Arc<MempoolTx>, verdicts: mpsc::Sender<(B256, RemovalReason)>) {
        let permits = self.permits.clone();
        let provider = self.provider.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match classify_pending(provider.as_ref(), &tx).await {
                Ok(Some(reason)) => {
                    let _ = verdicts.send((tx.hash, reason)).await;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(target: "pruner", %err, hash = %tx.hash, "probe failed, keeping tx");
                }
            }
        });
    }

    /// Queued-pool path: one nonce probe per sender, then local
    /// classification of that sender's queued transactions.
    async fn sweep_queued(&self, verdicts: &mpsc::Sender<(B256, RemovalReason)>) {
        let snapshot = self.pool.list(SortOrder::Desc).await;
        let mut by_sender: HashMap<Address, Vec<Arc<MempoolTx>>> = HashMap::new();
        for tx in snapshot {
            by_sender.entry(tx.from).or_default().push(tx);
        }

        for (sender, txs) in by_sender {
            let permits = self.permits.clone();
            let provider = self.provider.clone();
            let verdicts = verdicts.clone();
            tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let account_nonce = match provider.transaction_count(sender).await {
                    Ok(nonce) => nonce,
                    Err(err) => {
                        tracing::debug!(target: "pruner", %err, %sender, "nonce probe failed, keeping txs");
                        return;
                    }
                };
                for tx in txs {
                    // gap filled: eligible for the pending pool now
                    if account_nonce >= tx.nonce_u64() {
                        let _ = verdicts.send((tx.hash, RemovalReason::Unstuck)).await;
                    }
                }
            });
        }
    }
}

/// Pending-pool classification against the node.
///
/// A transaction whose nonce slot was consumed is dropped when the node has
/// forgotten it, confirmed when it sits in a mined block, and kept while it
/// still floats in the node's own mempool.
async fn classify_pending<P: NodeProvider + ?Sized>(
    provider: &P,
    tx: &MempoolTx,
) -> Result<Option<RemovalReason>, ProviderError> {
    let account_nonce = provider.transaction_count(tx.from).await?;
    if account_nonce <= tx.nonce_u64() {
        return Ok(None);
    }
    Ok(match provider.transaction_by_hash(tx.hash).await? {
        None => Some(RemovalReason::Dropped),
        Some(seen) if seen.block_number.is_some() => Some(RemovalReason::Confirmed),
        Some(_) => None,
    })
}
