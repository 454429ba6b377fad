use crate::models::transaction::{MempoolTx, TxpoolSnapshot};
use crate::pool::actor::PoolHandle;
use alloy_primitives::Address;
use std::collections::BTreeMap;
use std::time::Instant;

/// Forwards each `txpool_content` snapshot into the pool actors.
///
/// Strictly forward-only: it only ever issues `Add`s. Disappearances are the
/// pruner's business, and a queued→pending migration is simply the pruner's
/// `unstuck` removal followed by one of these adds on a later snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotDispatcher {
    pending: PoolHandle,
    queued: PoolHandle,
}

impl SnapshotDispatcher {
    pub const fn new(pending: PoolHandle, queued: PoolHandle) -> Self {
        Self { pending, queued }
    }

    /// Feeds one snapshot into both pools and logs the round statistics.
    pub async fn process(&self, snapshot: TxpoolSnapshot, started: Instant) {
        let pending_added = Self::feed(&self.pending, snapshot.pending).await;
        let queued_added = Self::feed(&self.queued, snapshot.queued).await;
        let pending_total = self.pending.count().await;
        let queued_total = self.queued.count().await;

        tracing::info!(
            target: "dispatcher",
            pending_added,
            queued_added,
            pending_total,
            queued_total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "processed mempool snapshot"
        );
    }

    async fn feed(pool: &PoolHandle, txs: BTreeMap<Address, BTreeMap<String, MempoolTx>>) -> u64 {
        let mut accepted = 0u64;
        for (_, by_nonce) in txs {
            for (_, tx) in by_nonce {
                if pool.add(tx, None).await {
                    accepted += 1;
                }
            }
        }
        accepted
    }
}
