//! Shared fixtures for the integration suite.

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use async_trait::async_trait;
use mempool_mirror::models::transaction::{MempoolTx, TxpoolSnapshot};
use mempool_mirror::providers::node::{NodeProvider, ProviderError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Builds a bare transaction record the way `txpool_content` would hand it
/// over: immutable fields set, mirror-owned fields empty.
pub fn tx(hash_byte: u8, from_byte: u8, nonce: u64, gas_price: u64) -> MempoolTx {
    MempoolTx {
        block_hash: None,
        block_number: None,
        from: Address::repeat_byte(from_byte),
        gas: U64::from(21_000u64),
        gas_price: U256::from(gas_price),
        hash: B256::repeat_byte(hash_byte),
        input: Bytes::new(),
        nonce: U64::from(nonce),
        to: Some(Address::repeat_byte(0xee)),
        transaction_index: None,
        value: U256::from(1u64),
        tx_type: U64::ZERO,
        chain_id: Some(U256::from(1u64)),
        v: U256::from(27u64),
        r: U256::from(7u64),
        s: U256::from(9u64),
        pool: None,
        pending_from: None,
        queued_at: None,
        confirmed_at: None,
        dropped_at: None,
    }
}

/// Scriptable in-memory node.
#[derive(Default)]
pub struct ScriptedNode {
    pub snapshot: Mutex<TxpoolSnapshot>,
    pub nonces: Mutex<HashMap<Address, u64>>,
    pub mined: Mutex<HashMap<B256, MempoolTx>>,
    pub head: AtomicU64,
    pub blocks: Mutex<HashMap<u64, Vec<B256>>>,
}

impl ScriptedNode {
    /// Replaces the pending side of the snapshot.
    pub fn set_pending(&self, txs: Vec<MempoolTx>) {
        let mut snapshot = self.snapshot.lock().unwrap();
        snapshot.pending.clear();
        for tx in txs {
            snapshot
                .pending
                .entry(tx.from)
                .or_default()
                .insert(tx.nonce_u64().to_string(), tx);
        }
    }

    /// Replaces the queued side of the snapshot.
    pub fn set_queued(&self, txs: Vec<MempoolTx>) {
        let mut snapshot = self.snapshot.lock().unwrap();
        snapshot.queued.clear();
        for tx in txs {
            snapshot
                .queued
                .entry(tx.from)
                .or_default()
                .insert(tx.nonce_u64().to_string(), tx);
        }
    }
}

#[async_trait]
impl NodeProvider for ScriptedNode {
    async fn txpool_content(&self) -> Result<TxpoolSnapshot, ProviderError> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, ProviderError> {
        Ok(self.nonces.lock().unwrap().get(&address).copied().unwrap_or(0))
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<MempoolTx>, ProviderError> {
        Ok(self.mined.lock().unwrap().get(&hash).cloned())
    }

    async fn block_number(&self) -> Result<u64, ProviderError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn block_transactions(&self, number: u64) -> Result<Vec<B256>, ProviderError> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }
}
