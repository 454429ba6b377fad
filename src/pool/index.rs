use crate::models::transaction::MempoolTx;
use crate::pool::SortOrder;
use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Ordering key of the gas-price index: `(gas_price, seen_at, hash)`.
///
/// The hash component makes the total order deterministic when two senders
/// pay the same price in the same instant.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GasKey {
    gas_price: U256,
    seen_at: DateTime<Utc>,
    hash: B256,
}

impl GasKey {
    fn of(tx: &MempoolTx) -> Self {
        Self {
            gas_price: tx.gas_price,
            seen_at: tx.seen_at(),
            hash: tx.hash,
        }
    }
}

impl Ord for GasKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.gas_price
            .cmp(&other.gas_price)
            .then_with(|| self.seen_at.cmp(&other.seen_at))
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for GasKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// All pool transactions ordered by gas price.
///
/// One balanced tree serves both listing directions: ascending is forward
/// iteration, descending is reverse iteration, so the two views always hold
/// the same multiset. The first entry is the eviction victim.
#[derive(Debug, Default)]
pub struct GasPriceIndex {
    txs: BTreeMap<GasKey, Arc<MempoolTx>>,
}

impl GasPriceIndex {
    pub fn insert(&mut self, tx: Arc<MempoolTx>) {
        self.txs.insert(GasKey::of(&tx), tx);
    }

    pub fn remove(&mut self, tx: &MempoolTx) -> Option<Arc<MempoolTx>> {
        self.txs.remove(&GasKey::of(tx))
    }

    /// Lowest-priced transaction, ties broken by oldest stamp then hash.
    pub fn lowest(&self) -> Option<&Arc<MempoolTx>> {
        self.txs.values().next()
    }

    /// The `index`-th transaction in ascending order.
    pub fn get(&self, index: usize) -> Option<&Arc<MempoolTx>> {
        self.txs.values().nth(index)
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Copy of the reference sequence in the requested order.
    pub fn snapshot(&self, order: SortOrder) -> Vec<Arc<MempoolTx>> {
        match order {
            SortOrder::Asc => self.txs.values().cloned().collect(),
            SortOrder::Desc => self.txs.values().rev().cloned().collect(),
        }
    }
}

/// Ordering key of the per-sender index: `(nonce, gas_price desc, hash)`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SenderKey {
    nonce: u64,
    gas_price: U256,
    hash: B256,
}

impl SenderKey {
    fn of(tx: &MempoolTx) -> Self {
        Self {
            nonce: tx.nonce_u64(),
            gas_price: tx.gas_price,
            hash: tx.hash,
        }
    }
}

impl Ord for SenderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nonce
            .cmp(&other.nonce)
            .then_with(|| other.gas_price.cmp(&self.gas_price))
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for SenderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pool transactions grouped by sender, each group ordered by
/// `(nonce, gas_price desc, hash)` so duplicate-nonce competitors sit next
/// to each other with the best-paying one first.
#[derive(Debug, Default)]
pub struct SenderIndex {
    senders: HashMap<Address, BTreeMap<SenderKey, Arc<MempoolTx>>>,
}

impl SenderIndex {
    pub fn insert(&mut self, tx: Arc<MempoolTx>) {
        self.senders
            .entry(tx.from)
            .or_default()
            .insert(SenderKey::of(&tx), tx);
    }

    pub fn remove(&mut self, tx: &MempoolTx) -> Option<Arc<MempoolTx>> {
        let txs = self.senders.get_mut(&tx.from)?;
        let removed = txs.remove(&SenderKey::of(tx));
        if txs.is_empty() {
            self.senders.remove(&tx.from);
        }
        removed
    }

    /// Copy of the sender's reference sequence, nonce-ascending.
    pub fn txs_from(&self, address: &Address) -> Vec<Arc<MempoolTx>> {
        self.senders
            .get(address)
            .map(|txs| txs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of distinct senders currently indexed.
    pub fn sender_count(&self) -> usize {
        self.senders.len()
    }
}

/// Hashes of recently evicted transactions.
///
/// Membership blocks re-admission; a FIFO bound keeps the set from growing
/// with process lifetime. The bound only needs to cover the current eviction
/// window, 2× pool capacity.
#[derive(Debug, Default)]
pub struct TombstoneSet {
    order: VecDeque<B256>,
    hashes: HashSet<B256>,
    capacity: usize,
}

impl TombstoneSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            hashes: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    pub fn insert(&mut self, hash: B256) {
        if self.hashes.contains(&hash) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.hashes.remove(&oldest);
            }
        }
        self.order.push_back(hash);
        self.hashes.insert(hash);
    }

    pub fn contains(&self, hash: &B256) -> bool {
        self.hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}
