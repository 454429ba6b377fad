use alloy_primitives::{Address, Bytes, B256, U256, U64};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Error raised by the binary codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization into the wire form failed.
    #[error(transparent)]
    Encode(#[from] rmp_serde::encode::Error),
    /// A frame or bus payload could not be deserialized.
    #[error(transparent)]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Pool a transaction currently belongs to, from the mirror's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    Pending,
    Queued,
    Confirmed,
    Dropped,
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Queued => write!(f, "queued"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Dropped => write!(f, "dropped"),
        }
    }
}

/// Why a transaction is leaving a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Included in a mined block.
    Confirmed,
    /// Evicted from the node's mempool without being mined.
    Dropped,
    /// A queued transaction whose nonce gap was filled; it is pending now.
    Unstuck,
}

/// A transaction as mirrored from the node's mempool.
///
/// The immutable fields are exactly what `txpool_content` and
/// `eth_getTransactionByHash` return (camelCase names, hex quantities); the
/// trailing fields are owned by the mirror and stamped by the pool actors.
/// The same serde definition drives the JSON-RPC decoding and the
/// self-describing msgpack wire/bus form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolTx {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<U256>,
    pub from: Address,
    pub gas: U64,
    #[serde(default)]
    pub gas_price: U256,
    pub hash: B256,
    #[serde(default)]
    pub input: Bytes,
    pub nonce: U64,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_index: Option<U64>,
    #[serde(default)]
    pub value: U256,
    #[serde(default, rename = "type")]
    pub tx_type: U64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<U256>,
    #[serde(default)]
    pub v: U256,
    #[serde(default)]
    pub r: U256,
    #[serde(default)]
    pub s: U256,

    /// Pool this record currently sits in, stamped by the owning actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolKind>,
    /// When the mirror first saw the transaction as pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_from: Option<DateTime<Utc>>,
    /// When the mirror first saw the transaction as queued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    /// When the transaction was classified as confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    /// When the transaction was classified as dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped_at: Option<DateTime<Utc>>,
}

impl MempoolTx {
    /// Serializes the record into its msgpack wire/bus form.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Deserializes a wire/bus payload into a fresh record.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Sender nonce as a plain integer.
    pub fn nonce_u64(&self) -> u64 {
        self.nonce.to()
    }

    /// Two transactions are duplicates when they compete for the same
    /// `(sender, nonce)` slot under different hashes; the node will mine at
    /// most one of them.
    pub fn is_duplicate_of(&self, other: &Self) -> bool {
        self.from == other.from && self.nonce == other.nonce && self.hash != other.hash
    }

    /// Whether this transaction was sent from `address`.
    pub fn is_sent_from(&self, address: &Address) -> bool {
        self.from == *address
    }

    /// Whether this transaction was sent to `address`.
    pub fn is_sent_to(&self, address: &Address) -> bool {
        self.to.as_ref() == Some(address)
    }

    /// Whether the transaction has been sitting in the pending pool for at
    /// least `age`.
    pub fn is_pending_for_gte(&self, age: Duration) -> bool {
        self.pending_from.is_some_and(|t| Utc::now() - t >= age)
    }

    /// Whether the transaction has been in the pending pool for at most `age`.
    pub fn is_pending_for_lte(&self, age: Duration) -> bool {
        self.pending_from.is_some_and(|t| Utc::now() - t <= age)
    }

    /// Whether the transaction has been sitting in the queued pool for at
    /// least `age`.
    pub fn is_queued_for_gte(&self, age: Duration) -> bool {
        self.queued_at.is_some_and(|t| Utc::now() - t >= age)
    }

    /// Whether the transaction has been in the queued pool for at most `age`.
    pub fn is_queued_for_lte(&self, age: Duration) -> bool {
        self.queued_at.is_some_and(|t| Utc::now() - t <= age)
    }

    /// Timestamp used by the gas-price indexes; whichever pool stamped the
    /// record first.
    pub fn seen_at(&self) -> DateTime<Utc> {
        self.pending_from
            .or(self.queued_at)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// Result of one `txpool_content` call: `pool → sender → nonce → tx`.
///
/// Nonce keys stay strings, that is how geth serializes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxpoolSnapshot {
    #[serde(default)]
    pub pending: BTreeMap<Address, BTreeMap<String, MempoolTx>>,
    #[serde(default)]
    pub queued: BTreeMap<Address, BTreeMap<String, MempoolTx>>,
}

impl TxpoolSnapshot {
    /// Total number of transactions across both sides of the snapshot.
    pub fn len(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum::<usize>()
            + self.queued.values().map(BTreeMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Record fixture shared by the crate's unit tests.
#[cfg(test)]
pub(crate) fn sample_tx(hash_byte: u8, from_byte: u8, nonce: u64, gas_price: u64) -> MempoolTx {
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
