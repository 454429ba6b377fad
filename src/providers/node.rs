use crate::models::transaction::{MempoolTx, TxpoolSnapshot};
use alloy_primitives::{Address, B256, U64};
use async_trait::async_trait;
use auto_impl::auto_impl;
use jsonrpsee::{
    core::client::ClientT,
    http_client::{HttpClient, HttpClientBuilder},
    rpc_params,
};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Error talking to the upstream node.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport or JSON-RPC level failure. Callers treat these as
    /// transient: the poller retries on its next tick, the pruner keeps the
    /// transaction it could not classify.
    #[error(transparent)]
    Client(#[from] jsonrpsee::core::ClientError),
}

/// Upstream node provider. Abstracts the JSON-RPC node so the pruner, the
/// poller and the block watcher can be driven by test doubles.
#[async_trait]
#[auto_impl(Arc, &)]
pub trait NodeProvider: Send + Sync {
    /// Full `txpool_content` snapshot: `{pending, queued} → sender → nonce → tx`.
    async fn txpool_content(&self) -> Result<TxpoolSnapshot, ProviderError>;

    /// `eth_getTransactionCount(address, "latest")`.
    async fn transaction_count(&self, address: Address) -> Result<u64, ProviderError>;

    /// `eth_getTransactionByHash`; `None` when the node no longer knows the tx.
    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<MempoolTx>, ProviderError>;

    /// `eth_blockNumber`.
    async fn block_number(&self) -> Result<u64, ProviderError>;

    /// Hashes of the transactions mined in the given block; empty when the
    /// block is unknown.
    async fn block_transactions(&self, number: u64) -> Result<Vec<B256>, ProviderError>;
}

/// [`NodeProvider`] over a jsonrpsee HTTP client.
#[derive(Debug, Clone)]
pub struct JsonRpcNodeProvider {
    client: HttpClient,
}

impl JsonRpcNodeProvider {
    pub fn new(url: &Url) -> Result<Self, ProviderError> {
        Ok(Self {
            client: HttpClientBuilder::default().build(url.as_str())?,
        })
    }
}

/// `eth_getBlockByNumber(n, false)` reduced to the field we read.
#[derive(Debug, Deserialize)]
struct BlockTxHashes {
    #[serde(default)]
    transactions: Vec<B256>,
}

#[async_trait]
impl NodeProvider for JsonRpcNodeProvider {
    async fn txpool_content(&self) -> Result<TxpoolSnapshot, ProviderError> {
        Ok(self.client.request("txpool_content", rpc_params![]).await?)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, ProviderError> {
        let count: U64 = self
            .client
            .request("eth_getTransactionCount", rpc_params![address, "latest"])
            .await?;
        Ok(count.to())
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<MempoolTx>, ProviderError> {
        Ok(self
            .client
            .request("eth_getTransactionByHash", rpc_params![hash])
            .await?)
    }

    async fn block_number(&self) -> Result<u64, ProviderError> {
        let number: U64 = self.client.request("eth_blockNumber", rpc_params![]).await?;
        Ok(number.to())
    }

    async fn block_transactions(&self, number: u64) -> Result<Vec<B256>, ProviderError> {
        let block: Option<BlockTxHashes> = self
            .client
            .request(
                "eth_getBlockByNumber",
                rpc_params![U64::from(number), false],
            )
            .await?;
        Ok(block.map(|b| b.transactions).unwrap_or_default())
    }
}
