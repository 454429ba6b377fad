use crate::pool::pruner::CandidateBatch;
use crate::providers::node::NodeProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Follows the chain head and feeds every new block's transaction hashes to
/// the pruners as one candidate batch.
///
/// RPC failures only cost a tick; the watcher retries on the next one.
pub struct BlockWatcher<P> {
    provider: Arc<P>,
    targets: Vec<mpsc::Sender<CandidateBatch>>,
    period: Duration,
}

impl<P: NodeProvider + 'static> BlockWatcher<P> {
    pub fn new(provider: Arc<P>, targets: Vec<mpsc::Sender<CandidateBatch>>, period: Duration) -> Self {
        Self {
            provider,
            targets,
            period,
        }
    }

    pub async fn run(self, token: CancellationToken) {
        let mut last_seen: Option<u64> = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.period) => {}
            }

            let head = match self.provider.block_number().await {
                Ok(head) => head,
                Err(err) => {
                    tracing::warn!(target: "watcher", %err, "failed to fetch block number");
                    continue;
                }
            };

            let first_unseen = match last_seen {
                Some(last) if head > last => last + 1,
                Some(_) => continue,
                // no history on the first tick, start from the current head
                None => head,
            };

            for number in first_unseen..=head {
                match self.provider.block_transactions(number).await {
                    Ok(hashes) if !hashes.is_empty() => {
                        tracing::debug!(target: "watcher", number, txs = hashes.len(), "caught mined block");
                        for target in &self.targets {
                            let _ = target.send(hashes.clone()).await;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(target: "watcher", %err, number, "failed to fetch block txs");
                    }
                }
            }
            last_seen = Some(head);
        }
    }
}
