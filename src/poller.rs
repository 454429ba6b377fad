use crate::pool::dispatcher::SnapshotDispatcher;
use crate::providers::node::NodeProvider;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Fixed-period driver of `txpool_content`.
///
/// On cancellation it exits cleanly. On any RPC failure it signals the
/// supervisor through the sentinel channel and exits, leaving the restart
/// decision upstairs.
pub struct SnapshotPoller<P> {
    provider: Arc<P>,
    dispatcher: SnapshotDispatcher,
    period: Duration,
}

impl<P: NodeProvider + 'static> SnapshotPoller<P> {
    pub fn new(provider: Arc<P>, dispatcher: SnapshotDispatcher, period: Duration) -> Self {
        Self {
            provider,
            dispatcher,
            period,
        }
    }

    pub async fn run(self, token: CancellationToken, sentinel: mpsc::Sender<()>) {
        loop {
            if token.is_cancelled() {
                break;
            }

            let started = Instant::now();
            match self.provider.txpool_content().await {
                Ok(snapshot) => self.dispatcher.process(snapshot, started).await,
                Err(err) => {
                    tracing::error!(target: "poller", %err, "failed to fetch mempool content");
                    let _ = sentinel.send(()).await;
                    return;
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.period) => {}
            }
        }
    }
}
