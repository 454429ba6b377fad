use crate::net::peer::{run_session, SessionContext};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Accepts inbound peer streams and runs one session per connection.
///
/// A session error ends that peer only; the accept loop keeps going until
/// cancellation.
pub async fn listen(listener: TcpListener, ctx: SessionContext, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let ctx = ctx.clone();
                    let session_token = token.clone();
                    tokio::spawn(async move {
                        if let Err(err) = run_session(stream, ctx, session_token).await {
                            tracing::warn!(target: "gossip", %err, %remote, "peer session ended");
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!(target: "gossip", %err, "failed to accept peer stream");
                }
            },
        }
    }
}

/// Dials a bootstrap peer and runs the session to completion.
pub async fn dial(addr: String, ctx: SessionContext, token: CancellationToken) {
    match TcpStream::connect(&addr).await {
        Ok(stream) => {
            tracing::info!(target: "gossip", %addr, "connected to bootstrap peer");
            if let Err(err) = run_session(stream, ctx, token).await {
                tracing::warn!(target: "gossip", %err, %addr, "bootstrap session ended");
            }
        }
        Err(err) => {
            tracing::warn!(target: "gossip", %err, %addr, "failed to dial bootstrap peer");
        }
    }
}
