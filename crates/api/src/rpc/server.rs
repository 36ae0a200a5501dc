//! RPC listener: one task per connection, one task per call.
//!
//! On shutdown the listener stops accepting, open connections stop reading
//! frames, and `serve` returns once every in-flight call has been answered.

use std::future::Future;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::bytes::Bytes;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::frame::{self, Code, RpcError, RpcRequest, RpcResponse};
use super::service;
use crate::app::services::AppServices;

const RESPONSE_QUEUE: usize = 64;

/// Accept connections until `shutdown` resolves, then drain.
pub async fn serve(
    listener: TcpListener,
    services: Arc<AppServices>,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()> {
    tokio::pin!(shutdown);
    tracing::info!(addr = %listener.local_addr()?, "rpc gateway listening");

    let tracker = TaskTracker::new();
    let cancel = CancellationToken::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let services = services.clone();
                    let conn_tracker = tracker.clone();
                    let cancel = cancel.clone();
                    tracker.spawn(async move {
                        if let Err(e) = handle_connection(stream, services, conn_tracker, cancel).await {
                            tracing::debug!(%peer, error = %e, "rpc connection ended with error");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "rpc accept failed"),
            },
        }
    }

    drop(listener);
    tracing::info!(tasks = tracker.len(), "rpc gateway draining");
    cancel.cancel();
    tracker.close();
    tracker.wait().await;
    tracing::info!("rpc gateway stopped");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    services: Arc<AppServices>,
    tracker: TaskTracker,
    cancel: CancellationToken,
) -> Result<(), RpcError> {
    let (mut sink, mut frames) = Framed::new(stream, frame::codec()).split();
    let (tx, mut rx) = mpsc::channel::<RpcResponse>(RESPONSE_QUEUE);

    // Calls complete out of order; a single writer keeps frames whole.
    let writer = tracker.spawn(async move {
        while let Some(resp) = rx.recv().await {
            let bytes = serde_json::to_vec(&resp)?;
            sink.send(Bytes::from(bytes)).await?;
        }
        Ok::<_, RpcError>(())
    });

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = frames.next() => match next {
                Some(frame) => frame?,
                None => break,
            },
        };

        let req: RpcRequest = match serde_json::from_slice(&frame) {
            Ok(req) => req,
            Err(e) => {
                let resp = RpcResponse::error(0, Code::InvalidArgument, format!("malformed frame: {e}"));
                if tx.send(resp).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let services = services.clone();
        let tx = tx.clone();
        tracker.spawn(async move {
            let resp = service::handle(&services, req).await;
            let _ = tx.send(resp).await;
        });
    }

    // The writer ends once every in-flight call has sent its response.
    drop(tx);
    writer.await.map_err(|_| RpcError::Closed)?
}
