//! Connection accept loop serving the mesh over HTTP/1.1

use crate::MeshService;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::tokio::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Pause after a failed `accept()` so persistent errors such as EMFILE don't spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections until `shutdown` resolves.
///
/// Each connection is served on its own task. When a caller disconnects,
/// hyper drops the in-flight handler, which abandons any upstream request.
pub async fn serve<F>(listener: TcpListener, service: Arc<MeshService>, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown requested, no longer accepting connections");
                break;
            }
        };

        let io = TokioIo::new(stream);
        let service = service.clone();

        tokio::task::spawn(async move {
            let handler = service_fn(move |req| {
                let service = service.clone();
                async move { Ok::<_, Infallible>(service.handle(req).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                debug!("Error serving HTTP connection from {}: {}", peer_addr, e);
            }
        });
    }
}
