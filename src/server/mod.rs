//! HTTP/1 front end
//!
//! One accept loop; every connection gets its own task, and every request
//! runs through [`routes::handle`]. The loop exits when the shutdown token
//! is cancelled. Connections already accepted run to completion.

pub mod assets;
pub mod error;
pub mod multipart;
pub mod response;
pub mod routes;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::state::ContentStore;
use crate::upscale::UpscaleExecutor;

/// Everything a request handler needs
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<ContentStore>,
    pub executor: UpscaleExecutor,
}

impl AppState {
    pub fn new(config: Arc<Config>, store: Arc<ContentStore>) -> Self {
        let executor = UpscaleExecutor::from_config(Arc::clone(&config), Arc::clone(&store));
        Self {
            config,
            store,
            executor,
        }
    }
}

/// Serve requests from `listener` until `shutdown` fires
pub async fn serve(listener: TcpListener, state: Arc<AppState>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutting down HTTP server");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let io = TokioIo::new(stream);
                        let state = Arc::clone(&state);

                        tokio::spawn(async move {
                            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                                let state = Arc::clone(&state);
                                async move { Ok::<_, Infallible>(routes::handle(state, req).await) }
                            });

                            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                                error!(peer = %peer, "Error serving connection: {:?}", err);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::store::tests::open_store;
    use std::time::Duration;

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(Config::rooted_at(dir.path()));
        let store = Arc::new(open_store(dir.path()));
        let state = Arc::new(AppState::new(config, store));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve(listener, state, shutdown.clone()));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server did not stop")
            .unwrap();
    }
}
