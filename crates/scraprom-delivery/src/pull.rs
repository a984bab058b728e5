use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use scraprom_common::error::{Result, ScrapromError};
use scraprom_metrics::{MetricsRegistry, TEXT_CONTENT_TYPE};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tracing::{info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

pub fn metrics_router(registry: Arc<MetricsRegistry>, path: &str) -> Router {
    Router::new()
        .route(path, get(render_metrics))
        .with_state(registry)
}

async fn render_metrics(State(registry): State<Arc<MetricsRegistry>>) -> impl IntoResponse {
    let payload = registry.render_prometheus();

    let mut response = Response::new(Body::from(payload));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(TEXT_CONTENT_TYPE),
    );

    response
}

/// Scrape endpoint running on its own task and listener.
pub struct MetricsServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MetricsServer {
    pub async fn bind(addr: &str, path: &str, registry: Arc<MetricsRegistry>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ScrapromError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, path = %path, "metrics endpoint listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = metrics_router(registry, path);
        let handle = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %err, "metrics endpoint stopped with error");
            }
        });

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops accepting scrapes and closes the listener. Connections still
    /// open after a short grace period are dropped.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        let Some(mut handle) = self.handle.take() else {
            return;
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
            handle.abort();
            let _ = handle.await;
        }
        info!(addr = %self.local_addr, "metrics endpoint closed");
    }
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
