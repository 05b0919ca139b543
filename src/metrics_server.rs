//! Expose the metrics registry over HTTP, for Prometheus to scrape.
use crate::configuration::MetricsSettings;
use crate::metrics;
use anyhow::Context;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::Registry;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running HTTP server serving `GET <path>` with the Prometheus text exposition format.
pub struct MetricsServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

impl MetricsServer {
    /// Bind `0.0.0.0:<port>` and start serving in a background task.
    #[tracing::instrument(name = "metrics_server_start", skip_all, fields(port = settings.port, path = %settings.path))]
    pub async fn start(
        settings: &MetricsSettings,
        registry: Arc<Registry>,
    ) -> Result<Self, anyhow::Error> {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, settings.port))
            .await
            .with_context(|| format!("Failed to bind the metrics server to port {}", settings.port))?;
        let local_addr = listener.local_addr()?;

        let app = Router::new()
            .route(&settings.path, get(exposition))
            .with_state(registry);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });
        tracing::info!(%local_addr, "Metrics server listening");

        Ok(Self {
            local_addr,
            shutdown,
            handle,
        })
    }

    /// The address the server is bound to. Useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait at most `deadline` for in-flight requests.
    #[tracing::instrument(name = "metrics_server_shutdown", skip_all)]
    pub async fn shutdown(self, deadline: Duration) -> Result<(), anyhow::Error> {
        self.shutdown.cancel();
        match tokio::time::timeout(deadline, self.handle).await {
            Ok(Ok(served)) => served.context("The metrics server failed"),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("The metrics server task panicked")),
            Err(_) => anyhow::bail!("The metrics server did not shut down within {deadline:?}"),
        }
    }
}

async fn exposition(State(registry): State<Arc<Registry>>) -> Response {
    match metrics::render(&registry) {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            tracing::error!(error = ?e, "Failed to render metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to gather metrics: {e}"),
            )
                .into_response()
        }
    }
}
