//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::service::router;
use crate::error::{PostguardError, Result};
use crate::ratelimit::PolicySet;

/// HTTP server for the rate limit decision service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The policy limiters served
    policies: Arc<PolicySet>,
    /// How often expired records are swept
    purge_interval: Duration,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, policies: Arc<PolicySet>, purge_interval: Duration) -> Self {
        Self {
            addr,
            policies,
            purge_interval,
        }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            PostguardError::Io(e)
        })?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let purge_task = spawn_purge_task(self.policies.clone(), self.purge_interval);
        let app = router(self.policies);

        info!(addr = %local_addr, "Starting HTTP server for rate limit decisions");

        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            PostguardError::Io(e)
        });

        purge_task.abort();
        result
    }
}

/// Periodically drop expired records from every policy limiter.
pub fn spawn_purge_task(policies: Arc<PolicySet>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = policies.purge_expired();
            if purged > 0 {
                debug!(purged, "Purged expired rate limit records");
            }
        }
    })
}
