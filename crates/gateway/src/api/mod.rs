//! HTTP surfaces: the health endpoint and the control API.

pub mod auth;
pub mod control;
pub mod events;
pub mod health;
pub mod ratelimit;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::Notify;

use drost_domain::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    Health,
    Control,
}

/// A running listener with graceful shutdown.
pub struct ServerHandle {
    pub kind: ServerKind,
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
    task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.task.await;
    }
}

/// Bind and serve a router, returning a handle for shutdown.
pub async fn serve_router(
    kind: ServerKind,
    host: &str,
    port: u16,
    router: Router,
) -> Result<ServerHandle> {
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .map_err(|e| Error::Config(format!("cannot bind {host}:{port}: {e}")))?;
    let addr = listener.local_addr()?;

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    let task = tokio::spawn(async move {
        let serve = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { signal.notified().await });
        if let Err(e) = serve.await {
            tracing::warn!(error = %e, ?kind, "server exited with error");
        }
    });

    tracing::info!(?kind, %addr, "server listening");
    Ok(ServerHandle {
        kind,
        addr,
        shutdown,
        task,
    })
}
