// Minimal application graph served by the binary

use std::sync::Arc;

use hyper::StatusCode;
use portico::{
    Server,
    server::{
        Authenticator, SharedHandler, handler_fn,
        handler::{status_response, text_response},
    },
};

pub fn index(revision: String) -> SharedHandler {
    handler_fn(move |_req| {
        let body = format!("portico {revision}\n");
        async move { text_response(StatusCode::OK, body) }
    })
}

pub fn api() -> SharedHandler {
    handler_fn(|_req| async { status_response(StatusCode::NOT_FOUND) })
}

/// Authenticator used until a real identity provider is configured: nothing gets through
pub struct LockedAuthenticator;

impl Authenticator for LockedAuthenticator {
    fn auth_router(&self) -> SharedHandler {
        handler_fn(|_req| async { status_response(StatusCode::NOT_IMPLEMENTED) })
    }

    fn gate(&self, _inner: SharedHandler) -> SharedHandler {
        handler_fn(|_req| async { status_response(StatusCode::UNAUTHORIZED) })
    }
}

/// Shuts the server down on every Ctrl+C or SIGTERM
pub async fn shutdown_on_signal(server: Arc<Server>) {
    loop {
        if !wait_for_signal().await {
            return;
        }

        log::warn!("Received shutdown signal, shutting down the server...");
        server.shutdown().await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            log::error!("Failed to install SIGTERM handler: {e}");
            return tokio::signal::ctrl_c().await.is_ok();
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.is_ok(),
        received = terminate.recv() => received.is_some(),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}
