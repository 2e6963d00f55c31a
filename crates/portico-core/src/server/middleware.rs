// Request middleware shared by the application and redirect routers

use std::{
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};

use futures_util::FutureExt;
use hyper::{Request, StatusCode};
use tokio::sync::Semaphore;

use crate::logging::Logger;

use super::handler::{Handler, HandlerFuture, RequestBody, SharedHandler, status_response};

/// Maximum number of requests a router handles at the same time
pub const MAX_CONCURRENT_REQUESTS: usize = 1000;

/// Deadline of a single request on the redirect router
pub const REDIRECT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Turns a panicking handler into a `500 Internal Server Error`
pub struct Recover {
    inner: SharedHandler,
    logger: Logger,
}

impl Recover {
    pub fn wrap(inner: SharedHandler, logger: Logger) -> SharedHandler {
        Arc::new(Recover { inner, logger })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

impl Handler for Recover {
    fn handle(&self, req: Request<RequestBody>) -> HandlerFuture {
        let logger = self.logger.clone();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| self.inner.handle(req))) {
            Ok(future) => future,
            Err(payload) => {
                log_error!(logger, "request panic, {} {}: {}", method, path, panic_message(&*payload));
                return Box::pin(async { status_response(StatusCode::INTERNAL_SERVER_ERROR) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(response) => response,
                Err(payload) => {
                    log_error!(logger, "request panic, {} {}: {}", method, path, panic_message(&*payload));
                    status_response(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        })
    }
}

/// Rejects requests with `503 Service Unavailable` while `limit` requests are already running
pub struct Throttle {
    inner: SharedHandler,
    permits: Arc<Semaphore>,
}

impl Throttle {
    pub fn wrap(inner: SharedHandler, limit: usize) -> SharedHandler {
        Arc::new(Throttle {
            inner,
            permits: Arc::new(Semaphore::new(limit)),
        })
    }
}

impl Handler for Throttle {
    fn handle(&self, req: Request<RequestBody>) -> HandlerFuture {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            return Box::pin(async { status_response(StatusCode::SERVICE_UNAVAILABLE) });
        };

        let future = self.inner.handle(req);
        Box::pin(async move {
            let response = future.await;
            drop(permit);
            response
        })
    }
}

/// Answers `504 Gateway Timeout` when the inner handler takes longer than `limit`
pub struct Timeout {
    inner: SharedHandler,
    limit: Duration,
}

impl Timeout {
    pub fn wrap(inner: SharedHandler, limit: Duration) -> SharedHandler {
        Arc::new(Timeout { inner, limit })
    }
}

impl Handler for Timeout {
    fn handle(&self, req: Request<RequestBody>) -> HandlerFuture {
        let future = self.inner.handle(req);
        let limit = self.limit;

        Box::pin(async move {
            tokio::time::timeout(limit, future)
                .await
                .unwrap_or_else(|_| status_response(StatusCode::GATEWAY_TIMEOUT))
        })
    }
}

/// Logs method, path, status and duration of every request at info level
pub struct AccessLog {
    inner: SharedHandler,
    logger: Logger,
}

impl AccessLog {
    pub fn wrap(inner: SharedHandler, logger: Logger) -> SharedHandler {
        Arc::new(AccessLog {
            inner,
            logger: logger.with_target("portico::access"),
        })
    }
}

impl Handler for AccessLog {
    fn handle(&self, req: Request<RequestBody>) -> HandlerFuture {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let logger = self.logger.clone();
        let future = self.inner.handle(req);

        Box::pin(async move {
            let response = future.await;
            log_info!(
                logger,
                "{} {} {} {:?}",
                method,
                path,
                response.status().as_u16(),
                started.elapsed()
            );
            response
        })
    }
}
