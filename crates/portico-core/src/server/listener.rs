use std::{
    convert::Infallible,
    fmt::Display,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use http_body_util::BodyExt;
use hyper::{Request, body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinSet,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{BindError, HandshakeError, ShutdownError},
    logging::Logger,
    tls::TlsSource,
};

use super::handler::SharedHandler;

/// Bound on the TLS handshake of a new connection
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on reading the request headers
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Keep-alive connections with no request in flight are closed after this long
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Extra time `shutdown` waits on top of the drain timeout for the accept loop to report back
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Http,
    Https,
}

impl Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Http => write!(f, "http"),
            Transport::Https => write!(f, "https"),
        }
    }
}

/// Lifecycle of a listener. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ListenerState {
    NotStarted,
    Running,
    ShuttingDown,
    Stopped,
}

/// A bound socket that serves HTTP/1.1, optionally over TLS
pub struct Listener {
    transport: Transport,
    address: SocketAddr,
    handler: SharedHandler,
    tls: Option<TlsSource>,
    drain_timeout: Duration,
    idle_timeout: Duration,
    socket: Mutex<Option<TcpListener>>,
    state: watch::Sender<ListenerState>,
    token: CancellationToken,
    logger: Logger,
}

/// What every connection task needs, cloned out of the listener
#[derive(Clone)]
struct ConnectionContext {
    handler: SharedHandler,
    tls: Option<TlsSource>,
    idle_timeout: Duration,
    token: CancellationToken,
    logger: Logger,
}

/// Requests in flight on one connection and when the last one finished
struct Activity {
    in_flight: AtomicUsize,
    last_seen: Mutex<Instant>,
}

impl Activity {
    fn new() -> Self {
        Activity {
            in_flight: AtomicUsize::new(0),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    fn begin(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// When the connection counts as idle, `None` while a request is in flight
    fn idle_deadline(&self, idle_timeout: Duration) -> Option<Instant> {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return None;
        }
        let last_seen = *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        Some(last_seen + idle_timeout)
    }
}

/// Ends the request in `Activity` even when the handler future is dropped
struct RequestGuard(Arc<Activity>);

impl RequestGuard {
    fn new(activity: &Arc<Activity>) -> Self {
        activity.begin();
        RequestGuard(Arc::clone(activity))
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.0.end();
    }
}

impl Listener {
    /// Binds `address`. The listener does not accept connections until `serve` is called.
    pub async fn bind(
        transport: Transport,
        address: SocketAddr,
        handler: SharedHandler,
        tls: Option<TlsSource>,
        drain_timeout: Duration,
        logger: Logger,
    ) -> Result<Self, BindError> {
        let socket = TcpListener::bind(address)
            .await
            .map_err(|source| BindError {
                transport,
                address,
                source,
            })?;

        let address = socket.local_addr().map_err(|source| BindError {
            transport,
            address,
            source,
        })?;

        let (state, _) = watch::channel(ListenerState::NotStarted);

        Ok(Listener {
            transport,
            address,
            handler,
            tls,
            drain_timeout,
            idle_timeout: IDLE_TIMEOUT,
            socket: Mutex::new(Some(socket)),
            state,
            token: CancellationToken::new(),
            logger,
        })
    }

    /// Replaces the keep-alive idle bound, `IDLE_TIMEOUT` by default
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// The address the socket is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Moves the state forward, never backward
    fn advance(&self, next: ListenerState) {
        self.state.send_if_modified(|state| {
            if *state < next {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    /// Accepts connections until `shutdown` is called, then drains them.
    ///
    /// Returns immediately when the listener was already started or stopped.
    pub async fn serve(&self) {
        let started = self.state.send_if_modified(|state| {
            if *state == ListenerState::NotStarted {
                *state = ListenerState::Running;
                true
            } else {
                false
            }
        });

        if !started {
            return;
        }

        let Some(socket) = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            self.advance(ListenerState::Stopped);
            return;
        };

        log_info!(self.logger, "Serving {} on {}", self.transport, self.address);

        let context = ConnectionContext {
            handler: Arc::clone(&self.handler),
            tls: self.tls.clone(),
            idle_timeout: self.idle_timeout,
            token: self.token.clone(),
            logger: self.logger.clone(),
        };

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,

                accepted = socket.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(handle_connection(stream, peer, context.clone()));
                    }
                    Err(e) => {
                        log_warn!(self.logger, "Failed to accept {} connection: {}", self.transport, e);
                        tokio::select! {
                            _ = tokio::time::sleep(ACCEPT_ERROR_PAUSE) => {}
                            _ = self.token.cancelled() => {}
                        }
                    }
                },

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        self.advance(ListenerState::ShuttingDown);
        drop(socket);

        log_debug!(
            self.logger,
            "Draining {} {} connection(s)",
            connections.len(),
            self.transport
        );

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            log_warn!(
                self.logger,
                "Aborting {} {} connection(s) still open after {:?}",
                connections.len(),
                self.transport,
                self.drain_timeout
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }

        self.advance(ListenerState::Stopped);
        log_info!(self.logger, "Stopped {} listener on {}", self.transport, self.address);
    }

    /// Stops accepting, lets open connections finish within the drain timeout and waits for the
    /// accept loop to report `Stopped`. Calling it again after that is a no-op.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        let never_started = self.state.send_if_modified(|state| {
            if *state == ListenerState::NotStarted {
                *state = ListenerState::Stopped;
                true
            } else {
                false
            }
        });

        if never_started {
            self.socket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            return Ok(());
        }

        if self.state() == ListenerState::Stopped {
            return Ok(());
        }

        self.token.cancel();

        let waited = self.drain_timeout + SHUTDOWN_MARGIN;
        let mut state = self.state.subscribe();
        match tokio::time::timeout(waited, state.wait_for(|s| *s == ListenerState::Stopped)).await {
            Ok(_) => Ok(()),
            Err(_) => Err(ShutdownError::TimedOut {
                transport: self.transport,
                waited,
            }),
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, context: ConnectionContext) {
    let Some(tls) = &context.tls else {
        serve_http(stream, peer, &context).await;
        return;
    };

    let handshake = tokio::select! {
        result = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, tls.accept(stream)) => {
            result.unwrap_or(Err(HandshakeError::TimedOut(TLS_HANDSHAKE_TIMEOUT)))
        }
        _ = context.token.cancelled() => return,
    };

    match handshake {
        Ok(stream) => serve_http(stream, peer, &context).await,
        Err(e) => log_warn!(context.logger, "TLS handshake with {} failed: {}", peer, e),
    }
}

async fn serve_http<IO>(io: IO, peer: SocketAddr, context: &ConnectionContext)
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let activity = Arc::new(Activity::new());

    let handler = Arc::clone(&context.handler);
    let requests = Arc::clone(&activity);
    let service = service_fn(move |req: Request<Incoming>| {
        let handler = Arc::clone(&handler);
        let guard = RequestGuard::new(&requests);
        async move {
            let req = req.map(|body| body.boxed_unsync());
            let response = handler.handle(req).await;
            drop(guard);
            Ok::<_, Infallible>(response)
        }
    });

    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(HEADER_READ_TIMEOUT)
        .serve_connection(TokioIo::new(io), service);
    let mut conn = std::pin::pin!(conn);

    let mut shutting_down = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    log_debug!(context.logger, "Connection from {} closed with error: {}", peer, e);
                }
                break;
            }

            _ = context.token.cancelled(), if !shutting_down => {
                shutting_down = true;
                conn.as_mut().graceful_shutdown();
            }

            _ = idle_tick(&activity, context.idle_timeout), if !shutting_down => {
                if activity
                    .idle_deadline(context.idle_timeout)
                    .is_some_and(|deadline| deadline <= Instant::now())
                {
                    log_debug!(context.logger, "Closing idle connection from {}", peer);
                    shutting_down = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        }
    }
}

/// Sleeps until the connection may have become idle
async fn idle_tick(activity: &Activity, idle_timeout: Duration) {
    let deadline = activity
        .idle_deadline(idle_timeout)
        .unwrap_or_else(|| Instant::now() + idle_timeout);
    tokio::time::sleep_until(deadline).await;
}
