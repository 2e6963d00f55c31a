use std::sync::Arc;

use hyper::{
    Request, StatusCode, Uri,
    http::uri::{Parts, PathAndQuery},
};

use crate::logging::Logger;

use super::{
    handler::{Handler, HandlerFuture, RequestBody, SharedHandler, status_response},
    middleware::{AccessLog, MAX_CONCURRENT_REQUESTS, Recover, Throttle},
};

/// Builds the application request-handling graph served by the main listener
pub trait RouterBuilder: Send + Sync {
    fn build(&self) -> SharedHandler;
}

/// Provides the authentication routes and the gate protecting the API
pub trait Authenticator: Send + Sync {
    /// Handler mounted under `/auth`
    fn auth_router(&self) -> SharedHandler;

    /// Wraps `inner` so that only authenticated requests reach it
    fn gate(&self, inner: SharedHandler) -> SharedHandler;
}

/// Prefix router: the longest mounted prefix wins, everything else goes to the fallback.
///
/// Requests outside of the base path are answered with `404`. The base path and the matched mount
/// prefix are stripped before the request reaches the mounted handler.
pub struct Router {
    base_path: String,
    mounts: Vec<(String, SharedHandler)>,
    fallback: SharedHandler,
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }

    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Returns what is left of `path` after `prefix`, if `prefix` matches a whole path segment
fn strip_segment_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }

    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn rewrite_path(req: &mut Request<RequestBody>, path: &str) -> Result<(), ()> {
    let path = if path.is_empty() { "/" } else { path };
    let path_and_query = match req.uri().query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };

    let mut parts = Parts::from(req.uri().clone());
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).map_err(|_| ())?);
    *req.uri_mut() = Uri::from_parts(parts).map_err(|_| ())?;
    Ok(())
}

impl Router {
    pub fn new(fallback: SharedHandler) -> Self {
        Router {
            base_path: String::new(),
            mounts: Vec::new(),
            fallback,
        }
    }

    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = normalize_prefix(base_path);
        self
    }

    pub fn mount(mut self, prefix: &str, handler: SharedHandler) -> Self {
        self.mounts.push((normalize_prefix(prefix), handler));
        self.mounts.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }
}

impl Handler for Router {
    fn handle(&self, mut req: Request<RequestBody>) -> HandlerFuture {
        let path = req.uri().path().to_string();

        let Some(local) = strip_segment_prefix(&path, &self.base_path) else {
            return Box::pin(async { status_response(StatusCode::NOT_FOUND) });
        };

        let (handler, rest) = self
            .mounts
            .iter()
            .find_map(|(prefix, handler)| {
                strip_segment_prefix(local, prefix).map(|rest| (handler, rest))
            })
            .unwrap_or((&self.fallback, local));

        if rewrite_path(&mut req, rest).is_err() {
            return Box::pin(async { status_response(StatusCode::BAD_REQUEST) });
        }

        handler.handle(req)
    }
}

/// The default application graph: `/auth`, the gated `/api/v1` and the index page for the rest
pub struct ApplicationRoutes {
    base_path: String,
    index: SharedHandler,
    api: SharedHandler,
    authenticator: Arc<dyn Authenticator>,
    access_log: bool,
    logger: Logger,
}

impl ApplicationRoutes {
    pub fn new(
        index: SharedHandler,
        api: SharedHandler,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        ApplicationRoutes {
            base_path: String::new(),
            index,
            api,
            authenticator,
            access_log: false,
            logger: Logger::global(),
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_access_log(mut self, enabled: bool) -> Self {
        self.access_log = enabled;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }
}

impl RouterBuilder for ApplicationRoutes {
    fn build(&self) -> SharedHandler {
        let router = Router::new(Arc::clone(&self.index))
            .with_base_path(&self.base_path)
            .mount("/auth", self.authenticator.auth_router())
            .mount("/api/v1", self.authenticator.gate(Arc::clone(&self.api)));

        let mut handler: SharedHandler = Throttle::wrap(Arc::new(router), MAX_CONCURRENT_REQUESTS);
        if self.access_log {
            handler = AccessLog::wrap(handler, self.logger.clone());
        }

        Recover::wrap(handler, self.logger.clone())
    }
}
