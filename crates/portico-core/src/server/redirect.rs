// HTTP→HTTPS redirect and ACME HTTP-01 challenge responder

use std::sync::Arc;

use hyper::{
    Method, Request, StatusCode,
    header::{self, HeaderValue},
};

use crate::{
    logging::Logger,
    tls::{ACME_CHALLENGE_PREFIX, ChallengeStore},
};

use super::{
    handler::{Handler, HandlerFuture, RequestBody, SharedHandler, status_response, text_response},
    middleware::{MAX_CONCURRENT_REQUESTS, REDIRECT_REQUEST_TIMEOUT, Recover, Throttle, Timeout},
};

/// Serves every plaintext request when TLS is enabled.
///
/// With a challenge store (`auto` mode), `GET /.well-known/acme-challenge/<token>` for an active
/// token is answered with its key authorization. Every other request gets a temporary redirect to
/// the same path and query on the origin.
#[derive(Clone)]
pub struct RedirectService {
    redirect_base: String,
    challenges: Option<ChallengeStore>,
    logger: Logger,
}

impl RedirectService {
    /// Redirect-only router used in `static` mode
    pub fn new(redirect_base: impl Into<String>, logger: Logger) -> Self {
        RedirectService {
            redirect_base: redirect_base.into().trim_end_matches('/').to_string(),
            challenges: None,
            logger,
        }
    }

    /// Challenge-aware router used in `auto` mode
    pub fn with_challenges(mut self, challenges: ChallengeStore) -> Self {
        self.challenges = Some(challenges);
        self
    }

    /// Wraps the service with panic recovery, the concurrency throttle and the request timeout
    pub fn into_handler(self) -> SharedHandler {
        let logger = self.logger.clone();
        let handler: SharedHandler = Arc::new(self);
        let handler = Timeout::wrap(handler, REDIRECT_REQUEST_TIMEOUT);
        let handler = Throttle::wrap(handler, MAX_CONCURRENT_REQUESTS);
        Recover::wrap(handler, logger)
    }

    fn challenge_response(&self, req: &Request<RequestBody>) -> Option<String> {
        if req.method() != Method::GET {
            return None;
        }

        let token = req.uri().path().strip_prefix(ACME_CHALLENGE_PREFIX)?;
        if token.is_empty() || token.contains('/') {
            return None;
        }

        self.challenges.as_ref()?.get(token)
    }

    /// `<origin>` + path + `?query` when the request has one
    pub fn location_for(&self, req: &Request<RequestBody>) -> String {
        let uri = req.uri();
        match uri.query() {
            Some(query) => format!("{}{}?{}", self.redirect_base, uri.path(), query),
            None => format!("{}{}", self.redirect_base, uri.path()),
        }
    }
}

impl Handler for RedirectService {
    fn handle(&self, req: Request<RequestBody>) -> HandlerFuture {
        if let Some(key_authorization) = self.challenge_response(&req) {
            log_debug!(self.logger, "Answering ACME challenge {}", req.uri().path());
            return Box::pin(async move { text_response(StatusCode::OK, key_authorization) });
        }

        let location = self.location_for(&req);
        log_debug!(self.logger, "Redirecting to {}", location);

        Box::pin(async move {
            let Ok(value) = HeaderValue::from_str(&location) else {
                return status_response(StatusCode::BAD_REQUEST);
            };

            let mut response = text_response(StatusCode::TEMPORARY_REDIRECT, "");
            response.headers_mut().insert(header::LOCATION, value);
            response
        })
    }
}
