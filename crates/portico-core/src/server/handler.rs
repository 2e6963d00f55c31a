use std::{convert::Infallible, future::Future, pin::Pin, sync::Arc};

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, combinators::UnsyncBoxBody};
use hyper::{
    Request, Response, StatusCode,
    header::{self, HeaderValue},
};

/// The body type every handler receives, whatever connection it came from
pub type RequestBody = UnsyncBoxBody<Bytes, hyper::Error>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Response<Full<Bytes>>> + Send>>;

/// A request handler: the application router, the redirect router and every middleware layer
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, req: Request<RequestBody>) -> HandlerFuture;
}

pub type SharedHandler = Arc<dyn Handler>;

struct HandlerFn<F>(F);

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request<RequestBody>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    fn handle(&self, req: Request<RequestBody>) -> HandlerFuture {
        Box::pin((self.0)(req))
    }
}

/// Turns an async closure into a shared handler
pub fn handler_fn<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(Request<RequestBody>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

/// A plain-text response with the given status
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// A response carrying the canonical reason phrase of `status` as its body
pub fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    text_response(status, status.canonical_reason().unwrap_or_default())
}

pub fn empty_body() -> RequestBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

pub fn full_body(bytes: impl Into<Bytes>) -> RequestBody {
    Full::new(bytes.into())
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}
