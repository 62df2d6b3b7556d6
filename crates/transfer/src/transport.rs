//! The single-request transport seam.
//!
//! `ChunkedTransport` is implemented by the client crate on top of `reqwest`
//! and by the in-memory remote used in tests. Keeping it a trait keeps the
//! session state machines free of any HTTP client.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use driveport_protocol::{HttpRequest, HttpResponse};

use crate::error::TransportError;

/// Boxed future returned by [`ChunkedTransport::request`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;

/// Issues one HTTP request and returns the complete response.
///
/// Any status code is a successful call at this layer; only connection-level
/// failures are errors. No retry logic belongs here.
pub trait ChunkedTransport: Send + Sync {
    fn request(&self, request: HttpRequest) -> TransportFuture<'_>;
}

impl<T: ChunkedTransport + ?Sized> ChunkedTransport for Arc<T> {
    fn request(&self, request: HttpRequest) -> TransportFuture<'_> {
        (**self).request(request)
    }
}

impl<T: ChunkedTransport + ?Sized> ChunkedTransport for &T {
    fn request(&self, request: HttpRequest) -> TransportFuture<'_> {
        (**self).request(request)
    }
}
