//! The transport contract.
//!
//! A transport performs raw HTTP work and nothing else: it does not
//! understand envelopes, protocols, or codecs. Two capabilities are
//! required:
//!
//! - a one-shot send-and-receive-one-response operation ([`Transport::unary`])
//! - an open-stream operation yielding a duplex channel
//!   ([`Transport::open_stream`]): the engine sends bytes through the
//!   returned [`TransportStream`] and receives header, data-chunk, and close
//!   events through [`ResponseCallbacks`].
//!
//! Transport adapters map HTTP statuses onto [`Code`](crosswire_core::Code)
//! via `Code::from_http_status` and report network failures either as `Err`
//! (unary) or through the close event (streams). Events for one stream must
//! be delivered in order, though not necessarily from one thread.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http::HeaderMap;

use crate::error::ClientError;
use crate::message::{StreamRequest, UnaryRequest, UnaryResponse};
use crosswire_core::Code;

/// Boxed future alias used across the transport seam.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Events a transport reports for one open stream.
///
/// Invocation order per stream: `on_headers` at most once, `on_data` any
/// number of times, `on_close` exactly once (last).
pub struct ResponseCallbacks {
    /// Response headers arrived.
    pub on_headers: Box<dyn Fn(HeaderMap) + Send + Sync>,
    /// A chunk of response body bytes arrived. Chunk boundaries carry no
    /// meaning; a chunk may hold zero, one, or many logical frames.
    pub on_data: Box<dyn Fn(Bytes) + Send + Sync>,
    /// The stream ended. `code`/`error` describe transport-level failures;
    /// `trailers` are HTTP trailers if the transport saw any.
    pub on_close: Box<dyn Fn(Code, Option<ClientError>, Option<HeaderMap>) + Send + Sync>,
}

/// The send side of one open stream.
pub trait TransportStream: Send + Sync {
    /// Send raw bytes over the stream.
    fn send_frame(&self, frame: Bytes);

    /// Half-close the send side; the response may continue to arrive.
    fn close(&self);

    /// Abort the stream, closing the underlying connection.
    fn cancel(&self);
}

/// The HTTP capability consumed by the client engine.
pub trait Transport: Send + Sync + 'static {
    /// Perform a one-shot request, resolving with the complete response.
    fn unary(&self, request: UnaryRequest) -> BoxFuture<'static, Result<UnaryResponse, ClientError>>;

    /// Open a duplex stream. The returned handle accepts outbound bytes;
    /// inbound events are delivered through `callbacks`.
    fn open_stream(
        &self,
        request: StreamRequest,
        callbacks: ResponseCallbacks,
    ) -> Box<dyn TransportStream>;
}

/// Handle for canceling an in-flight unary call.
pub struct Cancelable {
    cancel: Box<dyn FnOnce() + Send>,
}

impl Cancelable {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Box::new(cancel),
        }
    }

    /// Cancel the call. Best-effort: a response already in flight may still
    /// be delivered.
    pub fn cancel(self) {
        (self.cancel)();
    }
}

impl std::fmt::Debug for Cancelable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancelable").finish()
    }
}
