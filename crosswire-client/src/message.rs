//! The protocol-neutral request/response/stream-result model.
//!
//! Every wire protocol is translated onto these types, so interceptor stages
//! and callers never see protocol-specific shapes. Headers and trailers are
//! [`http::HeaderMap`]s: case-insensitive names, each mapping to an ordered
//! list of values.

use std::any::Any;

use bytes::Bytes;
use http::HeaderMap;

use crate::error::ClientError;
use crosswire_core::Code;

/// A type-erased message passing through the typed interceptor extension
/// points.
///
/// Stages downcast to the concrete message types they care about; the engine
/// restores the concrete type after the chain runs.
pub type AnyMessage = Box<dyn Any + Send>;

/// An outbound request carrying a body of type `B`.
///
/// The same request shape flows through the typed leg (`B = AnyMessage`),
/// the raw leg (`B = Option<Bytes>`), and stream establishment (`B = ()`).
/// Immutable once handed to the transport.
#[derive(Debug)]
pub struct Request<B> {
    /// Fully resolved target URL.
    pub uri: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: B,
}

impl<B> Request<B> {
    /// Create a new request.
    pub fn new(uri: impl Into<String>, headers: HeaderMap, body: B) -> Self {
        Self {
            uri: uri.into(),
            headers,
            body,
        }
    }

    /// Replace the body, keeping URI and headers.
    pub fn map_body<B2>(self, body: B2) -> Request<B2> {
        Request {
            uri: self.uri,
            headers: self.headers,
            body,
        }
    }
}

/// A unary request whose message has been serialized.
pub type UnaryRequest = Request<Option<Bytes>>;

/// A request used to establish a stream; messages follow separately.
pub type StreamRequest = Request<()>;

/// A raw unary response.
///
/// Produced exactly once per unary call. `code` unifies HTTP, gRPC, and
/// Connect statuses; translator stages rewrite it as they strip
/// protocol-specific framing.
#[derive(Debug, Clone)]
pub struct UnaryResponse {
    /// Unified status code.
    pub code: Code,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body, if any.
    pub body: Option<Bytes>,
    /// Response trailers.
    pub trailers: HeaderMap,
    /// Error attached by the transport or a translator stage.
    pub error: Option<ClientError>,
}

/// One result delivered over a stream.
///
/// For any stream, results follow `Headers? Message* Complete`; nothing is
/// delivered after `Complete`.
#[derive(Debug)]
pub enum StreamResult<T> {
    /// Response headers were received.
    Headers(HeaderMap),
    /// A message was received.
    Message(T),
    /// The stream terminated.
    Complete {
        /// Final status code.
        code: Code,
        /// Error, if the stream failed.
        error: Option<ClientError>,
        /// Trailers, if the server sent any.
        trailers: Option<HeaderMap>,
    },
}

impl<T> StreamResult<T> {
    /// Returns the message value, if this is a `Message` result.
    pub fn message(self) -> Option<T> {
        match self {
            StreamResult::Message(value) => Some(value),
            _ => None,
        }
    }

    /// Returns true for the terminal `Complete` result.
    pub fn is_complete(&self) -> bool {
        matches!(self, StreamResult::Complete { .. })
    }
}

/// The typed outcome of a unary call.
#[derive(Debug)]
pub struct ResponseMessage<Res> {
    /// Final status code.
    pub code: Code,
    /// Response headers.
    pub headers: HeaderMap,
    /// The decoded message, or the error that terminated the call.
    pub result: Result<Res, ClientError>,
    /// Response trailers.
    pub trailers: HeaderMap,
}

impl<Res> ResponseMessage<Res> {
    /// Build a failed response from an error, carrying its captured metadata
    /// as headers.
    pub fn from_error(error: ClientError) -> Self {
        Self {
            code: error.code(),
            headers: error.metadata().cloned().unwrap_or_default(),
            result: Err(error),
            trailers: HeaderMap::new(),
        }
    }

    /// Build a locally canceled response.
    pub fn canceled() -> Self {
        Self::from_error(ClientError::new(Code::Canceled, "canceled by client"))
    }

    /// Consume the response, returning the message or the error.
    pub fn into_result(self) -> Result<Res, ClientError> {
        self.result
    }
}
