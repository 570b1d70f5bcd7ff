//! Multi-protocol RPC client engine.
//!
//! crosswire invokes remote methods over one of three wire protocols —
//! Connect, gRPC, and gRPC-Web — through a single transport abstraction,
//! with pluggable serialization codecs and compression pools.
//!
//! ## Features
//!
//! - Unary calls (async and callback styles)
//! - Bidirectional, client-only, and server-only streams, each with
//!   callback-driven or pull-based delivery
//! - Per-call interceptor chains with five extension points
//! - Request compression and response decompression (gzip out of the box)
//! - Protocol-accurate error translation, including typed error details
//!
//! ## Example
//!
//! ```ignore
//! use crosswire_client::{ProtocolClient, RpcProtocol};
//! use http::HeaderMap;
//!
//! let client = ProtocolClient::builder("http://localhost:3000")
//!     .transport(transport)
//!     .protocol(RpcProtocol::Connect)
//!     .build()?;
//!
//! // Unary
//! let response = client
//!     .unary::<EchoRequest, EchoResponse>("echo.v1.EchoService/Echo", HeaderMap::new(), request)
//!     .await;
//! println!("{:?}", response.into_result()?);
//!
//! // Server streaming
//! use futures::StreamExt;
//! let mut stream = client
//!     .server_stream::<WatchRequest, Event>("events.v1.EventService/Watch", HeaderMap::new());
//! stream.send(WatchRequest::default());
//! while let Some(result) = stream.results_mut().next().await {
//!     match result {
//!         StreamResult::Headers(h) => println!("headers: {:?}", h),
//!         StreamResult::Message(event) => println!("event: {:?}", event),
//!         StreamResult::Complete { code, .. } => println!("done: {:?}", code),
//!     }
//! }
//! ```
//!
//! ## Transports
//!
//! This crate defines the [`Transport`] contract but ships no HTTP client;
//! supply an adapter over your HTTP stack of choice. The adapter stays
//! oblivious to envelopes and protocols — it moves bytes and reports
//! headers, data chunks, and the close event.
//!
//! ## Cancellation and timeouts
//!
//! Streams expose an explicit `cancel()`, which force-closes the transport
//! stream and synthesizes a canceled terminal result. A configured timeout
//! is sent to the server as a protocol timeout header and enforced locally;
//! expiry surfaces as a `Complete` with the deadline-exceeded code.

mod builder;
mod client;
pub mod config;
mod error;
mod interceptor;
mod message;
mod protocol;
mod streaming;
pub mod transport;

pub use builder::{ClientBuildError, ClientBuilder};
pub use client::ProtocolClient;
pub use error::ClientError;

pub use config::ClientConfig;
pub use interceptor::{
    CallMetrics, HeaderInterceptor, Interceptor, InterceptorFactory, Proceed, TryProceed,
};
pub use message::{
    AnyMessage, Request, ResponseMessage, StreamRequest, StreamResult, UnaryRequest, UnaryResponse,
};
pub use protocol::RpcProtocol;
pub use streaming::{
    BidirectionalStream, ClientStream, ResultStream, ServerStream, ServerStreamSender,
    StreamSender,
};
pub use transport::{BoxFuture, Cancelable, ResponseCallbacks, Transport, TransportStream};

// Re-export core types that users need.
pub use crosswire_core::{
    Code, Codec, CompressionPool, ErrorDetail, GzipPool, IdentityPool, JsonCodec, PoolRegistry,
    ProtoCodec, RequestCompression,
};
