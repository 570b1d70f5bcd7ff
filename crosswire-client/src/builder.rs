//! Client builder.
//!
//! Provides a fluent API for assembling a [`ProtocolClient`] from its
//! configuration surface: host, protocol, codec, compression policy,
//! response pools, interceptors, and timeout.

use std::sync::Arc;
use std::time::Duration;

use crate::client::ProtocolClient;
use crate::config::ClientConfig;
use crate::interceptor::InterceptorFactory;
use crate::protocol::RpcProtocol;
use crate::transport::Transport;
use crosswire_core::{Codec, CompressionPool, JsonCodec, PoolRegistry, RequestCompression};

/// Error building a client.
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    /// No transport was supplied.
    #[error("a transport is required; call ClientBuilder::transport")]
    MissingTransport,
}

/// Builder for a [`ProtocolClient`].
///
/// # Example
///
/// ```ignore
/// let client = ProtocolClient::builder("https://api.example.com")
///     .transport(transport)
///     .protocol(RpcProtocol::GrpcWeb)
///     .request_compression(RequestCompression::new(1024, GzipPool::default()))
///     .timeout(Duration::from_secs(30))
///     .build()?;
/// ```
pub struct ClientBuilder {
    host: String,
    transport: Option<Arc<dyn Transport>>,
    protocol: RpcProtocol,
    request_compression: Option<RequestCompression>,
    response_pools: PoolRegistry,
    timeout: Option<Duration>,
    interceptors: Vec<Arc<dyn InterceptorFactory>>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("host", &self.host)
            .field("transport", &self.transport.is_some())
            .field("protocol", &self.protocol)
            .field("request_compression", &self.request_compression)
            .field("timeout", &self.timeout)
            .field("interceptor_count", &self.interceptors.len())
            .finish()
    }
}

impl ClientBuilder {
    /// Create a new builder for the given host.
    ///
    /// The host should include the scheme (e.g., "http://localhost:3000"),
    /// without a trailing slash.
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            transport: None,
            protocol: RpcProtocol::default(),
            request_compression: None,
            response_pools: PoolRegistry::default(),
            timeout: None,
            interceptors: Vec::new(),
        }
    }

    /// Set the transport that performs HTTP work.
    pub fn transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Select the wire protocol. Defaults to Connect.
    pub fn protocol(mut self, protocol: RpcProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Configure outbound request compression (pool + minimum-byte
    /// threshold). Off by default.
    pub fn request_compression(mut self, compression: RequestCompression) -> Self {
        self.request_compression = Some(compression);
        self
    }

    /// Register an additional pool for response decompression.
    ///
    /// Identity and gzip are registered out of the box.
    pub fn register_pool<P: CompressionPool>(mut self, pool: P) -> Self {
        self.response_pools.register(pool);
        self
    }

    /// Replace the response pool registry entirely.
    pub fn response_pools(mut self, pools: PoolRegistry) -> Self {
        self.response_pools = pools;
        self
    }

    /// Set the timeout for every call. Sent to the server as a protocol
    /// timeout header and enforced locally as a deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add an interceptor factory. Factories run in registration order on
    /// the request path and in reverse on the response path; the protocol
    /// translator is always appended after them.
    pub fn with_interceptor<F: InterceptorFactory + 'static>(mut self, factory: F) -> Self {
        self.interceptors.push(Arc::new(factory));
        self
    }

    /// Build a client using the JSON codec.
    pub fn build(self) -> Result<ProtocolClient<JsonCodec>, ClientBuildError> {
        self.build_with_codec(JsonCodec)
    }

    /// Build a client with a specific serialization codec.
    pub fn build_with_codec<C: Codec>(
        self,
        codec: C,
    ) -> Result<ProtocolClient<C>, ClientBuildError> {
        let transport = self.transport.ok_or(ClientBuildError::MissingTransport)?;
        let config = Arc::new(ClientConfig {
            host: self.host,
            protocol: self.protocol,
            codec_name: codec.name(),
            request_compression: self.request_compression,
            response_pools: self.response_pools,
            timeout: self.timeout,
            interceptors: self.interceptors,
        });
        Ok(ProtocolClient::new(transport, config, codec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::ClientError;
    use crate::message::{StreamRequest, UnaryRequest, UnaryResponse};
    use crate::transport::{BoxFuture, ResponseCallbacks, TransportStream};

    struct NullTransport;

    impl Transport for NullTransport {
        fn unary(
            &self,
            _request: UnaryRequest,
        ) -> BoxFuture<'static, Result<UnaryResponse, ClientError>> {
            Box::pin(async { Err(ClientError::Transport("null transport".into())) })
        }

        fn open_stream(
            &self,
            _request: StreamRequest,
            _callbacks: ResponseCallbacks,
        ) -> Box<dyn TransportStream> {
            unimplemented!()
        }
    }

    #[test]
    fn test_build_requires_transport() {
        let result = ClientBuilder::new("http://localhost").build();
        assert!(matches!(result, Err(ClientBuildError::MissingTransport)));
    }

    #[test]
    fn test_build_defaults() {
        let client = ClientBuilder::new("http://localhost:3000")
            .transport(NullTransport)
            .build()
            .unwrap();

        let config = client.config();
        assert_eq!(config.host, "http://localhost:3000");
        assert_eq!(config.protocol, RpcProtocol::Connect);
        assert_eq!(config.codec_name, "json");
        assert!(config.request_compression.is_none());
        assert!(config.timeout.is_none());
        // Gzip is registered by default.
        assert!(config.response_pools.get("gzip").is_some());
    }

    #[test]
    fn test_build_with_proto_codec_sets_codec_name() {
        let client = ClientBuilder::new("http://localhost")
            .transport(NullTransport)
            .protocol(RpcProtocol::Grpc)
            .build_with_codec(crosswire_core::ProtoCodec)
            .unwrap();

        assert_eq!(client.config().codec_name, "proto");
        assert_eq!(client.config().protocol, RpcProtocol::Grpc);
    }
}
