//! Protocol translation.
//!
//! Each wire protocol is implemented as an [`Interceptor`] stage that the
//! configuration appends after all user stages, making it the stage closest
//! to the wire: last to see outbound values, first to see inbound ones.
//! Everything above it observes the protocol-neutral model in
//! [`crate::message`].

mod connect;
mod grpc;
mod grpc_web;

use std::sync::Arc;

use crate::config::ClientConfig;
use crate::interceptor::Interceptor;

pub(crate) use connect::ConnectTranslator;
pub(crate) use grpc::GrpcTranslator;
pub(crate) use grpc_web::GrpcWebTranslator;

/// The wire protocols a client can speak.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RpcProtocol {
    /// The Connect protocol (JSON or binary payloads over plain HTTP
    /// semantics).
    #[default]
    Connect,
    /// gRPC over HTTP/2, with real HTTP trailers.
    Grpc,
    /// gRPC-Web, with trailers delivered as a flagged envelope frame.
    GrpcWeb,
}

impl RpcProtocol {
    /// Instantiate this protocol's translator stage for one call.
    pub(crate) fn create_translator(&self, config: &Arc<ClientConfig>) -> Arc<dyn Interceptor> {
        match self {
            RpcProtocol::Connect => Arc::new(ConnectTranslator::new(config.clone())),
            RpcProtocol::Grpc => Arc::new(GrpcTranslator::new(config.clone())),
            RpcProtocol::GrpcWeb => Arc::new(GrpcWebTranslator::new(config.clone())),
        }
    }
}

/// Header names used across the protocol translators.
pub(crate) mod header {
    pub const ACCEPT_ENCODING: &str = "accept-encoding";
    pub const CONTENT_ENCODING: &str = "content-encoding";
    pub const CONTENT_TYPE: &str = "content-type";

    pub const CONNECT_PROTOCOL_VERSION: &str = "connect-protocol-version";
    pub const CONNECT_TIMEOUT_MS: &str = "connect-timeout-ms";
    pub const CONNECT_ACCEPT_ENCODING: &str = "connect-accept-encoding";
    pub const CONNECT_CONTENT_ENCODING: &str = "connect-content-encoding";

    pub const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";
    pub const GRPC_ENCODING: &str = "grpc-encoding";
    pub const GRPC_MESSAGE: &str = "grpc-message";
    pub const GRPC_STATUS: &str = "grpc-status";
    pub const GRPC_STATUS_DETAILS: &str = "grpc-status-details-bin";
    pub const GRPC_TIMEOUT: &str = "grpc-timeout";
    pub const TE: &str = "te";
    pub const X_USER_AGENT: &str = "x-user-agent";
}

/// The Connect protocol version sent with every request.
pub(crate) const CONNECT_PROTOCOL_VERSION: &str = "1";

/// The user-agent value advertised on gRPC requests.
pub(crate) const USER_AGENT: &str = "crosswire-client";
