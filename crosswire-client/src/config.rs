//! Per-client configuration.
//!
//! A [`ClientConfig`] is built once per client instance and passed down by
//! reference; there is no ambient global state. The active protocol's
//! translator is appended to the interceptor factory list at construction,
//! so it always sits closest to the wire.

use std::sync::Arc;
use std::time::Duration;

use crate::interceptor::{Interceptor, InterceptorFactory};
use crate::protocol::RpcProtocol;
use crosswire_core::{BoxedPool, PoolRegistry, RequestCompression};

/// Immutable configuration shared by every call a client makes.
#[derive(Clone)]
pub struct ClientConfig {
    /// Target host (e.g., `https://api.example.com`).
    pub host: String,
    /// Wire protocol used for requests and streams.
    pub protocol: RpcProtocol,
    /// Name of the active serialization codec (e.g., "json", "proto").
    pub codec_name: &'static str,
    /// Outbound compression policy, if any.
    pub request_compression: Option<RequestCompression>,
    /// Pools available for decompressing responses.
    pub response_pools: PoolRegistry,
    /// Timeout applied to every call (header + engine deadline).
    pub timeout: Option<Duration>,
    /// User interceptor factories, in registration order.
    pub(crate) interceptors: Vec<Arc<dyn InterceptorFactory>>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("protocol", &self.protocol)
            .field("codec_name", &self.codec_name)
            .field("request_compression", &self.request_compression)
            .field("timeout", &self.timeout)
            .field("interceptor_count", &self.interceptors.len())
            .finish()
    }
}

impl ClientConfig {
    /// Resolve the full URL for a procedure path.
    pub(crate) fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.host.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Comma-joined non-identity pool names for accept-encoding headers, or
    /// `None` when only identity is registered.
    pub(crate) fn accept_encoding_header(&self) -> Option<String> {
        let names = self.response_pools.accept_encoding_names();
        if names.is_empty() {
            None
        } else {
            Some(names.join(", "))
        }
    }

    /// Look up a response pool by encoding name.
    pub(crate) fn response_pool(&self, name: &str) -> Option<&BoxedPool> {
        self.response_pools.get(name)
    }

    /// Timeout in whole milliseconds, for outbound timeout headers.
    pub(crate) fn timeout_ms(&self) -> Option<u128> {
        self.timeout.map(|t| t.as_millis())
    }

    /// Instantiate the per-call stage list: user stages in registration
    /// order, then the protocol translator closest to the wire.
    pub(crate) fn create_stages(config: &Arc<ClientConfig>) -> Vec<Arc<dyn Interceptor>> {
        let mut stages: Vec<Arc<dyn Interceptor>> = config
            .interceptors
            .iter()
            .map(|factory| factory.create(config))
            .collect();
        stages.push(config.protocol.create_translator(config));
        stages
    }
}
