//! Compression pools and the pool registry.
//!
//! A compression pool is a named compress/decompress algorithm used for
//! per-message (envelope) compression and for unary body compression:
//! - [`CompressionPool`]: the pool trait
//! - [`GzipPool`]: gzip via flate2
//! - [`IdentityPool`]: no-op passthrough
//! - [`PoolRegistry`]: name-indexed set of pools used for response decompression
//! - [`RequestCompression`]: outbound compression policy (pool + byte threshold)

use std::io;
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::Compression as GzipLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

/// A named, pluggable compress/decompress algorithm.
///
/// Pool names appear on the wire in accept-encoding and content-encoding
/// style headers (e.g. "gzip").
pub trait CompressionPool: Send + Sync + 'static {
    /// The encoding name used in HTTP headers (e.g., "gzip").
    fn name(&self) -> &'static str;

    /// Compress data.
    fn compress(&self, data: &[u8]) -> io::Result<Bytes>;

    /// Decompress data.
    fn decompress(&self, data: &[u8]) -> io::Result<Bytes>;
}

/// A cheaply clonable, type-erased compression pool handle.
#[derive(Clone)]
pub struct BoxedPool(Arc<dyn CompressionPool>);

impl BoxedPool {
    /// Create a new boxed pool.
    pub fn new<P: CompressionPool>(pool: P) -> Self {
        BoxedPool(Arc::new(pool))
    }

    /// Get the pool name for HTTP headers.
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Compress data.
    pub fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        self.0.compress(data)
    }

    /// Decompress data.
    pub fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        self.0.decompress(data)
    }
}

impl std::fmt::Debug for BoxedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BoxedPool").field(&self.name()).finish()
    }
}

/// Gzip pool using flate2.
#[derive(Debug, Clone, Copy)]
pub struct GzipPool {
    /// Compression level (0-9). Default is 6.
    pub level: u32,
}

impl Default for GzipPool {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl GzipPool {
    /// Create a new GzipPool with the specified compression level.
    ///
    /// Level ranges from 0 (no compression) to 9 (best compression).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

fn is_gzipped(data: &[u8]) -> bool {
    data.starts_with(&[0x1f, 0x8b])
}

impl CompressionPool for GzipPool {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        // Already-gzipped (or empty) input passes through untouched so that
        // double application cannot corrupt a payload.
        if data.is_empty() || is_gzipped(data) {
            return Ok(Bytes::copy_from_slice(data));
        }

        let mut encoder = GzEncoder::new(Vec::new(), GzipLevel::new(self.level));
        encoder.write_all(data)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        // Tolerate uncompressed input: sniff the gzip magic bytes and pass
        // anything else through unchanged.
        if data.is_empty() || !is_gzipped(data) {
            return Ok(Bytes::copy_from_slice(data));
        }

        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(Bytes::from(decompressed))
    }
}

/// Identity pool (no compression).
///
/// Always registered, but never advertised in accept-encoding negotiation.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPool;

/// The reserved name of the identity pool.
pub const IDENTITY: &str = "identity";

impl CompressionPool for IdentityPool {
    fn name(&self) -> &'static str {
        IDENTITY
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }
}

/// An ordered, name-indexed set of compression pools.
///
/// Used to decompress responses based on their declared content encoding.
/// The identity pool is always present.
#[derive(Debug, Clone)]
pub struct PoolRegistry {
    pools: Vec<BoxedPool>,
}

impl PoolRegistry {
    /// Create a registry containing only the identity pool.
    pub fn new() -> Self {
        Self {
            pools: vec![BoxedPool::new(IdentityPool)],
        }
    }

    /// Register a pool. A pool with the same name replaces the earlier entry.
    pub fn register<P: CompressionPool>(&mut self, pool: P) {
        let boxed = BoxedPool::new(pool);
        if let Some(existing) = self.pools.iter_mut().find(|p| p.name() == boxed.name()) {
            *existing = boxed;
        } else {
            self.pools.push(boxed);
        }
    }

    /// Look up a pool by its encoding name.
    pub fn get(&self, name: &str) -> Option<&BoxedPool> {
        self.pools.iter().find(|p| p.name() == name)
    }

    /// Names to advertise in accept-encoding negotiation.
    ///
    /// Identity is implied by the protocols and is never listed.
    pub fn accept_encoding_names(&self) -> Vec<&'static str> {
        self.pools
            .iter()
            .map(|p| p.name())
            .filter(|name| *name != IDENTITY)
            .collect()
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(GzipPool::default());
        registry
    }
}

/// Outbound request compression policy.
///
/// Messages smaller than `min_bytes` are sent uncompressed.
#[derive(Debug, Clone)]
pub struct RequestCompression {
    /// The minimum number of bytes a message must be for compression to apply.
    pub min_bytes: usize,
    /// The pool used to compress outbound messages.
    pub pool: BoxedPool,
}

impl RequestCompression {
    /// Create a new policy with the given threshold and pool.
    pub fn new<P: CompressionPool>(min_bytes: usize, pool: P) -> Self {
        Self {
            min_bytes,
            pool: BoxedPool::new(pool),
        }
    }

    /// Whether a payload of this size should be compressed.
    pub fn should_compress(&self, payload: &[u8]) -> bool {
        payload.len() >= self.min_bytes
    }
}
